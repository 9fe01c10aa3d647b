//! Domain Layer - Core subscription and frame types.
//!
//! This layer contains the stream classes, subscription descriptors,
//! option surface, symbol mapping and frame decoding. Nothing here
//! performs I/O or spawns tasks.

/// Inbound frame types and the per-class decode/filter pipeline.
pub mod streaming;

/// Subscription descriptors, stream classes and caller options.
pub mod subscription;

/// Symbol to channel-name mapping.
pub mod symbol;
