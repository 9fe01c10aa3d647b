//! Shared helpers: an in-memory transport the tests drive by hand.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use bitkub_stream::{
    HeartbeatConfig, MessageCallback, ReadyState, ReconnectConfig, StreamFrame, StreamManager,
    StreamManagerConfig, TransportConnector, TransportError, TransportEvent, TransportHandle,
    TransportPair,
};

pub const BASE_URL: &str = "wss://stream.test/websocket-api/";

/// Remote end of one fake transport.
pub struct FakeRemote {
    pub url: String,
    events: mpsc::Sender<TransportEvent>,
    state: Arc<Mutex<ReadyState>>,
    pings: Arc<AtomicUsize>,
}

impl FakeRemote {
    pub async fn open(&self) {
        *self.state.lock() = ReadyState::Open;
        let _ = self.events.send(TransportEvent::Open).await;
    }

    pub async fn message(&self, text: &str) {
        let _ = self
            .events
            .send(TransportEvent::Message(text.to_string()))
            .await;
    }

    pub async fn pong(&self) {
        let _ = self.events.send(TransportEvent::Pong).await;
    }

    pub async fn error(&self, error: &str) {
        let _ = self
            .events
            .send(TransportEvent::Error(error.to_string()))
            .await;
    }

    pub async fn close(&self, code: Option<u16>, reason: &str) {
        *self.state.lock() = ReadyState::Closed;
        let _ = self
            .events
            .send(TransportEvent::Close {
                code,
                reason: reason.to_string(),
            })
            .await;
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn ready_state(&self) -> ReadyState {
        *self.state.lock()
    }
}

struct FakeHandle {
    events: mpsc::Sender<TransportEvent>,
    state: Arc<Mutex<ReadyState>>,
    pings: Arc<AtomicUsize>,
}

impl TransportHandle for FakeHandle {
    fn ready_state(&self) -> ReadyState {
        *self.state.lock()
    }

    fn ping(&self) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        self.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn terminate(&self) {
        let mut state = self.state.lock();
        if matches!(*state, ReadyState::Closing | ReadyState::Closed) {
            return;
        }
        *state = ReadyState::Closed;
        let _ = self.events.try_send(TransportEvent::Close {
            code: Some(1006),
            reason: String::new(),
        });
    }
}

/// Connector whose transports only move when a test tells them to.
#[derive(Default)]
pub struct FakeConnector {
    remotes: Mutex<Vec<Arc<FakeRemote>>>,
    open_limit: Mutex<Option<usize>>,
    refused: AtomicUsize,
}

impl FakeConnector {
    /// Refuse every open once `limit` transports exist.
    pub fn refuse_after(&self, limit: usize) {
        *self.open_limit.lock() = Some(limit);
    }

    pub fn refused(&self) -> usize {
        self.refused.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.remotes.lock().len()
    }

    pub fn remote(&self, index: usize) -> Arc<FakeRemote> {
        Arc::clone(&self.remotes.lock()[index])
    }

    pub fn last(&self) -> Arc<FakeRemote> {
        Arc::clone(self.remotes.lock().last().expect("a transport was opened"))
    }

    pub fn urls(&self) -> Vec<String> {
        self.remotes.lock().iter().map(|r| r.url.clone()).collect()
    }
}

impl TransportConnector for FakeConnector {
    fn open(&self, url: &str) -> Result<TransportPair, TransportError> {
        if self
            .open_limit
            .lock()
            .is_some_and(|limit| self.remotes.lock().len() >= limit)
        {
            self.refused.fetch_add(1, Ordering::SeqCst);
            return Err(TransportError::ChannelClosed);
        }

        let (tx, rx) = mpsc::channel(64);
        let state = Arc::new(Mutex::new(ReadyState::Connecting));
        let pings = Arc::new(AtomicUsize::new(0));

        let handle = FakeHandle {
            events: tx.clone(),
            state: Arc::clone(&state),
            pings: Arc::clone(&pings),
        };
        self.remotes.lock().push(Arc::new(FakeRemote {
            url: url.to_string(),
            events: tx,
            state,
            pings,
        }));

        Ok(TransportPair::new(Arc::new(handle), rx))
    }
}

/// Manager over a fake connector: immediate reconnects, hour-long heartbeat.
pub fn manager() -> (StreamManager, Arc<FakeConnector>) {
    manager_with_heartbeat(Duration::from_secs(3600))
}

pub fn manager_with_heartbeat(interval: Duration) -> (StreamManager, Arc<FakeConnector>) {
    build(HeartbeatConfig::new(interval), ReconnectConfig::immediate())
}

pub fn manager_with_reconnect(reconnect: ReconnectConfig) -> (StreamManager, Arc<FakeConnector>) {
    build(HeartbeatConfig::new(Duration::from_secs(3600)), reconnect)
}

fn build(
    heartbeat: HeartbeatConfig,
    reconnect: ReconnectConfig,
) -> (StreamManager, Arc<FakeConnector>) {
    let connector = Arc::new(FakeConnector::default());
    let config = StreamManagerConfig {
        base_url: BASE_URL.to_string(),
        heartbeat,
        reconnect,
        ..StreamManagerConfig::default()
    };
    let manager = StreamManager::new(config, Arc::clone(&connector) as Arc<dyn TransportConnector>);
    (manager, connector)
}

/// Callback that collects every delivered frame.
pub fn collector() -> (MessageCallback, Arc<Mutex<Vec<StreamFrame>>>) {
    let frames = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&frames);
    let callback: MessageCallback = Arc::new(move |frame: StreamFrame| sink.lock().push(frame));
    (callback, frames)
}

pub fn noop() -> MessageCallback {
    Arc::new(|_| {})
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let polled = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "timed out waiting for {what}");
}

/// Give spawned tasks a chance to run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
