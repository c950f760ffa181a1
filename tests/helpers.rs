// tests/helpers.rs
#![allow(dead_code)]

use anyhow::{Result, anyhow};
use futures::{
    FutureExt,
    channel::{
        mpsc::{self, UnboundedSender},
        oneshot,
    },
    future::{self, BoxFuture},
    sink,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use event_live::connection::{ConnectionState, Connector, LiveClient, Timings, Transport};

pub const ENDPOINT: &str = "ws://live.test/ws";

/// One accepted connection: frames the client wrote, and a handle to feed or
/// close the server side.
#[derive(Clone)]
pub struct MockSession {
    frames: Arc<Mutex<Vec<String>>>,
    inbound: Arc<Mutex<Option<UnboundedSender<Result<String>>>>>,
}

impl MockSession {
    pub fn frames(&self) -> Vec<String> {
        self.frames.lock().unwrap().clone()
    }

    pub fn count(&self, frame: &str) -> usize {
        self.frames.lock().unwrap().iter().filter(|f| f.as_str() == frame).count()
    }

    /// Deliver a text frame from the server.
    pub fn push(&self, frame: &str) {
        if let Some(tx) = self.inbound.lock().unwrap().as_ref() {
            let _ = tx.unbounded_send(Ok(frame.to_string()));
        }
    }

    /// Drop the server side, as a network drop or server restart would.
    pub fn close(&self) {
        self.inbound.lock().unwrap().take();
    }
}

#[derive(Default)]
struct MockState {
    failures_remaining: usize,
    refusing: bool,
    attempts: Vec<Instant>,
    sessions: Vec<MockSession>,
    gate: Option<oneshot::Receiver<()>>,
}

/// Scripted in-memory connector.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` connection attempts.
    pub fn fail_next(&self, count: usize) {
        self.state.lock().unwrap().failures_remaining = count;
    }

    /// Fail every attempt until switched back.
    pub fn refuse(&self, refusing: bool) {
        self.state.lock().unwrap().refusing = refusing;
    }

    /// Hold the next successful handshake open until the returned sender
    /// fires (or is dropped).
    pub fn hold_next(&self) -> oneshot::Sender<()> {
        let (release, gate) = oneshot::channel();
        self.state.lock().unwrap().gate = Some(gate);
        release
    }

    pub fn attempts(&self) -> Vec<Instant> {
        self.state.lock().unwrap().attempts.clone()
    }

    /// Gaps between consecutive connection attempts.
    pub fn attempt_gaps(&self) -> Vec<Duration> {
        self.attempts().windows(2).map(|pair| pair[1] - pair[0]).collect()
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().unwrap().sessions.len()
    }

    pub fn session(&self, index: usize) -> MockSession {
        self.state.lock().unwrap().sessions[index].clone()
    }
}

impl Connector for MockConnector {
    fn connect(&self, _endpoint: &str) -> BoxFuture<'static, Result<Transport>> {
        let mut state = self.state.lock().unwrap();
        state.attempts.push(Instant::now());

        if state.refusing || state.failures_remaining > 0 {
            state.failures_remaining = state.failures_remaining.saturating_sub(1);
            return future::ready(Err(anyhow!("connection refused"))).boxed();
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded::<Result<String>>();
        let frames = Arc::new(Mutex::new(Vec::new()));
        state.sessions.push(MockSession {
            frames: Arc::clone(&frames),
            inbound: Arc::new(Mutex::new(Some(inbound_tx))),
        });

        let outbound = sink::unfold(frames, |frames, frame: String| async move {
            frames.lock().unwrap().push(frame);
            Ok::<_, anyhow::Error>(frames)
        });

        let transport = Transport::new(outbound, inbound_rx);
        match state.gate.take() {
            Some(gate) => async move {
                let _ = gate.await;
                Ok(transport)
            }
            .boxed(),
            None => future::ready(Ok(transport)).boxed(),
        }
    }
}

pub fn new_client(connector: &MockConnector) -> LiveClient {
    LiveClient::new(ENDPOINT, Timings::default(), connector.clone())
}

/// Let the manager task run; with a paused clock this also advances time.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Poll `condition` in small virtual-time steps.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..100_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

pub async fn wait_for_state(client: &LiveClient, state: ConnectionState) {
    eventually(|| client.state() == state).await;
}

pub fn subscribe_frame(event_id: i64) -> String {
    format!(r#"{{"type":"subscribe","payload":{{"eventId":{event_id}}}}}"#)
}

pub fn unsubscribe_frame(event_id: i64) -> String {
    format!(r#"{{"type":"unsubscribe","payload":{{"eventId":{event_id}}}}}"#)
}

pub const PING_FRAME: &str = r#"{"type":"ping"}"#;
