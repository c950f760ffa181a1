// src/connection/manager.rs
use anyhow::{Context, Result};
use backoff::backoff::Backoff;
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::{
    collections::HashSet,
    mem,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tokio::{
    sync::{
        mpsc::{self, UnboundedReceiver, UnboundedSender},
        watch,
    },
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use super::retry::ReconnectBackoff;
use super::subscription::SubscriptionRegistry;
use super::transport::{Connector, FrameSink, Transport, WsConnector};
use crate::listener::{Dispatcher, Listener, ListenerId, ListenerKey};
use crate::protocol::{EventId, OutboundMessage};

pub const DEFAULT_RECONNECT_FLOOR: Duration = Duration::from_millis(1000);
pub const DEFAULT_RECONNECT_CEILING: Duration = Duration::from_millis(30_000);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(30_000);

// Upper bound on flushing the close handshake during teardown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Timing parameters of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub reconnect_floor: Duration,
    pub reconnect_ceiling: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            reconnect_floor: DEFAULT_RECONNECT_FLOOR,
            reconnect_ceiling: DEFAULT_RECONNECT_CEILING,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

/// Lifecycle of the shared connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    ReconnectScheduled,
    Stopped,
}

// Commands from the client handle to the manager task
#[derive(Debug)]
enum ManagerCommand {
    Subscribe(EventId),
    Unsubscribe(EventId),
}

// How an open session ended
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Closed,
    Stopped,
}

enum Lifecycle {
    Ready {
        commands: UnboundedReceiver<ManagerCommand>,
        state_tx: watch::Sender<ConnectionState>,
    },
    Running(JoinHandle<()>),
    Stopped,
}

/// Handle to the application's single realtime connection.
///
/// Construct once, share by reference, call [`LiveClient::start`] when the
/// application comes up and [`LiveClient::stop`] when it goes away. None of the
/// operations fail: connection problems are retried forever and only show up
/// through [`LiveClient::is_connected`].
pub struct LiveClient {
    endpoint: String,
    timings: Timings,
    connector: Arc<dyn Connector>,
    registry: SubscriptionRegistry,
    dispatcher: Dispatcher,
    command_tx: UnboundedSender<ManagerCommand>,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown: CancellationToken,
    lifecycle: Mutex<Lifecycle>,
}

impl LiveClient {
    pub fn new(endpoint: impl Into<String>, timings: Timings, connector: impl Connector) -> Self {
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);

        Self {
            endpoint: endpoint.into(),
            timings,
            connector: Arc::new(connector),
            registry: SubscriptionRegistry::new(),
            dispatcher: Dispatcher::new(),
            command_tx,
            state_rx,
            shutdown: CancellationToken::new(),
            lifecycle: Mutex::new(Lifecycle::Ready { commands, state_tx }),
        }
    }

    /// Client speaking WebSocket to `endpoint`.
    pub fn with_websocket(endpoint: impl Into<String>, timings: Timings) -> Self {
        Self::new(endpoint, timings, WsConnector)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Spawn the connection task. Must be called inside a tokio runtime.
    /// Calling it again, or after [`LiveClient::stop`], does nothing.
    pub fn start(&self) {
        let mut lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);

        match mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
            Lifecycle::Ready { commands, state_tx } => {
                let manager = ConnectionManager {
                    endpoint: self.endpoint.clone(),
                    timings: self.timings,
                    connector: Arc::clone(&self.connector),
                    registry: self.registry.clone(),
                    dispatcher: self.dispatcher.clone(),
                    commands,
                    state_tx,
                    shutdown: self.shutdown.clone(),
                    backoff: ReconnectBackoff::new(self.timings.reconnect_floor, self.timings.reconnect_ceiling),
                };
                *lifecycle = Lifecycle::Running(tokio::spawn(manager.run()));
            }
            other => {
                debug!("Connection already started or stopped, ignoring start");
                *lifecycle = other;
            }
        }
    }

    /// Tear the connection down for good: pending reconnect and heartbeat
    /// timers are cancelled and the socket is closed without triggering a
    /// reconnect.
    pub async fn stop(&self) {
        self.shutdown.cancel();

        let previous = {
            let mut lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
            mem::replace(&mut *lifecycle, Lifecycle::Stopped)
        };

        match previous {
            Lifecycle::Running(handle) => {
                if let Err(e) = handle.await {
                    error!("Connection manager task failed: {e}");
                }
            }
            Lifecycle::Ready { state_tx, .. } => {
                state_tx.send_replace(ConnectionState::Stopped);
            }
            Lifecycle::Stopped => {}
        }
    }

    /// Ask for live updates on an event. Sent right away when connected,
    /// otherwise on the next successful connect.
    pub fn subscribe(&self, event_id: impl Into<EventId>) {
        let event_id = event_id.into();
        if self.registry.insert(event_id) {
            debug!("Subscribed to event {event_id}");
        }
        self.command(ManagerCommand::Subscribe(event_id));
    }

    pub fn unsubscribe(&self, event_id: impl Into<EventId>) {
        let event_id = event_id.into();
        if self.registry.remove(event_id) {
            debug!("Unsubscribed from event {event_id}");
        }
        self.command(ManagerCommand::Unsubscribe(event_id));
    }

    /// Register `listener` for one message kind, or for everything with
    /// [`ListenerKey::Wildcard`]. Callers must remove it again on teardown.
    pub fn add_listener(&self, key: impl Into<ListenerKey>, listener: &Listener) -> ListenerId {
        self.dispatcher.add_listener(key, listener)
    }

    pub fn remove_listener(&self, key: impl Into<ListenerKey>, id: ListenerId) {
        self.dispatcher.remove_listener(key, id);
    }

    pub fn is_connected(&self) -> bool {
        *self.state_rx.borrow() == ConnectionState::Open
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn subscriptions(&self) -> Vec<EventId> {
        self.registry.snapshot()
    }

    fn command(&self, command: ManagerCommand) {
        if let Err(e) = self.command_tx.send(command) {
            debug!("Connection manager gone, dropping {:?}", e.0);
        }
    }
}

/// The task owning the socket, the heartbeat and the reconnect schedule.
struct ConnectionManager {
    endpoint: String,
    timings: Timings,
    connector: Arc<dyn Connector>,
    registry: SubscriptionRegistry,
    dispatcher: Dispatcher,
    commands: UnboundedReceiver<ManagerCommand>,
    state_tx: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
    backoff: ReconnectBackoff,
}

impl ConnectionManager {
    async fn run(mut self) {
        info!("Connection manager started for {}", self.endpoint);

        'manager: loop {
            // Dial the endpoint
            self.set_state(ConnectionState::Connecting);
            info!("Attempting to connect to {}", self.endpoint);

            let connect = self.connector.connect(&self.endpoint);
            tokio::pin!(connect);

            let outcome = loop {
                tokio::select! {
                    biased;
                    () = self.shutdown.cancelled() => break 'manager,
                    result = &mut connect => break result,
                    command = self.commands.recv() => {
                        if !self.discard_offline(command) {
                            break 'manager;
                        }
                    }
                }
            };

            // Serve the session until it drops or we are told to stop
            match outcome {
                Ok(transport) => {
                    if self.run_session(transport).await == SessionEnd::Stopped {
                        break 'manager;
                    }
                }
                Err(e) => swallow("Failed to connect", &e),
            }

            // Back off before the next attempt
            if !self.wait_for_reconnect().await {
                break 'manager;
            }
        }

        self.set_state(ConnectionState::Stopped);
        info!("Connection manager task exiting");
    }

    async fn run_session(&mut self, transport: Transport) -> SessionEnd {
        let Transport { mut sink, mut stream } = transport;

        // Anything still queued was issued before the socket opened; the
        // replay below covers it.
        while let Ok(command) = self.commands.try_recv() {
            self.discard_offline(Some(command));
        }

        self.backoff.reset();
        self.set_state(ConnectionState::Open);
        info!("Connected to {}", self.endpoint);

        // Topics the server has been told about during this session
        let mut announced = HashSet::new();

        let end = 'session: {
            // Tell the server about every topic we hold
            for message in self.registry.replay() {
                if let Err(e) = send(&mut sink, &message).await {
                    swallow("Failed to replay subscription", &e);
                    break 'session SessionEnd::Closed;
                }
                if let OutboundMessage::Subscribe(topic) = message {
                    announced.insert(topic.event_id);
                }
            }

            // First ping one full period after open
            let period = self.timings.heartbeat_interval.max(Duration::from_millis(1));
            let mut heartbeat = time::interval_at(Instant::now() + period, period);
            heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

            // Process frames, commands and heartbeats
            loop {
                tokio::select! {
                    biased;
                    () = self.shutdown.cancelled() => break 'session SessionEnd::Stopped,
                    frame = stream.next() => match frame {
                        Some(Ok(text)) => {
                            debug!("<- {text}");
                            self.dispatcher.dispatch_frame(&text);
                        }
                        Some(Err(e)) => {
                            swallow("Connection error", &e);
                            break 'session SessionEnd::Closed;
                        }
                        None => {
                            info!("Connection closed by server");
                            break 'session SessionEnd::Closed;
                        }
                    },
                    command = self.commands.recv() => {
                        let Some(command) = command else {
                            info!("Client handle dropped, shutting down");
                            break 'session SessionEnd::Stopped;
                        };
                        if let Err(e) = self.apply_online(command, &mut sink, &mut announced).await {
                            swallow("Failed to write command", &e);
                            break 'session SessionEnd::Closed;
                        }
                    }
                    _ = heartbeat.tick() => {
                        if let Err(e) = send(&mut sink, &OutboundMessage::Ping).await {
                            swallow("Failed to send heartbeat", &e);
                            break 'session SessionEnd::Closed;
                        }
                    }
                }
            }
        };

        // Only a deliberate stop closes the socket politely
        if end == SessionEnd::Stopped {
            match time::timeout(CLOSE_TIMEOUT, sink.close()).await {
                Ok(Ok(())) => debug!("Socket closed"),
                Ok(Err(e)) => swallow("Failed to close socket", &e),
                Err(_) => debug!("Timed out closing socket"),
            }
        }

        end
    }

    async fn apply_online(
        &self,
        command: ManagerCommand,
        sink: &mut FrameSink,
        announced: &mut HashSet<EventId>,
    ) -> Result<()> {
        match command {
            ManagerCommand::Subscribe(event_id) => {
                if self.registry.contains(event_id) && announced.insert(event_id) {
                    send(sink, &OutboundMessage::subscribe(event_id)).await?;
                }
            }
            ManagerCommand::Unsubscribe(event_id) => {
                announced.remove(&event_id);
                send(sink, &OutboundMessage::unsubscribe(event_id)).await?;
            }
        }
        Ok(())
    }

    // Returns false when the manager should stop.
    async fn wait_for_reconnect(&mut self) -> bool {
        let delay = self
            .backoff
            .next_backoff()
            .unwrap_or(self.timings.reconnect_ceiling);
        self.set_state(ConnectionState::ReconnectScheduled);
        info!("Will attempt reconnection in {} ms", delay.as_millis());

        let sleep = time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => return false,
                () = &mut sleep => return true,
                command = self.commands.recv() => {
                    if !self.discard_offline(command) {
                        return false;
                    }
                }
            }
        }
    }

    // Sends are never queued while offline; the registry already holds the
    // intent for the next replay. Returns false once the client is gone.
    fn discard_offline(&self, command: Option<ManagerCommand>) -> bool {
        match command {
            Some(command) => {
                debug!("Not connected, not sending {command:?}");
                true
            }
            None => {
                info!("Client handle dropped, shutting down");
                false
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!("Connection state {previous:?} -> {state:?}");
        }
    }
}

async fn send(sink: &mut FrameSink, message: &OutboundMessage) -> Result<()> {
    let frame = message.to_frame().context("Failed to encode frame")?;
    debug!("-> {frame}");
    sink.send(frame).await.context("Failed to write frame")
}

// Connection trouble never reaches callers; it ends up here.
fn swallow(context: &str, error: &anyhow::Error) {
    warn!("{context}: {error:#}");
}
