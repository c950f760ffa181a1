// src/orchestrator.rs
use anyhow::Result;
use log::{debug, error, info};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::connection::{ConnectionState, LiveClient};
use crate::listener::{Listener, ListenerKey};
use crate::monitors::{AnnouncementMonitor, ParticipantCounts};
use crate::protocol::{EventId, MessageKind};

/// Wires the live client to the monitors for the command line tool.
pub struct Orchestrator {
    client: Arc<LiveClient>,
    events: Vec<EventId>,
    counts: ParticipantCounts,
    registrations: Vec<(ListenerKey, Listener)>,
    handles: Vec<JoinHandle<()>>,
}

impl Orchestrator {
    pub fn new(client: LiveClient, events: Vec<EventId>) -> Self {
        Self {
            client: Arc::new(client),
            events,
            counts: ParticipantCounts::new(),
            registrations: Vec::new(),
            handles: Vec::new(),
        }
    }

    pub fn counts(&self) -> &ParticipantCounts {
        &self.counts
    }

    fn register(&mut self, key: impl Into<ListenerKey>, listener: Listener) {
        let key = key.into();
        self.client.add_listener(key.clone(), &listener);
        self.registrations.push((key, listener));
    }

    pub fn setup_monitors(&mut self) {
        info!("Setting up live monitors...");

        // 1) Live participant counts
        let counts = self.counts.create_listener();
        self.register(MessageKind::ParticipantCount, counts);

        // 2) Publish/cancel announcements, logged from their own task
        let (announcement_tx, mut announcement_rx) = mpsc::unbounded_channel();
        let announcements = AnnouncementMonitor::new(announcement_tx).create_listener();
        for kind in AnnouncementMonitor::KINDS {
            self.register(kind, announcements.clone());
        }
        self.handles.push(tokio::spawn(async move {
            while let Some(announcement) = announcement_rx.recv().await {
                info!("{}: {}", announcement.title, announcement.message);
            }
            debug!("Announcement logger stopped");
        }));

        // 3) Raw traffic at debug level
        let everything = Listener::new("traffic log", |message| {
            debug!("Live {} {}", message.kind(), message.payload_json());
            Ok(())
        });
        self.register(ListenerKey::Wildcard, everything);

        // 4) Live/offline transitions
        let mut state_rx = self.client.watch_state();
        self.handles.push(tokio::spawn(async move {
            let mut live = false;
            while state_rx.changed().await.is_ok() {
                let state = *state_rx.borrow_and_update();
                if state == ConnectionState::Stopped {
                    break;
                }
                let now_live = state == ConnectionState::Open;
                if now_live != live {
                    live = now_live;
                    info!("Realtime channel {}", if live { "live" } else { "offline" });
                }
            }
        }));
    }

    pub async fn run(mut self) -> Result<()> {
        // Kick off the connection and ask for the requested events
        self.client.start();
        for event_id in &self.events {
            self.client.subscribe(*event_id);
        }
        info!(
            "Following {} event(s) on {}. Press Ctrl+C to stop...",
            self.events.len(),
            self.client.endpoint()
        );

        // Wait for Ctrl+C
        tokio::signal::ctrl_c().await?;

        info!("Shutdown signal received, stopping live client...");
        self.client.stop().await;

        // Every add is paired with a remove; dropping the listeners also
        // closes the announcement channel.
        for (key, listener) in self.registrations.drain(..) {
            self.client.remove_listener(key, listener.id());
        }

        // Give the logger tasks a moment to drain
        let shutdown_timeout = tokio::time::Duration::from_secs(5);
        for handle in self.handles {
            if tokio::time::timeout(shutdown_timeout, handle).await.is_err() {
                error!("Timeout waiting for task to complete, forcing shutdown");
            }
        }

        info!("Live client stopped, shutting down gracefully");
        Ok(())
    }
}
