// src/monitors/participants.rs
use anyhow::{Result, bail};
use log::info;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::listener::Listener;
use crate::protocol::{EventId, InboundMessage, ParticipantCount, RegistrationAction};

/// Latest live participant count per event, fed by `participant.count`.
#[derive(Debug, Clone, Default)]
pub struct ParticipantCounts {
    counts: Arc<RwLock<HashMap<EventId, i64>>>,
}

impl ParticipantCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listener to register under `participant.count`.
    pub fn create_listener(&self) -> Listener {
        let monitor = self.clone();
        Listener::new("participant counts", move |message| monitor.process(message))
    }

    pub fn count(&self, event_id: EventId) -> Option<i64> {
        self.counts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event_id)
            .copied()
    }

    fn process(&self, message: &InboundMessage) -> Result<()> {
        match message {
            InboundMessage::ParticipantCount(update) => {
                self.record(update);
                Ok(())
            }
            other => bail!("Expected participant.count but got {}", other.kind()),
        }
    }

    fn record(&self, update: &ParticipantCount) {
        let verb = match update.action {
            RegistrationAction::Registered => "registered for",
            RegistrationAction::Cancelled => "cancelled from",
        };
        info!(
            "{} {} event {} ({} participants)",
            update.user_name, verb, update.event_id, update.count
        );

        self.counts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(update.event_id, update.count);
    }
}
