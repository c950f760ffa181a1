// src/monitors/announcements.rs
use anyhow::{Context, Result, bail};
use tokio::sync::mpsc;

use crate::listener::Listener;
use crate::protocol::{EventCancelled, EventPublished, InboundMessage, MessageKind};

/// Human readable notice for a published or cancelled event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub title: String,
    pub message: String,
}

impl Announcement {
    pub fn published(event: &EventPublished) -> Self {
        let location = event
            .location
            .as_deref()
            .filter(|location| !location.is_empty())
            .unwrap_or("TBA");

        Self {
            title: "New Event Published".to_string(),
            message: format!("{} - {}", event.event_title, location),
        }
    }

    pub fn cancelled(event: &EventCancelled) -> Self {
        let mut message = format!("{} has been cancelled.", event.event_title);
        if let Some(affected) = event.affected_registrations.filter(|n| *n > 0) {
            message.push_str(&format!(" {affected} registration(s) affected."));
        }

        Self {
            title: "Event Cancelled".to_string(),
            message,
        }
    }

    pub fn from_message(message: &InboundMessage) -> Option<Self> {
        match message {
            InboundMessage::EventPublished(event) => Some(Self::published(event)),
            InboundMessage::EventCancelled(event) => Some(Self::cancelled(event)),
            _ => None,
        }
    }
}

/// Forwards publish/cancel broadcasts to a channel as [`Announcement`]s.
pub struct AnnouncementMonitor {
    sender: mpsc::UnboundedSender<Announcement>,
}

impl AnnouncementMonitor {
    /// Message kinds the listener should be registered under.
    pub const KINDS: [MessageKind; 2] = [MessageKind::EventPublished, MessageKind::EventCancelled];

    pub fn new(sender: mpsc::UnboundedSender<Announcement>) -> Self {
        Self { sender }
    }

    pub fn create_listener(self) -> Listener {
        Listener::new("announcements", move |message| self.process(message))
    }

    fn process(&self, message: &InboundMessage) -> Result<()> {
        let Some(announcement) = Announcement::from_message(message) else {
            bail!("No announcement for {}", message.kind());
        };
        self.sender
            .send(announcement)
            .context("Announcement receiver dropped")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn published(location: Option<&str>) -> EventPublished {
        EventPublished {
            event_title: "RustConf".to_string(),
            location: location.map(str::to_string),
            event_id: None,
            start_date: None,
            organizer_name: None,
        }
    }

    #[test]
    fn test_published_falls_back_to_tba() {
        assert_eq!(Announcement::published(&published(Some("Hall A"))).message, "RustConf - Hall A");
        assert_eq!(Announcement::published(&published(None)).message, "RustConf - TBA");
        assert_eq!(Announcement::published(&published(Some(""))).message, "RustConf - TBA");
    }

    #[test]
    fn test_cancelled_mentions_affected_registrations() {
        let mut event = EventCancelled {
            event_title: "RustConf".to_string(),
            affected_registrations: Some(3),
            event_id: None,
        };
        assert_eq!(
            Announcement::cancelled(&event).message,
            "RustConf has been cancelled. 3 registration(s) affected."
        );

        event.affected_registrations = None;
        assert_eq!(Announcement::cancelled(&event).message, "RustConf has been cancelled.");
    }

    #[test]
    fn test_listener_forwards_to_channel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let listener = AnnouncementMonitor::new(tx).create_listener();

        listener
            .handle(&InboundMessage::EventPublished(published(Some("Hall A"))))
            .unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            Announcement {
                title: "New Event Published".to_string(),
                message: "RustConf - Hall A".to_string(),
            }
        );
    }
}
