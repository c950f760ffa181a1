// src/protocol.rs
//! Wire format of the realtime channel.
//!
//! Every frame is a JSON envelope `{ "type": ..., "payload": ... }`. The broker
//! may coalesce several queued envelopes into one text frame, one per line.
//! Any envelope that parses is delivered; a payload that does not fit the
//! struct for its kind arrives as [`InboundMessage::Raw`].

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Identifier of an event, used as the subscription topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub i64);

impl From<i64> for EventId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicPayload {
    pub event_id: EventId,
}

/// Messages the client writes to the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum OutboundMessage {
    Subscribe(TopicPayload),
    Unsubscribe(TopicPayload),
    Ping,
}

impl OutboundMessage {
    pub fn subscribe(event_id: EventId) -> Self {
        Self::Subscribe(TopicPayload { event_id })
    }

    pub fn unsubscribe(event_id: EventId) -> Self {
        Self::Unsubscribe(TopicPayload { event_id })
    }

    pub fn to_frame(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Declared type of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKind {
    ParticipantCount,
    EventPublished,
    EventCancelled,
    Connected,
    Subscribed,
    Pong,
    Other(String),
}

impl MessageKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::ParticipantCount => "participant.count",
            Self::EventPublished => "event.published",
            Self::EventCancelled => "event.cancelled",
            Self::Connected => "connected",
            Self::Subscribed => "subscribed",
            Self::Pong => "pong",
            Self::Other(kind) => kind,
        }
    }
}

impl From<&str> for MessageKind {
    fn from(kind: &str) -> Self {
        match kind {
            "participant.count" => Self::ParticipantCount,
            "event.published" => Self::EventPublished,
            "event.cancelled" => Self::EventCancelled,
            "connected" => Self::Connected,
            "subscribed" => Self::Subscribed,
            "pong" => Self::Pong,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationAction {
    Registered,
    Cancelled,
}

/// Live registration count for a subscribed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantCount {
    pub event_id: EventId,
    pub count: i64,
    pub action: RegistrationAction,
    pub user_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_title: Option<String>,
}

/// Broadcast when an event becomes visible to everyone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPublished {
    pub event_title: String,
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<EventId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organizer_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventCancelled {
    pub event_title: String,
    pub affected_registrations: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<EventId>,
}

/// Welcome frame sent by the broker right after the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connected {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub total_clients: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscribed {
    pub event_id: EventId,
    #[serde(default)]
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

/// A decoded inbound envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    ParticipantCount(ParticipantCount),
    EventPublished(EventPublished),
    EventCancelled(EventCancelled),
    Connected(Connected),
    Subscribed(Subscribed),
    Pong(Pong),
    /// Unknown kinds, and known kinds whose payload has an unexpected shape.
    Raw { kind: MessageKind, payload: Value },
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is not a valid envelope: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

impl InboundMessage {
    /// Decode a single envelope.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let Envelope { kind, payload } = serde_json::from_str(text)?;

        let message = match MessageKind::from(kind.as_str()) {
            kind @ MessageKind::ParticipantCount => typed(kind, payload, Self::ParticipantCount),
            kind @ MessageKind::EventPublished => typed(kind, payload, Self::EventPublished),
            kind @ MessageKind::EventCancelled => typed(kind, payload, Self::EventCancelled),
            kind @ MessageKind::Connected => typed(kind, payload, Self::Connected),
            kind @ MessageKind::Subscribed => typed(kind, payload, Self::Subscribed),
            kind @ MessageKind::Pong => typed(kind, payload, Self::Pong),
            kind @ MessageKind::Other(_) => Self::Raw { kind, payload },
        };

        Ok(message)
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::ParticipantCount(_) => MessageKind::ParticipantCount,
            Self::EventPublished(_) => MessageKind::EventPublished,
            Self::EventCancelled(_) => MessageKind::EventCancelled,
            Self::Connected(_) => MessageKind::Connected,
            Self::Subscribed(_) => MessageKind::Subscribed,
            Self::Pong(_) => MessageKind::Pong,
            Self::Raw { kind, .. } => kind.clone(),
        }
    }

    /// The payload as plain JSON, for logging.
    pub fn payload_json(&self) -> Value {
        let encoded = match self {
            Self::ParticipantCount(payload) => serde_json::to_value(payload),
            Self::EventPublished(payload) => serde_json::to_value(payload),
            Self::EventCancelled(payload) => serde_json::to_value(payload),
            Self::Connected(payload) => serde_json::to_value(payload),
            Self::Subscribed(payload) => serde_json::to_value(payload),
            Self::Pong(payload) => serde_json::to_value(payload),
            Self::Raw { payload, .. } => return payload.clone(),
        };
        encoded.unwrap_or(Value::Null)
    }
}

fn typed<T: DeserializeOwned>(
    kind: MessageKind,
    payload: Value,
    wrap: impl FnOnce(T) -> InboundMessage,
) -> InboundMessage {
    match T::deserialize(&payload) {
        Ok(body) => wrap(body),
        Err(e) => {
            warn!("Unexpected {kind} payload, delivering it raw: {e}");
            InboundMessage::Raw { kind, payload }
        }
    }
}

/// Split a text frame into envelopes and decode each one independently.
pub fn decode_frame(frame: &str) -> impl Iterator<Item = Result<InboundMessage, FrameError>> + '_ {
    frame
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(InboundMessage::decode)
}
