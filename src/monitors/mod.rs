// src/monitors/mod.rs
pub mod announcements;
pub mod participants;

pub use announcements::{Announcement, AnnouncementMonitor};
pub use participants::ParticipantCounts;
