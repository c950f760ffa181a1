// src/lib.rs
pub mod config;
pub mod connection;
pub mod listener;
pub mod monitors;
pub mod orchestrator;
pub mod protocol;
