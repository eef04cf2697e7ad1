//! Contact Cadence: escalation engine for outbound contact.

pub mod api;
pub mod cadence;
pub mod config;
pub mod error;
pub mod platform;
pub mod store;
