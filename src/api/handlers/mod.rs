//! HTTP request handlers.

pub mod health;
pub mod host;
pub mod vms;
