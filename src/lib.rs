//! Billing Sync - payment provider webhook reconciliation service.
//!
//! Receives signed webhook deliveries, records them durably for
//! idempotency, and reconciles local billing state against what the
//! provider reports.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
