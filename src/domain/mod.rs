//! Domain layer - pure business logic, no I/O.

pub mod billing;
pub mod foundation;
