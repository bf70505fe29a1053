//! Shared domain primitives.

mod errors;

pub use errors::{DomainError, ErrorCode};
