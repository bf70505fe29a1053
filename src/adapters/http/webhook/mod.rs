//! Webhook HTTP adapter - provider delivery endpoint.

mod dto;
mod handlers;
mod routes;

pub use handlers::WebhookAppState;
pub use routes::webhook_routes;
