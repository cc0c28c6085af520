//! Gateway: wires the live collaborators from config and serves the event
//! webhook.
//!
//! Lifecycle:
//! 1. Build the dispatcher graph from `ParleyConfig` (`services`)
//! 2. Bind the HTTP listener
//! 3. Route webhook deliveries to `SessionDispatcher::handle_inbound_event`
//! 4. Stop on Ctrl-C

pub mod server;
pub mod services;

pub use {
    server::{AppState, build_gateway_app, start_gateway},
    services::GatewayServices,
};
