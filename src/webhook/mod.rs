//! Webhook server routes.

mod routes;

pub use routes::{BridgeState, bridge_routes};
