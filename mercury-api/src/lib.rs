pub mod auth;
pub mod handlers;
pub mod metrics;
pub mod server;
pub mod state;
pub mod websocket;

pub use state::ApiState;
