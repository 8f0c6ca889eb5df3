//! HTTP API and WebSocket event stream for the round engine

pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod server;
pub mod websocket;

pub use handlers::AppState;
pub use server::{create_app, ApiServer};
pub use websocket::WebSocketManager;
