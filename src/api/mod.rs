//! Real-time API: authentication, connection gateway, WebSocket transport,
//! and the HTTP server shell.

pub mod auth;
pub mod gateway;
pub mod server;
pub mod websocket;

pub use auth::{mask_subject, Identity, StaticTokenValidator, TokenValidator};
pub use gateway::{Ack, BetRequest, ConnectionGateway, ConnectionState};
pub use server::{ApiServer, AppState};
