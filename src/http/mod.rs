//! HTTP API for controlling the replay recorder
//!
//! This module provides a REST API in place of on-screen controls:
//! - POST /replay/start - Start capturing
//! - POST /replay/stop - Stop capturing
//! - GET /replay/status - Capture state and buffer statistics
//! - PUT /replay/capacity - Change the buffer capacity
//! - POST /replay/clear - Drop the buffered segments
//! - GET /replay/events - Server-sent capture notifications
//! - POST /replay/save - Download the buffer as one file
//! - POST /replay/save/disk - Write the buffer to the output directory
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
