//! HTTP and WebSocket server
//!
//! - GET /ws - Client channel: JSON commands and binary audio in, transcript events out
//! - GET /api/health - Health check
//! - GET /api/sessions - Live relays and their statistics
//! - GET /api/sessions/:id/transcript - Transcript accumulated by a relay

mod handlers;
mod routes;
mod socket;
mod state;

pub use routes::create_router;
pub use state::AppState;
