pub mod health;
pub mod notes;
pub mod websocket;

// Re-export all handlers for easy route registration
pub use health::{health_handler, health_live_handler, health_ready_handler, metrics_handler};
pub use notes::get_beam_notes;
pub use websocket::beam_websocket_handler;
