//! Real-time relay core: per-beam groups, presence, and the
//! per-connection protocol loop.

pub mod handler;
pub mod names;
pub mod protocol;
mod router;
pub mod state;

pub use handler::handle_beam_ws;
pub use state::RelayState;
