//! WebSocket gateway for live sessions.
//!
//! - `protocol`: the JSON messages exchanged with the browser.
//! - `session`: the per-connection bridge between the socket and a live session.

pub mod protocol;
pub mod session;

pub use session::ws_handler;
