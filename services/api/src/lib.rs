//! Livewire API Library Crate
//!
//! Configuration, shared state, routing and the WebSocket bridge for the
//! live session gateway. The `api` binary is a thin wrapper around this library.

pub mod config;
pub mod router;
pub mod state;
pub mod ws;
