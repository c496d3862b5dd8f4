//! Purpose: Client-side OTAI interface that forwards object operations to a remote backend.
//! Exports: `api` (facade), `core` (object model, ids, codec, channel), `config`, `sim`.
//! Role: Library backing the `otai-remote` binary and its integration tests.
//! Invariants: All backend traffic goes through one command channel per initialized interface.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
pub mod config;
pub mod core;
pub mod sim;
