//! Sotto dictation helper
//!
//! Library surface of the helper binary: the session controller state
//! machine, configuration, and the capture authorization gate. The binary
//! in `main.rs` wires these to the real microphone and recognizer service;
//! the integration tests wire them to scripted stand-ins.

pub mod authorization;
pub mod config;
pub mod session;
