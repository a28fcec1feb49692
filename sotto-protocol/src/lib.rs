//! Sotto stdout line protocol
//!
//! The helper process talks to its host over a newline-delimited text
//! protocol on stdout:
//!
//! - `READY`           - capture and recognition started successfully
//! - `PARTIAL:<text>`  - interim recognition result
//! - `FINAL:<text>`    - final recognition result
//! - `LEVEL:<float>`   - mic input level (0.000-1.000)
//! - `ERROR:<msg>`     - a surfaced error
//!
//! The host reads the stream incrementally, so every line is flushed as soon
//! as it is written.

pub mod error;
pub mod line;
pub mod writer;

pub use error::{ProtocolError, Result};
pub use line::ProtocolLine;
pub use writer::LineWriter;
