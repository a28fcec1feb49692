use std::io::{self, Write};

use crate::line::ProtocolLine;

/// Protocol line writer.
///
/// Flushes after every line: the host reads the pipe incrementally and must
/// never block waiting on a buffered write.
pub struct LineWriter<W: Write> {
    inner: W,
}

impl LineWriter<io::Stdout> {
    /// Writer over this process's stdout.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> LineWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write one event and flush.
    pub fn write(&mut self, line: &ProtocolLine) -> io::Result<()> {
        self.inner.write_all(line.to_wire_line().as_bytes())?;
        self.inner.flush()
    }
}
