use crate::error::{ProtocolError, Result};

/// One event on the stdout protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolLine {
    /// Capture and recognition started successfully.
    Ready,
    /// Interim transcription, superseded by the next `Partial` or `Final`.
    Partial(String),
    /// A completed transcription segment.
    Final(String),
    /// Input amplitude proxy in [0.0, 1.0].
    Level(f32),
    /// A surfaced, non-cancellation error.
    Error(String),
}

impl ProtocolLine {
    /// Encode the event as a wire line, trailing newline included.
    pub fn to_wire_line(&self) -> String {
        match self {
            Self::Ready => "READY\n".to_string(),
            Self::Partial(text) => format!("PARTIAL:{}\n", sanitize(text)),
            Self::Final(text) => format!("FINAL:{}\n", sanitize(text)),
            Self::Level(level) => format!("LEVEL:{:.3}\n", level.clamp(0.0, 1.0)),
            Self::Error(message) => format!("ERROR:{}\n", sanitize(message)),
        }
    }

    /// Decode a single line (with or without its trailing newline).
    ///
    /// This is the host side of the protocol; the helper itself only writes.
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\n', '\r']);

        if line == "READY" {
            return Ok(Self::Ready);
        }
        if let Some(text) = line.strip_prefix("PARTIAL:") {
            return Ok(Self::Partial(text.to_string()));
        }
        if let Some(text) = line.strip_prefix("FINAL:") {
            return Ok(Self::Final(text.to_string()));
        }
        if let Some(value) = line.strip_prefix("LEVEL:") {
            let level: f32 = value
                .parse()
                .map_err(|_| ProtocolError::InvalidLevel(value.to_string()))?;
            return Ok(Self::Level(level));
        }
        if let Some(message) = line.strip_prefix("ERROR:") {
            return Ok(Self::Error(message.to_string()));
        }

        Err(ProtocolError::UnknownLine(line.to_string()))
    }
}

/// Payloads are framed by newlines, so embedded CR/LF must not survive.
fn sanitize(text: &str) -> String {
    if text.contains(['\n', '\r']) {
        text.replace(['\n', '\r'], " ")
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_encoding() {
        assert_eq!(ProtocolLine::Ready.to_wire_line(), "READY\n");
    }

    #[test]
    fn test_partial_and_final_encoding() {
        let partial = ProtocolLine::Partial("hello wor".to_string());
        assert_eq!(partial.to_wire_line(), "PARTIAL:hello wor\n");

        let final_line = ProtocolLine::Final("hello world".to_string());
        assert_eq!(final_line.to_wire_line(), "FINAL:hello world\n");
    }

    #[test]
    fn test_level_three_decimal_format() {
        assert_eq!(ProtocolLine::Level(0.5).to_wire_line(), "LEVEL:0.500\n");
        assert_eq!(ProtocolLine::Level(0.1234).to_wire_line(), "LEVEL:0.123\n");
        assert_eq!(ProtocolLine::Level(0.0).to_wire_line(), "LEVEL:0.000\n");
    }

    #[test]
    fn test_level_clamped_to_unit_range() {
        assert_eq!(ProtocolLine::Level(3.7).to_wire_line(), "LEVEL:1.000\n");
        assert_eq!(ProtocolLine::Level(-0.2).to_wire_line(), "LEVEL:0.000\n");
    }

    #[test]
    fn test_embedded_newlines_sanitized() {
        let line = ProtocolLine::Final("first\nsecond\r\nthird".to_string());
        assert_eq!(line.to_wire_line(), "FINAL:first second  third\n");
    }

    #[test]
    fn test_parse_each_variant() {
        assert_eq!(ProtocolLine::parse("READY\n").unwrap(), ProtocolLine::Ready);
        assert_eq!(
            ProtocolLine::parse("PARTIAL:hi").unwrap(),
            ProtocolLine::Partial("hi".to_string())
        );
        assert_eq!(
            ProtocolLine::parse("FINAL:done").unwrap(),
            ProtocolLine::Final("done".to_string())
        );
        assert_eq!(
            ProtocolLine::parse("LEVEL:0.250").unwrap(),
            ProtocolLine::Level(0.25)
        );
        assert_eq!(
            ProtocolLine::parse("ERROR:boom").unwrap(),
            ProtocolLine::Error("boom".to_string())
        );
    }

    #[test]
    fn test_parse_rejects_unknown_lines() {
        assert!(ProtocolLine::parse("HELLO:world").is_err());
        assert!(ProtocolLine::parse("LEVEL:not-a-number").is_err());
    }
}
