//! Identification strings (RFC 4253 §4.2)
//!
//! `SSH-protoversion-softwareversion SP comments CR LF`

use crate::{ProtocolError, ProtocolResult};

/// Maximum identification line length, including CR LF
pub const MAX_IDENTIFICATION_LENGTH: usize = 255;

/// Protocol versions this implementation speaks
const COMPATIBLE_VERSIONS: [&str; 2] = ["2.0", "1.99"];

/// A parsed identification string, stored without its line terminator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identification {
    line: String,
}

impl Identification {
    /// Build our own identification from a software version token
    pub fn local(software_version: &str) -> ProtocolResult<Self> {
        Self::parse(&format!("SSH-2.0-{}", software_version))
    }

    /// Parse one line (terminator already stripped)
    pub fn parse(line: &str) -> ProtocolResult<Self> {
        if line.len() + 2 > MAX_IDENTIFICATION_LENGTH {
            return Err(ProtocolError::IdentificationTooLong {
                max: MAX_IDENTIFICATION_LENGTH,
            });
        }
        if line.chars().any(|c| !c.is_ascii() || c == '\0' || c == '\r' || c == '\n') {
            return Err(ProtocolError::MalformedIdentification(
                "non-printable characters".into(),
            ));
        }

        let rest = line
            .strip_prefix("SSH-")
            .ok_or_else(|| ProtocolError::MalformedIdentification(line.to_string()))?;
        let (proto, software) = rest
            .split_once('-')
            .ok_or_else(|| ProtocolError::MalformedIdentification(line.to_string()))?;
        let software = software.split(' ').next().unwrap_or_default();
        if software.is_empty() {
            return Err(ProtocolError::MalformedIdentification(line.to_string()));
        }
        if !COMPATIBLE_VERSIONS.contains(&proto) {
            return Err(ProtocolError::IncompatibleVersion(proto.to_string()));
        }

        Ok(Self {
            line: line.to_string(),
        })
    }

    /// Bytes hashed into the exchange hash (no CR LF)
    pub fn as_bytes(&self) -> &[u8] {
        self.line.as_bytes()
    }

    /// Line as sent on the wire
    pub fn to_wire(&self) -> Vec<u8> {
        let mut wire = Vec::with_capacity(self.line.len() + 2);
        wire.extend_from_slice(self.line.as_bytes());
        wire.extend_from_slice(b"\r\n");
        wire
    }

    pub fn software_version(&self) -> &str {
        self.line
            .splitn(3, '-')
            .nth(2)
            .and_then(|rest| rest.split(' ').next())
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Identification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.line)
    }
}
