//! Character encodings for the control channel.
//!
//! Commands and replies are text, but RFC 959 never fixed a charset. Servers
//! that advertise `UTF8` in their `FEAT` reply speak UTF-8; everything else is
//! treated as ISO-8859-1, which maps every byte to a character.

use std::fmt;
use std::str::FromStr;

use super::types::FtpError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlEncoding {
    Utf8,
    #[default]
    Latin1,
    Ascii,
}

impl ControlEncoding {
    /// Decodes raw reply bytes. Invalid sequences become U+FFFD.
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            ControlEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            ControlEncoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
            ControlEncoding::Ascii => bytes
                .iter()
                .map(|&b| if b.is_ascii() { b as char } else { '\u{FFFD}' })
                .collect(),
        }
    }

    /// Encodes a command line. Characters outside the charset become `?`.
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            ControlEncoding::Utf8 => text.as_bytes().to_vec(),
            ControlEncoding::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                .collect(),
            ControlEncoding::Ascii => text
                .chars()
                .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
                .collect(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ControlEncoding::Utf8 => "UTF-8",
            ControlEncoding::Latin1 => "ISO-8859-1",
            ControlEncoding::Ascii => "US-ASCII",
        }
    }
}

impl FromStr for ControlEncoding {
    type Err = FtpError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let normalized = name.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "utf-8" | "utf8" => Ok(ControlEncoding::Utf8),
            "iso-8859-1" | "iso8859-1" | "latin1" | "latin-1" | "l1" => Ok(ControlEncoding::Latin1),
            "us-ascii" | "ascii" => Ok(ControlEncoding::Ascii),
            _ => Err(FtpError::InvalidArgument(format!(
                "Unsupported control encoding: {}",
                name
            ))),
        }
    }
}

impl fmt::Display for ControlEncoding {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}
