//! Shared types: the crate error, server replies and transfer parameters.

use std::fmt;
use std::io;
use std::net::AddrParseError;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::status;

/// A shorthand for a Result whose error type is always an FtpError.
pub type Result<T> = ::std::result::Result<T, FtpError>;

/// `FtpError` is a library-global error type to describe the different kinds of
/// errors that might occur while using FTP.
#[derive(Debug, Error)]
pub enum FtpError {
    /// The control connection could not be opened.
    #[error("could not connect to the ftp server: {0}")]
    Unreachable(#[source] io::Error),

    /// The server refused the session or a transfer.
    #[error("{context}: {reply}")]
    Rejected { context: String, reply: Reply },

    /// A command was answered with a code outside the expected set.
    #[error("expected code {expected:?}, got response: {reply}")]
    UnexpectedReply { expected: Vec<u32>, reply: Reply },

    #[error("FTP ConnectionError: {0}")]
    ConnectionError(#[from] io::Error),

    #[error("FTP InvalidResponse: {0}")]
    InvalidResponse(String),

    #[error("FTP InvalidAddress: {0}")]
    InvalidAddress(#[from] AddrParseError),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    InvalidState(String),
}

impl FtpError {
    /// True for failures to establish a session or to store a file.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, FtpError::Unreachable(_) | FtpError::Rejected { .. })
    }

    /// The server reply behind this error, if there is one.
    pub fn reply(&self) -> Option<&Reply> {
        match self {
            FtpError::Rejected { reply, .. } | FtpError::UnexpectedReply { reply, .. } => Some(reply),
            _ => None,
        }
    }

    pub(crate) fn rejected<S: Into<String>>(context: S, reply: Reply) -> FtpError {
        FtpError::Rejected {
            context: context.into(),
            reply,
        }
    }

    /// Turns a reply mismatch into a rejection carrying `context`, leaving other errors alone.
    pub(crate) fn into_rejected<S: Into<String>>(self, context: S) -> FtpError {
        match self {
            FtpError::UnexpectedReply { reply, .. } => FtpError::rejected(context, reply),
            other => other,
        }
    }
}

/// A complete server reply. Multi-line replies keep every line, with the code
/// prefix stripped from the first and last one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u32,
    pub lines: Vec<String>,
}

impl Reply {
    pub fn new<S: Into<String>>(code: u32, line: S) -> Reply {
        Reply {
            code,
            lines: vec![line.into()],
        }
    }

    /// The reply text with lines joined by a newline.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// The text of the final line.
    pub fn last_line(&self) -> &str {
        self.lines.last().map(String::as_str).unwrap_or("")
    }

    pub fn is_positive_completion(&self) -> bool {
        status::is_positive_completion(self.code)
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.text())
    }
}

/// Text Format Control used in `TYPE` command
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FormatControl {
    /// Default text format control (is NonPrint)
    Default,
    /// Non-print (not destined for printing)
    NonPrint,
    /// Telnet format control (\<CR\>, \<FF\>, etc.)
    Telnet,
    /// ASA (Fortran) Carriage Control
    Asa,
}

/// File Type used in `TYPE` command
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FileType {
    /// ASCII text (the argument is the text format control)
    Ascii(FormatControl),
    /// EBCDIC text (the argument is the text format control)
    Ebcdic(FormatControl),
    /// Image,
    Image,
    /// Binary (the synonym to Image)
    Binary,
    /// Local format (the argument is the number of bits in one byte on local machine)
    Local(u8),
}

/// Transfer mode used in `MODE` command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Stream,
    Block,
    Compressed,
}

/// Who opens the data connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataConnectionMode {
    /// The client listens and announces itself with `PORT`/`EPRT`.
    Active,
    /// The server listens and announces itself in its `PASV` reply.
    #[default]
    Passive,
}

impl fmt::Display for FormatControl {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FormatControl::Default | FormatControl::NonPrint => f.write_str("N"),
            FormatControl::Telnet => f.write_str("T"),
            FormatControl::Asa => f.write_str("C"),
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FileType::Ascii(fc) => write!(f, "A {}", fc),
            FileType::Ebcdic(fc) => write!(f, "E {}", fc),
            FileType::Image | FileType::Binary => f.write_str("I"),
            FileType::Local(bits) => write!(f, "L {}", bits),
        }
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TransferMode::Stream => f.write_str("S"),
            TransferMode::Block => f.write_str("B"),
            TransferMode::Compressed => f.write_str("C"),
        }
    }
}
