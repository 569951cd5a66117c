//! Control command grammar.
//!
//! Commands travel as one line of text inside a control frame. Verbs are
//! case-insensitive and operands are whitespace-delimited, which means file
//! names with embedded whitespace cannot be expressed on the wire.

use std::fmt;

use crate::error::TransferError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `Size <n>`: client requests a new packet size before any transfer.
    Size(usize),
    /// `New Size - <n>`: server confirmation of a size change, padded to
    /// the new size.
    NewSize(usize),
    /// `Upload <name> <size>`: client offers a file of the declared size.
    Upload { name: String, size: u64 },
    /// `Download <name>`: client requests a file from the send directory.
    Download { name: String },
    /// `Sending <name> <size>`: server will stream the named file.
    Sending { name: String, size: u64 },
    /// `No <name>`: the requested file is absent.
    No { name: String },
    /// `Waiting`: the receiving side is ready for chunks.
    Waiting,
    /// `Upload Done`: end-of-stream terminator, used in both directions.
    UploadDone,
    /// Integrity verdict: all declared bytes arrived.
    Done,
    /// Integrity verdict: fewer bytes than declared arrived.
    Corrupted,
    Disconnect,
    Disconnected,
}

impl Command {
    pub fn parse(text: &str) -> Result<Self, TransferError> {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let mismatch = || TransferError::Protocol {
            expected: "a protocol command",
            got: text.trim().to_string(),
        };
        let verb = tokens.first().ok_or_else(mismatch)?.to_ascii_lowercase();
        match (verb.as_str(), &tokens[1..]) {
            ("size", [n]) => Ok(Command::Size(n.parse().map_err(|_| mismatch())?)),
            ("new", [size, "-", n]) if size.eq_ignore_ascii_case("size") => {
                Ok(Command::NewSize(n.parse().map_err(|_| mismatch())?))
            }
            ("upload", [done]) if done.eq_ignore_ascii_case("done") => Ok(Command::UploadDone),
            ("upload", [name, size]) => Ok(Command::Upload {
                name: name.to_string(),
                size: size.parse().map_err(|_| mismatch())?,
            }),
            ("download", [name]) => Ok(Command::Download {
                name: name.to_string(),
            }),
            ("sending", [name, size]) => Ok(Command::Sending {
                name: name.to_string(),
                size: size.parse().map_err(|_| mismatch())?,
            }),
            ("no", [name]) => Ok(Command::No {
                name: name.to_string(),
            }),
            ("waiting", []) => Ok(Command::Waiting),
            ("done", []) => Ok(Command::Done),
            ("corrupted", []) => Ok(Command::Corrupted),
            ("disconnect", []) => Ok(Command::Disconnect),
            ("disconnected", []) => Ok(Command::Disconnected),
            _ => Err(mismatch()),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Size(n) => write!(f, "Size {n}"),
            Command::NewSize(n) => write!(f, "New Size - {n}"),
            Command::Upload { name, size } => write!(f, "Upload {name} {size}"),
            Command::Download { name } => write!(f, "Download {name}"),
            Command::Sending { name, size } => write!(f, "Sending {name} {size}"),
            Command::No { name } => write!(f, "No {name}"),
            Command::Waiting => f.write_str("Waiting"),
            Command::UploadDone => f.write_str("Upload Done"),
            Command::Done => f.write_str("Done"),
            Command::Corrupted => f.write_str("Corrupted"),
            Command::Disconnect => f.write_str("Disconnect"),
            Command::Disconnected => f.write_str("Disconnected"),
        }
    }
}
