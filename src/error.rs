use std::fmt;

/// Errors surfaced at the queue's public boundary.
#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    EmptyDirectory,
    AlreadyClosing,
    AlreadyClosed,
    MsgTooLarge,
    MaxPutting,
    InvalidOffset,
    GCing,
    OffsetChannelClosed,
    WriteBeyond,
    ReadBeyond,
    Cancelled,
    Corrupt(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "io error: {err}"),
            Error::EmptyDirectory => write!(f, "directory not specified"),
            Error::AlreadyClosing => write!(f, "queue is closing"),
            Error::AlreadyClosed => write!(f, "queue is closed"),
            Error::MsgTooLarge => write!(f, "payload exceeds max_msg_size"),
            Error::MaxPutting => write!(f, "too many pending puts"),
            Error::InvalidOffset => write!(f, "offset does not resolve to a live record"),
            Error::GCing => write!(f, "gc already in progress"),
            Error::OffsetChannelClosed => write!(f, "offset channel closed"),
            Error::WriteBeyond => write!(f, "write exceeds segment capacity"),
            Error::ReadBeyond => write!(f, "read exceeds committed data"),
            Error::Cancelled => write!(f, "operation cancelled"),
            Error::Corrupt(msg) => write!(f, "corrupt data: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Io(value)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
