use std::fmt;
use std::io;

/// Shorthand for results produced by the dex and binary xml decoders.
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Errors raised while decoding packaged Android artefacts.
#[derive(Debug)]
pub enum DecodeError {
    /// The underlying byte source failed (open, read or seek).
    Io(io::Error),
    /// The bytes violate the container format.
    Format(String),
    /// A table lookup was outside the counted range.
    Index { index: u32, count: u32 },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Io(e) => write!(f, "I/O error: {e}"),
            DecodeError::Format(msg) => write!(f, "Malformed data: {msg}"),
            DecodeError::Index { index, count } => {
                write!(f, "Index {index} out of range for collection of {count}")
            }
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DecodeError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for DecodeError {
    fn from(value: io::Error) -> Self {
        DecodeError::Io(value)
    }
}

#[macro_export]
macro_rules! fail {
    ($msg:literal) => {
        return Err($crate::error::DecodeError::Format($msg.to_string()))
    };
    ($fmtstr:literal, $($args:tt)*) => {
        return Err($crate::error::DecodeError::Format(format!($fmtstr, $($args)*)))
    };
}
