//! Customized unified error type.

use std::error;
use std::fmt;
use std::io;
use std::net;
use std::num;
use std::string;

/// Customized error type for chordlet.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ChordletError(pub(crate) String);

impl ChordletError {
    pub fn msg(msg: impl ToString) -> Self {
        ChordletError(msg.to_string())
    }
}

impl fmt::Display for ChordletError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0) // do not display literal quotes
    }
}

impl error::Error for ChordletError {}

// Helper macro for saving boiler-plate `impl From<X>`s for transparent
// conversion from various common error types to `ChordletError`.
macro_rules! impl_from_error {
    ($error:ty) => {
        impl From<$error> for ChordletError {
            fn from(e: $error) -> Self {
                // just store the source error's string representation
                ChordletError(e.to_string())
            }
        }
    };
}

// Helper macro for saving boiler-plate `impl From<X<T>>`s for transparent
// conversion from various common generic error types to `ChordletError`.
macro_rules! impl_from_error_generic {
    ($error:ty) => {
        impl<T> From<$error> for ChordletError {
            fn from(e: $error) -> ChordletError {
                ChordletError::msg(e.to_string())
            }
        }
    };
}

impl_from_error!(io::Error);
impl_from_error!(string::FromUtf8Error);
impl_from_error!(num::ParseIntError);
impl_from_error!(net::AddrParseError);
impl_from_error!(toml::de::Error);
impl_from_error!(ctrlc::Error);
impl_from_error!(tokio::time::error::Elapsed);
impl_from_error!(tokio::task::JoinError);

impl_from_error_generic!(tokio::sync::watch::error::SendError<T>);
impl_from_error_generic!(tokio::sync::mpsc::error::SendError<T>);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let e = ChordletError("what the heck?".into());
        assert_eq!(format!("{}", e), String::from("what the heck?"));
    }

    #[test]
    fn from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "oh no!");
        let e = ChordletError::from(io_error);
        assert!(e.0.contains("oh no!"));
    }

    #[test]
    fn from_parse_error() {
        let e = ChordletError::from("x7".parse::<u16>().unwrap_err());
        assert!(e.0.contains("invalid digit"));
    }
}
