//! Helper utilities, functions, and macros.

#[macro_use]
mod print;

#[macro_use]
mod config;

mod error;
mod safetcp;

pub use error::ChordletError;
pub use print::{logger_init, ME};

pub(crate) use safetcp::{
    safe_frame_read, safe_frame_write, tcp_bind_with_retry,
    tcp_connect_with_timeout,
};
