//! Byte-level transport for LSP messages

pub mod framer;

pub use framer::{decode, encode, read_frame, FramingError, CONTENT_LENGTH, MAX_FRAME_LEN};

use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};

/// Boxed write half of a server connection (the server's stdin)
pub type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Boxed read half of a server connection (the server's stdout)
pub type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;
