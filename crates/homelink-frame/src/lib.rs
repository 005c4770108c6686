//! Length-prefixed wire framing for homelink device links.
//!
//! Every unit exchanged with a physical endpoint is framed as:
//! - A 1, 2 or 4 byte little-endian body length (the preamble)
//! - That many body bytes
//!
//! The decoder is pull-based: it consumes exactly one complete frame per
//! call and reports "need more data" otherwise, so the same byte stream
//! produces the same frame sequence regardless of how the reads were
//! chunked. No partial reads, no buffer management in user code.

pub mod codec;
pub mod error;

pub use codec::{
    decode_frame, encode_frame, FrameCodec, PreambleWidth, DEFAULT_MAX_FRAME_LEN,
};
pub use error::{FrameError, Result};
