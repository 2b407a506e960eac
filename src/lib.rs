//! Streaming LZ4 frame compression and decompression.
//!
//! This crate implements the LZ4 frame format as a stateful byte-stream
//! codec: you push plaintext into an [`frame::LZ4Stream`] and framed bytes
//! come out the other side, or you push framed bytes and plaintext comes
//! out. Both directions work incrementally, one byte at a time if need be,
//! so the codec can sit in the middle of a pipe without ever seeing the
//! whole input.
//!
//! The frame format is self-terminating and frames can be concatenated
//! back to back; skippable user-data frames may be embedded between them.
//!
//! A second, much smaller format lives in [`minimal`]: length-prefixed
//! compressed blocks with no framing metadata at all.

#![forbid(unsafe_code)]

pub mod header;
pub mod frame;
pub mod minimal;

mod block;
mod ring;
mod xxhash;

/// The four magic bytes at the start of every LZ4 frame (little endian).
pub const MAGIC: u32 = 0x184D2204;

/// Skippable frames use magic `0x184D2A50 + id` where `id` is in `0..=15`.
pub const SKIPPABLE_MAGIC_BASE: u32 = 0x184D2A50;

/// The frame format sets the high bit of a block length field to indicate
/// that the block's bytes were stored without compression.
pub(crate) const INCOMPRESSIBLE: u32 = 1 << 31;

/// The LZ4 raw format maintains a lookback window of exactly 64KiB.
pub const WINDOW_SIZE: usize = 64 * 1024;
