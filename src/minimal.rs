//! A bare-bones length-prefixed chunk format.
//!
//! Where the frame format carries a magic, a descriptor, checksums and an
//! end mark, this one carries nothing at all: every chunk is a 4-byte
//! little-endian compressed length followed by the compressed bytes.
//! Chunks are always linked through the ring buffer, there is no
//! uncompressed escape hatch, and the stream simply ends when the input
//! does (or at an explicit zero length).
//!
//! Useful when both sides are this codec and every byte of overhead
//! counts; useless for interop with standard LZ4 tooling.

use std::cmp;
use std::io::{self, ErrorKind, Read, Write};

use byteorder::{ByteOrder, WriteBytesExt, LE};
use lz4_flex::block::DecompressError;
use thiserror::Error;
use fehler::{throw, throws};

use crate::WINDOW_SIZE;
use crate::block::{BlockDecoder, BlockEncoder};
use crate::ring::RingBuffer;

/// Errors when decoding the minimal chunk format.
#[derive(Error, Debug)]
pub enum MinimalFrameError {
    #[error("unexpected end of stream in the middle of a chunk")]
    Truncated,
    #[error("reserved high bit set in a chunk length")]
    ReservedLengthBit,
    #[error("the raw block decompression failed (data corruption?)")]
    Codec(#[from] DecompressError),
}

impl From<MinimalFrameError> for io::Error {
    fn from(e: MinimalFrameError) -> io::Error {
        io::Error::new(ErrorKind::InvalidData, e)
    }
}

fn unsupported(what: &str) -> io::Error {
    io::Error::new(ErrorKind::Unsupported, format!("{} is not supported by this stream", what))
}

#[derive(Debug)]
enum Engine {
    Compress {
        encoder: BlockEncoder,
        compressed: Vec<u8>,
        /// Plaintext accumulated in the current ring position.
        fill: usize,
    },
    Decompress {
        decoder: BlockDecoder,
        payload: Vec<u8>,
        /// Decoded length of the current chunk and the read cursor in it.
        avail: usize,
        read_pos: usize,
    },
}

/// Streaming codec for the minimal chunk format.
///
/// A compressor accepts plaintext through [`Write`]; a decompressor hands
/// out plaintext through [`Read`]. Unlike the frame codec there are no
/// inverse modes. Dropping a compressor flushes the pending chunk.
#[derive(Debug)]
pub struct LZ4MinimalStream<S> {
    inner: Option<S>,
    engine: Engine,
    ring: RingBuffer,
    block_size: usize,
    poisoned: bool,
    finish_on_drop: Option<fn(&mut LZ4MinimalStream<S>) -> io::Result<()>>,
}

/// `2` for block sizes of at least the LZ4 window, more below that, so the
/// window stays addressable in the ring.
fn default_slots(block_size: usize) -> usize {
    if block_size < WINDOW_SIZE {
        (2 * WINDOW_SIZE + block_size - 1) / block_size
    } else {
        2
    }
}

#[throws(io::Error)]
fn resolve_slots(block_size: usize, ring_slots: Option<usize>) -> usize {
    if block_size == 0 {
        throw!(io::Error::new(ErrorKind::InvalidInput, "block size must be at least 1"));
    }
    let slots = ring_slots.unwrap_or_else(|| default_slots(block_size));
    if slots == 0 {
        throw!(io::Error::new(ErrorKind::InvalidInput, "ring must have at least 1 slot"));
    }
    slots
}

fn drop_flush<W: Write>(stream: &mut LZ4MinimalStream<W>) -> io::Result<()> {
    stream.flush_chunk()?;
    Ok(())
}

impl<S> LZ4MinimalStream<S> {
    fn with_engine(inner: S, engine: Engine, block_size: usize, ring_slots: usize) -> Self {
        LZ4MinimalStream {
            inner: Some(inner),
            engine,
            ring: RingBuffer::new(block_size, ring_slots),
            block_size,
            poisoned: false,
            finish_on_drop: None,
        }
    }

    pub fn can_read(&self) -> bool {
        matches!(self.engine, Engine::Decompress { .. })
    }

    pub fn can_write(&self) -> bool {
        matches!(self.engine, Engine::Compress { .. })
    }

    /// Give up the inner stream without flushing anything.
    pub fn into_inner(mut self) -> S {
        self.finish_on_drop = None;
        self.inner.take().expect("inner stream present until consumed")
    }
}

impl<W: Write> LZ4MinimalStream<W> {
    /// Compressor with the default 64 KiB block size and two ring slots.
    pub fn write_compressor(inner: W) -> Self {
        let mut stream = Self::with_engine(
            inner,
            Engine::Compress {
                encoder: BlockEncoder::new(false),
                compressed: Vec::new(),
                fill: 0,
            },
            WINDOW_SIZE,
            2,
        );
        stream.finish_on_drop = Some(drop_flush::<W>);
        stream
    }

    /// Compressor with an explicit block size and, optionally, an explicit
    /// ring slot count. Both must be nonzero; the default slot count keeps
    /// the 64 KiB window addressable for small blocks.
    #[throws(io::Error)]
    pub fn write_compressor_with(inner: W, block_size: usize, ring_slots: Option<usize>) -> Self {
        let slots = resolve_slots(block_size, ring_slots)?;
        let mut stream = Self::with_engine(
            inner,
            Engine::Compress {
                encoder: BlockEncoder::new(false),
                compressed: Vec::new(),
                fill: 0,
            },
            block_size,
            slots,
        );
        stream.finish_on_drop = Some(drop_flush::<W>);
        stream
    }

    /// Flush the pending chunk and hand back the inner stream.
    #[throws(io::Error)]
    pub fn finish(mut self) -> W {
        self.finish_on_drop = None;
        if !self.poisoned {
            self.flush_chunk()?;
        }
        self.inner.take().expect("inner stream present until consumed")
    }

    /// Emit the pending plaintext as one chunk, if there is any.
    #[throws(io::Error)]
    fn flush_chunk(&mut self) {
        let inner = self.inner.as_mut().expect("inner stream present until consumed");
        let offset = self.ring.offset();
        if let Engine::Compress { encoder, compressed, fill } = &mut self.engine {
            if *fill == 0 {
                return;
            }

            let plain = self.ring.range(offset, *fill);
            let n = encoder
                .encode_continue_unbounded(plain, &mut *compressed)
                .map_err(|e| io::Error::new(ErrorKind::InvalidData, e))?;

            inner.write_u32::<LE>(n as u32)?;
            inner.write_all(&compressed[..n])?;

            let used = *fill;
            *fill = 0;
            self.ring.advance(used);
            // the decoder's dictionary is the ring contents since the last
            // wrap, so the window must not survive one
            if self.ring.offset() == 0 {
                encoder.reset();
            }
        }
    }
}

impl<R: Read> LZ4MinimalStream<R> {
    /// Decompressor with the default 64 KiB block size and two ring slots.
    /// Both sides must agree on the block size and slot count, the wire
    /// format does not carry them.
    pub fn read_decompressor(inner: R) -> Self {
        Self::with_engine(
            inner,
            Engine::Decompress {
                decoder: BlockDecoder::new(),
                payload: Vec::new(),
                avail: 0,
                read_pos: 0,
            },
            WINDOW_SIZE,
            2,
        )
    }

    /// Decompressor with an explicit block size and optional ring slot
    /// count, mirroring [`LZ4MinimalStream::write_compressor_with`].
    #[throws(io::Error)]
    pub fn read_decompressor_with(inner: R, block_size: usize, ring_slots: Option<usize>) -> Self {
        let slots = resolve_slots(block_size, ring_slots)?;
        Self::with_engine(
            inner,
            Engine::Decompress {
                decoder: BlockDecoder::new(),
                payload: Vec::new(),
                avail: 0,
                read_pos: 0,
            },
            block_size,
            slots,
        )
    }

    /// Pull and decode the next chunk into the ring. False means a clean
    /// end of stream.
    #[throws(io::Error)]
    fn acquire_next_chunk(&mut self) -> bool {
        let inner = self.inner.as_mut().expect("inner stream present until consumed");
        let block_size = self.block_size;
        if let Engine::Decompress { decoder, payload, avail, read_pos } = &mut self.engine {
            let mut len_word = [0u8; 4];
            let got = read_full(&mut *inner, &mut len_word)?;
            if got == 0 {
                return false;
            }
            if got != len_word.len() {
                throw!(io::Error::from(MinimalFrameError::Truncated));
            }
            if len_word[3] & 0x80 != 0 {
                throw!(io::Error::from(MinimalFrameError::ReservedLengthBit));
            }
            let len = LE::read_u32(&len_word) as usize;
            if len == 0 {
                return false;
            }

            // the previous chunk's plaintext moves out of the way but stays
            // in the ring as dictionary
            let step = *avail;
            self.ring.advance(step);

            payload.resize(len, 0);
            if read_full(&mut *inner, payload)? != len {
                throw!(io::Error::from(MinimalFrameError::Truncated));
            }

            // everything in the ring since the last wrap is dictionary
            let offset = self.ring.offset();
            decoder.reset_with_dict(self.ring.range(0, offset));
            let decoded = decoder
                .decode_continue(payload, self.ring.range_mut(offset, block_size))
                .map_err(MinimalFrameError::Codec)?;

            *avail = decoded;
            *read_pos = 0;
            true
        } else {
            throw!(unsupported("read on a compressor"));
        }
    }
}

#[throws(io::Error)]
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> usize {
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => throw!(e),
        }
    }
    total
}

impl<W: Write> Write for LZ4MinimalStream<W> {
    #[throws(io::Error)]
    fn write(&mut self, buf: &[u8]) -> usize {
        if !self.can_write() {
            throw!(unsupported("write on a decompressor"));
        }
        if self.poisoned {
            throw!(io::Error::new(ErrorKind::Other, "stream is unusable after a previous error"));
        }

        let mut written = 0;
        while written < buf.len() {
            let (offset, fill) = match &self.engine {
                Engine::Compress { fill, .. } => (self.ring.offset(), *fill),
                Engine::Decompress { .. } => throw!(unsupported("write on a decompressor")),
            };
            let room = self.block_size - fill;
            if room == 0 {
                if let Err(e) = self.flush_chunk() {
                    self.poisoned = true;
                    throw!(e);
                }
                continue;
            }
            let chunk = cmp::min(room, buf.len() - written);
            self.ring
                .range_mut(offset + fill, chunk)
                .copy_from_slice(&buf[written..written + chunk]);
            if let Engine::Compress { fill, .. } = &mut self.engine {
                *fill += chunk;
            }
            written += chunk;
        }
        buf.len()
    }

    #[throws(io::Error)]
    fn flush(&mut self) {
        if !self.can_write() {
            throw!(unsupported("flush on a decompressor"));
        }
        if self.poisoned {
            throw!(io::Error::new(ErrorKind::Other, "stream is unusable after a previous error"));
        }
        if let Err(e) = self.flush_chunk() {
            self.poisoned = true;
            throw!(e);
        }
        if let Err(e) = self.inner.as_mut().expect("inner stream present until consumed").flush() {
            self.poisoned = true;
            throw!(e);
        }
    }
}

impl<R: Read> Read for LZ4MinimalStream<R> {
    #[throws(io::Error)]
    fn read(&mut self, buf: &mut [u8]) -> usize {
        if !self.can_read() {
            throw!(unsupported("read on a compressor"));
        }
        if self.poisoned {
            throw!(io::Error::new(ErrorKind::Other, "stream is unusable after a previous error"));
        }

        let mut total = 0;
        while total < buf.len() {
            let (offset, avail, read_pos) = match &self.engine {
                Engine::Decompress { avail, read_pos, .. } => (self.ring.offset(), *avail, *read_pos),
                Engine::Compress { .. } => throw!(unsupported("read on a compressor")),
            };
            let available = avail - read_pos;
            if available > 0 {
                let chunk = cmp::min(available, buf.len() - total);
                buf[total..total + chunk]
                    .copy_from_slice(self.ring.range(offset + read_pos, chunk));
                if let Engine::Decompress { read_pos, .. } = &mut self.engine {
                    *read_pos += chunk;
                }
                total += chunk;
            } else {
                match self.acquire_next_chunk() {
                    Ok(true) => continue,
                    Ok(false) => break,
                    Err(e) => {
                        self.poisoned = true;
                        throw!(e);
                    }
                }
            }
        }
        total
    }
}

impl<S> Drop for LZ4MinimalStream<S> {
    fn drop(&mut self) {
        if self.poisoned {
            return;
        }
        if let Some(finish) = self.finish_on_drop.take() {
            let _ = finish(self);
        }
    }
}
