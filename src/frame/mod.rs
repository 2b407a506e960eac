//! The LZ4 frame format as a byte stream.
//!
//! An lz4-compressed file typically consists of a single frame, but the
//! format allows any number of frames back to back, with skippable
//! user-data frames in between.
//!
//! [`LZ4Stream`] is the stateful codec over an inner byte stream. It comes
//! in four flavors: the common pair (write plaintext into a compressor,
//! read plaintext out of a decompressor) and the inverse pair (read framed
//! bytes out of a compressor, write framed bytes into a decompressor).
//! See `CompressionSettings` for the features the format offers.

mod decoder;
mod encoder;

pub use decoder::FrameError;

use std::cmp;
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::num::NonZeroU64;

use fehler::{throw, throws};

use crate::header::BlockSize;
use decoder::DecoderCore;
use encoder::EncoderCore;

impl From<FrameError> for io::Error {
    fn from(e: FrameError) -> io::Error {
        io::Error::new(ErrorKind::InvalidData, e)
    }
}

fn unsupported(what: &str) -> io::Error {
    io::Error::new(ErrorKind::Unsupported, format!("{} is not supported by this stream", what))
}

fn poisoned() -> io::Error {
    io::Error::new(ErrorKind::Other, "stream is unusable after a previous error")
}

/// Whether the user-facing side of the codec is its read side or its
/// write side. The inner stream sits on the opposite side.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StreamMode {
    Read,
    Write,
}

/// A builder-style struct that configures compression settings.
///
/// Create it using `Default::default()`: linked blocks, 64KiB block size,
/// no checksums, unbounded frames, fast compression.
#[derive(Clone)]
pub struct CompressionSettings {
    pub(crate) independent_blocks: bool,
    pub(crate) block_checksums: bool,
    pub(crate) content_checksum: bool,
    pub(crate) block_size: BlockSize,
    pub(crate) max_blocks_per_frame: Option<NonZeroU64>,
    pub(crate) high_compression: bool,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            independent_blocks: false,
            block_checksums: false,
            content_checksum: false,
            block_size: BlockSize::Max64KB,
            max_blocks_per_frame: None,
            high_compression: false,
        }
    }
}

impl CompressionSettings {
    /// In independent mode, blocks are not allowed to reference data from
    /// previous blocks, so linked blocks yield slightly better compression.
    /// The flip side of linked blocks is that a frame only decodes front to
    /// back.
    ///
    /// Blocks are linked by default.
    pub fn independent_blocks(&mut self, v: bool) -> &mut Self {
        self.independent_blocks = v;
        self
    }

    /// Block checksums can help detect data corruption in storage and
    /// transit. They do not offer error correction though, and in most
    /// cases a lower layer deals with corruption more comprehensively.
    ///
    /// Block checksums are disabled by default.
    pub fn block_checksums(&mut self, v: bool) -> &mut Self {
        self.block_checksums = v;
        self
    }

    /// The content checksum (also called frame checksum) is calculated over
    /// the plaintext of an entire frame. Cheaper than block checksums and
    /// marginally more useful, but it can only be verified once the whole
    /// frame has been read (and returned!).
    ///
    /// Content checksums are disabled by default.
    pub fn content_checksum(&mut self, v: bool) -> &mut Self {
        self.content_checksum = v;
        self
    }

    /// How much plaintext goes into one block.
    ///
    /// The default block size is 64 KiB.
    pub fn block_size(&mut self, v: BlockSize) -> &mut Self {
        self.block_size = v;
        self
    }

    /// Close the current frame and open a new one after this many blocks.
    /// Note that this counts blocks, not bytes; with flushing in play,
    /// blocks may be shorter than the block size.
    ///
    /// Unbounded by default.
    pub fn max_blocks_per_frame(&mut self, v: Option<NonZeroU64>) -> &mut Self {
        self.max_blocks_per_frame = v;
        self
    }

    /// Ask the block codec for its high compression mode, trading encode
    /// speed for ratio. The bundled block codec currently implements a
    /// single effort level, so this setting does not change the output.
    ///
    /// Disabled by default.
    pub fn high_compression(&mut self, v: bool) -> &mut Self {
        self.high_compression = v;
        self
    }
}

enum Engine {
    Compress(EncoderCore),
    Decompress(DecoderCore),
}

/// Scratch for the pull decompressor: one chunk read from the inner stream,
/// partially fed to the state machine.
struct ReadChunk {
    buf: Vec<u8>,
    pos: usize,
    len: usize,
}

/// Pending output of the pull compressor, drained by `read`.
struct Pending {
    buf: Vec<u8>,
    pos: usize,
    trailer_done: bool,
}

/// A streaming LZ4 frame codec over an inner byte stream.
///
/// The stream has a fixed direction decided at construction: read-direction
/// streams implement [`Read`] and fail every write, write-direction streams
/// implement [`Write`] and fail every read. Seeking always fails.
///
/// Dropping a push-mode compressor finishes it: the pending partial block,
/// the end mark and the content checksum all go out, errors silently
/// dropped. Call [`LZ4Stream::finish`] to keep the errors (and the inner
/// stream).
pub struct LZ4Stream<S> {
    inner: Option<S>,
    direction: StreamMode,
    engine: Engine,
    interactive_read: bool,
    poisoned: bool,
    chunk: ReadChunk,
    pending: Pending,
    finish_on_drop: Option<fn(&mut Engine, &mut S) -> io::Result<()>>,
}

fn finish_compressor<W: Write>(engine: &mut Engine, inner: &mut W) -> io::Result<()> {
    if let Engine::Compress(core) = engine {
        core.finish(&mut *inner)?;
        inner.flush()?;
    }
    Ok(())
}

impl<S> LZ4Stream<S> {
    fn with_engine(inner: S, direction: StreamMode, engine: Engine) -> Self {
        LZ4Stream {
            inner: Some(inner),
            direction,
            engine,
            interactive_read: false,
            poisoned: false,
            chunk: ReadChunk { buf: Vec::new(), pos: 0, len: 0 },
            pending: Pending { buf: Vec::new(), pos: 0, trailer_done: false },
            finish_on_drop: None,
        }
    }

    /// LZ4 frames seen so far, skippable frames included.
    pub fn frame_count(&self) -> u64 {
        match &self.engine {
            Engine::Compress(core) => core.frame_count(),
            Engine::Decompress(core) => core.frame_count(),
        }
    }

    pub fn can_read(&self) -> bool {
        self.direction == StreamMode::Read
    }

    pub fn can_write(&self) -> bool {
        self.direction == StreamMode::Write
    }

    /// When set, `read` returns as soon as any decoded (or encoded) bytes
    /// are available instead of filling the whole buffer.
    pub fn interactive_read(&self) -> bool {
        self.interactive_read
    }

    pub fn set_interactive_read(&mut self, v: bool) {
        self.interactive_read = v;
    }

    /// Observe skippable frames during decompression. The callback runs
    /// synchronously, in stream order, from whatever call decodes past the
    /// frame.
    pub fn on_user_data_frame<F: FnMut(u8, &[u8]) + 'static>(&mut self, handler: F) {
        if let Engine::Decompress(core) = &mut self.engine {
            core.set_user_data_handler(Box::new(handler));
        }
    }

    /// Give up the inner stream without finalizing anything. For a
    /// compressor this may lose the tail of the stream; prefer
    /// [`LZ4Stream::finish`].
    pub fn into_inner(mut self) -> S {
        self.finish_on_drop = None;
        self.inner.take().expect("inner stream present until consumed")
    }
}

impl<W: Write> LZ4Stream<W> {
    /// Push-mode compressor: plaintext written here comes out of `inner`
    /// as LZ4 frames.
    pub fn write_compressor(inner: W, settings: &CompressionSettings) -> Self {
        let mut stream = Self::with_engine(
            inner,
            StreamMode::Write,
            Engine::Compress(EncoderCore::new(settings)),
        );
        stream.finish_on_drop = Some(finish_compressor::<W>);
        stream
    }

    /// Push-mode decompressor: framed bytes written here come out of
    /// `inner` as plaintext.
    pub fn write_decompressor(inner: W) -> Self {
        Self::with_engine(inner, StreamMode::Write, Engine::Decompress(DecoderCore::new()))
    }

    /// Close the current frame now. The next write opens a new frame.
    ///
    /// Does nothing if no frame has been started or the current frame is
    /// already closed.
    #[throws(io::Error)]
    pub fn write_end_frame(&mut self) {
        if self.direction != StreamMode::Write {
            throw!(unsupported("write_end_frame on a read-direction stream"));
        }
        if self.poisoned {
            throw!(poisoned());
        }
        let inner = self.inner.as_mut().expect("inner stream present until consumed");
        match &mut self.engine {
            Engine::Compress(core) => {
                if let Err(e) = core.end_frame(inner) {
                    self.poisoned = true;
                    throw!(e);
                }
            }
            Engine::Decompress(_) => throw!(unsupported("write_end_frame on a decompressor")),
        }
    }

    /// Emit a skippable frame carrying `data`, tagged with `id` (0..=15).
    /// Closes the current LZ4 frame first; decoders report the payload via
    /// [`LZ4Stream::on_user_data_frame`] and plaintext is unaffected.
    #[throws(io::Error)]
    pub fn write_user_data_frame(&mut self, id: u8, data: &[u8]) {
        if self.direction != StreamMode::Write {
            throw!(unsupported("write_user_data_frame on a read-direction stream"));
        }
        if self.poisoned {
            throw!(poisoned());
        }
        let inner = self.inner.as_mut().expect("inner stream present until consumed");
        match &mut self.engine {
            Engine::Compress(core) => {
                if let Err(e) = core.write_user_data_frame(id, data, inner) {
                    if e.kind() != ErrorKind::InvalidInput {
                        self.poisoned = true;
                    }
                    throw!(e);
                }
            }
            Engine::Decompress(_) => throw!(unsupported("write_user_data_frame on a decompressor")),
        }
    }

    /// Finalize the stream and hand back the inner stream.
    ///
    /// For a push-mode compressor this completes the open frame (or writes
    /// a whole empty frame if nothing was ever written). For other modes it
    /// just returns the inner stream.
    #[throws(io::Error)]
    pub fn finish(mut self) -> W {
        self.finish_on_drop = None;
        if !self.poisoned && self.direction == StreamMode::Write {
            let inner = self.inner.as_mut().expect("inner stream present until consumed");
            finish_compressor(&mut self.engine, inner)?;
        }
        self.inner.take().expect("inner stream present until consumed")
    }

    /// Convenience single-byte write.
    #[throws(io::Error)]
    pub fn write_byte(&mut self, value: u8) {
        self.write_all(&[value])?;
    }
}

impl<R: Read> LZ4Stream<R> {
    /// Pull-mode decompressor: reading from this stream pulls LZ4 frames
    /// out of `inner` and returns plaintext.
    pub fn read_decompressor(inner: R) -> Self {
        Self::with_engine(inner, StreamMode::Read, Engine::Decompress(DecoderCore::new()))
    }

    /// Pull-mode compressor (the inverse mode): reading from this stream
    /// pulls plaintext out of `inner` and returns LZ4 frames.
    pub fn read_compressor(inner: R, settings: &CompressionSettings) -> Self {
        Self::with_engine(
            inner,
            StreamMode::Read,
            Engine::Compress(EncoderCore::new(settings)),
        )
    }

    /// Convenience single-byte read; `None` is end of stream.
    #[throws(io::Error)]
    pub fn read_byte(&mut self) -> Option<u8> {
        let mut byte = [0u8; 1];
        loop {
            match self.read(&mut byte) {
                Ok(0) => return None,
                Ok(_) => return Some(byte[0]),
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => throw!(e),
            }
        }
    }
}

/// Drain bytes from the inner reader through the decoder state machine.
fn pull_decompress<R: Read>(
    inner: &mut R,
    core: &mut DecoderCore,
    chunk: &mut ReadChunk,
    buf: &mut [u8],
    interactive: bool,
) -> io::Result<usize> {
    if chunk.buf.is_empty() {
        chunk.buf.resize(8 * 1024, 0);
    }

    let mut total = 0;
    while total < buf.len() {
        let copied = core.take_output(&mut buf[total..]);
        if copied > 0 {
            total += copied;
            if interactive {
                break;
            }
            continue;
        }

        if chunk.pos == chunk.len {
            let n = loop {
                match inner.read(&mut chunk.buf) {
                    Ok(n) => break n,
                    Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            };
            if n == 0 {
                if core.at_frame_boundary() {
                    break; // clean end of stream, between frames
                }
                return Err(FrameError::Truncated.into());
            }
            chunk.pos = 0;
            chunk.len = n;
        }

        let consumed = core.feed(&chunk.buf[chunk.pos..chunk.len])?;
        chunk.pos += consumed;
    }
    Ok(total)
}

/// Produce framed bytes on demand by pulling plaintext from the inner
/// reader, one block per refill.
fn pull_compress<R: Read>(
    inner: &mut R,
    core: &mut EncoderCore,
    pending: &mut Pending,
    buf: &mut [u8],
    interactive: bool,
) -> io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        if pending.pos < pending.buf.len() {
            let available = pending.buf.len() - pending.pos;
            let chunk = cmp::min(available, buf.len() - total);
            buf[total..total + chunk].copy_from_slice(&pending.buf[pending.pos..pending.pos + chunk]);
            pending.pos += chunk;
            total += chunk;
            if interactive {
                break;
            }
            continue;
        }

        pending.buf.clear();
        pending.pos = 0;
        if pending.trailer_done {
            break;
        }

        if core.fill_from(&mut *inner)? > 0 {
            core.emit_block(&mut pending.buf, false)?;
        } else {
            core.finish(&mut pending.buf)?;
            pending.trailer_done = true;
            if pending.buf.is_empty() {
                break;
            }
        }
    }
    Ok(total)
}

/// Feed caller-provided framed bytes through the decoder state machine,
/// forwarding plaintext to the inner writer as blocks complete.
fn push_decompress<W: Write>(inner: &mut W, core: &mut DecoderCore, mut buf: &[u8]) -> io::Result<()> {
    while !buf.is_empty() {
        let consumed = core.feed(buf)?;
        buf = &buf[consumed..];
        let output = core.output();
        if !output.is_empty() {
            inner.write_all(output)?;
            core.consume_output();
        }
    }
    Ok(())
}

impl<R: Read> Read for LZ4Stream<R> {
    #[throws(io::Error)]
    fn read(&mut self, buf: &mut [u8]) -> usize {
        if self.direction != StreamMode::Read {
            throw!(unsupported("read on a write-direction stream"));
        }
        if self.poisoned {
            throw!(poisoned());
        }

        let inner = self.inner.as_mut().expect("inner stream present until consumed");
        let interactive = self.interactive_read;
        let result = match &mut self.engine {
            Engine::Decompress(core) => pull_decompress(inner, core, &mut self.chunk, buf, interactive),
            Engine::Compress(core) => pull_compress(inner, core, &mut self.pending, buf, interactive),
        };
        match result {
            Ok(n) => n,
            Err(e) => {
                self.poisoned = true;
                throw!(e);
            }
        }
    }
}

impl<W: Write> Write for LZ4Stream<W> {
    #[throws(io::Error)]
    fn write(&mut self, buf: &[u8]) -> usize {
        if self.direction != StreamMode::Write {
            throw!(unsupported("write on a read-direction stream"));
        }
        if self.poisoned {
            throw!(poisoned());
        }

        let inner = self.inner.as_mut().expect("inner stream present until consumed");
        let result = match &mut self.engine {
            Engine::Compress(core) => core.write_plain(buf, inner),
            Engine::Decompress(core) => push_decompress(inner, core, buf),
        };
        match result {
            Ok(()) => buf.len(),
            Err(e) => {
                self.poisoned = true;
                throw!(e);
            }
        }
    }

    #[throws(io::Error)]
    fn flush(&mut self) {
        if self.direction != StreamMode::Write {
            throw!(unsupported("flush on a read-direction stream"));
        }
        if self.poisoned {
            throw!(poisoned());
        }

        let inner = self.inner.as_mut().expect("inner stream present until consumed");
        let result = match &mut self.engine {
            // emits the pending partial block; deliberately does not close
            // the frame
            Engine::Compress(core) => core.flush(&mut *inner).and_then(|()| inner.flush()),
            Engine::Decompress(_) => inner.flush(),
        };
        if let Err(e) = result {
            self.poisoned = true;
            throw!(e);
        }
    }
}

impl<S> Seek for LZ4Stream<S> {
    #[throws(io::Error)]
    fn seek(&mut self, _pos: SeekFrom) -> u64 {
        throw!(unsupported("seek"));
    }
}

impl<S> Drop for LZ4Stream<S> {
    fn drop(&mut self) {
        if self.poisoned {
            return;
        }
        if let (Some(finish), Some(inner)) = (self.finish_on_drop.take(), self.inner.as_mut()) {
            let _ = finish(&mut self.engine, inner);
        }
    }
}
