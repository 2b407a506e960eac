use std::cmp;
use std::hash::Hasher;
use std::io::{self, ErrorKind, Read, Write};
use std::num::NonZeroU64;

use byteorder::{WriteBytesExt, LE};
use fehler::{throw, throws};

use crate::{INCOMPRESSIBLE, MAGIC, SKIPPABLE_MAGIC_BASE};
use crate::block::BlockEncoder;
use crate::header::{BlockSize, Flags, VERSION};
use crate::ring::RingBuffer;
use crate::xxhash::{xxh32, XxHash32};

use super::CompressionSettings;

type Error = io::Error;

/// The stateful half of the compressor, independent of how it is driven.
///
/// All output goes through a caller-supplied sink, so the same core serves
/// the push mode (sink = the inner stream) and the pull mode (sink = a
/// pending buffer that `read` drains).
pub(super) struct EncoderCore {
    independent_blocks: bool,
    block_checksums: bool,
    content_checksum: bool,
    block_size: BlockSize,
    max_blocks_per_frame: Option<NonZeroU64>,

    block: BlockEncoder,
    ring: RingBuffer,
    /// Bytes accumulated in the current input slot.
    fill: usize,
    compressed: Vec<u8>,
    content_hasher: Option<XxHash32>,
    frame_count: u64,
    block_count: u64,
    started_any_frame: bool,
    frame_open: bool,
}

impl EncoderCore {
    pub fn new(settings: &CompressionSettings) -> Self {
        EncoderCore {
            independent_blocks: settings.independent_blocks,
            block_checksums: settings.block_checksums,
            content_checksum: settings.content_checksum,
            block_size: settings.block_size,
            max_blocks_per_frame: settings.max_blocks_per_frame,
            block: BlockEncoder::new(settings.high_compression),
            ring: RingBuffer::new(settings.block_size.bytes(), 2),
            fill: 0,
            compressed: Vec::new(),
            content_hasher: None,
            frame_count: 0,
            block_count: 0,
            started_any_frame: false,
            frame_open: false,
        }
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    #[throws]
    fn write_descriptor<W: Write>(&mut self, sink: &mut W, flag_byte: u8, bd_byte: u8) {
        sink.write_u32::<LE>(MAGIC)?;
        let descriptor = [flag_byte, bd_byte];
        sink.write_all(&descriptor)?;
        sink.write_u8((xxh32(0, &descriptor) >> 8) as u8)?;
    }

    #[throws]
    fn start_frame<W: Write>(&mut self, sink: &mut W) {
        self.started_any_frame = true;
        self.frame_open = true;
        self.frame_count += 1;
        self.block_count = 0;

        let mut flag_byte = VERSION;
        if self.content_checksum {
            flag_byte |= Flags::ContentChecksum.bits();
        }
        if self.block_checksums {
            flag_byte |= Flags::BlockChecksums.bits();
        }
        if self.independent_blocks {
            flag_byte |= Flags::IndependentBlocks.bits();
        }
        self.write_descriptor(&mut *sink, flag_byte, self.block_size.to_bd_byte())?;

        if self.content_checksum {
            self.content_hasher = Some(XxHash32::with_seed(0));
        }
    }

    /// A complete frame with zero blocks, written before a user-data frame
    /// when no LZ4 frame was ever started (the format spec recommends not
    /// to begin a stream with a skippable frame). Carries no checksum
    /// flags and therefore no content digest.
    #[throws]
    fn write_empty_frame<W: Write>(&mut self, sink: &mut W) {
        debug_assert!(!self.started_any_frame && !self.frame_open);

        let mut flag_byte = VERSION;
        if self.independent_blocks {
            flag_byte |= Flags::IndependentBlocks.bits();
        }
        self.write_descriptor(&mut *sink, flag_byte, self.block_size.to_bd_byte())?;
        sink.write_u32::<LE>(0)?;

        self.started_any_frame = true;
        self.frame_count += 1;
    }

    /// Accept plaintext, emitting blocks whenever the input slot fills up.
    #[throws]
    pub fn write_plain<W: Write>(&mut self, mut buf: &[u8], sink: &mut W) {
        if buf.is_empty() {
            return;
        }
        if !self.frame_open {
            self.start_frame(&mut *sink)?;
        }

        while !buf.is_empty() {
            let room = self.ring.slot_size() - self.fill;
            if room == 0 {
                self.emit_block(&mut *sink, false)?;
                continue;
            }
            let chunk = cmp::min(room, buf.len());
            let start = self.ring.offset() + self.fill;
            self.ring.range_mut(start, chunk).copy_from_slice(&buf[..chunk]);
            self.fill += chunk;
            buf = &buf[chunk..];
        }
    }

    /// Fill the current input slot from a reader, up to slot capacity or
    /// end of input. Returns the slot fill level afterwards.
    #[throws]
    pub fn fill_from<R: Read>(&mut self, reader: &mut R) -> usize {
        loop {
            let room = self.ring.slot_size() - self.fill;
            if room == 0 {
                break;
            }
            let start = self.ring.offset() + self.fill;
            match reader.read(self.ring.range_mut(start, room)) {
                Ok(0) => break,
                Ok(n) => self.fill += n,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => throw!(e),
            }
        }
        self.fill
    }

    /// Emit the current input slot as one block, opening a frame first if
    /// none is open. A partial slot is legal; `flush` relies on that.
    #[throws]
    pub fn emit_block<W: Write>(&mut self, sink: &mut W, suppress_end_frame: bool) {
        if !self.frame_open {
            self.start_frame(&mut *sink)?;
        }

        let offset = self.ring.offset();
        let fill = self.fill;

        // independent blocks never continue from earlier plaintext, and the
        // first block of a frame has nothing to continue from
        if self.independent_blocks || self.block_count == 0 {
            self.block.reset();
        }

        // the content checksum covers plaintext, taken before compression
        if let Some(hasher) = self.content_hasher.as_mut() {
            hasher.write(self.ring.range(offset, fill));
        }

        match self.block.encode_continue(self.ring.range(offset, fill), &mut self.compressed) {
            Some(n) => {
                sink.write_u32::<LE>(n as u32)?;
                sink.write_all(&self.compressed[..n])?;
                if self.block_checksums {
                    sink.write_u32::<LE>(xxh32(0, &self.compressed[..n]))?;
                }
            }
            None => {
                // not smaller than the input: store the plaintext as-is and
                // flag it in the length word
                sink.write_u32::<LE>(fill as u32 | INCOMPRESSIBLE)?;
                let plain = self.ring.range(offset, fill);
                sink.write_all(plain)?;
                if self.block_checksums {
                    sink.write_u32::<LE>(xxh32(0, plain))?;
                }
            }
        }

        self.fill = 0;
        self.block_count += 1;

        if !suppress_end_frame {
            if let Some(max) = self.max_blocks_per_frame {
                if self.block_count >= max.get() {
                    self.end_frame(sink)?;
                }
            }
        }

        let step = self.ring.slot_size();
        self.ring.advance(step);
    }

    /// Emit a partial block if any plaintext is pending. Never ends the
    /// frame; calling it twice in a row writes nothing the second time.
    #[throws]
    pub fn flush<W: Write>(&mut self, sink: &mut W) {
        if self.fill > 0 {
            self.emit_block(sink, false)?;
        }
    }

    /// Close the current frame: flush the pending partial block, write the
    /// end marker and the content digest if enabled. Does nothing when no
    /// frame was ever started or none is open.
    #[throws]
    pub fn end_frame<W: Write>(&mut self, sink: &mut W) {
        if !self.started_any_frame || !self.frame_open {
            return;
        }

        if self.fill > 0 {
            self.emit_block(&mut *sink, true)?;
        }

        // end mark
        sink.write_u32::<LE>(0)?;

        if let Some(hasher) = self.content_hasher.take() {
            sink.write_u32::<LE>(hasher.finish() as u32)?;
        }

        // the dictionary never crosses a frame boundary
        self.block.reset();
        self.frame_open = false;
    }

    /// Emit a skippable frame carrying opaque user bytes. Closes the open
    /// LZ4 frame first; if none was ever started, an empty LZ4 frame goes
    /// out before it.
    #[throws]
    pub fn write_user_data_frame<W: Write>(&mut self, id: u8, data: &[u8], sink: &mut W) {
        if id > 15 {
            throw!(io::Error::new(ErrorKind::InvalidInput, "user data frame id must be in 0..=15"));
        }
        if data.len() > u32::MAX as usize {
            throw!(io::Error::new(ErrorKind::InvalidInput, "user data frame payload too large"));
        }

        if !self.started_any_frame {
            self.write_empty_frame(&mut *sink)?;
        }
        if self.frame_open {
            self.end_frame(&mut *sink)?;
        }

        sink.write_u32::<LE>(SKIPPABLE_MAGIC_BASE + u32::from(id))?;
        sink.write_u32::<LE>(data.len() as u32)?;
        sink.write_all(data)?;
        self.frame_count += 1;
    }

    /// Final flush: complete the open frame, or emit one whole (empty)
    /// frame if nothing was ever written so the output is a valid LZ4
    /// stream either way.
    #[throws]
    pub fn finish<W: Write>(&mut self, sink: &mut W) {
        if !self.started_any_frame {
            self.start_frame(&mut *sink)?;
        }
        self.end_frame(sink)?;
    }
}
