use std::cmp;
use std::hash::Hasher;

use byteorder::{ByteOrder, LE};
use lz4_flex::block::DecompressError;
use thiserror::Error;
use fehler::{throw, throws};

use crate::INCOMPRESSIBLE;
use crate::block::BlockDecoder;
use crate::header::{BlockSize, Flags, ParseError};
use crate::ring::RingBuffer;
use crate::xxhash::{xxh32, XxHash32};

/// Errors when decoding an LZ4 frame stream.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("wrong magic number in frame header: {0:#010x}")]
    WrongMagic(u32),
    #[error("invalid frame header")]
    Header(#[from] ParseError),
    #[error("the header checksum was invalid")]
    HeaderChecksumMismatch,
    #[error("a block checksum was invalid")]
    BlockChecksumMismatch,
    #[error("the content checksum of a frame was invalid")]
    ContentChecksumMismatch,
    #[error("a block is larger than the frame's declared block size")]
    BlockTooLarge,
    #[error("the raw block decompression failed (data corruption?)")]
    Codec(#[from] DecompressError),
    #[error("unexpected end of stream in the middle of a frame")]
    Truncated,
}
type Error = FrameError;

/// Where the decoder currently is in the wire format. Every state is
/// byte-incremental, so feeding the machine one byte at a time works
/// exactly like feeding it the whole stream at once.
enum State {
    /// Accumulating the 4 magic bytes of the next frame.
    Magic,
    /// Accumulating the 2 descriptor bytes of an LZ4 frame.
    Descriptor,
    /// Accumulating the optional 8-byte content size.
    ContentSize,
    /// One byte, second byte of the descriptor digest.
    HeaderChecksum,
    /// Accumulating a 4-byte block length word.
    BlockHeader,
    /// Accumulating a block's wire payload.
    BlockPayload,
    /// Accumulating the 4-byte checksum following a block.
    BlockChecksum,
    /// Accumulating the 4-byte whole-frame checksum after the end mark.
    ContentChecksum,
    /// Accumulating the 4-byte size of a skippable frame.
    UserDataLen,
    /// Accumulating a skippable frame's payload.
    UserDataPayload,
}

/// The byte-driven half of the decompressor, independent of how it is
/// driven: the pull driver feeds it chunks read from the inner stream, the
/// push driver feeds it whatever the caller wrote.
pub(super) struct DecoderCore {
    state: State,
    /// Staging area for fixed-size fields.
    acc: [u8; 8],
    acc_len: usize,
    /// Descriptor bytes (2 or 10 with content size), kept around because
    /// the header checksum covers all of them.
    desc: [u8; 10],
    desc_len: usize,

    // parsed per-frame settings, valid from descriptor to end mark
    linked: bool,
    want_block_checksums: bool,
    want_content_checksum: bool,
    block_size: usize,

    ring: Option<RingBuffer>,
    block: BlockDecoder,
    /// Plaintext length of the previous block, the linked-mode dictionary.
    prev_len: usize,
    /// Decoded output available to the driver: `ring[out_offset..][out_pos..out_len]`.
    out_offset: usize,
    out_len: usize,
    out_pos: usize,

    payload: Vec<u8>,
    payload_target: usize,
    block_is_compressed: bool,

    user_id: u8,
    user_buf: Vec<u8>,
    user_target: usize,
    handler: Option<Box<dyn FnMut(u8, &[u8])>>,

    content_hasher: Option<XxHash32>,
    frame_count: u64,
    block_count: u64,
}

impl DecoderCore {
    pub fn new() -> Self {
        DecoderCore {
            state: State::Magic,
            acc: [0; 8],
            acc_len: 0,
            desc: [0; 10],
            desc_len: 0,
            linked: true,
            want_block_checksums: false,
            want_content_checksum: false,
            block_size: 0,
            ring: None,
            block: BlockDecoder::new(),
            prev_len: 0,
            out_offset: 0,
            out_len: 0,
            out_pos: 0,
            payload: Vec::new(),
            payload_target: 0,
            block_is_compressed: false,
            user_id: 0,
            user_buf: Vec::new(),
            user_target: 0,
            handler: None,
            content_hasher: None,
            frame_count: 0,
            block_count: 0,
        }
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn set_user_data_handler(&mut self, handler: Box<dyn FnMut(u8, &[u8])>) {
        self.handler = Some(handler);
    }

    /// True between frames: end of input here is clean termination, end of
    /// input anywhere else is a truncated stream.
    pub fn at_frame_boundary(&self) -> bool {
        matches!(self.state, State::Magic) && self.acc_len == 0
    }

    /// Decoded bytes not yet handed to the driver.
    pub fn output(&self) -> &[u8] {
        match &self.ring {
            Some(ring) => &ring.range(self.out_offset, self.out_len)[self.out_pos..],
            None => &[],
        }
    }

    pub fn consume_output(&mut self) {
        self.out_pos = self.out_len;
    }

    /// Copy decoded bytes into `buf`, advancing the output cursor.
    pub fn take_output(&mut self, buf: &mut [u8]) -> usize {
        let available = self.output();
        let chunk = cmp::min(available.len(), buf.len());
        buf[..chunk].copy_from_slice(&available[..chunk]);
        self.out_pos += chunk;
        chunk
    }

    fn fill_acc(&mut self, data: &[u8], pos: usize, want: usize) -> usize {
        let need = want - self.acc_len;
        let chunk = cmp::min(need, data.len() - pos);
        self.acc[self.acc_len..self.acc_len + chunk].copy_from_slice(&data[pos..pos + chunk]);
        self.acc_len += chunk;
        chunk
    }

    /// Advance the state machine over `data`, returning how many bytes were
    /// consumed. Returns early as soon as one block has been decoded so the
    /// driver can dispose of the output before more arrives.
    #[throws]
    pub fn feed(&mut self, data: &[u8]) -> usize {
        let mut pos = 0;
        while pos < data.len() {
            match self.state {
                State::Magic => {
                    pos += self.fill_acc(data, pos, 4);
                    if self.acc_len == 4 {
                        self.acc_len = 0;
                        self.block_count = 0;
                        let m = &self.acc[..4];
                        if m == &[0x04, 0x22, 0x4D, 0x18][..] {
                            self.desc_len = 0;
                            self.state = State::Descriptor;
                        } else if (0x50..=0x5F).contains(&m[0]) && m[1..4] == [0x2A, 0x4D, 0x18][..] {
                            self.user_id = m[0] & 0xF;
                            self.state = State::UserDataLen;
                        } else {
                            throw!(Error::WrongMagic(LE::read_u32(m)));
                        }
                    }
                }
                State::Descriptor => {
                    pos += self.fill_acc(data, pos, 2);
                    if self.acc_len == 2 {
                        let flags = Flags::parse(self.acc[0])?;
                        let block_size = BlockSize::parse_bd(self.acc[1])?;
                        self.desc[..2].copy_from_slice(&self.acc[..2]);
                        self.desc_len = 2;
                        self.acc_len = 0;

                        self.frame_count += 1;
                        self.linked = !flags.independent_blocks();
                        self.want_block_checksums = flags.block_checksums();
                        self.want_content_checksum = flags.content_checksum();
                        self.block_size = block_size.bytes();
                        self.content_hasher = if flags.content_checksum() {
                            Some(XxHash32::with_seed(0))
                        } else {
                            None
                        };
                        self.out_len = 0;
                        self.out_pos = 0;
                        self.prev_len = 0;

                        // the ring survives frame boundaries; it is only
                        // rebuilt when the block size actually changes
                        let rebuild = match &self.ring {
                            Some(ring) => ring.slot_size() != self.block_size,
                            None => true,
                        };
                        if rebuild {
                            self.ring = Some(RingBuffer::new(self.block_size, 2));
                        }

                        self.state = if flags.content_size() {
                            State::ContentSize
                        } else {
                            State::HeaderChecksum
                        };
                    }
                }
                State::ContentSize => {
                    pos += self.fill_acc(data, pos, 8);
                    if self.acc_len == 8 {
                        // the value is not needed for streaming decode, but
                        // the bytes participate in the header checksum
                        self.desc[2..10].copy_from_slice(&self.acc);
                        self.desc_len = 10;
                        self.acc_len = 0;
                        self.state = State::HeaderChecksum;
                    }
                }
                State::HeaderChecksum => {
                    let actual = data[pos];
                    pos += 1;
                    let expected = (xxh32(0, &self.desc[..self.desc_len]) >> 8) as u8;
                    if actual != expected {
                        throw!(Error::HeaderChecksumMismatch);
                    }
                    self.state = State::BlockHeader;
                }
                State::BlockHeader => {
                    pos += self.fill_acc(data, pos, 4);
                    if self.acc_len == 4 {
                        let word = LE::read_u32(&self.acc[..4]);
                        self.acc_len = 0;

                        let len = (word & !INCOMPRESSIBLE) as usize;
                        if len == 0 {
                            // end mark
                            if self.want_content_checksum {
                                self.state = State::ContentChecksum;
                            } else {
                                self.state = State::Magic;
                            }
                        } else {
                            if len > self.block_size {
                                throw!(Error::BlockTooLarge);
                            }
                            self.block_is_compressed = word & INCOMPRESSIBLE == 0;
                            self.payload_target = len;
                            self.payload.clear();
                            self.state = State::BlockPayload;
                        }
                    }
                }
                State::BlockPayload => {
                    let need = self.payload_target - self.payload.len();
                    let chunk = cmp::min(need, data.len() - pos);
                    self.payload.extend_from_slice(&data[pos..pos + chunk]);
                    pos += chunk;
                    if self.payload.len() == self.payload_target {
                        self.block_count += 1;
                        if self.want_block_checksums {
                            self.state = State::BlockChecksum;
                        } else {
                            self.decode_pending_block()?;
                            self.state = State::BlockHeader;
                            return pos;
                        }
                    }
                }
                State::BlockChecksum => {
                    pos += self.fill_acc(data, pos, 4);
                    if self.acc_len == 4 {
                        let stored = LE::read_u32(&self.acc[..4]);
                        self.acc_len = 0;
                        // the block checksum covers the payload as stored on
                        // the wire, compressed or not
                        if xxh32(0, &self.payload) != stored {
                            throw!(Error::BlockChecksumMismatch);
                        }
                        self.decode_pending_block()?;
                        self.state = State::BlockHeader;
                        return pos;
                    }
                }
                State::ContentChecksum => {
                    pos += self.fill_acc(data, pos, 4);
                    if self.acc_len == 4 {
                        let stored = LE::read_u32(&self.acc[..4]);
                        self.acc_len = 0;
                        if let Some(hasher) = self.content_hasher.take() {
                            if hasher.finish() as u32 != stored {
                                throw!(Error::ContentChecksumMismatch);
                            }
                        }
                        self.state = State::Magic;
                    }
                }
                State::UserDataLen => {
                    pos += self.fill_acc(data, pos, 4);
                    if self.acc_len == 4 {
                        self.user_target = LE::read_u32(&self.acc[..4]) as usize;
                        self.acc_len = 0;
                        self.frame_count += 1;
                        self.user_buf.clear();
                        if self.user_target == 0 {
                            self.emit_user_data_frame();
                            self.state = State::Magic;
                        } else {
                            self.state = State::UserDataPayload;
                        }
                    }
                }
                State::UserDataPayload => {
                    let need = self.user_target - self.user_buf.len();
                    let chunk = cmp::min(need, data.len() - pos);
                    self.user_buf.extend_from_slice(&data[pos..pos + chunk]);
                    pos += chunk;
                    if self.user_buf.len() == self.user_target {
                        self.emit_user_data_frame();
                        self.state = State::Magic;
                    }
                }
            }
        }
        pos
    }

    fn emit_user_data_frame(&mut self) {
        if let Some(handler) = self.handler.as_mut() {
            handler(self.user_id, &self.user_buf);
        }
    }

    /// Turn the accumulated wire payload into plaintext in the next ring
    /// slot, leaving the previous slot intact as the dictionary.
    #[throws]
    fn decode_pending_block(&mut self) {
        let ring = self.ring.as_mut().expect("a parsed frame header implies a ring");

        let dict_offset = ring.offset();
        let step = ring.slot_size();
        ring.advance(step);
        let out_offset = ring.offset();

        let decoded = if self.block_is_compressed {
            if self.linked && self.block_count > 1 {
                self.block.reset_with_dict(ring.range(dict_offset, self.prev_len));
            } else {
                self.block.reset_with_dict(&[]);
            }
            self.block
                .decode_continue(&self.payload, ring.range_mut(out_offset, step))?
        } else {
            ring.range_mut(out_offset, self.payload_target)
                .copy_from_slice(&self.payload);
            self.payload_target
        };

        if let Some(hasher) = self.content_hasher.as_mut() {
            hasher.write(ring.range(out_offset, decoded));
        }

        self.prev_len = decoded;
        self.out_offset = out_offset;
        self.out_len = decoded;
        self.out_pos = 0;
    }
}
