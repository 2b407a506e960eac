//! Adapter over the external LZ4 block codec.
//!
//! The block-level heavy lifting, match searching and sequence decoding,
//! belongs to the `lz4_flex` block primitives; this crate only does the
//! framing around them. The adapter narrows that codec to the four
//! operations the frame layer drives: reset the encoder, encode one block
//! continuing from the previous one, point the decoder at a dictionary,
//! decode one block against it. "Continuing" means back-references may
//! reach into the previous block's plaintext.

use lz4_flex::block::{
    compress_into, compress_into_with_dict, decompress_into, decompress_into_with_dict,
    get_maximum_output_size, CompressError, DecompressError,
};

use crate::WINDOW_SIZE;

/// Block compressor with a retained dictionary window.
///
/// The window is exactly the previous block's plaintext (its trailing
/// 64 KiB): never more, because a decoder replays linked blocks with only
/// the previous ring slot installed as its dictionary.
#[derive(Debug)]
pub(crate) struct BlockEncoder {
    window: Vec<u8>,
}

impl BlockEncoder {
    /// The external codec currently implements a single effort level, so
    /// the high compression toggle selects the same primitive.
    pub fn new(_high_compression: bool) -> Self {
        BlockEncoder { window: Vec::new() }
    }

    /// Forget the dictionary. Called at frame boundaries, before every
    /// block in independent mode, and when the minimal codec's ring wraps.
    pub fn reset(&mut self) {
        self.window.clear();
    }

    /// Compress `src` against the retained window into `dst`, then retain
    /// `src` as the next block's window. `None` means the compressed form
    /// would not be smaller than the input; the caller stores the block
    /// uncompressed (the window is retained all the same).
    pub fn encode_continue(&mut self, src: &[u8], dst: &mut Vec<u8>) -> Option<usize> {
        dst.clear();
        dst.resize(src.len().saturating_sub(1), 0);
        let result = if self.window.is_empty() {
            compress_into(src, dst)
        } else {
            compress_into_with_dict(src, dst, &self.window)
        };
        self.retain(src);
        result.ok()
    }

    /// Like [`BlockEncoder::encode_continue`], but with enough output
    /// headroom that even incompressible input encodes. The minimal format
    /// has no uncompressed escape hatch, so expansion must be allowed.
    pub fn encode_continue_unbounded(
        &mut self,
        src: &[u8],
        dst: &mut Vec<u8>,
    ) -> Result<usize, CompressError> {
        dst.clear();
        dst.resize(get_maximum_output_size(src.len()), 0);
        let result = if self.window.is_empty() {
            compress_into(src, dst)
        } else {
            compress_into_with_dict(src, dst, &self.window)
        };
        self.retain(src);
        result
    }

    fn retain(&mut self, src: &[u8]) {
        self.window.clear();
        self.window
            .extend_from_slice(&src[src.len().saturating_sub(WINDOW_SIZE)..]);
    }
}

/// Block decompressor with an installed dictionary.
#[derive(Debug)]
pub(crate) struct BlockDecoder {
    dict: Vec<u8>,
}

impl BlockDecoder {
    pub fn new() -> Self {
        BlockDecoder { dict: Vec::new() }
    }

    /// Install the dictionary for the next block, normally the previous
    /// block's plaintext sitting in the other ring slot. Only the trailing
    /// 64 KiB matters, block matches cannot reach further back.
    pub fn reset_with_dict(&mut self, dict: &[u8]) {
        self.dict.clear();
        self.dict
            .extend_from_slice(&dict[dict.len().saturating_sub(WINDOW_SIZE)..]);
    }

    /// Decode one block into `dst`, resolving back-references through the
    /// installed dictionary. Returns the decoded length.
    pub fn decode_continue(&mut self, src: &[u8], dst: &mut [u8]) -> Result<usize, DecompressError> {
        if self.dict.is_empty() {
            decompress_into(src, dst)
        } else {
            decompress_into_with_dict(src, dst, &self.dict)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BlockDecoder, BlockEncoder};

    fn decode(src: &[u8], dict: &[u8], capacity: usize) -> Vec<u8> {
        let mut decoder = BlockDecoder::new();
        decoder.reset_with_dict(dict);
        let mut out = vec![0u8; capacity];
        let n = decoder.decode_continue(src, &mut out).unwrap();
        out.truncate(n);
        out
    }

    #[test]
    fn compressible_input_shrinks_and_restores() {
        let src = b"round and round and round and round the codec goes".repeat(4);
        let mut encoder = BlockEncoder::new(false);
        let mut dst = Vec::new();
        let n = encoder.encode_continue(&src, &mut dst).expect("repetitive input compresses");
        assert!(n < src.len());
        assert_eq!(decode(&dst[..n], b"", src.len()), src);
    }

    #[test]
    fn single_bytes_never_shrink() {
        let mut encoder = BlockEncoder::new(false);
        let mut dst = Vec::new();
        assert_eq!(encoder.encode_continue(b"q", &mut dst), None);
    }

    #[test]
    fn window_carries_into_the_next_block() {
        let first = b"a rather specific sentence that will come back around".to_vec();
        let second = b"a rather specific sentence that will come back around, again".to_vec();

        let mut linked = BlockEncoder::new(false);
        let mut dst = Vec::new();
        let _ = linked.encode_continue(&first, &mut Vec::new());
        let n_linked = linked
            .encode_continue(&second, &mut dst)
            .expect("the shared prefix sits in the window");

        assert_eq!(decode(&dst[..n_linked], &first, second.len()), second);

        // without the window the second block has nothing to reference
        let mut fresh = BlockEncoder::new(false);
        let mut alone = Vec::new();
        if let Some(n_alone) = fresh.encode_continue(&second, &mut alone) {
            assert!(n_linked < n_alone);
        }
    }

    #[test]
    fn reset_forgets_the_window() {
        let block = b"forgettable, forgettable, forgettable text".to_vec();
        let mut encoder = BlockEncoder::new(false);
        let _ = encoder.encode_continue(&block, &mut Vec::new());
        encoder.reset();

        let mut dst = Vec::new();
        let n = encoder.encode_continue(&block, &mut dst).unwrap();
        // decodes with no dictionary at all, so no reference escaped
        assert_eq!(decode(&dst[..n], b"", block.len()), block);
    }

    #[test]
    fn linked_output_needs_its_dictionary() {
        let first = b"the dictionary half of a two block pair, fairly long".to_vec();
        let second = b"the dictionary half of a two block pair, reused here".to_vec();

        let mut encoder = BlockEncoder::new(false);
        let _ = encoder.encode_continue(&first, &mut Vec::new());
        let mut dst = Vec::new();
        let n = encoder.encode_continue(&second, &mut dst).unwrap();

        let mut decoder = BlockDecoder::new();
        decoder.reset_with_dict(b"");
        let mut out = vec![0u8; second.len()];
        assert!(decoder.decode_continue(&dst[..n], &mut out).is_err());
    }

    #[test]
    fn unbounded_encoding_accepts_incompressible_input() {
        let src: Vec<u8> = (0u32..97).map(|i| (i.wrapping_mul(193) % 251) as u8).collect();
        let mut encoder = BlockEncoder::new(false);
        let mut dst = Vec::new();
        let n = encoder.encode_continue_unbounded(&src, &mut dst).unwrap();
        assert_eq!(decode(&dst[..n], b"", src.len()), src);
    }
}
