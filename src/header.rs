//! The two descriptor bytes following the magic of every LZ4 frame.

#![allow(non_upper_case_globals)]

use thiserror::Error;
use fehler::{throw, throws};
use bitflags::bitflags;

bitflags! {
    pub struct Flags: u8 {
        const IndependentBlocks = 0b00100000;
        const BlockChecksums    = 0b00010000;
        const ContentSize       = 0b00001000;
        const ContentChecksum   = 0b00000100;
        const DictionaryId      = 0b00000001;
    }
}

/// The version bits an encoder writes into descriptor byte 0.
pub const VERSION: u8 = 1 << 6;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("frame version bits {0:#04x} not supported")]
    UnsupportedVersion(u8),
    #[error("predefined dictionaries are not supported")]
    DictionariesUnsupported,
    #[error("reserved bits in the flag byte are set")]
    ReservedFlagBitsSet,
    #[error("reserved bits in the block-descriptor byte are set")]
    ReservedBdBitsSet,
    #[error("at the time of writing this, spec says block size id {0} is reserved")]
    UnimplementedBlockSize(u8),
}

impl Flags {
    /// Parse descriptor byte 0.
    ///
    /// Version acceptance is deliberately lax: any byte with bit `0x40` set
    /// and bit `0x80` clear passes, so the nonstandard `0x60` pattern that
    /// some writers emit is tolerated.
    #[throws(ParseError)]
    pub fn parse(i: u8) -> Self {
        if (i & 0x40) == 0 || (i & 0x80) != 0 {
            throw!(ParseError::UnsupportedVersion(i & 0xC0));
        }
        if (i & 0b01) != 0 {
            throw!(ParseError::DictionariesUnsupported);
        }
        if (i & 0b10) != 0 {
            throw!(ParseError::ReservedFlagBitsSet);
        }

        Flags::from_bits_truncate(i)
    }

    pub fn independent_blocks(&self) -> bool { self.contains(Flags::IndependentBlocks) }
    pub fn block_checksums(&self)    -> bool { self.contains(Flags::BlockChecksums) }
    pub fn content_size(&self)       -> bool { self.contains(Flags::ContentSize) }
    pub fn content_checksum(&self)   -> bool { self.contains(Flags::ContentChecksum) }
    pub fn dictionary_id(&self)      -> bool { self.contains(Flags::DictionaryId) }
}

/// The four block sizes the frame format can carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockSize {
    Max64KB,
    Max256KB,
    Max1MB,
    Max4MB,
}

impl Default for BlockSize {
    fn default() -> Self {
        BlockSize::Max64KB
    }
}

impl BlockSize {
    /// Maximum plaintext bytes per block.
    pub fn bytes(self) -> usize {
        match self {
            BlockSize::Max64KB  => 64 * 1024,
            BlockSize::Max256KB => 256 * 1024,
            BlockSize::Max1MB   => 1024 * 1024,
            BlockSize::Max4MB   => 4 * 1024 * 1024,
        }
    }

    /// The id stored in bits 4..=6 of descriptor byte 1.
    pub fn wire_id(self) -> u8 {
        match self {
            BlockSize::Max64KB  => 4,
            BlockSize::Max256KB => 5,
            BlockSize::Max1MB   => 6,
            BlockSize::Max4MB   => 7,
        }
    }

    /// Descriptor byte 1 as an encoder emits it.
    pub fn to_bd_byte(self) -> u8 {
        self.wire_id() << 4
    }

    /// Parse descriptor byte 1.
    #[throws(ParseError)]
    pub fn parse_bd(i: u8) -> Self {
        if (i & 0b1000_1111) != 0 {
            throw!(ParseError::ReservedBdBitsSet);
        }
        match (i >> 4) & 0b111 {
            4 => BlockSize::Max64KB,
            5 => BlockSize::Max256KB,
            6 => BlockSize::Max1MB,
            7 => BlockSize::Max4MB,
            other => throw!(ParseError::UnimplementedBlockSize(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_bits() {
        assert!(Flags::parse(0x40).is_ok());
        assert!(Flags::parse(0x60).is_ok()); // permissive quirk, kept on purpose
        assert!(Flags::parse(0x00).is_err());
        assert!(Flags::parse(0x80).is_err());
        assert!(Flags::parse(0xC0).is_err());
    }

    #[test]
    fn rejects_dictionary_and_reserved_bits() {
        assert!(matches!(Flags::parse(0x41), Err(ParseError::DictionariesUnsupported)));
        assert!(matches!(Flags::parse(0x42), Err(ParseError::ReservedFlagBitsSet)));
    }

    #[test]
    fn flag_accessors() {
        let flags = Flags::parse(0x74).unwrap();
        assert!(flags.independent_blocks());
        assert!(flags.block_checksums());
        assert!(flags.content_checksum());
        assert!(!flags.content_size());
    }

    #[test]
    fn block_sizes_roundtrip() {
        for &bs in &[BlockSize::Max64KB, BlockSize::Max256KB, BlockSize::Max1MB, BlockSize::Max4MB] {
            assert_eq!(BlockSize::parse_bd(bs.to_bd_byte()).unwrap(), bs);
        }
        assert_eq!(BlockSize::Max64KB.bytes(), 64 * 1024);
    }

    #[test]
    fn bd_reserved_bits() {
        assert!(BlockSize::parse_bd(0x41).is_err());
        assert!(BlockSize::parse_bd(0xC0).is_err());
        assert!(matches!(BlockSize::parse_bd(0x30), Err(ParseError::UnimplementedBlockSize(3))));
    }
}
