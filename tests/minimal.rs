use std::io::{Cursor, ErrorKind, Read, Write};

use lz4_stream::minimal::LZ4MinimalStream;

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 11 % 239) as u8).collect()
}

fn roundtrip_with(block_size: usize, ring_slots: Option<usize>, input: &[u8]) -> Vec<u8> {
    let mut compressor =
        LZ4MinimalStream::write_compressor_with(Vec::new(), block_size, ring_slots).unwrap();
    compressor.write_all(input).unwrap();
    let encoded = compressor.finish().unwrap();

    let mut out = Vec::new();
    LZ4MinimalStream::read_decompressor_with(&encoded[..], block_size, ring_slots)
        .unwrap()
        .read_to_end(&mut out)
        .unwrap();
    assert_eq!(out, input);
    encoded
}

#[test]
fn roundtrip_default_settings() {
    let input = patterned(200 * 1024);
    let mut compressor = LZ4MinimalStream::write_compressor(Vec::new());
    compressor.write_all(&input).unwrap();
    let encoded = compressor.finish().unwrap();

    assert!(encoded.len() < input.len());

    let mut out = Vec::new();
    LZ4MinimalStream::read_decompressor(&encoded[..])
        .read_to_end(&mut out)
        .unwrap();
    assert_eq!(out, input);
}

#[test]
fn roundtrip_small_blocks_with_derived_slot_count() {
    // 1 KiB blocks get enough slots to keep the 64 KiB window addressable
    roundtrip_with(1024, None, &patterned(300 * 1024));
}

#[test]
fn roundtrip_single_slot_ring() {
    // one slot means no history at all, every chunk stands alone
    roundtrip_with(4 * 1024, Some(1), &patterned(64 * 1024));
}

#[test]
fn roundtrip_with_flushed_partial_chunks() {
    let input = patterned(150 * 1024);
    let mut compressor = LZ4MinimalStream::write_compressor(Vec::new());
    compressor.write_all(&input[..100]).unwrap();
    compressor.flush().unwrap();
    compressor.write_all(&input[100..5000]).unwrap();
    compressor.flush().unwrap();
    compressor.write_all(&input[5000..]).unwrap();
    let encoded = compressor.finish().unwrap();

    let mut out = Vec::new();
    LZ4MinimalStream::read_decompressor(&encoded[..])
        .read_to_end(&mut out)
        .unwrap();
    assert_eq!(out, input);
}

#[test]
fn drop_flushes_the_pending_chunk() {
    use std::cell::RefCell;
    use std::rc::Rc;

    let shared = Rc::new(RefCell::new(Vec::new()));

    struct SharedSink(Rc<RefCell<Vec<u8>>>);
    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    {
        let mut compressor = LZ4MinimalStream::write_compressor(SharedSink(Rc::clone(&shared)));
        compressor.write_all(b"dropped chunk").unwrap();
    }

    let encoded = shared.borrow().clone();
    let mut out = Vec::new();
    LZ4MinimalStream::read_decompressor(&encoded[..])
        .read_to_end(&mut out)
        .unwrap();
    assert_eq!(out, b"dropped chunk");
}

#[test]
fn zero_length_word_terminates_the_stream() {
    let mut compressor = LZ4MinimalStream::write_compressor(Vec::new());
    compressor.write_all(b"terminated").unwrap();
    let mut encoded = compressor.finish().unwrap();
    encoded.extend_from_slice(&[0, 0, 0, 0]);
    encoded.extend_from_slice(b"garbage beyond the terminator");

    let mut out = Vec::new();
    LZ4MinimalStream::read_decompressor(&encoded[..])
        .read_to_end(&mut out)
        .unwrap();
    assert_eq!(out, b"terminated");
}

#[test]
fn reserved_length_bit_is_rejected() {
    let encoded = [0x00, 0x00, 0x00, 0x80];
    let err = LZ4MinimalStream::read_decompressor(&encoded[..])
        .read_to_end(&mut Vec::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidData);
}

#[test]
fn truncated_chunk_is_rejected() {
    let mut compressor = LZ4MinimalStream::write_compressor(Vec::new());
    compressor.write_all(b"about to be cut short").unwrap();
    let encoded = compressor.finish().unwrap();

    // cut inside the length word
    let err = LZ4MinimalStream::read_decompressor(&encoded[..2])
        .read_to_end(&mut Vec::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidData);

    // cut inside the payload
    let err = LZ4MinimalStream::read_decompressor(&encoded[..encoded.len() - 1])
        .read_to_end(&mut Vec::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidData);
}

#[test]
fn invalid_construction_parameters() {
    let err = LZ4MinimalStream::write_compressor_with(Vec::new(), 0, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let err = LZ4MinimalStream::write_compressor_with(Vec::new(), 1024, Some(0)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let err = LZ4MinimalStream::read_decompressor_with(Cursor::new(Vec::new()), 0, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[test]
fn wrong_direction_operations_fail() {
    let mut compressor = LZ4MinimalStream::write_compressor(Cursor::new(Vec::new()));
    assert!(compressor.can_write());
    assert!(!compressor.can_read());
    let mut buf = [0u8; 4];
    assert_eq!(compressor.read(&mut buf).unwrap_err().kind(), ErrorKind::Unsupported);

    let mut decompressor = LZ4MinimalStream::read_decompressor(Cursor::new(Vec::new()));
    assert!(decompressor.can_read());
    assert!(!decompressor.can_write());
    assert_eq!(decompressor.write(b"x").unwrap_err().kind(), ErrorKind::Unsupported);
}
