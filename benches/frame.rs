use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::io::{Read, Write};

use lz4_stream::frame::{CompressionSettings, LZ4Stream};

fn bench_frame(c: &mut Criterion) {
    let data: Vec<u8> = (0..4 * 1024 * 1024usize).map(|i| (i * 7 % 251) as u8).collect();

    let mut group = c.benchmark_group("frame");
    group.throughput(Throughput::Bytes(data.len() as u64));

    group.bench_function("compress", |b| {
        b.iter(|| {
            let mut stream =
                LZ4Stream::write_compressor(Vec::with_capacity(data.len()), &CompressionSettings::default());
            stream.write_all(black_box(&data)).unwrap();
            stream.finish().unwrap()
        })
    });

    let framed = {
        let mut stream =
            LZ4Stream::write_compressor(Vec::with_capacity(data.len()), &CompressionSettings::default());
        stream.write_all(&data).unwrap();
        stream.finish().unwrap()
    };

    group.bench_function("decompress", |b| {
        b.iter(|| {
            let mut out = Vec::with_capacity(data.len());
            LZ4Stream::read_decompressor(black_box(&framed[..]))
                .read_to_end(&mut out)
                .unwrap();
            out
        })
    });

    group.finish();
}

criterion_group!(benches, bench_frame);
criterion_main!(benches);
