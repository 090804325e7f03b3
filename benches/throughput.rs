//! Throughput benchmarks

use std::io::Cursor;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use oceanlink_core::core::parser::{FieldKind, FieldSpec, ParticleLayout};
use oceanlink_core::core::stream::{BinaryRecognizer, ChecksumType, StreamBuffer, TextRecognizer};
use oceanlink_core::{ParserConfig, RecognizerSpec, RecordParser, RecordRole};

fn text_stream(lines: usize) -> Vec<u8> {
    let mut data = b"Source File: bench.dat\nStart Date: 2020-01-01\n".to_vec();
    for i in 0..lines {
        if i % 50 == 0 {
            data.extend_from_slice(b"# comment\n");
        }
        data.extend_from_slice(format!("{}.0\t{}.5\n", 100 + i, i % 7).as_bytes());
    }
    data
}

fn binary_stream(frames: usize) -> Vec<u8> {
    let mut data = Vec::new();
    for i in 0..frames {
        let mut frame = vec![0xCB];
        frame.extend((0..42).map(|j| ((i + j) % 251) as u8));
        ChecksumType::Sum16.seal(&mut frame);
        if i % 10 == 0 {
            data.extend_from_slice(&[0xCB, 0x00, 0x01]);
        }
        data.extend_from_slice(&frame);
    }
    data
}

fn chunker_benchmark(c: &mut Criterion) {
    let text = text_stream(2_000);
    let binary = binary_stream(2_000);

    let mut group = c.benchmark_group("chunker");

    group.throughput(Throughput::Bytes(text.len() as u64));
    group.bench_function("text_lines", |b| {
        b.iter(|| {
            let mut buf = StreamBuffer::new(vec![
                Box::new(TextRecognizer::new("header", r"(?m)^([A-Za-z][^:\n]*):\s*([^\n]*)\n").unwrap()),
                Box::new(TextRecognizer::new("data", r"(?m)^(\d+\.\d+)\t(\d+\.\d+)\n").unwrap()),
            ]);
            buf.append(black_box(&text));
            let mut chunks = 0;
            while buf.next_chunk(true).is_some() {
                chunks += 1;
            }
            black_box(chunks)
        })
    });

    group.throughput(Throughput::Bytes(binary.len() as u64));
    group.bench_function("binary_frames", |b| {
        b.iter(|| {
            let mut buf = StreamBuffer::new(vec![Box::new(
                BinaryRecognizer::new("accel", 0xCB, 45, ChecksumType::Sum16).unwrap(),
            )]);
            buf.append(black_box(&binary));
            let mut chunks = 0;
            while buf.next_chunk(true).is_some() {
                chunks += 1;
            }
            black_box(chunks)
        })
    });

    group.finish();
}

fn parser_benchmark(c: &mut Criterion) {
    let text = text_stream(2_000);
    let config = ParserConfig {
        recognizers: vec![
            RecognizerSpec::Text {
                name: "header".into(),
                pattern: r"(?m)^([A-Za-z][^:\n]*):\s*([^\n]*)\n".into(),
                role: RecordRole::Header,
            },
            RecognizerSpec::Text {
                name: "data".into(),
                pattern: r"(?m)^(\d+\.\d+)\t(\d+\.\d+)\n".into(),
                role: RecordRole::Data,
            },
            RecognizerSpec::Text { name: "comment".into(), pattern: r"(?m)^#[^\n]*\n".into(), role: RecordRole::Ignore },
        ],
        required_header_keys: vec!["Source File".into(), "Start Date".into()],
        particles: Some(ParticleLayout {
            data_stream: "bench".into(),
            metadata_stream: "bench_metadata".into(),
            fields: vec![FieldSpec::new("ts", 1, FieldKind::Float), FieldSpec::new("val", 2, FieldKind::Float)],
            derived: Vec::new(),
        }),
        ..ParserConfig::default()
    };

    let mut group = c.benchmark_group("parser");
    group.throughput(Throughput::Bytes(text.len() as u64));

    group.bench_function("get_records", |b| {
        b.iter(|| {
            let mut parser = RecordParser::new(&config, Cursor::new(black_box(&text))).unwrap();
            let mut total = 0;
            loop {
                let records = parser.get_records(256).unwrap();
                if records.is_empty() {
                    break;
                }
                total += records.len();
            }
            black_box(total)
        })
    });

    group.finish();
}

criterion_group!(benches, chunker_benchmark, parser_benchmark);
criterion_main!(benches);
