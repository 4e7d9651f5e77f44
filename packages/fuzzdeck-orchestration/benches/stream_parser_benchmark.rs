//! Benchmark for stdout parsing throughput
//!
//! Measures:
//! - Status block parsing with varying chunk sizes
//! - Plain line splitting (no block parsing)
//! - `fuzzer_stats` parsing

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fuzzdeck_orchestration::stats::parse_progress;
use fuzzdeck_orchestration::StreamParser;
use std::time::{Duration, Instant};

/// AFL-style redraw output, `blocks` screens long
fn generate_status_output(blocks: usize) -> Vec<u8> {
    let mut out = String::new();
    for i in 0..blocks {
        out.push_str(&format!(
            "\x1b[H______\n process timing\n   run time : 0 days, 0 hrs, {} min, {} sec\n   last new find : 0 days, 0 hrs, 0 min, 3 sec\n______\n overall results\n   cycles done : {}\n   corpus count : {}\n   saved crashes : {}\n______\n",
            i / 60,
            i % 60,
            i / 10,
            100 + i,
            i / 50
        ));
    }
    out.into_bytes()
}

fn generate_fuzzer_stats(keys: usize) -> String {
    (0..keys)
        .map(|i| format!("stat_key_{:<10}: {}\n", i, i * 17))
        .collect()
}

fn bench_status_blocks(c: &mut Criterion) {
    let input = generate_status_output(500);
    let mut group = c.benchmark_group("status_blocks");
    group.throughput(Throughput::Bytes(input.len() as u64));

    for chunk in [64usize, 1024, 8192].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(chunk), chunk, |b, &chunk| {
            b.iter(|| {
                let mut parser = StreamParser::new("______", Duration::ZERO);
                let now = Instant::now();
                let mut blocks = 0;
                for piece in input.chunks(chunk) {
                    if parser.feed(piece, now).block.is_some() {
                        blocks += 1;
                    }
                }
                black_box(blocks);
            });
        });
    }

    group.finish();
}

fn bench_lines_only(c: &mut Criterion) {
    let input = generate_status_output(500);
    let mut group = c.benchmark_group("lines_only");
    group.throughput(Throughput::Bytes(input.len() as u64));

    group.bench_function("4096", |b| {
        b.iter(|| {
            let mut parser = StreamParser::lines_only();
            let now = Instant::now();
            let lines: usize = input
                .chunks(4096)
                .map(|piece| parser.feed(piece, now).lines.len())
                .sum();
            black_box(lines);
        });
    });

    group.finish();
}

fn bench_fuzzer_stats(c: &mut Criterion) {
    let mut group = c.benchmark_group("fuzzer_stats");

    for keys in [30usize, 300].iter() {
        let text = generate_fuzzer_stats(*keys);
        group.bench_with_input(BenchmarkId::from_parameter(keys), &text, |b, text| {
            b.iter(|| black_box(parse_progress(text)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_status_blocks, bench_lines_only, bench_fuzzer_stats);
criterion_main!(benches);
