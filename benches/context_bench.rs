use criterion::{black_box, criterion_group, criterion_main, Criterion};

use ctxzip::codec::{get_codec, CodecId};
use ctxzip::context::{encode_b250, Context};
use ctxzip::dict_id::{DictId, DictIdType};

fn sample_lines(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("chr{}\t{}\tA\tG\t.\tPASS", i % 24, 10_000 + i)).collect()
}

fn bench_context_intern(c: &mut Criterion) {
    let lines = sample_lines(10_000);
    let dict_id = DictId::new(b"LINE", DictIdType::Field);
    c.bench_function("context_intern_10k_lines", |b| {
        b.iter(|| {
            let mut ctx = Context::new("LINE", dict_id);
            for line in &lines {
                ctx.append_snip(black_box(line.as_bytes()));
            }
            black_box(encode_b250(&ctx.b250));
        })
    });
}

fn bench_codec_compress(c: &mut Criterion) {
    let data = sample_lines(10_000).join("\n").into_bytes();
    let zstd = get_codec(CodecId::Zstd);
    let lz4 = get_codec(CodecId::Lz4);
    c.bench_function("zstd_compress_vcf_lines", |b| b.iter(|| zstd.compress(black_box(&data)).unwrap()));
    c.bench_function("lz4_compress_vcf_lines", |b| b.iter(|| lz4.compress(black_box(&data)).unwrap()));
}

criterion_group!(benches, bench_context_intern, bench_codec_compress);
criterion_main!(benches);
