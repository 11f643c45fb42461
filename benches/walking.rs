use criterion::{criterion_group, criterion_main, Criterion};
use std::path::Path;

use i18nmail::parser::header::head_decode;
use i18nmail::{Visit, Walker};

fn bench_walk_nested(c: &mut Criterion) {
    let fixture_path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("nested.eml");
    let data = std::fs::read(&fixture_path).unwrap();
    let walker = Walker::new().smime(None);

    c.bench_function("walk_nested_eml", |b| {
        b.iter(|| {
            let mut count = 0u64;
            walker
                .walk(data.as_slice(), |part| {
                    count += part.size();
                    Ok(Visit::Continue)
                })
                .unwrap();
            count
        })
    });
}

fn bench_head_decode(c: &mut Criterion) {
    let value = "=?UTF-8?B?Sm9zw6kgR2FyY8OtYQ==?= =?ISO-8859-1?Q?Caf=E9?= plain text";

    c.bench_function("head_decode_mixed_words", |b| b.iter(|| head_decode(value)));
}

criterion_group!(benches, bench_walk_nested, bench_head_decode);
criterion_main!(benches);
