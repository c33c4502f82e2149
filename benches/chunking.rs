use criterion::{Criterion, criterion_group, criterion_main};
use frontdesk::config::ChunkingSettings;
use frontdesk::embeddings::{CharsPerToken, chunk_text};
use std::hint::black_box;

pub fn criterion_benchmark(c: &mut Criterion) {
    // A long multi-paragraph knowledge entry, in the shape a salon owner
    // would paste into the admin panel.
    let paragraph = "Our keratin smoothing treatment reduces frizz for three to four \
                     months and works on all hair types. The treatment takes about two \
                     hours including a wash and blow-dry. We recommend avoiding washing \
                     your hair for 48 hours afterwards. ";
    let text = paragraph.repeat(200);

    let settings = ChunkingSettings::default();
    let estimator = CharsPerToken::from_settings(&settings);

    c.bench_function("chunking", |b| {
        b.iter(|| chunk_text(black_box(&text), black_box(&settings), &estimator))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
