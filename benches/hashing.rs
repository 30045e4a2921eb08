use criterion::{Criterion, criterion_group, criterion_main};
use recipe_vault::enrichment::prepare_embedding_input;
use recipe_vault::versions::content_hash;
use std::hint::black_box;

fn sample_recipe(paragraphs: usize) -> String {
    let paragraph = "Whisk the eggs with sugar until pale, fold in the flour in three \
                     additions and bake at 180°C until a skewer comes out clean.\n\n";
    paragraph.repeat(paragraphs)
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let short = sample_recipe(4);
    let long = sample_recipe(2_000);

    c.bench_function("content_hash short", |b| {
        b.iter(|| content_hash(black_box("Sponge cake"), black_box(&short)))
    });
    c.bench_function("content_hash long", |b| {
        b.iter(|| content_hash(black_box("Sponge cake"), black_box(&long)))
    });
    c.bench_function("prepare_embedding_input long", |b| {
        b.iter(|| prepare_embedding_input(black_box("Sponge cake"), black_box(&long), 6000))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
