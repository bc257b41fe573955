//! Performance benchmarks for document analysis and reservations.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use seatmap::{parse, validate, Venue, VenueConfig};
use tempfile::TempDir;

/// A venue document with `zones` zones of `per_zone` seats each.
fn layout(zones: usize, per_zone: usize) -> String {
    let mut doc = String::from(r#"<svg width="4000" height="3000" viewBox="0 0 4000 3000">"#);
    for z in 0..zones {
        doc.push_str(&format!(r#"<g id="zona-{z}"><text>Zona {z}</text>"#));
        for s in 0..per_zone {
            doc.push_str(&format!(
                r#"<circle id="seat-{z}-{s}" cx="{}" cy="{}" r="6" onclick="pick()"/>"#,
                s * 14,
                z * 40
            ));
        }
        doc.push_str("</g>");
    }
    doc.push_str("</svg>");
    doc
}

fn open_venue(dir: &TempDir) -> Venue {
    let mut config = VenueConfig::at(dir.path());
    config.store.sync_every_commit = false;
    Venue::open(config).unwrap()
}

/// Benchmark validation and analysis with growing seat counts
fn bench_document_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("document_pipeline");

    for seats in [100, 1_000, 10_000] {
        let doc = layout(10, seats / 10);

        group.bench_with_input(BenchmarkId::new("validate", seats), &doc, |b, doc| {
            b.iter(|| validate(black_box(doc)).unwrap())
        });

        group.bench_with_input(BenchmarkId::new("parse", seats), &doc, |b, doc| {
            b.iter(|| parse(black_box(doc)).unwrap())
        });
    }

    group.finish();
}

/// Benchmark registration of a full map, including the commit log write
fn bench_registration(c: &mut Criterion) {
    let mut group = c.benchmark_group("registration");
    group.sample_size(20);

    for seats in [1_000, 5_000] {
        let doc = layout(10, seats / 10);
        group.bench_with_input(BenchmarkId::new("seats", seats), &doc, |b, doc| {
            let dir = TempDir::new().unwrap();
            let venue = open_venue(&dir);
            b.iter(|| venue.registrar().register("bench.svg", doc).unwrap())
        });
    }

    group.finish();
}

/// Benchmark the hold/release cycle on one seat
fn bench_hold_release(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let venue = open_venue(&dir);
    venue.registrar().register("bench.svg", &layout(1, 10)).unwrap();
    let engine = venue.reservations();

    c.bench_function("hold_release_cycle", |b| {
        b.iter(|| {
            engine.hold("bench.svg", "seat-0-0").unwrap();
            engine.release("bench.svg", "seat-0-0").unwrap();
        })
    });
}

criterion_group!(
    benches,
    bench_document_pipeline,
    bench_registration,
    bench_hold_release
);
criterion_main!(benches);
