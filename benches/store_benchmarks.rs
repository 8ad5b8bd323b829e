//! Metadata store benchmarks
//!
//! - Run writes (record + index update)
//! - Label-indexed listing vs full project scan
//! - Tag resolution reads
//! - Age-scoped bulk deletion

use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use mlmeta::entity::{Artifact, LabelPredicate, Run};
use mlmeta::MetadataStore;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const ENVS: [&str; 4] = ["prod", "dev", "staging", "test"];

/// Store `count` runs with random labels and start times spread over 30 days
fn populated_store(count: usize) -> MetadataStore {
    let mut rng = StdRng::seed_from_u64(42);
    let store = MetadataStore::new();
    let now = Utc::now();

    for i in 0..count {
        let uid = format!("run-{i:06}");
        let run = Run::builder("train", uid.as_str())
            .label("env", ENVS[rng.gen_range(0..ENVS.len())])
            .label("shard", (i % 16).to_string())
            .start_time(now - Duration::minutes(rng.gen_range(0..43_200)))
            .build();
        store.store_run(run, &uid, "bench", false).unwrap();
    }
    store
}

fn bench_store_run(c: &mut Criterion) {
    let store = MetadataStore::new();
    let mut i = 0u64;

    c.bench_function("store_run", |b| {
        b.iter(|| {
            i += 1;
            let uid = format!("u{i}");
            let run = Run::builder("train", uid.as_str()).label("env", "prod").build();
            black_box(store.store_run(run, &uid, "bench", false).unwrap());
        });
    });
}

fn bench_list_runs(c: &mut Criterion) {
    let mut group = c.benchmark_group("list_runs");

    for size in [1_000, 10_000].iter() {
        let store = populated_store(*size);
        let rare = [LabelPredicate::equals("env", "prod"), LabelPredicate::equals("shard", "3")];

        group.bench_with_input(BenchmarkId::new("label_index", size), size, |b, _| {
            b.iter(|| black_box(store.list_runs("", "bench", &rare, "", true, 0).unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("project_scan", size), size, |b, _| {
            b.iter(|| black_box(store.list_runs("", "bench", &[], "", true, 100).unwrap()));
        });
    }

    group.finish();
}

fn bench_read_artifact_by_tag(c: &mut Criterion) {
    let store = MetadataStore::new();
    for v in 0..100 {
        let uid = format!("v{v}");
        store
            .store_artifact("model", Artifact::new("model", "model"), &uid, "latest", "bench")
            .unwrap();
    }

    c.bench_function("read_artifact_by_tag", |b| {
        b.iter(|| black_box(store.read_artifact("model", "latest", "bench").unwrap()));
    });
}

fn bench_del_runs_older_than(c: &mut Criterion) {
    let mut group = c.benchmark_group("del_runs_older_than");
    group.sample_size(10);

    for size in [1_000, 5_000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter_batched(
                || populated_store(size),
                |store| {
                    let cutoff = Some(Utc::now() - Duration::days(15));
                    black_box(store.del_runs("", "bench", &[], "", cutoff).unwrap())
                },
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_store_run,
    bench_list_runs,
    bench_read_artifact_by_tag,
    bench_del_runs_older_than
);
criterion_main!(benches);
