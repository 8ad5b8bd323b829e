//! Experiment Metadata Example
//!
//! Walks a training pipeline through the store: runs with labels and
//! metrics, a re-tagged model artifact, a patched feature-set, tabular
//! output and an age-scoped cleanup.
//!
//! Run with: cargo run --example experiment_metadata

use chrono::{Duration, Utc};
use mlmeta::entity::{
    Artifact, FeatureSet, FeatureSetUpdate, LabelPredicate, Labels, Run, RunState, RunUpdate,
};
use mlmeta::render::{artifacts_table, runs_table};
use mlmeta::{telemetry, MetadataStore};
use rand::Rng;
use serde_json::{json, Map};
use std::collections::BTreeMap;

fn main() -> anyhow::Result<()> {
    telemetry::init("mlmeta=info");
    println!("=== mlmeta Experiment Metadata ===\n");

    let store = MetadataStore::builder().default_project("vision").build()?;
    let mut rng = rand::thread_rng();

    // -------------------------------------------------------------------------
    // 1. Register a hyper-parameter sweep
    // -------------------------------------------------------------------------
    println!("1. Registering runs...");

    let stale_start = Utc::now() - Duration::days(45);
    for (iteration, lr) in [0.1, 0.01, 0.001].into_iter().enumerate() {
        let uid = format!("sweep-{iteration}");
        let mut run = Run::builder("resnet-train", uid.as_str())
            .iteration(u32::try_from(iteration)?)
            .label("env", if iteration == 0 { "dev" } else { "prod" })
            .parameter("lr", lr)
            .input("s3://datasets/imagenet")
            .build();
        run.start();
        store.store_run(run, &uid, "", false)?;
    }
    let old = Run::builder("resnet-train", "legacy")
        .label("env", "prod")
        .state(RunState::Completed)
        .start_time(stale_start)
        .build();
    store.store_run(old, "legacy", "", true)?;

    // -------------------------------------------------------------------------
    // 2. Log metrics and complete runs
    // -------------------------------------------------------------------------
    println!("2. Logging metrics...");

    for epoch in 0..5 {
        let loss = 2.0 / (f64::from(epoch) + 1.0) + rng.gen_range(0.0..0.05);
        let labels = Labels::from([("run".to_string(), "sweep-1".to_string())]);
        store.store_metric(&BTreeMap::from([("loss".to_string(), loss)]), None, &labels);
    }
    for point in store.read_metric(&["loss"], "run=sweep-1")? {
        println!("   {} loss={:.4}", point.timestamp().format("%H:%M:%S%.3f"), point.value());
    }

    let update = RunUpdate::state(RunState::Completed)
        .output("accuracy", 0.91)
        .artifact("model", "s3://models/resnet/1");
    store.update_run("sweep-1", "", update)?;

    // -------------------------------------------------------------------------
    // 3. Version the model artifact
    // -------------------------------------------------------------------------
    println!("\n3. Versioning model artifact...");

    let v1 = Artifact::builder("model", "model")
        .target_path("s3://models/resnet/1")
        .producer("uri", "vision/sweep-1")
        .label("framework", "torch")
        .build();
    store.store_artifact("model", v1, "sweep-1", "latest", "")?;
    let v2 = Artifact::builder("model", "model")
        .target_path("s3://models/resnet/2")
        .producer("uri", "vision/sweep-2")
        .label("framework", "torch")
        .build();
    store.store_artifact("model", v2, "sweep-2", "latest", "")?;
    store.tag_artifact("model", "sweep-1", "baseline", "")?;

    println!("   latest   -> {}", store.read_artifact("model", "latest", "")?.target_path());
    println!("   baseline -> {}", store.read_artifact("model", "baseline", "")?.target_path());

    // -------------------------------------------------------------------------
    // 4. Patch a feature-set (new version, same tag)
    // -------------------------------------------------------------------------
    println!("\n4. Patching feature-set...");

    let features = FeatureSet::builder("image-stats")
        .entity("image_id", "str")
        .feature("mean_pixel", "float")
        .build();
    let first = store.store_feature_set(features, "", "", "")?;
    let mut status = Map::new();
    status.insert("state".to_string(), json!("ready"));
    let second = store.patch_feature_set(
        "image-stats",
        "",
        "",
        FeatureSetUpdate {
            status: Some(status),
            ..FeatureSetUpdate::default()
        },
    )?;
    println!("   {first} -> {second}");

    // -------------------------------------------------------------------------
    // 5. Render listings
    // -------------------------------------------------------------------------
    println!("\n5. Listings:");

    let prod = store.list_runs("", "", &[LabelPredicate::equals("env", "prod")], "", true, 0)?;
    let table = runs_table(&prod, true);
    println!("   runs columns: {}", table.columns().join(", "));
    for row in table.rows() {
        let cells: Vec<&str> = row.iter().map(|c| c.as_deref().unwrap_or("-")).collect();
        println!("   {}", cells.join(" | "));
    }

    let artifacts = store.list_artifacts("model", "", "*", &[])?;
    let batch = artifacts_table(&artifacts, "*", true).to_record_batch()?;
    println!("   artifacts batch: {} rows x {} columns", batch.num_rows(), batch.num_columns());

    // -------------------------------------------------------------------------
    // 6. Prune runs older than 30 days
    // -------------------------------------------------------------------------
    println!("\n6. Pruning...");

    let cutoff = mlmeta::retention::older_than_days(30)?;
    let deleted = store.del_runs("", "", &[], "", Some(cutoff))?;
    println!("   deleted {deleted} run(s); again: {}", store.del_runs("", "", &[], "", Some(cutoff))?);

    println!("\n=== Done ===");
    Ok(())
}
