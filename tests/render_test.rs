//! Renderer tests: column layout, flattening and Arrow conversion.

use arrow::array::{Array, StringArray};
use arrow::datatypes::DataType;
use chrono::{Duration, Utc};
use mlmeta::entity::{Artifact, FeatureSet, Run, RunState};
use mlmeta::render::{artifacts_table, feature_sets_table, runs_table};
use mlmeta::MetadataStore;

fn sample_runs() -> Vec<Run> {
    vec![
        Run::builder("train", "u1")
            .iteration(2)
            .label("env", "prod")
            .parameter("lr", 0.1)
            .input("s3://in")
            .state(RunState::Completed)
            .start_time(Utc::now() - Duration::hours(1))
            .output("acc", 0.93)
            .output_artifact("model", "s3://m")
            .build(),
        Run::builder("train", "u2")
            .label("owner", "ana")
            .parameter("epochs", 10)
            .error("boom")
            .build(),
    ]
}

#[test]
fn test_runs_table_columns() {
    let table = runs_table(&sample_runs(), false);
    assert_eq!(
        table.columns(),
        [
            "uid", "iter", "start", "state", "name", "labels", "inputs", "parameters", "results",
            "artifacts", "error"
        ]
    );
    assert_eq!(table.len(), 2);
    assert_eq!(table.cell(0, "iter"), Some("2"));
    assert_eq!(table.cell(0, "state"), Some("completed"));
    assert_eq!(table.cell(0, "labels"), Some(r#"{"env":"prod"}"#));
    assert_eq!(table.cell(0, "artifacts"), Some("model"));
    assert_eq!(table.cell(1, "start"), None);
    assert_eq!(table.cell(1, "error"), Some("boom"));
    assert_eq!(table.cell(1, "results"), None);
}

#[test]
fn test_runs_table_flat_expands_nested_maps() {
    let table = runs_table(&sample_runs(), true);
    let columns = table.columns();

    for expected in ["env", "owner", "param_epochs", "param_lr", "out_acc"] {
        assert!(columns.iter().any(|c| c == expected), "missing {expected}");
    }
    assert!(table.column_index("labels").is_none());
    assert!(table.column_index("parameters").is_none());

    // expanded columns replace the nested one in place, keys sorted
    let env = table.column_index("env").unwrap();
    assert_eq!(columns[env - 1], "name");
    assert_eq!(columns[env + 1], "owner");

    assert_eq!(table.cell(0, "env"), Some("prod"));
    assert_eq!(table.cell(1, "env"), None);
    assert_eq!(table.cell(1, "param_epochs"), Some("10"));
    assert_eq!(table.cell(0, "out_acc"), Some("0.93"));
}

#[test]
fn test_flat_labels_do_not_shadow_scalar_columns() {
    let run = Run::builder("train", "u1")
        .label("name", "resnet")
        .label("state", "tuned")
        .label("env", "prod")
        .build();
    let table = runs_table(&[run], true);
    let columns = table.columns();

    assert_eq!(columns.iter().filter(|c| *c == "name").count(), 1);
    assert_eq!(columns.iter().filter(|c| *c == "state").count(), 1);
    assert_eq!(table.cell(0, "name"), Some("train"));
    assert_eq!(table.cell(0, "state"), Some("created"));
    assert_eq!(table.cell(0, "labels_name"), Some("resnet"));
    assert_eq!(table.cell(0, "labels_state"), Some("tuned"));
    assert_eq!(table.cell(0, "env"), Some("prod"));
    assert!(table.to_record_batch().is_ok());
}

#[test]
fn test_artifacts_table_drops_tree_for_concrete_tag() {
    let artifact = Artifact::builder("model", "model")
        .target_path("s3://m")
        .producer("kind", "run")
        .source("train", "s3://train.csv")
        .label("stage", "prod")
        .build();
    let artifacts = vec![artifact];

    let all = artifacts_table(&artifacts, "*", false);
    assert_eq!(all.columns()[0], "tree");
    assert_eq!(all.columns().len(), 11);

    let tagged = artifacts_table(&artifacts, "latest", true);
    assert!(tagged.column_index("tree").is_none());
    assert_eq!(tagged.cell(0, "prod_kind"), Some("run"));
    assert_eq!(tagged.cell(0, "src_train"), Some("s3://train.csv"));
    assert_eq!(tagged.cell(0, "stage"), Some("prod"));
    assert_eq!(tagged.cell(0, "path"), Some("s3://m"));
}

#[test]
fn test_feature_sets_table() {
    let fs = FeatureSet::builder("users")
        .entity("user_id", "str")
        .feature("age", "int")
        .feature("spend", "float")
        .build();
    let table = feature_sets_table(&[fs], false);
    assert_eq!(table.cell(0, "entities"), Some("user_id:str"));
    assert_eq!(table.cell(0, "features"), Some("age:int,spend:float"));
    assert_eq!(table.cell(0, "state"), Some("created"));
}

#[test]
fn test_record_batch_from_store_listing() -> anyhow::Result<()> {
    let store = MetadataStore::new();
    for run in sample_runs() {
        let uid = run.uid().to_string();
        store.store_run(run, &uid, "p", false)?;
    }
    let runs = store.list_runs("", "p", &[], "", true, 0)?;

    let batch = runs_table(&runs, true).to_record_batch()?;
    assert_eq!(batch.num_rows(), 2);
    assert!(batch
        .schema()
        .fields()
        .iter()
        .all(|f| f.data_type() == &DataType::Utf8 && f.is_nullable()));

    let column = |name: &str| -> anyhow::Result<StringArray> {
        let index = batch.schema().index_of(name)?;
        Ok(batch.column(index).as_any().downcast_ref::<StringArray>().unwrap().clone())
    };
    let uids = column("uid")?;
    let errors = column("error")?;
    // the never-started run is dated by its store time, after u1's start
    assert_eq!(uids.value(0), "u2");
    assert_eq!(errors.value(0), "boom");
    assert!(errors.is_null(1));
    Ok(())
}
