//! Tabular rendering of result sets
//!
//! A pure transform from entity slices to rows: the store hands out typed
//! records, this module turns them into a [`Table`] of nullable strings and
//! from there into an Arrow [`RecordBatch`] for display or export.
//!
//! ## Flattening
//!
//! Nested mappings are either rendered as one JSON cell, or, with
//! `flat = true`, expanded into one scalar column per key:
//!
//! ```text
//! field        prefix
//! labels       (none)
//! parameters   param_
//! outputs      out_
//! producer     prod_
//! sources      src_
//! ```
//!
//! Expanded columns take the place of the nested column, keys in sorted
//! order, unioned over all rows.

use crate::entity::{Artifact, FeatureSet, Labels, Run};
use crate::query::TagFilter;
use crate::Result;
use arrow::array::{ArrayRef, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Rows of nullable string cells under named columns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

impl Table {
    /// Column names in display order
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows, each as long as [`Self::columns`]
    #[must_use]
    pub fn rows(&self) -> &[Vec<Option<String>>] {
        &self.rows
    }

    /// Number of rows
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether there are no rows
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cell at `row` in column `name`.
    #[must_use]
    pub fn cell(&self, row: usize, name: &str) -> Option<&str> {
        let index = self.column_index(name)?;
        self.rows.get(row)?.get(index)?.as_deref()
    }

    /// Remove a column. Returns whether it existed.
    pub fn drop_column(&mut self, name: &str) -> bool {
        let Some(index) = self.column_index(name) else {
            return false;
        };
        self.columns.remove(index);
        for row in &mut self.rows {
            row.remove(index);
        }
        true
    }

    /// Convert to an Arrow batch of nullable `Utf8` columns.
    ///
    /// # Errors
    ///
    /// Returns an Arrow error if the batch cannot be assembled.
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let fields: Vec<Field> = self
            .columns
            .iter()
            .map(|name| Field::new(name, DataType::Utf8, true))
            .collect();

        let arrays: Vec<ArrayRef> = (0..self.columns.len())
            .map(|i| {
                let values: Vec<Option<&str>> =
                    self.rows.iter().map(|row| row[i].as_deref()).collect();
                Arc::new(StringArray::from(values)) as ArrayRef
            })
            .collect();

        Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
    }
}

enum Column<T> {
    Scalar(&'static str, fn(&T) -> Option<String>),
    Nested(&'static str, &'static str, fn(&T) -> Map<String, Value>),
}

// Flattened keys that would shadow another column are qualified with the
// nested column's name (`labels_name`).
fn build<T: 'static>(items: &[T], columns: &[Column<T>], flat: bool) -> Table {
    let reserved: BTreeSet<&str> = columns
        .iter()
        .filter_map(|column| match column {
            Column::Scalar(name, _) => Some(*name),
            Column::Nested(..) => None,
        })
        .collect();
    let mut names: Vec<String> = Vec::new();
    let mut getters: Vec<Box<dyn Fn(&T) -> Option<String>>> = Vec::new();

    for column in columns {
        match *column {
            Column::Scalar(name, get) => {
                names.push(name.to_string());
                getters.push(Box::new(get));
            }
            Column::Nested(name, _, get) if !flat => {
                names.push(name.to_string());
                getters.push(Box::new(move |item: &T| {
                    let map = get(item);
                    (!map.is_empty()).then(|| Value::Object(map).to_string())
                }));
            }
            Column::Nested(nested, prefix, get) => {
                let keys: BTreeSet<String> = items
                    .iter()
                    .flat_map(|item| get(item).into_iter().map(|(k, _)| k))
                    .collect();
                for key in keys {
                    let mut column = format!("{prefix}{key}");
                    if reserved.contains(column.as_str()) || names.contains(&column) {
                        column = format!("{nested}_{key}");
                    }
                    names.push(column);
                    getters.push(Box::new(move |item: &T| get(item).get(&key).map(scalar)));
                }
            }
        }
    }

    let rows = items
        .iter()
        .map(|item| getters.iter().map(|get| get(item)).collect())
        .collect();

    Table {
        columns: names,
        rows,
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn time(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.map(|t| t.to_rfc3339())
}

fn text(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

fn label_map(labels: &Labels) -> Map<String, Value> {
    labels
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect()
}

/// Runs as rows: `uid, iter, start, state, name, labels, inputs,
/// parameters, results, artifacts, error`.
#[must_use]
pub fn runs_table(runs: &[Run], flat: bool) -> Table {
    let columns: [Column<Run>; 11] = [
        Column::Scalar("uid", |r| text(r.uid())),
        Column::Scalar("iter", |r| Some(r.iteration().to_string())),
        Column::Scalar("start", |r| time(r.start_time())),
        Column::Scalar("state", |r| Some(r.run_state().as_str().to_string())),
        Column::Scalar("name", |r| text(r.name())),
        Column::Nested("labels", "", |r| label_map(r.labels())),
        Column::Scalar("inputs", |r| text(&r.inputs().join(","))),
        Column::Nested("parameters", "param_", |r| r.parameters().clone()),
        Column::Nested("results", "out_", |r| r.outputs().clone()),
        Column::Scalar("artifacts", |r| {
            let keys: Vec<&str> = r.output_artifacts().iter().map(|a| a.key.as_str()).collect();
            text(&keys.join(","))
        }),
        Column::Scalar("error", |r| r.error().map(str::to_string)),
    ];
    build(runs, &columns, flat)
}

/// Artifacts as rows: `tree, key, kind, path, hash, viewer, updated,
/// description, producer, sources, labels`.
///
/// When `tag` names a concrete tag every row is the single version behind
/// it, so the `tree` column is dropped.
#[must_use]
pub fn artifacts_table(artifacts: &[Artifact], tag: &str, flat: bool) -> Table {
    let columns: [Column<Artifact>; 11] = [
        Column::Scalar("tree", |a| text(a.tree())),
        Column::Scalar("key", |a| text(a.key())),
        Column::Scalar("kind", |a| text(a.kind())),
        Column::Scalar("path", |a| text(a.target_path())),
        Column::Scalar("hash", |a| text(a.hash())),
        Column::Scalar("viewer", |a| text(a.viewer())),
        Column::Scalar("updated", |a| time(a.updated())),
        Column::Scalar("description", |a| text(a.description())),
        Column::Nested("producer", "prod_", |a| a.producer().clone()),
        Column::Nested("sources", "src_", |a| {
            a.sources()
                .iter()
                .map(|s| (s.name.clone(), Value::String(s.path.clone())))
                .collect()
        }),
        Column::Nested("labels", "", |a| label_map(a.labels())),
    ];
    let mut table = build(artifacts, &columns, flat);
    if matches!(TagFilter::parse(tag), TagFilter::Tag(_)) {
        table.drop_column("tree");
    }
    table
}

/// Feature-sets as rows: `name, uid, state, updated, entities, features,
/// labels`. Columns render as `name:type` lists.
#[must_use]
pub fn feature_sets_table(feature_sets: &[FeatureSet], flat: bool) -> Table {
    fn columns_text(columns: &[crate::entity::Feature]) -> Option<String> {
        let parts: Vec<String> = columns
            .iter()
            .map(|c| format!("{}:{}", c.name, c.value_type))
            .collect();
        text(&parts.join(","))
    }

    let columns: [Column<FeatureSet>; 7] = [
        Column::Scalar("name", |f| text(f.name())),
        Column::Scalar("uid", |f| text(f.uid())),
        Column::Scalar("state", |f| text(f.state())),
        Column::Scalar("updated", |f| time(f.updated())),
        Column::Scalar("entities", |f| columns_text(f.entities())),
        Column::Scalar("features", |f| columns_text(f.features())),
        Column::Nested("labels", "", |f| label_map(f.labels())),
    ];
    build(feature_sets, &columns, flat)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_column() {
        let mut table = Table {
            columns: vec!["a".into(), "b".into()],
            rows: vec![vec![Some("1".into()), None]],
        };
        assert!(table.drop_column("a"));
        assert!(!table.drop_column("a"));
        assert_eq!(table.columns(), ["b".to_string()]);
        assert_eq!(table.rows()[0], vec![None]);
    }

    #[test]
    fn test_empty_table_still_has_schema() {
        let table = runs_table(&[], false);
        assert!(table.is_empty());
        let batch = table.to_record_batch().unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.num_columns(), 11);
    }
}
