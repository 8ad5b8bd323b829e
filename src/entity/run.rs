//! Run - one execution of a pipeline step

use super::{Entity, EntityKind, Labels};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// Run is registered but not yet started.
    #[default]
    Created,
    /// Run is currently executing.
    Running,
    /// Run completed successfully.
    Completed,
    /// Run failed with an error.
    Error,
    /// Run was aborted by user or system.
    Aborted,
}

impl RunState {
    /// Lowercase name used for indexing and state filters.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Aborted => "aborted",
        }
    }

    /// Whether the run can no longer change state on its own.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Aborted)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference from a run to an artifact it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Artifact key
    pub key: String,
    /// Target path of the produced artifact
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RunMetadata {
    uid: String,
    #[serde(default)]
    project: String,
    name: String,
    #[serde(default)]
    iteration: u32,
    #[serde(default)]
    labels: Labels,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct RunSpec {
    #[serde(default)]
    parameters: Map<String, Value>,
    #[serde(default)]
    inputs: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct RunStatus {
    state: RunState,
    start_time: Option<DateTime<Utc>>,
    last_update: Option<DateTime<Utc>>,
    #[serde(default)]
    outputs: Map<String, Value>,
    #[serde(default)]
    output_artifacts: Vec<ArtifactRef>,
    error: Option<String>,
}

/// Run record: metadata, spec and status.
///
/// The run's `state` lives in a typed field of its status, so the value
/// used for state filtering is the stored value itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    metadata: RunMetadata,
    #[serde(default)]
    spec: RunSpec,
    #[serde(default)]
    status: RunStatus,
}

impl Run {
    /// Create a run in the `created` state.
    #[must_use]
    pub fn new(name: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            metadata: RunMetadata {
                uid: uid.into(),
                project: String::new(),
                name: name.into(),
                iteration: 0,
                labels: Labels::new(),
            },
            spec: RunSpec::default(),
            status: RunStatus::default(),
        }
    }

    /// Create a builder for constructing a run with optional fields.
    #[must_use]
    pub fn builder(name: impl Into<String>, uid: impl Into<String>) -> RunBuilder {
        RunBuilder::new(name, uid)
    }

    /// Get the run uid.
    #[must_use]
    pub fn uid(&self) -> &str {
        &self.metadata.uid
    }

    /// Get the project namespace.
    #[must_use]
    pub fn project(&self) -> &str {
        &self.metadata.project
    }

    /// Get the run name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Get the hyper-parameter iteration index.
    #[must_use]
    pub const fn iteration(&self) -> u32 {
        self.metadata.iteration
    }

    /// Get the run labels.
    #[must_use]
    pub const fn labels(&self) -> &Labels {
        &self.metadata.labels
    }

    /// Get the run parameters.
    #[must_use]
    pub const fn parameters(&self) -> &Map<String, Value> {
        &self.spec.parameters
    }

    /// Get the ordered input references.
    #[must_use]
    pub fn inputs(&self) -> &[String] {
        &self.spec.inputs
    }

    /// Get the current run state.
    #[must_use]
    pub const fn run_state(&self) -> RunState {
        self.status.state
    }

    /// Get the start timestamp, if the run has started.
    #[must_use]
    pub const fn start_time(&self) -> Option<DateTime<Utc>> {
        self.status.start_time
    }

    /// Get the last status update timestamp.
    #[must_use]
    pub const fn last_update(&self) -> Option<DateTime<Utc>> {
        self.status.last_update
    }

    /// Get the run outputs (results).
    #[must_use]
    pub const fn outputs(&self) -> &Map<String, Value> {
        &self.status.outputs
    }

    /// Get references to artifacts produced by the run.
    #[must_use]
    pub fn output_artifacts(&self) -> &[ArtifactRef] {
        &self.status.output_artifacts
    }

    /// Get the error message, if the run failed.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.status.error.as_deref()
    }

    /// Start the run, transitioning to `running`.
    ///
    /// Sets `start_time` to now.
    pub fn start(&mut self) {
        let now = Utc::now();
        self.status.state = RunState::Running;
        self.status.start_time = Some(now);
        self.status.last_update = Some(now);
    }

    /// Complete the run with the given final state.
    pub fn complete(&mut self, state: RunState) {
        self.status.state = state;
        self.status.last_update = Some(Utc::now());
    }

    /// Mark the run as failed with an error message.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status.error = Some(error.into());
        self.complete(RunState::Error);
    }

    /// Apply a status patch.
    pub fn apply(&mut self, update: RunUpdate) {
        if let Some(state) = update.state {
            self.status.state = state;
        }
        self.status.outputs.extend(update.outputs);
        self.status.output_artifacts.extend(update.output_artifacts);
        if update.error.is_some() {
            self.status.error = update.error;
        }
        self.status.last_update = Some(Utc::now());
    }

    pub(crate) fn set_uid(&mut self, uid: impl Into<String>) {
        self.metadata.uid = uid.into();
    }

    pub(crate) fn set_project(&mut self, project: impl Into<String>) {
        self.metadata.project = project.into();
    }

    pub(crate) fn touch(&mut self) {
        if self.status.last_update.is_none() {
            self.status.last_update = Some(Utc::now());
        }
    }
}

impl Entity for Run {
    const KIND: EntityKind = EntityKind::Run;

    fn project(&self) -> &str {
        Self::project(self)
    }

    fn name(&self) -> &str {
        Self::name(self)
    }

    fn uid(&self) -> &str {
        Self::uid(self)
    }

    fn labels(&self) -> &Labels {
        Self::labels(self)
    }

    /// Start time, or the last status update for runs that never started.
    fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.status.start_time.or(self.status.last_update)
    }

    fn state(&self) -> Option<&str> {
        Some(self.status.state.as_str())
    }
}

/// Status patch applied by `update_run`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunUpdate {
    /// New state, if changing
    pub state: Option<RunState>,
    /// Outputs merged into the existing outputs
    pub outputs: Map<String, Value>,
    /// Artifact references appended to the produced artifacts
    pub output_artifacts: Vec<ArtifactRef>,
    /// Error message, if setting one
    pub error: Option<String>,
}

impl RunUpdate {
    /// Patch that only changes the state.
    #[must_use]
    pub fn state(state: RunState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    /// Add an output value.
    #[must_use]
    pub fn output(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.insert(key.into(), value.into());
        self
    }

    /// Record a produced artifact.
    #[must_use]
    pub fn artifact(mut self, key: impl Into<String>, path: impl Into<String>) -> Self {
        self.output_artifacts.push(ArtifactRef {
            key: key.into(),
            path: path.into(),
        });
        self
    }
}

/// Builder for `Run`.
#[derive(Debug)]
pub struct RunBuilder {
    run: Run,
}

impl RunBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(name: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            run: Run::new(name, uid),
        }
    }

    /// Set the project namespace.
    #[must_use]
    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.run.metadata.project = project.into();
        self
    }

    /// Set the hyper-parameter iteration index.
    #[must_use]
    pub const fn iteration(mut self, iteration: u32) -> Self {
        self.run.metadata.iteration = iteration;
        self
    }

    /// Add a label.
    #[must_use]
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.run.metadata.labels.insert(key.into(), value.into());
        self
    }

    /// Add a parameter.
    #[must_use]
    pub fn parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.run.spec.parameters.insert(key.into(), value.into());
        self
    }

    /// Append an input reference.
    #[must_use]
    pub fn input(mut self, input: impl Into<String>) -> Self {
        self.run.spec.inputs.push(input.into());
        self
    }

    /// Set the state.
    #[must_use]
    pub const fn state(mut self, state: RunState) -> Self {
        self.run.status.state = state;
        self
    }

    /// Set an explicit start timestamp.
    #[must_use]
    pub const fn start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.run.status.start_time = Some(start_time);
        self
    }

    /// Set an explicit last-update timestamp.
    #[must_use]
    pub const fn last_update(mut self, last_update: DateTime<Utc>) -> Self {
        self.run.status.last_update = Some(last_update);
        self
    }

    /// Add an output value.
    #[must_use]
    pub fn output(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.run.status.outputs.insert(key.into(), value.into());
        self
    }

    /// Record a produced artifact.
    #[must_use]
    pub fn output_artifact(mut self, key: impl Into<String>, path: impl Into<String>) -> Self {
        self.run.status.output_artifacts.push(ArtifactRef {
            key: key.into(),
            path: path.into(),
        });
        self
    }

    /// Set the error message.
    #[must_use]
    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.run.status.error = Some(error.into());
        self
    }

    /// Build the `Run`.
    #[must_use]
    pub fn build(self) -> Run {
        self.run
    }
}
