//! Pipeline state store.
//!
//! The persisted record at `docs/factory/state.json` is the single source of
//! truth for where the workflow is: the active iteration, phase and gate
//! statuses, tracked tasks and the counters that mint sequential identifiers.
//!
//! Every mutating call is load → mutate → save; there is no batching and no
//! transaction boundary beyond one call. Access is single-writer by
//! precondition: two processes mutating the record concurrently can lose
//! updates.

use crate::core::error::PhaseGateError;
use crate::core::time;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const STATE_SCHEMA_VERSION: &str = "1.0.0";
pub const GATE_NUMBERS: std::ops::RangeInclusive<u8> = 0..=5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EvolutionMode {
    #[default]
    #[serde(rename = "initial-build", alias = "greenfield")]
    InitialBuild,
    #[serde(rename = "iterative-update", alias = "brownfield")]
    IterativeUpdate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Intake,
    Specification,
    Planning,
    Build,
    Review,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::Intake,
        Phase::Specification,
        Phase::Planning,
        Phase::Build,
        Phase::Review,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Intake => "intake",
            Phase::Specification => "specification",
            Phase::Planning => "planning",
            Phase::Build => "build",
            Phase::Review => "review",
        }
    }
}

impl FromStr for Phase {
    type Err = PhaseGateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| {
                PhaseGateError::InvalidArgument(format!(
                    "invalid phase '{}' (valid: {})",
                    s,
                    Phase::ALL.map(Phase::as_str).join(", ")
                ))
            })
    }
}

/// Status shared by phases and tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl WorkStatus {
    pub const ALL: [WorkStatus; 5] = [
        WorkStatus::Pending,
        WorkStatus::Running,
        WorkStatus::Completed,
        WorkStatus::Failed,
        WorkStatus::Skipped,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WorkStatus::Pending => "pending",
            WorkStatus::Running => "running",
            WorkStatus::Completed => "completed",
            WorkStatus::Failed => "failed",
            WorkStatus::Skipped => "skipped",
        }
    }
}

impl FromStr for WorkStatus {
    type Err = PhaseGateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| {
                PhaseGateError::InvalidArgument(format!(
                    "invalid status '{}' (valid: {})",
                    s,
                    WorkStatus::ALL.map(WorkStatus::as_str).join(", ")
                ))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GateRecordStatus {
    #[default]
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "PASS")]
    Pass,
    #[serde(rename = "FAIL")]
    Fail,
    #[serde(rename = "skipped")]
    Skipped,
}

impl FromStr for GateRecordStatus {
    type Err = PhaseGateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "PASS" => Ok(Self::Pass),
            "FAIL" => Ok(Self::Fail),
            "skipped" => Ok(Self::Skipped),
            other => Err(PhaseGateError::InvalidArgument(format!(
                "invalid gate status '{}' (valid: pending, PASS, FAIL, skipped)",
                other
            ))),
        }
    }
}

/// Counter families used to mint sequential identifiers (`EPIC-001`, `TASK-0001`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterKind {
    Epic,
    Us,
    Task,
    Adr,
}

impl CounterKind {
    pub const ALL: [CounterKind; 4] = [
        CounterKind::Epic,
        CounterKind::Us,
        CounterKind::Task,
        CounterKind::Adr,
    ];

    pub fn key(self) -> &'static str {
        match self {
            CounterKind::Epic => "epic",
            CounterKind::Us => "us",
            CounterKind::Task => "task",
            CounterKind::Adr => "adr",
        }
    }

    /// File-name prefix of identifiers minted from this counter.
    pub fn prefix(self) -> &'static str {
        match self {
            CounterKind::Epic => "EPIC-",
            CounterKind::Us => "US-",
            CounterKind::Task => "TASK-",
            CounterKind::Adr => "ADR-",
        }
    }

    pub fn width(self) -> usize {
        match self {
            CounterKind::Epic => 3,
            _ => 4,
        }
    }

    pub fn format(self, value: u64) -> String {
        format!("{:0width$}", value, width = self.width())
    }
}

impl FromStr for CounterKind {
    type Err = PhaseGateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CounterKind::ALL
            .into_iter()
            .find(|k| k.key() == s)
            .ok_or_else(|| {
                PhaseGateError::InvalidArgument(format!(
                    "invalid counter type '{}' (valid: epic, us, task, adr)",
                    s
                ))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    #[default]
    #[serde(alias = "pending")]
    Idle,
    Running,
    Paused,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRun {
    #[serde(default)]
    pub status: PipelineStatus,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
    #[serde(default)]
    pub current_phase: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseRecord {
    #[serde(default)]
    pub status: WorkStatus,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateRecord {
    #[serde(default)]
    pub status: GateRecordStatus,
    #[serde(default)]
    pub checked_at: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    #[serde(default)]
    pub status: WorkStatus,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskBoard {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub completed: u64,
    #[serde(default)]
    pub current: Option<String>,
    #[serde(default)]
    pub items: BTreeMap<String, TaskRecord>,
}

/// Iteration-scoped planning directories, derived purely from `evolutionVersion`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanningPaths {
    pub version: u32,
    pub dir: String,
    pub us_dir: String,
    pub tasks_dir: String,
    pub epics_file: String,
}

impl PlanningPaths {
    pub fn for_version(version: u32) -> Self {
        let dir = format!("docs/planning/v{}", version);
        Self {
            version,
            us_dir: format!("{}/us", dir),
            tasks_dir: format!("{}/tasks", dir),
            epics_file: format!("{}/epics.md", dir),
            dir,
        }
    }
}

/// The persisted workflow record.
///
/// Fields missing from an older file are filled from defaults on load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineState {
    #[serde(default = "default_schema_version")]
    pub version: String,
    #[serde(default = "default_evolution_version")]
    pub evolution_version: u32,
    #[serde(default)]
    pub evolution_mode: EvolutionMode,
    #[serde(default = "default_counters")]
    pub counters: BTreeMap<String, u64>,
    #[serde(default)]
    pub pipeline: PipelineRun,
    #[serde(default = "default_phases")]
    pub phases: BTreeMap<String, PhaseRecord>,
    #[serde(default = "default_gates")]
    pub gates: BTreeMap<u8, GateRecord>,
    #[serde(default)]
    pub tasks: TaskBoard,
    #[serde(default)]
    pub last_updated: Option<String>,
}

fn default_schema_version() -> String {
    STATE_SCHEMA_VERSION.to_string()
}

fn default_evolution_version() -> u32 {
    1
}

fn default_counters() -> BTreeMap<String, u64> {
    CounterKind::ALL
        .iter()
        .map(|k| (k.key().to_string(), 0))
        .collect()
}

fn default_phases() -> BTreeMap<String, PhaseRecord> {
    Phase::ALL
        .iter()
        .map(|p| (p.as_str().to_string(), PhaseRecord::default()))
        .collect()
}

fn default_gates() -> BTreeMap<u8, GateRecord> {
    GATE_NUMBERS.map(|g| (g, GateRecord::default())).collect()
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            version: default_schema_version(),
            evolution_version: default_evolution_version(),
            evolution_mode: EvolutionMode::default(),
            counters: default_counters(),
            pipeline: PipelineRun::default(),
            phases: default_phases(),
            gates: default_gates(),
            tasks: TaskBoard::default(),
            last_updated: None,
        }
    }
}

impl PipelineState {
    pub fn planning_paths(&self) -> PlanningPaths {
        PlanningPaths::for_version(self.evolution_version.max(1))
    }

    pub fn running_phase(&self) -> Option<&str> {
        self.phases
            .iter()
            .find(|(_, rec)| rec.status == WorkStatus::Running)
            .map(|(name, _)| name.as_str())
    }

    pub fn counter(&self, kind: CounterKind) -> u64 {
        self.counters.get(kind.key()).copied().unwrap_or(0)
    }

    /// Bump a counter and return the zero-padded value.
    pub fn next_counter(&mut self, kind: CounterKind) -> String {
        let slot = self.counters.entry(kind.key().to_string()).or_insert(0);
        *slot += 1;
        kind.format(*slot)
    }

    pub fn set_phase(&mut self, phase: Phase, status: WorkStatus) -> Result<(), PhaseGateError> {
        let name = phase.as_str();
        if status == WorkStatus::Running {
            if let Some(other) = self.running_phase().filter(|other| *other != name) {
                return Err(PhaseGateError::StateTransition(format!(
                    "phase '{}' is already running; complete or fail it before starting '{}'",
                    other, name
                )));
            }
        }

        let now = time::now_epoch_z();
        let record = self.phases.entry(name.to_string()).or_default();
        record.status = status;
        match status {
            WorkStatus::Running => {
                record.started_at = Some(now.clone());
                record.completed_at = None;
                self.pipeline.current_phase = Some(name.to_string());
                self.pipeline.status = PipelineStatus::Running;
                if self.pipeline.started_at.is_none() {
                    self.pipeline.started_at = Some(now);
                }
            }
            WorkStatus::Completed => {
                record.completed_at = Some(now.clone());
                if phase == Phase::Review {
                    self.pipeline.status = PipelineStatus::Completed;
                    self.pipeline.completed_at = Some(now);
                }
            }
            WorkStatus::Failed => {
                record.completed_at = Some(now);
                self.pipeline.status = PipelineStatus::Failed;
            }
            WorkStatus::Pending | WorkStatus::Skipped => {}
        }
        Ok(())
    }

    pub fn set_task(&mut self, task_id: &str, status: WorkStatus) {
        if !self.tasks.items.contains_key(task_id) {
            self.tasks
                .items
                .insert(task_id.to_string(), TaskRecord::default());
            self.tasks.total += 1;
        }
        let now = time::now_epoch_z();
        let mut clear_current = false;
        if let Some(record) = self.tasks.items.get_mut(task_id) {
            let was_completed = record.status == WorkStatus::Completed;
            record.status = status;
            match status {
                WorkStatus::Running => {
                    record.started_at = Some(now);
                }
                WorkStatus::Completed => {
                    record.completed_at = Some(now);
                    if !was_completed {
                        self.tasks.completed += 1;
                    }
                    clear_current = true;
                }
                WorkStatus::Failed => {
                    record.completed_at = Some(now);
                    clear_current = true;
                }
                WorkStatus::Pending | WorkStatus::Skipped => {}
            }
        }
        if status == WorkStatus::Running {
            self.tasks.current = Some(task_id.to_string());
        } else if clear_current && self.tasks.current.as_deref() == Some(task_id) {
            self.tasks.current = None;
        }
    }

    /// Record a gate outcome. `errors` must be non-empty iff `status` is FAIL.
    pub fn record_gate(
        &mut self,
        gate: u8,
        status: GateRecordStatus,
        errors: Vec<String>,
    ) -> Result<(), PhaseGateError> {
        if !GATE_NUMBERS.contains(&gate) {
            return Err(PhaseGateError::UnknownGate(gate));
        }
        match (status, errors.is_empty()) {
            (GateRecordStatus::Fail, true) => {
                return Err(PhaseGateError::StateTransition(format!(
                    "gate {} cannot be recorded as FAIL without errors",
                    gate
                )));
            }
            (GateRecordStatus::Fail, false) | (_, true) => {}
            (_, false) => {
                return Err(PhaseGateError::StateTransition(format!(
                    "gate {} errors are only recorded with status FAIL",
                    gate
                )));
            }
        }
        self.gates.insert(
            gate,
            GateRecord {
                status,
                checked_at: Some(time::now_epoch_z()),
                errors,
            },
        );
        Ok(())
    }

    /// Start a new iteration of the workflow. Counters carry over so that
    /// identifiers keep increasing across iterations.
    pub fn begin_iteration(&mut self) {
        self.evolution_version = self.evolution_version.max(1) + 1;
        self.evolution_mode = EvolutionMode::IterativeUpdate;
        self.phases = default_phases();
        self.gates = default_gates();
        self.pipeline = PipelineRun::default();
        self.tasks = TaskBoard::default();
    }

    /// Dotted-path lookup into the serialized record (`gates.2.status`).
    pub fn lookup(&self, key: &str) -> Option<serde_json::Value> {
        let value = serde_json::to_value(self).ok()?;
        let pointer = format!("/{}", key.split('.').collect::<Vec<_>>().join("/"));
        value.pointer(&pointer).cloned()
    }
}

impl PipelineState {
    /// Decode a parsed record, keeping every field that decodes and leaving
    /// defaults where a value is unrecognised. Returns the dotted paths of
    /// the values that were dropped.
    pub fn from_fields(fields: Map<String, Value>) -> (Self, Vec<String>) {
        let incoming = Value::Object(fields);
        if let Ok(state) = PipelineState::deserialize(&incoming) {
            return (state, Vec::new());
        }
        let Value::Object(fields) = incoming else {
            return (Self::default(), Vec::new());
        };

        let accept = |root: &Value| PipelineState::deserialize(root).is_ok();
        let mut root =
            serde_json::to_value(Self::default()).unwrap_or_else(|_| Value::Object(Map::new()));
        let mut dropped = Vec::new();
        merge_lenient(&mut root, &mut Vec::new(), fields, &accept, &mut dropped);
        let state = PipelineState::deserialize(&root).unwrap_or_default();
        (state, dropped)
    }
}

fn parent_mut<'a>(root: &'a mut Value, parent: &[String]) -> Option<&'a mut Map<String, Value>> {
    let mut current = root;
    for key in parent {
        current = current.get_mut(key)?;
    }
    current.as_object_mut()
}

/// Put `value` under `parent.key`, undoing it when the record stops decoding.
fn try_put(
    root: &mut Value,
    parent: &[String],
    key: &str,
    value: Value,
    accept: &dyn Fn(&Value) -> bool,
) -> bool {
    let Some(object) = parent_mut(root, parent) else {
        return false;
    };
    let previous = object.insert(key.to_string(), value);
    if accept(root) {
        return true;
    }
    if let Some(object) = parent_mut(root, parent) {
        match previous {
            Some(previous) => {
                object.insert(key.to_string(), previous);
            }
            None => {
                object.remove(key);
            }
        }
    }
    false
}

fn merge_lenient(
    root: &mut Value,
    parent: &mut Vec<String>,
    incoming: Map<String, Value>,
    accept: &dyn Fn(&Value) -> bool,
    dropped: &mut Vec<String>,
) {
    for (key, value) in incoming {
        if try_put(root, parent.as_slice(), &key, value.clone(), accept) {
            continue;
        }
        if let Value::Object(fields) = value {
            let has_object = parent_mut(root, parent.as_slice())
                .and_then(|object| object.get(&key))
                .is_some_and(Value::is_object);
            let empty = Value::Object(Map::new());
            if has_object || try_put(root, parent.as_slice(), &key, empty, accept) {
                parent.push(key);
                merge_lenient(root, parent, fields, accept, dropped);
                parent.pop();
                continue;
            }
        }
        let mut path = parent.clone();
        path.push(key);
        dropped.push(path.join("."));
    }
}

/// What was found at the state path.
#[derive(Debug, Clone)]
pub enum StateLoad {
    Missing,
    Loaded(PipelineState),
    Corrupt(String),
}

impl StateLoad {
    pub fn into_state(self) -> PipelineState {
        match self {
            StateLoad::Loaded(state) => state,
            StateLoad::Missing | StateLoad::Corrupt(_) => PipelineState::default(),
        }
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self, StateLoad::Corrupt(_))
    }
}

/// File-backed handle on the persisted record.
#[derive(Debug, Clone)]
pub struct StateStore {
    pub root: PathBuf,
    pub path: PathBuf,
}

impl StateStore {
    pub fn new(root: &Path, state_file: &str) -> Self {
        Self {
            root: root.to_path_buf(),
            path: root.join(state_file),
        }
    }

    /// Only unparseable JSON (or a non-object) is corrupt; unrecognised
    /// values inside a well-formed record fall back to defaults one by one.
    pub fn inspect(&self) -> StateLoad {
        if !self.path.is_file() {
            return StateLoad::Missing;
        }
        let parsed = fs::read(&self.path)
            .map_err(|e| e.to_string())
            .and_then(|raw| serde_json::from_slice::<Value>(&raw).map_err(|e| e.to_string()));
        match parsed {
            Ok(Value::Object(fields)) => {
                let (state, dropped) = PipelineState::from_fields(fields);
                if !dropped.is_empty() {
                    tracing::warn!(
                        "state file {}: unrecognised values left at defaults: {}",
                        self.path.display(),
                        dropped.join(", ")
                    );
                }
                StateLoad::Loaded(state)
            }
            Ok(_) => StateLoad::Corrupt("expected a JSON object".to_string()),
            Err(reason) => StateLoad::Corrupt(reason),
        }
    }

    /// Load the record, falling back to defaults when absent or unreadable.
    pub fn load(&self) -> PipelineState {
        match self.inspect() {
            StateLoad::Corrupt(reason) => {
                tracing::warn!(
                    "state file {} is invalid ({}); using defaults",
                    self.path.display(),
                    reason
                );
                PipelineState::default()
            }
            other => other.into_state(),
        }
    }

    /// Write the full record, stamping `lastUpdated`.
    pub fn save(&self, state: &mut PipelineState) -> Result<(), PhaseGateError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        state.last_updated = Some(time::now_epoch_z());
        let body = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut PipelineState) -> Result<T, PhaseGateError>,
    ) -> Result<(T, PipelineState), PhaseGateError> {
        let mut state = self.load();
        let out = f(&mut state)?;
        self.save(&mut state)?;
        Ok((out, state))
    }

    pub fn increment_counter(&self, kind: CounterKind) -> Result<String, PhaseGateError> {
        self.mutate(|s| Ok(s.next_counter(kind))).map(|(id, _)| id)
    }

    pub fn set_phase(
        &self,
        phase: Phase,
        status: WorkStatus,
    ) -> Result<PipelineState, PhaseGateError> {
        self.mutate(|s| s.set_phase(phase, status)).map(|(_, s)| s)
    }

    pub fn set_task(
        &self,
        task_id: &str,
        status: WorkStatus,
    ) -> Result<PipelineState, PhaseGateError> {
        self.mutate(|s| {
            s.set_task(task_id, status);
            Ok(())
        })
        .map(|(_, s)| s)
    }

    pub fn record_gate(
        &self,
        gate: u8,
        status: GateRecordStatus,
        errors: Vec<String>,
    ) -> Result<PipelineState, PhaseGateError> {
        self.mutate(|s| s.record_gate(gate, status, errors))
            .map(|(_, s)| s)
    }

    pub fn begin_iteration(&self) -> Result<PipelineState, PhaseGateError> {
        self.mutate(|s| {
            s.begin_iteration();
            Ok(())
        })
        .map(|(_, s)| s)
    }

    /// Fresh record with the pipeline start stamped.
    pub fn init(&self) -> Result<PipelineState, PhaseGateError> {
        let mut state = PipelineState::default();
        state.pipeline.started_at = Some(time::now_epoch_z());
        self.save(&mut state)?;
        Ok(state)
    }

    /// Replace the record wholesale with defaults.
    pub fn reset(&self) -> Result<PipelineState, PhaseGateError> {
        let mut state = PipelineState::default();
        self.save(&mut state)?;
        Ok(state)
    }

    pub fn planning_paths(&self) -> PlanningPaths {
        self.load().planning_paths()
    }

    /// Tracked tasks merged with the `TASK-NNNN*` files of the current iteration.
    pub fn task_listing(&self) -> Result<TaskListing, PhaseGateError> {
        let state = self.load();
        let paths = state.planning_paths();
        let task_re = Regex::new(r"^(TASK-\d{4})")
            .map_err(|e| PhaseGateError::PatternError(e.to_string()))?;

        let mut entries: BTreeMap<String, TaskListingEntry> = BTreeMap::new();
        let tasks_dir = self.root.join(&paths.tasks_dir);
        if tasks_dir.is_dir() {
            for entry in fs::read_dir(&tasks_dir)? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().to_string();
                let Some(caps) = task_re.captures(&name) else {
                    continue;
                };
                let id = caps[1].to_string();
                let record = state.tasks.items.get(&id).cloned().unwrap_or_default();
                entries.insert(
                    id,
                    TaskListingEntry {
                        record,
                        file: Some(format!("{}/{}", paths.tasks_dir, name)),
                        orphan: false,
                    },
                );
            }
        }
        for (id, record) in &state.tasks.items {
            entries.entry(id.clone()).or_insert_with(|| TaskListingEntry {
                record: record.clone(),
                file: None,
                orphan: true,
            });
        }

        let completed = entries
            .values()
            .filter(|e| e.record.status == WorkStatus::Completed)
            .count();
        let pending = entries
            .values()
            .filter(|e| e.record.status == WorkStatus::Pending)
            .count();
        Ok(TaskListing {
            planning_dir: paths.dir,
            current: state.tasks.current.clone(),
            total: entries.len(),
            completed,
            pending,
            tasks: entries,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskListingEntry {
    #[serde(flatten)]
    pub record: TaskRecord,
    pub file: Option<String>,
    pub orphan: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskListing {
    pub planning_dir: String,
    pub current: Option<String>,
    pub total: usize,
    pub completed: usize,
    pub pending: usize,
    pub tasks: BTreeMap<String, TaskListingEntry>,
}

impl fmt::Display for GateRecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GateRecordStatus::Pending => "pending",
            GateRecordStatus::Pass => "PASS",
            GateRecordStatus::Fail => "FAIL",
            GateRecordStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DEFAULT_STATE_FILE;
    use tempfile::TempDir;

    fn store() -> (TempDir, StateStore) {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path(), DEFAULT_STATE_FILE);
        (tmp, store)
    }

    #[test]
    fn load_returns_defaults_when_missing() {
        let (_tmp, store) = store();
        assert!(matches!(store.inspect(), StateLoad::Missing));
        let state = store.load();
        assert_eq!(state, PipelineState::default());
        assert_eq!(state.evolution_version, 1);
        assert_eq!(state.gates.len(), 6);
        assert_eq!(state.phases.len(), 5);
    }

    #[test]
    fn load_returns_defaults_when_corrupt() {
        let (_tmp, store) = store();
        fs::create_dir_all(store.path.parent().unwrap()).unwrap();
        fs::write(&store.path, "{ this is not json").unwrap();
        assert!(store.inspect().is_corrupt());
        assert_eq!(store.load(), PipelineState::default());
    }

    #[test]
    fn non_object_record_is_corrupt() {
        let (_tmp, store) = store();
        fs::create_dir_all(store.path.parent().unwrap()).unwrap();
        fs::write(&store.path, "[1, 2, 3]").unwrap();
        assert!(store.inspect().is_corrupt());
    }

    #[test]
    fn legacy_pending_pipeline_status_keeps_the_record() {
        let (_tmp, store) = store();
        fs::create_dir_all(store.path.parent().unwrap()).unwrap();
        fs::write(
            &store.path,
            r#"{"evolutionVersion":3,"counters":{"task":41},"pipeline":{"status":"pending"}}"#,
        )
        .unwrap();
        assert!(!store.inspect().is_corrupt());
        let state = store.load();
        assert_eq!(state.evolution_version, 3);
        assert_eq!(state.counter(CounterKind::Task), 41);
        assert_eq!(state.pipeline.status, PipelineStatus::Idle);
    }

    #[test]
    fn unrecognised_values_fall_back_one_by_one() {
        let (_tmp, store) = store();
        fs::create_dir_all(store.path.parent().unwrap()).unwrap();
        fs::write(
            &store.path,
            r#"{
                "evolutionVersion": 2,
                "counters": {"task": 7, "us": "many"},
                "phases": {"build": {"status": "blocked", "startedAt": "2026-01-01T00:00:00Z"}},
                "tasks": {"total": 2, "items": {
                    "TASK-0001": {"status": "completed"},
                    "TASK-0002": {"status": "in-review"}
                }}
            }"#,
        )
        .unwrap();

        let raw = fs::read_to_string(&store.path).unwrap();
        let fields = match serde_json::from_str::<Value>(&raw).unwrap() {
            Value::Object(fields) => fields,
            other => panic!("unexpected value: {:?}", other),
        };
        let (state, mut dropped) = PipelineState::from_fields(fields);
        dropped.sort();
        assert_eq!(
            dropped,
            vec![
                "counters.us",
                "phases.build.status",
                "tasks.items.TASK-0002.status"
            ]
        );
        assert_eq!(state.evolution_version, 2);
        assert_eq!(state.counter(CounterKind::Task), 7);
        assert_eq!(state.counter(CounterKind::Us), 0);
        let build = &state.phases["build"];
        assert_eq!(build.status, WorkStatus::Pending);
        assert_eq!(build.started_at.as_deref(), Some("2026-01-01T00:00:00Z"));
        assert_eq!(state.phases.len(), 5);
        assert_eq!(state.tasks.total, 2);
        assert_eq!(state.tasks.items["TASK-0001"].status, WorkStatus::Completed);
        assert_eq!(state.tasks.items["TASK-0002"].status, WorkStatus::Pending);
        assert!(matches!(store.inspect(), StateLoad::Loaded(_)));
    }

    #[test]
    fn partial_record_is_filled_from_defaults() {
        let (_tmp, store) = store();
        fs::create_dir_all(store.path.parent().unwrap()).unwrap();
        fs::write(
            &store.path,
            r#"{"evolutionVersion": 3, "evolutionMode": "brownfield"}"#,
        )
        .unwrap();
        let state = store.load();
        assert_eq!(state.evolution_version, 3);
        assert_eq!(state.evolution_mode, EvolutionMode::IterativeUpdate);
        assert_eq!(state.counter(CounterKind::Task), 0);
        assert_eq!(state.planning_paths().tasks_dir, "docs/planning/v3/tasks");
    }

    #[test]
    fn save_stamps_last_updated_and_round_trips() {
        let (_tmp, store) = store();
        let mut state = PipelineState::default();
        store.save(&mut state).unwrap();
        assert!(state.last_updated.is_some());
        assert_eq!(store.load(), state);
    }

    #[test]
    fn counters_are_padded_by_kind_and_persisted() {
        let (_tmp, store) = store();
        assert_eq!(store.increment_counter(CounterKind::Epic).unwrap(), "001");
        assert_eq!(store.increment_counter(CounterKind::Task).unwrap(), "0001");
        assert_eq!(store.increment_counter(CounterKind::Task).unwrap(), "0002");
        assert_eq!(store.load().counter(CounterKind::Task), 2);
    }

    #[test]
    fn only_one_phase_runs_at_a_time() {
        let (_tmp, store) = store();
        store.set_phase(Phase::Intake, WorkStatus::Running).unwrap();
        let err = store
            .set_phase(Phase::Specification, WorkStatus::Running)
            .unwrap_err();
        assert!(matches!(err, PhaseGateError::StateTransition(_)));

        store.set_phase(Phase::Intake, WorkStatus::Completed).unwrap();
        let state = store
            .set_phase(Phase::Specification, WorkStatus::Running)
            .unwrap();
        assert_eq!(state.running_phase(), Some("specification"));
        assert_eq!(state.pipeline.current_phase.as_deref(), Some("specification"));
    }

    #[test]
    fn gate_errors_present_iff_fail() {
        let mut state = PipelineState::default();
        assert!(state.record_gate(2, GateRecordStatus::Fail, vec![]).is_err());
        assert!(
            state
                .record_gate(2, GateRecordStatus::Pass, vec!["x".to_string()])
                .is_err()
        );
        assert!(state.record_gate(9, GateRecordStatus::Pass, vec![]).is_err());
        state
            .record_gate(2, GateRecordStatus::Fail, vec!["missing".to_string()])
            .unwrap();
        assert_eq!(state.gates[&2].errors, vec!["missing".to_string()]);
        state.record_gate(2, GateRecordStatus::Pass, vec![]).unwrap();
        assert!(state.gates[&2].errors.is_empty());
    }

    #[test]
    fn task_lifecycle_updates_board() {
        let mut state = PipelineState::default();
        state.set_task("TASK-0001", WorkStatus::Running);
        assert_eq!(state.tasks.total, 1);
        assert_eq!(state.tasks.current.as_deref(), Some("TASK-0001"));
        state.set_task("TASK-0001", WorkStatus::Completed);
        state.set_task("TASK-0001", WorkStatus::Completed);
        assert_eq!(state.tasks.completed, 1);
        assert_eq!(state.tasks.current, None);
    }

    #[test]
    fn new_iteration_keeps_counters() {
        let mut state = PipelineState::default();
        state.next_counter(CounterKind::Us);
        state
            .record_gate(1, GateRecordStatus::Fail, vec!["e".to_string()])
            .unwrap();
        state.begin_iteration();
        assert_eq!(state.evolution_version, 2);
        assert_eq!(state.evolution_mode, EvolutionMode::IterativeUpdate);
        assert_eq!(state.counter(CounterKind::Us), 1);
        assert_eq!(state.gates[&1], GateRecord::default());
    }

    #[test]
    fn lookup_follows_dotted_paths() {
        let state = PipelineState::default();
        assert_eq!(state.lookup("evolutionVersion"), Some(serde_json::json!(1)));
        assert_eq!(state.lookup("gates.3.status"), Some(serde_json::json!("pending")));
        assert_eq!(state.lookup("nope.nothing"), None);
    }

    #[test]
    fn task_listing_merges_disk_and_orphans() {
        let (tmp, store) = store();
        let tasks_dir = tmp.path().join("docs/planning/v1/tasks");
        fs::create_dir_all(&tasks_dir).unwrap();
        fs::write(tasks_dir.join("TASK-0001-login.md"), "# t").unwrap();
        store.set_task("TASK-0009", WorkStatus::Running).unwrap();

        let listing = store.task_listing().unwrap();
        assert_eq!(listing.total, 2);
        assert!(!listing.tasks["TASK-0001"].orphan);
        assert!(listing.tasks["TASK-0009"].orphan);
        assert_eq!(listing.current.as_deref(), Some("TASK-0009"));
    }
}
