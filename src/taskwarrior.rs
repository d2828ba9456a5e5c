//! Taskwarrior consumer: turns marked capture notes into tasks.
//!
//! On construction the consumer snapshots Taskwarrior's tag vocabulary and
//! every existing task, keyed two ways:
//!
//! - **strict**: description + sorted tags + project
//! - **loose**: description + project
//!
//! A record matching either key is skipped. The snapshot lives as long as
//! the consumer instance and grows as tasks are created, so duplicates
//! inside one run are caught too.
//!
//! Before the first task of a run is created the data directory is copied
//! to `<backup dir>/<timestamp>`, at most once per instance.
//!
//! # Configuration
//!
//! ```toml
//! [consumers.taskwarrior]
//! type = "taskwarrior"
//! marker_tag = "todo"
//! strip_tags = ["todo"]
//! project_tag_prefix = "project:"
//! review_tag = "not_reviewed"
//! max_new_tasks_per_run = 20
//! annotation_template = "Captured from {relative_path}"
//! data_directory = "~/.task"
//!
//! [consumers.taskwarrior.backup]
//! enabled = true
//! directory = "backups/taskwarrior"
//! ```

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::{expand_path, Config, ConsumerDefinition};
use crate::consumer::{Consumer, ConsumerRegistry};
use crate::error::{CommandError, ConfigError};
use crate::ledger::Ledger;
use crate::models::{ChangeState, ConsumerOutcome, EmissionStatus, Record};

/// Type tag used in `[consumers.<name>]` tables.
pub const TYPE_NAME: &str = "taskwarrior";

const TASK_TIME_FORMAT: &str = "%Y%m%dT%H%M%SZ";
const MAX_DESCRIPTION_CHARS: usize = 512;

pub fn register(registry: &mut ConsumerRegistry) {
    registry.register(TYPE_NAME, |definition, config| {
        Ok(Box::new(TaskwarriorConsumer::new(definition, config)?) as Box<dyn Consumer>)
    });
}

// ═══════════════════════════════════════════════════════════════════════
// Options
// ═══════════════════════════════════════════════════════════════════════

/// Raw consumer options as they appear in the config table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TaskwarriorOptions {
    pub marker_tag: String,
    pub strip_tags: Vec<String>,
    pub remove_unknown_tags: bool,
    pub project_tag_prefix: String,
    pub default_project: Option<String>,
    pub additional_tags: Vec<String>,
    /// Empty string disables the review tag.
    pub review_tag: String,
    pub max_new_tasks_per_run: Option<LimitValue>,
    pub annotation_template: Option<String>,
    pub backup: BackupOptions,
    pub data_directory: Option<String>,
    pub taskrc_path: Option<String>,
}

impl Default for TaskwarriorOptions {
    fn default() -> Self {
        Self {
            marker_tag: "todo".to_string(),
            strip_tags: Vec::new(),
            remove_unknown_tags: true,
            project_tag_prefix: "project:".to_string(),
            default_project: None,
            additional_tags: Vec::new(),
            review_tag: "not_reviewed".to_string(),
            max_new_tasks_per_run: None,
            annotation_template: None,
            backup: BackupOptions::default(),
            data_directory: None,
            taskrc_path: None,
        }
    }
}

/// Creation cap as written in config: an integer or a numeric string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LimitValue {
    Count(i64),
    Text(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackupOptions {
    pub enabled: bool,
    /// Relative paths resolve against the state directory.
    pub directory: String,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: "backups/taskwarrior".to_string(),
        }
    }
}

impl TaskwarriorOptions {
    pub fn from_definition(definition: &ConsumerDefinition) -> Result<Self, ConfigError> {
        toml::Value::Table(definition.options.clone())
            .try_into()
            .map_err(|e: toml::de::Error| invalid(definition, e.to_string()))
    }
}

fn invalid(definition: &ConsumerDefinition, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidOption {
        consumer: definition.name.clone(),
        reason: reason.into(),
    }
}

/// Options after normalization and validation.
#[derive(Debug, Clone)]
struct Settings {
    marker_tag: String,
    strip_tags: HashSet<String>,
    remove_unknown_tags: bool,
    project_tag_prefix: String,
    default_project: Option<String>,
    additional_tags: Vec<String>,
    review_tag: Option<String>,
    max_new_tasks: Option<usize>,
    annotation_template: Option<String>,
    backup_enabled: bool,
    backup_dir: PathBuf,
}

impl Settings {
    fn resolve(
        definition: &ConsumerDefinition,
        options: &TaskwarriorOptions,
        state_dir: &Path,
    ) -> Result<Self, ConfigError> {
        let marker_tag = options.marker_tag.trim().to_string();

        let mut strip_tags: HashSet<String> = options
            .strip_tags
            .iter()
            .map(|t| normalise_tag(t))
            .filter(|t| !t.is_empty())
            .collect();
        if !marker_tag.is_empty() {
            strip_tags.insert(normalise_tag(&marker_tag));
        }

        let additional_tags = options
            .additional_tags
            .iter()
            .map(|t| normalise_tag(t))
            .filter(|t| !t.is_empty())
            .collect();

        let review_tag = Some(normalise_tag(&options.review_tag)).filter(|t| !t.is_empty());

        let max_new_tasks = resolve_limit(options.max_new_tasks_per_run.as_ref())
            .map_err(|reason| invalid(definition, reason))?;

        let backup_dir = match options.backup.directory.trim() {
            "" => state_dir.join("backups").join(TYPE_NAME),
            dir => expand_path(dir, Some(state_dir)),
        };

        Ok(Self {
            marker_tag,
            strip_tags,
            remove_unknown_tags: options.remove_unknown_tags,
            project_tag_prefix: options.project_tag_prefix.trim().to_lowercase(),
            default_project: options
                .default_project
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from),
            additional_tags,
            review_tag,
            max_new_tasks,
            annotation_template: options
                .annotation_template
                .clone()
                .filter(|t| !t.trim().is_empty()),
            backup_enabled: options.backup.enabled,
            backup_dir,
        })
    }
}

fn resolve_limit(raw: Option<&LimitValue>) -> Result<Option<usize>, String> {
    let parsed = match raw {
        None => return Ok(None),
        Some(LimitValue::Count(n)) => *n,
        Some(LimitValue::Text(s)) if s.trim().is_empty() => return Ok(None),
        Some(LimitValue::Text(s)) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("invalid max_new_tasks_per_run value: {:?}", s))?,
    };
    usize::try_from(parsed)
        .map(Some)
        .map_err(|_| format!("max_new_tasks_per_run must be non-negative, got {}", parsed))
}

// ═══════════════════════════════════════════════════════════════════════
// Locations
// ═══════════════════════════════════════════════════════════════════════

/// taskrc: explicit option (when the file exists), then `$TASKRC`, then
/// `~/.taskrc` if present.
fn resolve_taskrc(options: &TaskwarriorOptions) -> Option<PathBuf> {
    if let Some(raw) = options.taskrc_path.as_deref().filter(|p| !p.trim().is_empty()) {
        let path = expand_path(raw, None);
        if path.exists() {
            return Some(path);
        }
    }
    if let Ok(env) = std::env::var("TASKRC") {
        if !env.trim().is_empty() {
            return Some(expand_path(&env, None));
        }
    }
    let default = expand_path("~/.taskrc", None);
    default.exists().then_some(default)
}

/// Data directory: explicit option (when it exists), then `data.location`
/// from the taskrc, then `~/.task`.
fn resolve_data_directory(options: &TaskwarriorOptions, taskrc: Option<&Path>) -> PathBuf {
    if let Some(raw) = options.data_directory.as_deref().filter(|p| !p.trim().is_empty()) {
        let path = expand_path(raw, None);
        if path.exists() {
            return path;
        }
    }
    taskrc
        .and_then(data_location_from_taskrc)
        .unwrap_or_else(|| expand_path("~/.task", None))
}

/// Read `data.location` from a taskrc file. Quotes around the value are
/// stripped; unreadable files yield `None`.
pub fn data_location_from_taskrc(taskrc: &Path) -> Option<PathBuf> {
    let text = std::fs::read_to_string(taskrc).ok()?;
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("data.location"))
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
        .map(|value| {
            let unquoted = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            expand_path(unquoted, None)
        })
}

// ═══════════════════════════════════════════════════════════════════════
// Backend
// ═══════════════════════════════════════════════════════════════════════

/// One task from `task export`. Only the fields used for dedup are kept.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportedTask {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub project: Option<String>,
}

/// A task as handed to `task import`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskPayload {
    pub uuid: String,
    pub description: String,
    pub entry: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Annotation {
    pub entry: String,
    pub description: String,
}

/// The three Taskwarrior operations the consumer needs.
///
/// Calls are blocking. A failed external call should surface a
/// [`CommandError`] somewhere in the returned error chain so its output
/// gets logged.
pub trait TaskBackend: Send {
    /// Every tag Taskwarrior knows about.
    fn tags(&self) -> Result<Vec<String>>;
    /// Every task, including completed and deleted ones.
    fn export(&self) -> Result<Vec<ExportedTask>>;
    fn import(&mut self, task: &TaskPayload) -> Result<()>;
}

/// [`TaskBackend`] that shells out to the `task` binary.
pub struct TaskCli {
    data_directory: PathBuf,
    taskrc: Option<PathBuf>,
}

impl TaskCli {
    pub fn new(data_directory: PathBuf, taskrc: Option<PathBuf>) -> Self {
        Self {
            data_directory,
            taskrc,
        }
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new("task");
        cmd.arg(format!("rc.data.location={}", self.data_directory.display()))
            .args(["rc.confirmation=no", "rc.hooks=off"])
            .args(args)
            .stdin(Stdio::null());
        if let Some(taskrc) = &self.taskrc {
            cmd.env("TASKRC", taskrc);
        }

        let output = cmd
            .output()
            .with_context(|| "Failed to execute 'task'. Is Taskwarrior installed?")?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            return Err(CommandError::new(
                format!("Taskwarrior command failed: task {}", args.join(" ")),
                stdout,
                stderr,
            )
            .into());
        }
        Ok(stdout)
    }
}

impl TaskBackend for TaskCli {
    fn tags(&self) -> Result<Vec<String>> {
        let stdout = self.run(&["_tags"])?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect())
    }

    fn export(&self) -> Result<Vec<ExportedTask>> {
        let stdout = self.run(&["rc.json.array=1", "export"])?;
        match serde_json::from_str(&stdout) {
            Ok(tasks) => Ok(tasks),
            Err(e) => Err(CommandError::new(
                format!("Failed to parse Taskwarrior export: {}", e),
                stdout,
                "",
            )
            .into()),
        }
    }

    fn import(&mut self, task: &TaskPayload) -> Result<()> {
        let mut file = tempfile::Builder::new()
            .prefix("capture-relay-")
            .suffix(".json")
            .tempfile()
            .context("Failed to create Taskwarrior import file")?;
        serde_json::to_writer(&mut file, &[task])?;
        file.flush()?;

        let path = file.path().to_string_lossy().into_owned();
        self.run(&["import", &path])?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Snapshot
// ═══════════════════════════════════════════════════════════════════════

type StrictKey = (String, Vec<String>, String);
type LooseKey = (String, String);

fn strict_key(description: &str, tags: &[String], project: Option<&str>) -> StrictKey {
    let mut tags: Vec<String> = tags.iter().map(|t| t.trim().to_lowercase()).collect();
    tags.sort();
    (
        description.trim().to_lowercase(),
        tags,
        project.unwrap_or("").trim().to_lowercase(),
    )
}

fn loose_key(description: &str, project: Option<&str>) -> LooseKey {
    (
        description.trim().to_lowercase(),
        project.unwrap_or("").trim().to_lowercase(),
    )
}

#[derive(Debug, Default)]
struct Snapshot {
    known_tags: HashSet<String>,
    strict: HashSet<StrictKey>,
    loose: HashSet<LooseKey>,
}

impl Snapshot {
    fn load(backend: &dyn TaskBackend) -> Result<Self> {
        let mut snapshot = Self::default();

        for tag in backend.tags().context("Failed to load existing Taskwarrior tags")? {
            let tag = tag.trim().to_lowercase();
            if !tag.is_empty() {
                snapshot.known_tags.insert(tag);
            }
        }

        for task in backend.export().context("Failed to export existing Taskwarrior tasks")? {
            let tags: Vec<String> = task.tags.into_iter().filter(|t| !t.is_empty()).collect();
            snapshot.remember(&task.description, &tags, task.project.as_deref());
        }

        Ok(snapshot)
    }

    fn remember(&mut self, description: &str, tags: &[String], project: Option<&str>) {
        self.strict.insert(strict_key(description, tags, project));
        self.loose.insert(loose_key(description, project));
        self.known_tags.extend(tags.iter().map(|t| t.to_lowercase()));
    }

    /// The loose key is checked first. Every remembered task carries both
    /// keys, so the strict reason only shows up for snapshots built some
    /// other way.
    fn duplicate_of(&self, strict: &StrictKey, loose: &LooseKey) -> Option<Duplicate> {
        if self.loose.contains(loose) {
            Some(Duplicate::Summary)
        } else if self.strict.contains(strict) {
            Some(Duplicate::Exact)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Duplicate {
    /// Same description and project.
    Summary,
    /// Same description, tags and project.
    Exact,
}

// ═══════════════════════════════════════════════════════════════════════
// Consumer
// ═══════════════════════════════════════════════════════════════════════

pub struct TaskwarriorConsumer {
    name: String,
    settings: Settings,
    vault_root: PathBuf,
    data_directory: PathBuf,
    backend: Box<dyn TaskBackend>,
    snapshot: Snapshot,
    backed_up: bool,
    created: usize,
}

impl TaskwarriorConsumer {
    /// Build a consumer backed by the `task` binary.
    pub fn new(definition: &ConsumerDefinition, config: &Config) -> Result<Self> {
        let options = TaskwarriorOptions::from_definition(definition)?;
        let taskrc = resolve_taskrc(&options);
        let data_directory = resolve_data_directory(&options, taskrc.as_deref());
        let backend = TaskCli::new(data_directory.clone(), taskrc);
        Self::build(definition, config, &options, data_directory, Box::new(backend))
    }

    /// Build a consumer over any [`TaskBackend`]. Locations are resolved
    /// from the options exactly as in [`new`](Self::new).
    pub fn with_backend(
        definition: &ConsumerDefinition,
        config: &Config,
        backend: Box<dyn TaskBackend>,
    ) -> Result<Self> {
        let options = TaskwarriorOptions::from_definition(definition)?;
        let taskrc = resolve_taskrc(&options);
        let data_directory = resolve_data_directory(&options, taskrc.as_deref());
        Self::build(definition, config, &options, data_directory, backend)
    }

    fn build(
        definition: &ConsumerDefinition,
        config: &Config,
        options: &TaskwarriorOptions,
        data_directory: PathBuf,
        backend: Box<dyn TaskBackend>,
    ) -> Result<Self> {
        let settings = Settings::resolve(definition, options, &config.state_dir)?;

        if !data_directory.is_dir() {
            return Err(ConfigError::MissingDataDirectory {
                consumer: definition.name.clone(),
                path: data_directory,
            }
            .into());
        }

        std::fs::create_dir_all(&settings.backup_dir).with_context(|| {
            format!(
                "Failed to create backup directory: {}",
                settings.backup_dir.display()
            )
        })?;

        let mut snapshot = Snapshot::load(backend.as_ref())?;
        if let Some(review) = &settings.review_tag {
            snapshot.known_tags.insert(review.clone());
        }

        debug!(
            consumer = %definition.name,
            data = %data_directory.display(),
            tags = snapshot.known_tags.len(),
            tasks = snapshot.loose.len(),
            "loaded Taskwarrior snapshot"
        );

        Ok(Self {
            name: definition.name.clone(),
            settings,
            vault_root: config.vault_root.clone(),
            data_directory,
            backend,
            snapshot,
            backed_up: false,
            created: 0,
        })
    }

    /// Tags and project for a record.
    ///
    /// Tags are normalized, the marker and strip tags removed, the first
    /// tag carrying the project prefix becomes the project, then the
    /// additional and review tags are added. With `remove_unknown_tags`
    /// only tags Taskwarrior already knows survive.
    fn prepare_tags(&self, record: &Record) -> (Vec<String>, Option<String>) {
        let mut tags: Vec<String> = record
            .tags()
            .iter()
            .map(|t| normalise_tag(t))
            .filter(|t| !t.is_empty() && !self.settings.strip_tags.contains(t))
            .collect();

        let prefix = &self.settings.project_tag_prefix;
        let mut project = None;
        if !prefix.is_empty() {
            if let Some(pos) = tags.iter().position(|t| t.starts_with(prefix.as_str())) {
                let tag = tags.remove(pos);
                project = Some(tag[prefix.len()..].trim().to_string()).filter(|p| !p.is_empty());
            }
        }
        let project = project.or_else(|| self.settings.default_project.clone());

        tags.extend(self.settings.additional_tags.iter().cloned());
        tags.extend(self.settings.review_tag.iter().cloned());
        tags.sort();
        tags.dedup();

        if self.settings.remove_unknown_tags {
            tags.retain(|t| self.snapshot.known_tags.contains(t));
        }

        (tags, project)
    }

    fn annotation(&self, record: &Record) -> Option<String> {
        let template = self.settings.annotation_template.as_deref()?;
        let relative = record
            .path
            .strip_prefix(&self.vault_root)
            .unwrap_or(&record.path);
        Some(
            template
                .replace("{path}", &record.path.to_string_lossy())
                .replace("{relative_path}", &relative.to_string_lossy())
                .replace("{id}", &record.header_str("id").unwrap_or_default())
                .replace("{capture_id}", &record.header_str("capture_id").unwrap_or_default()),
        )
    }

    fn payload(
        &self,
        record: &Record,
        description: &str,
        tags: &[String],
        project: Option<&str>,
    ) -> TaskPayload {
        let entry_source = record
            .header_str("timestamp")
            .or_else(|| record.header_str("created_date"));
        let entry = entry_source
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or_else(Utc::now);

        TaskPayload {
            uuid: uuid::Uuid::new_v4().to_string(),
            description: description.to_string(),
            entry: entry.format(TASK_TIME_FORMAT).to_string(),
            tags: tags.to_vec(),
            project: project.map(String::from),
            annotations: self
                .annotation(record)
                .map(|description| Annotation {
                    entry: Utc::now().format(TASK_TIME_FORMAT).to_string(),
                    description,
                })
                .into_iter()
                .collect(),
        }
    }

    /// Copy the data directory once per instance.
    fn ensure_backup(&mut self) -> Result<()> {
        if self.backed_up || !self.settings.backup_enabled {
            return Ok(());
        }

        let stamp = Utc::now().format(TASK_TIME_FORMAT).to_string();
        let target = backup_target(&self.settings.backup_dir, &stamp);

        copy_tree(&self.data_directory, &target)?;
        self.backed_up = true;
        info!(consumer = %self.name, path = %target.display(), "created Taskwarrior backup");
        Ok(())
    }
}

#[async_trait]
impl Consumer for TaskwarriorConsumer {
    fn name(&self) -> &str {
        &self.name
    }

    fn relevant(&self, state: &ChangeState) -> bool {
        self.settings.marker_tag.is_empty() || state.record.has_tag(&self.settings.marker_tag)
    }

    async fn handle(&mut self, state: &ChangeState, ledger: &Ledger) -> Result<ConsumerOutcome> {
        let record = &state.record;

        let description = build_description(record);
        if description.is_empty() {
            return Ok(ConsumerOutcome::skip("empty description"));
        }

        let (tags, project) = self.prepare_tags(record);
        let strict = strict_key(&description, &tags, project.as_deref());
        let loose = loose_key(&description, project.as_deref());

        match self.snapshot.duplicate_of(&strict, &loose) {
            Some(Duplicate::Summary) => {
                return Ok(ConsumerOutcome::skip("duplicate task (description/project)")
                    .with_metadata(json!({
                        "description": description,
                        "project": project,
                    })));
            }
            Some(Duplicate::Exact) => {
                return Ok(ConsumerOutcome::skip("duplicate task").with_metadata(json!({
                    "description": description,
                    "tags": tags,
                    "project": project,
                })));
            }
            None => {}
        }

        if let Some(limit) = self.settings.max_new_tasks {
            if self.created >= limit {
                return Ok(ConsumerOutcome::limit("task limit reached").with_metadata(json!({
                    "limit": limit,
                    "note": record.key(),
                })));
            }
        }

        // A changed note that already produced a task gets a fresh one;
        // keep a pointer to the task it replaces.
        let supersedes = ledger
            .emission(&self.name, &record.key())
            .await?
            .filter(|e| e.status == EmissionStatus::Success)
            .and_then(|e| e.metadata)
            .and_then(|m| m.get("uuid").and_then(Value::as_str).map(String::from));

        self.ensure_backup()?;

        let payload = self.payload(record, &description, &tags, project.as_deref());
        self.backend
            .import(&payload)
            .with_context(|| format!("Failed to create task for {}", record.path.display()))?;

        self.created += 1;
        self.snapshot.remember(&description, &tags, project.as_deref());

        let mut metadata = json!({
            "description": description,
            "tags": tags,
            "project": project,
            "uuid": payload.uuid,
        });
        if let Some(previous) = supersedes {
            metadata["supersedes"] = Value::String(previous);
        }
        Ok(ConsumerOutcome::success("task added").with_metadata(metadata))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════════════════

/// Trim, replace spaces with underscores, lowercase.
pub fn normalise_tag(tag: &str) -> String {
    tag.trim().replace(' ', "_").to_lowercase()
}

/// Task description for a record.
///
/// Non-empty body lines that are not Markdown headings, joined with a
/// space; otherwise the header title; otherwise the file stem. Whitespace
/// is collapsed and the result capped at 512 characters.
pub fn build_description(record: &Record) -> String {
    let lines: Vec<&str> = record
        .body
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect();

    let candidate = if !lines.is_empty() {
        lines.join(" ")
    } else if let Some(title) = record.title() {
        title
    } else {
        record
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    };

    let collapsed = candidate.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > MAX_DESCRIPTION_CHARS {
        let mut capped: String = collapsed.chars().take(MAX_DESCRIPTION_CHARS - 3).collect();
        capped.push_str("...");
        capped
    } else {
        collapsed
    }
}

/// Parse a header timestamp. Accepts RFC 3339, naive date-times and plain
/// dates; naive values are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// First free `<stamp>`, `<stamp>-2`, `<stamp>-3`, ... under `dir`.
fn backup_target(dir: &Path, stamp: &str) -> PathBuf {
    let mut target = dir.join(stamp);
    let mut counter = 1;
    while target.exists() {
        counter += 1;
        target = dir.join(format!("{}-{}", stamp, counter));
    }
    target
}

fn copy_tree(source: &Path, target: &Path) -> Result<()> {
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.with_context(|| format!("Failed to walk {}", source.display()))?;
        let relative = entry.path().strip_prefix(source)?;
        let destination = target.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&destination)
                .with_context(|| format!("Failed to create {}", destination.display()))?;
        } else if entry.file_type().is_file() {
            std::fs::copy(entry.path(), &destination).with_context(|| {
                format!(
                    "Failed to copy {} to {}",
                    entry.path().display(),
                    destination.display()
                )
            })?;
        }
    }
    Ok(())
}
