// vault-tasks/src/layered_config.rs

use directories::ProjectDirs;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{fs, path::{Path, PathBuf}, sync::Arc, time::Duration};
use tracing::warn;

use crate::{
    error::{Result, TaskError},
    eviction::retention_ms,
    task::DocumentId,
};

/// Effective configuration, merged: system -> user -> workspace -> runtime (ephemeral)
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub tasks: TaskSettings,
    pub scheduler: SchedulerConfig,
    pub vault: VaultConfig,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ParseScope {
    /// Every document of the vault.
    #[default]
    Vault,
    /// Only `source_file`.
    SingleFile,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TaskSettings {
    pub parse_scope: ParseScope,
    /// Document parsed in single-file mode; also receives new tasks there.
    pub source_file: String,
    /// Document receiving new tasks in vault mode.
    pub default_file: String,
    /// How many tasks a view shows. Not enforced by the parser.
    pub max_display: usize,
    pub auto_cleanup_completed: bool,
    pub cleanup_delay_days: u32,
    /// Stamp completed lines without a `<!--completed:...-->` note with the parse time.
    pub infer_missing_completion: bool,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            parse_scope: ParseScope::Vault,
            source_file: "Tasks.md".into(),
            default_file: "Tasks.md".into(),
            max_display: 10,
            auto_cleanup_completed: false,
            cleanup_delay_days: 7,
            infer_missing_completion: true,
        }
    }
}

impl TaskSettings {
    pub fn retention_ms(&self) -> i64 { retention_ms(self.cleanup_delay_days) }

    /// Completed tasks go away right after being checked.
    pub fn immediate_cleanup(&self) -> bool { self.auto_cleanup_completed && self.cleanup_delay_days == 0 }

    /// Whether listings carry the done/total counter.
    pub fn shows_progress(&self) -> bool { !self.immediate_cleanup() }

    /// Where `add` writes.
    pub fn target_document(&self) -> DocumentId {
        match self.parse_scope {
            ParseScope::SingleFile => DocumentId::new(self.source_file.as_str()),
            ParseScope::Vault if self.default_file.trim().is_empty() => DocumentId::new("Tasks.md"),
            ParseScope::Vault => DocumentId::new(self.default_file.as_str()),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Quiet period after the last external change before re-parsing.
    pub debounce_ms: u64,
    pub cleanup_interval_secs: u64,
    /// Delay before evicting a task completed while `cleanup_delay_days` is zero.
    pub immediate_cleanup_grace_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { debounce_ms: 500, cleanup_interval_secs: 60 * 60, immediate_cleanup_grace_ms: 1000 }
    }
}

impl SchedulerConfig {
    pub fn debounce(&self) -> Duration { Duration::from_millis(self.debounce_ms) }
    pub fn cleanup_interval(&self) -> Duration { Duration::from_secs(self.cleanup_interval_secs.max(1)) }
    pub fn immediate_cleanup_grace(&self) -> Duration { Duration::from_millis(self.immediate_cleanup_grace_ms) }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VaultConfig {
    pub root: Option<PathBuf>,
    pub extensions: Vec<String>,
}

impl Default for VaultConfig {
    fn default() -> Self { Self { root: None, extensions: vec!["md".into()] } }
}

/// One config file (or the runtime overlay): only the keys it sets.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct ConfigLayer {
    pub tasks: TasksLayer,
    pub scheduler: SchedulerLayer,
    pub vault: VaultLayer,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct TasksLayer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_scope: Option<ParseScope>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_display: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_cleanup_completed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup_delay_days: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub infer_missing_completion: Option<bool>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct SchedulerLayer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debounce_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup_interval_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub immediate_cleanup_grace_ms: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct VaultLayer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Vec<String>>,
}

impl ConfigLayer {
    /// Builds a one-key layer from `section.key` and a textual value.
    pub fn from_assignment(path: &str, value: &str) -> Result<Self> {
        fn parsed<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
            value.trim().parse::<T>().map_err(|_| TaskError::Config(format!("invalid value for {}: {}", path, value)))
        }
        let mut l = Self::default();
        match path {
            "tasks.parse_scope" => {
                l.tasks.parse_scope = Some(match value.trim() {
                    "vault" => ParseScope::Vault,
                    "single-file" => ParseScope::SingleFile,
                    other => return Err(TaskError::Config(format!("unknown parse scope: {}", other))),
                })
            }
            "tasks.source_file" => l.tasks.source_file = Some(value.trim().to_string()),
            "tasks.default_file" => l.tasks.default_file = Some(value.trim().to_string()),
            "tasks.max_display" => l.tasks.max_display = Some(parsed(path, value)?),
            "tasks.auto_cleanup_completed" => l.tasks.auto_cleanup_completed = Some(parsed(path, value)?),
            "tasks.cleanup_delay_days" => l.tasks.cleanup_delay_days = Some(parsed(path, value)?),
            "tasks.infer_missing_completion" => l.tasks.infer_missing_completion = Some(parsed(path, value)?),
            "scheduler.debounce_ms" => l.scheduler.debounce_ms = Some(parsed(path, value)?),
            "scheduler.cleanup_interval_secs" => l.scheduler.cleanup_interval_secs = Some(parsed(path, value)?),
            "scheduler.immediate_cleanup_grace_ms" => l.scheduler.immediate_cleanup_grace_ms = Some(parsed(path, value)?),
            "vault.root" => l.vault.root = Some(PathBuf::from(value.trim())),
            "vault.extensions" => {
                l.vault.extensions = Some(value.split(',').map(|s| s.trim().trim_start_matches('.').to_string()).filter(|s| !s.is_empty()).collect())
            }
            _ => return Err(TaskError::Config(format!("unsupported key: {}", path))),
        }
        Ok(l)
    }
}

fn merge(a: &mut Config, b: &ConfigLayer) {
    fn set<T: Clone>(dst: &mut T, src: &Option<T>) { if let Some(v) = src { *dst = v.clone(); } }

    set(&mut a.tasks.parse_scope, &b.tasks.parse_scope);
    set(&mut a.tasks.source_file, &b.tasks.source_file);
    set(&mut a.tasks.default_file, &b.tasks.default_file);
    set(&mut a.tasks.max_display, &b.tasks.max_display);
    set(&mut a.tasks.auto_cleanup_completed, &b.tasks.auto_cleanup_completed);
    set(&mut a.tasks.cleanup_delay_days, &b.tasks.cleanup_delay_days);
    set(&mut a.tasks.infer_missing_completion, &b.tasks.infer_missing_completion);

    set(&mut a.scheduler.debounce_ms, &b.scheduler.debounce_ms);
    set(&mut a.scheduler.cleanup_interval_secs, &b.scheduler.cleanup_interval_secs);
    set(&mut a.scheduler.immediate_cleanup_grace_ms, &b.scheduler.immediate_cleanup_grace_ms);

    if b.vault.root.is_some() { a.vault.root = b.vault.root.clone(); }
    set(&mut a.vault.extensions, &b.vault.extensions);
}

fn merge_layers(a: &mut ConfigLayer, b: &ConfigLayer) {
    let overlay = |dst: &mut Option<String>, src: &Option<String>| { if src.is_some() { *dst = src.clone(); } };
    if b.tasks.parse_scope.is_some() { a.tasks.parse_scope = b.tasks.parse_scope; }
    overlay(&mut a.tasks.source_file, &b.tasks.source_file);
    overlay(&mut a.tasks.default_file, &b.tasks.default_file);
    if b.tasks.max_display.is_some() { a.tasks.max_display = b.tasks.max_display; }
    if b.tasks.auto_cleanup_completed.is_some() { a.tasks.auto_cleanup_completed = b.tasks.auto_cleanup_completed; }
    if b.tasks.cleanup_delay_days.is_some() { a.tasks.cleanup_delay_days = b.tasks.cleanup_delay_days; }
    if b.tasks.infer_missing_completion.is_some() { a.tasks.infer_missing_completion = b.tasks.infer_missing_completion; }

    if b.scheduler.debounce_ms.is_some() { a.scheduler.debounce_ms = b.scheduler.debounce_ms; }
    if b.scheduler.cleanup_interval_secs.is_some() { a.scheduler.cleanup_interval_secs = b.scheduler.cleanup_interval_secs; }
    if b.scheduler.immediate_cleanup_grace_ms.is_some() { a.scheduler.immediate_cleanup_grace_ms = b.scheduler.immediate_cleanup_grace_ms; }

    if b.vault.root.is_some() { a.vault.root = b.vault.root.clone(); }
    if b.vault.extensions.is_some() { a.vault.extensions = b.vault.extensions.clone(); }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Scope { System, User, Workspace, Runtime }

fn config_paths(workspace_root: &Path) -> Result<(PathBuf, PathBuf, PathBuf)> {
    let proj = ProjectDirs::from("dev", "vault-tasks", "vault-tasks")
        .ok_or_else(|| TaskError::Config("ProjectDirs not available".into()))?;
    let user = proj.config_dir().join("config.toml");
    let system = if cfg!(target_os = "windows") {
        PathBuf::from(r"C:\ProgramData\vault-tasks\config.toml")
    } else {
        PathBuf::from("/etc/vault-tasks/config.toml")
    };
    let workspace = workspace_root.join(".vault-tasks").join("config.toml");
    Ok((system, user, workspace))
}

#[derive(Clone)]
pub struct ConfigManager {
    inner: Arc<RwLock<Config>>,
    system_path: PathBuf,
    user_path: PathBuf,
    workspace_path: PathBuf,
    runtime_overlay: Arc<RwLock<ConfigLayer>>,
}

impl ConfigManager {
    pub fn load(workspace_root: impl AsRef<Path>) -> Result<Self> {
        let (system_path, user_path, workspace_path) = config_paths(workspace_root.as_ref())?;
        Ok(Self::load_from(system_path, user_path, workspace_path))
    }

    pub fn load_from(system_path: PathBuf, user_path: PathBuf, workspace_path: PathBuf) -> Self {
        let cm = Self {
            inner: Arc::new(RwLock::new(Config::default())),
            system_path, user_path, workspace_path,
            runtime_overlay: Arc::new(RwLock::new(ConfigLayer::default())),
        };
        cm.reload_all();
        cm
    }

    fn read_file(path: &Path) -> Option<ConfigLayer> {
        let text = fs::read_to_string(path).ok()?;
        match toml::from_str::<ConfigLayer>(&text) {
            Ok(layer) => Some(layer),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unparsable config file");
                None
            }
        }
    }

    pub fn reload_all(&self) {
        let mut merged = Config::default();
        for p in [&self.system_path, &self.user_path, &self.workspace_path] {
            if let Some(layer) = Self::read_file(p) { merge(&mut merged, &layer); }
        }
        let rt = self.runtime_overlay.read().clone();
        merge(&mut merged, &rt);
        *self.inner.write() = merged;
    }

    pub fn get(&self) -> Config { self.inner.read().clone() }

    pub fn path(&self, scope: Scope) -> Option<&Path> {
        match scope {
            Scope::System => Some(&self.system_path),
            Scope::User => Some(&self.user_path),
            Scope::Workspace => Some(&self.workspace_path),
            Scope::Runtime => None,
        }
    }

    pub fn apply_runtime_overlay(&self, patch: &ConfigLayer) {
        {
            let mut rt = self.runtime_overlay.write();
            merge_layers(&mut rt, patch);
        }
        self.reload_all()
    }

    /// Merges `patch` into the file of `scope` and reloads.
    pub fn write_patch(&self, scope: Scope, patch: &ConfigLayer) -> Result<PathBuf> {
        let path = self
            .path(scope)
            .ok_or_else(|| TaskError::Config("Runtime scope is ephemeral; cannot persist".into()))?
            .to_path_buf();
        if let Some(dir) = path.parent() { fs::create_dir_all(dir)?; }
        let mut current = match fs::read_to_string(&path) {
            Ok(text) => toml::from_str::<ConfigLayer>(&text)?,
            Err(_) => ConfigLayer::default(),
        };
        merge_layers(&mut current, patch);
        let text = toml::to_string_pretty(&current)?;
        fs::write(&path, text)?;
        self.reload_all();
        Ok(path)
    }
}
