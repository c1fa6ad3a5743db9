//! Project-level configuration.
//!
//! Two optional inputs are read from the project root:
//! - `phasegate.toml`: state file location, retry policy, walker skip list and
//!   per-validator command overrides.
//! - `docs/factory/project-config.json`: the project-path lookup, used only to
//!   locate the application entry file for the app-assembly validator.
//!
//! Neither file is required. A broken `phasegate.toml` falls back to defaults
//! and is surfaced to the caller as a problem string so the gate can report it.

use crate::core::output;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "phasegate.toml";
pub const DEFAULT_STATE_FILE: &str = "docs/factory/state.json";
pub const PROJECT_CONFIG_FILE: &str = "docs/factory/project-config.json";

pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 2000;

/// Names accepted under `[validators.<name>]`.
pub const VALIDATOR_NAMES: [&str; 7] = [
    "structure",
    "secrets",
    "tests",
    "code-quality",
    "app-assembly",
    "boundaries",
    "export",
];

/// How to invoke one external sub-validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorDef {
    pub program: String,
    pub args: Vec<String>,
    /// Validator is skipped when this file does not exist.
    pub script: Option<String>,
    /// Validator fails (not skips) when this file does not exist.
    pub required_file: Option<String>,
    pub timeout_secs: u64,
}

impl ValidatorDef {
    fn node_script(script: &str, extra: &[&str], timeout_secs: u64) -> Self {
        let mut args = vec![script.to_string()];
        args.extend(extra.iter().map(|a| a.to_string()));
        Self {
            program: "node".to_string(),
            args,
            script: Some(script.to_string()),
            required_file: None,
            timeout_secs,
        }
    }

    pub fn default_for(name: &str) -> Option<Self> {
        let def = match name {
            "structure" => Self::node_script("tools/validate-structure.js", &[], 30),
            "secrets" => Self::node_script("tools/scan-secrets.js", &[], 60),
            "tests" => Self {
                program: "npm".to_string(),
                args: vec!["test".to_string()],
                script: None,
                required_file: Some("package.json".to_string()),
                timeout_secs: 120,
            },
            "code-quality" => {
                Self::node_script("tools/validate-code-quality.js", &["--gate4"], 120)
            }
            "app-assembly" => Self::node_script("tools/validate-app-assembly.js", &[], 60),
            "boundaries" => Self::node_script("tools/validate-boundaries.js", &[], 60),
            "export" => Self::node_script("tools/export-release.js", &[], 120),
            _ => return None,
        };
        Some(def)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawConfig {
    state_file: Option<String>,
    skip_dirs: Option<Vec<String>>,
    retry: Option<RawRetry>,
    #[serde(default)]
    validators: BTreeMap<String, ValidatorOverride>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawRetry {
    attempts: Option<u32>,
    delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ValidatorOverride {
    program: Option<String>,
    args: Option<Vec<String>>,
    script: Option<String>,
    required_file: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    pub attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRY_ATTEMPTS,
            delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GateCheckConfig {
    pub state_file: String,
    pub skip_dirs: Vec<String>,
    pub retry: RetrySettings,
    validators: BTreeMap<String, ValidatorDef>,
}

impl Default for GateCheckConfig {
    fn default() -> Self {
        let validators = VALIDATOR_NAMES
            .iter()
            .filter_map(|name| ValidatorDef::default_for(name).map(|d| (name.to_string(), d)))
            .collect();
        Self {
            state_file: DEFAULT_STATE_FILE.to_string(),
            skip_dirs: default_skip_dirs(),
            retry: RetrySettings::default(),
            validators,
        }
    }
}

pub fn default_skip_dirs() -> Vec<String> {
    vec![".git".to_string(), "node_modules".to_string(), "target".to_string()]
}

/// Configuration plus whatever went wrong while reading it.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: GateCheckConfig,
    pub problems: Vec<String>,
}

impl GateCheckConfig {
    /// Load `phasegate.toml` from `root`. Never fails; problems are collected.
    pub fn load(root: &Path) -> LoadedConfig {
        let path = root.join(CONFIG_FILE);
        if !path.is_file() {
            return LoadedConfig {
                config: Self::default(),
                problems: Vec::new(),
            };
        }
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                return LoadedConfig {
                    config: Self::default(),
                    problems: vec![format!("{} unreadable: {}", CONFIG_FILE, e)],
                };
            }
        };
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> LoadedConfig {
        let raw: RawConfig = match toml::from_str(content) {
            Ok(raw) => raw,
            Err(e) => {
                return LoadedConfig {
                    config: Self::default(),
                    problems: vec![format!(
                        "{} is invalid: {}",
                        CONFIG_FILE,
                        output::compact_line(&e.to_string(), 200)
                    )],
                };
            }
        };

        let mut config = Self::default();
        let mut problems = Vec::new();

        if let Some(state_file) = raw.state_file {
            config.state_file = state_file;
        }
        if let Some(skip_dirs) = raw.skip_dirs {
            config.skip_dirs = skip_dirs;
        }
        if let Some(retry) = raw.retry {
            if let Some(attempts) = retry.attempts {
                if attempts == 0 {
                    problems.push(format!("{}: retry.attempts must be >= 1", CONFIG_FILE));
                } else {
                    config.retry.attempts = attempts;
                }
            }
            if let Some(delay_ms) = retry.delay_ms {
                config.retry.delay_ms = delay_ms;
            }
        }
        for (name, over) in raw.validators {
            let Some(def) = config.validators.get_mut(&name) else {
                problems.push(format!(
                    "{}: unknown validator '{}' (known: {})",
                    CONFIG_FILE,
                    name,
                    VALIDATOR_NAMES.join(", ")
                ));
                continue;
            };
            if let Some(program) = over.program {
                def.program = program;
            }
            if let Some(args) = over.args {
                def.args = args;
            }
            if over.script.is_some() {
                def.script = over.script.filter(|s| !s.is_empty());
            }
            if over.required_file.is_some() {
                def.required_file = over.required_file.filter(|s| !s.is_empty());
            }
            if let Some(timeout_secs) = over.timeout_secs {
                def.timeout_secs = timeout_secs.max(1);
            }
        }

        LoadedConfig { config, problems }
    }

    pub fn validator(&self, name: &str) -> Option<&ValidatorDef> {
        self.validators.get(name)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawProjectConfig {
    #[serde(default)]
    paths: RawProjectPaths,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawProjectPaths {
    app: Option<OneOrMany>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

/// Project-path lookup consumed by the app-assembly validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectConfig {
    pub app_paths: Vec<String>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            app_paths: vec![
                "src/App.tsx".to_string(),
                "src/ui/App.tsx".to_string(),
                "src/main.tsx".to_string(),
            ],
        }
    }
}

impl ProjectConfig {
    pub fn load(root: &Path) -> Self {
        let path = root.join(PROJECT_CONFIG_FILE);
        if !path.is_file() {
            return Self::default();
        }
        let parsed = fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|c| serde_json::from_str::<RawProjectConfig>(&c).map_err(|e| e.to_string()));
        match parsed {
            Ok(raw) => match raw.paths.app {
                Some(OneOrMany::One(p)) => Self { app_paths: vec![p] },
                Some(OneOrMany::Many(ps)) if !ps.is_empty() => Self { app_paths: ps },
                _ => Self::default(),
            },
            Err(e) => {
                tracing::warn!("{} unreadable ({}), using default paths", PROJECT_CONFIG_FILE, e);
                Self::default()
            }
        }
    }

    /// First configured application entry file that exists.
    pub fn find_app_entry(&self, root: &Path) -> Option<PathBuf> {
        self.app_paths
            .iter()
            .map(|p| root.join(p))
            .find(|p| p.is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_config_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let loaded = GateCheckConfig::load(tmp.path());
        assert!(loaded.problems.is_empty());
        assert_eq!(loaded.config.state_file, DEFAULT_STATE_FILE);
        assert_eq!(loaded.config.retry, RetrySettings::default());
        assert_eq!(loaded.config.validator("tests").unwrap().program, "npm");
    }

    #[test]
    fn overrides_merge_onto_defaults() {
        let loaded = GateCheckConfig::from_toml_str(
            r#"
state_file = "state/pipeline.json"

[retry]
delay_ms = 10

[validators.tests]
program = "cargo"
args = ["test", "--quiet"]
required_file = ""
"#,
        );
        assert!(loaded.problems.is_empty(), "{:?}", loaded.problems);
        let cfg = loaded.config;
        assert_eq!(cfg.state_file, "state/pipeline.json");
        assert_eq!(cfg.retry.attempts, 3);
        assert_eq!(cfg.retry.delay_ms, 10);
        let tests = cfg.validator("tests").unwrap();
        assert_eq!(tests.program, "cargo");
        assert_eq!(tests.args, vec!["test", "--quiet"]);
        assert_eq!(tests.required_file, None);
        assert_eq!(tests.timeout_secs, 120);
    }

    #[test]
    fn malformed_config_reports_problem_and_keeps_defaults() {
        let loaded = GateCheckConfig::from_toml_str("state_file = [");
        assert_eq!(loaded.problems.len(), 1);
        assert_eq!(loaded.config.state_file, DEFAULT_STATE_FILE);
    }

    #[test]
    fn unknown_validator_is_a_problem() {
        let loaded = GateCheckConfig::from_toml_str("[validators.lint]\nprogram = \"x\"\n");
        assert_eq!(loaded.problems.len(), 1);
        assert!(loaded.problems[0].contains("lint"));
    }

    #[test]
    fn project_config_accepts_single_app_path() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("docs/factory")).unwrap();
        fs::write(
            tmp.path().join(PROJECT_CONFIG_FILE),
            r#"{"paths": {"app": "web/Main.tsx"}}"#,
        )
        .unwrap();
        let cfg = ProjectConfig::load(tmp.path());
        assert_eq!(cfg.app_paths, vec!["web/Main.tsx".to_string()]);
        assert!(cfg.find_app_entry(tmp.path()).is_none());

        fs::create_dir_all(tmp.path().join("web")).unwrap();
        fs::write(tmp.path().join("web/Main.tsx"), "export {}").unwrap();
        assert!(cfg.find_app_entry(tmp.path()).is_some());
    }

    #[test]
    fn broken_project_config_falls_back() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("docs/factory")).unwrap();
        fs::write(tmp.path().join(PROJECT_CONFIG_FILE), "{not json").unwrap();
        assert_eq!(ProjectConfig::load(tmp.path()), ProjectConfig::default());
    }
}
