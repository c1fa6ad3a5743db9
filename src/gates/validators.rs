//! Sub-validation execution.
//!
//! Builtin checks run in-process; the rest are external programs configured
//! under `[validators.<name>]`. Whatever happens, the result is reduced to
//! passed, skipped, or failed with categorized errors. Nothing here returns
//! `Err` to the orchestrator.

use crate::core::config::{GateCheckConfig, ProjectConfig, ValidatorDef};
use crate::core::output;
use crate::gates::definition::SubValidation;
use crate::gates::process::{Invocation, ProcessOutcome, ProcessRunner};
use crate::gates::report::{ErrorCategory, ValidationError};
use crate::gates::retry::{self, RetryPolicy};
use crate::gates::{planning, requirements};
use std::cell::OnceCell;
use std::fs;
use std::path::Path;
use std::time::Duration;

const OUTPUT_TAIL_LINES: usize = 5;
const OUTPUT_TAIL_CHARS: usize = 400;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubOutcome {
    Passed {
        attempts: u32,
        note: Option<String>,
    },
    /// Tool or input not present; contributes no error.
    Skipped(String),
    Failed {
        attempts: u32,
        errors: Vec<ValidationError>,
    },
}

impl SubOutcome {
    fn passed() -> Self {
        SubOutcome::Passed {
            attempts: 1,
            note: None,
        }
    }

    fn failed(category: ErrorCategory, message: impl Into<String>) -> Self {
        SubOutcome::Failed {
            attempts: 1,
            errors: vec![ValidationError::new(category, message)],
        }
    }

    fn from_errors(errors: Vec<ValidationError>) -> Self {
        if errors.is_empty() {
            Self::passed()
        } else {
            SubOutcome::Failed {
                attempts: 1,
                errors,
            }
        }
    }
}

/// Category a sub-validation's failures are reported under.
pub fn failure_category(sub: &SubValidation) -> ErrorCategory {
    match sub {
        SubValidation::Requirements { .. } => ErrorCategory::Requirements,
        SubValidation::Structure => ErrorCategory::Structure,
        SubValidation::SecretsScan => ErrorCategory::SecretsCritical,
        SubValidation::PlanningItems { .. } => ErrorCategory::TaskIncomplete,
        SubValidation::Tests => ErrorCategory::TestFailure,
        SubValidation::CodeQuality => ErrorCategory::CodeQuality,
        SubValidation::AppAssembly => ErrorCategory::AppAssembly,
        SubValidation::Boundaries => ErrorCategory::BoundaryViolation,
        SubValidation::ExportRelease => ErrorCategory::ExportFailure,
    }
}

fn label(sub: &SubValidation) -> &'static str {
    match sub {
        SubValidation::Requirements { .. } => "Requirements validation",
        SubValidation::Structure => "Structure validation",
        SubValidation::SecretsScan => "Secrets scan",
        SubValidation::PlanningItems { .. } => "Planning validation",
        SubValidation::Tests => "Tests",
        SubValidation::CodeQuality => "Code quality validation",
        SubValidation::AppAssembly => "App assembly validation",
        SubValidation::Boundaries => "Boundary validation",
        SubValidation::ExportRelease => "Release export",
    }
}

/// Everything a sub-validation may read, borrowed from the orchestrator.
pub struct ValidatorEnv<'a> {
    pub root: &'a Path,
    pub config: &'a GateCheckConfig,
    /// Loaded on first use, at most once per invocation.
    pub project: &'a OnceCell<ProjectConfig>,
}

impl ValidatorEnv<'_> {
    fn project(&self) -> &ProjectConfig {
        self.project.get_or_init(|| ProjectConfig::load(self.root))
    }

    fn invocation(&self, name: &str, def: &ValidatorDef) -> Invocation {
        Invocation {
            name: name.to_string(),
            program: def.program.clone(),
            args: def.args.clone(),
            cwd: self.root.to_path_buf(),
            timeout: Duration::from_secs(def.timeout_secs),
        }
    }
}

pub fn run(
    sub: &SubValidation,
    env: &ValidatorEnv<'_>,
    runner: &mut dyn ProcessRunner,
) -> SubOutcome {
    let builtin = match sub {
        SubValidation::Requirements { document } => requirements::validate(env.root, document),
        SubValidation::PlanningItems { paths } => {
            planning::validate(env.root, paths, &env.config.skip_dirs)
        }
        external => return run_external(external, env, runner),
    };
    match builtin {
        Ok(errors) => SubOutcome::from_errors(errors),
        Err(e) => SubOutcome::failed(failure_category(sub), format!("{}: {}", label(sub), e)),
    }
}

fn run_external(
    sub: &SubValidation,
    env: &ValidatorEnv<'_>,
    runner: &mut dyn ProcessRunner,
) -> SubOutcome {
    let name = sub.name();
    let Some(def) = env.config.validator(name) else {
        return SubOutcome::Skipped(format!("no command configured for {}", name));
    };

    if let Some(script) = &def.script {
        if !env.root.join(script).is_file() {
            return SubOutcome::Skipped(format!("{} not found", script));
        }
    }
    match sub {
        SubValidation::AppAssembly if env.project().find_app_entry(env.root).is_none() => {
            return SubOutcome::Skipped(format!(
                "no application entry file ({})",
                env.project().app_paths.join(", ")
            ));
        }
        SubValidation::Boundaries if !env.root.join("src").is_dir() => {
            return SubOutcome::Skipped("no src/ directory".to_string());
        }
        _ => {}
    }
    if let Some(required) = &def.required_file {
        if let Err(why) = check_required_file(env.root, required) {
            return SubOutcome::failed(failure_category(sub), format!("{}: {}", label(sub), why));
        }
    }

    let invocation = env.invocation(name, def);
    if sub.is_retryable() {
        return run_with_retry(sub, &invocation, env, runner);
    }

    let outcome = runner.run(&invocation);
    interpret(sub, &invocation, &outcome)
}

/// The required file must exist; a `package.json` must also define a test script.
fn check_required_file(root: &Path, required: &str) -> Result<(), String> {
    let path = root.join(required);
    if !path.is_file() {
        return Err(format!("{} not found", required));
    }
    if Path::new(required).file_name().is_some_and(|n| n == "package.json") {
        let content =
            fs::read_to_string(&path).map_err(|e| format!("{} unreadable: {}", required, e))?;
        let manifest: serde_json::Value =
            serde_json::from_str(&content).map_err(|e| format!("invalid {}: {}", required, e))?;
        if manifest.pointer("/scripts/test").and_then(|v| v.as_str()).is_none() {
            return Err(format!("no test script defined in {}", required));
        }
    }
    Ok(())
}

fn failure_detail(invocation: &Invocation, outcome: &ProcessOutcome) -> String {
    let tail = output::tail_lines(&outcome.output(), OUTPUT_TAIL_LINES);
    if tail.is_empty() {
        outcome.describe(invocation)
    } else {
        format!(
            "{}: {}",
            outcome.describe(invocation),
            output::compact_line(&tail, OUTPUT_TAIL_CHARS)
        )
    }
}

fn interpret(sub: &SubValidation, invocation: &Invocation, outcome: &ProcessOutcome) -> SubOutcome {
    if outcome.succeeded() {
        return SubOutcome::passed();
    }
    if let (SubValidation::SecretsScan, ProcessOutcome::Exited { code: Some(code), .. }) =
        (sub, outcome)
    {
        let category = match code {
            2 => ErrorCategory::SecretsCritical,
            3 => ErrorCategory::PiiWarning,
            _ => {
                tracing::warn!("secrets scan reported warnings (exit {})", code);
                return SubOutcome::Passed {
                    attempts: 1,
                    note: Some(format!("warnings only (exit {})", code)),
                };
            }
        };
        return SubOutcome::failed(
            category,
            format!("{}: {}", label(sub), failure_detail(invocation, outcome)),
        );
    }
    SubOutcome::failed(
        failure_category(sub),
        format!("{}: {}", label(sub), failure_detail(invocation, outcome)),
    )
}

fn run_with_retry(
    sub: &SubValidation,
    invocation: &Invocation,
    env: &ValidatorEnv<'_>,
    runner: &mut dyn ProcessRunner,
) -> SubOutcome {
    let policy = RetryPolicy::from(env.config.retry);
    let outcome = retry::with_retry(policy, |attempt| {
        tracing::info!(
            "running {} (attempt {}/{})",
            invocation.command_line(),
            attempt,
            policy.max_attempts
        );
        let result = runner.run(invocation);
        if result.succeeded() {
            Ok(())
        } else {
            Err(failure_detail(invocation, &result))
        }
    });
    match outcome.result {
        Ok(()) => SubOutcome::Passed {
            attempts: outcome.attempts,
            note: None,
        },
        Err(last) => SubOutcome::Failed {
            attempts: outcome.attempts,
            errors: vec![ValidationError::new(
                failure_category(sub),
                format!(
                    "{} failed after {} attempt{}: {}",
                    label(sub),
                    outcome.attempts,
                    if outcome.attempts == 1 { "" } else { "s" },
                    last
                ),
            )],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gates::process::ScriptedRunner;
    use tempfile::TempDir;

    fn fast_config() -> GateCheckConfig {
        GateCheckConfig::from_toml_str("[retry]\ndelay_ms = 0\n").config
    }

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    fn run_one(root: &Path, sub: &SubValidation, runner: &mut ScriptedRunner) -> SubOutcome {
        let config = fast_config();
        let project = OnceCell::new();
        let env = ValidatorEnv {
            root,
            config: &config,
            project: &project,
        };
        run(sub, &env, runner)
    }

    #[test]
    fn missing_script_skips_without_running() {
        let tmp = TempDir::new().unwrap();
        let mut runner = ScriptedRunner::default();
        let outcome = run_one(tmp.path(), &SubValidation::Structure, &mut runner);
        assert!(matches!(
            outcome,
            SubOutcome::Skipped(ref why) if why.contains("validate-structure.js")
        ));
        assert!(runner.calls.is_empty());
    }

    #[test]
    fn secrets_exit_codes_map_to_severity() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "tools/scan-secrets.js", "");
        let mut runner = ScriptedRunner::default().script(
            "secrets",
            vec![
                ScriptedRunner::exit(2, "AWS key in .env"),
                ScriptedRunner::exit(3, "email address"),
                ScriptedRunner::exit(1, "low confidence"),
            ],
        );

        let expect_category = |outcome: SubOutcome, category: ErrorCategory| match outcome {
            SubOutcome::Failed { errors, .. } => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].category, category);
                assert!(!errors[0].fixable);
            }
            other => panic!("expected failure, got {:?}", other),
        };
        expect_category(
            run_one(tmp.path(), &SubValidation::SecretsScan, &mut runner),
            ErrorCategory::SecretsCritical,
        );
        expect_category(
            run_one(tmp.path(), &SubValidation::SecretsScan, &mut runner),
            ErrorCategory::PiiWarning,
        );
        assert!(matches!(
            run_one(tmp.path(), &SubValidation::SecretsScan, &mut runner),
            SubOutcome::Passed { note: Some(_), .. }
        ));
    }

    #[test]
    fn timeout_maps_to_validator_category() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "tools/validate-code-quality.js", "");
        let mut runner =
            ScriptedRunner::default().script("code-quality", vec![ProcessOutcome::TimedOut]);
        match run_one(tmp.path(), &SubValidation::CodeQuality, &mut runner) {
            SubOutcome::Failed { errors, .. } => {
                assert_eq!(errors[0].category, ErrorCategory::CodeQuality);
                assert!(errors[0].message.contains("timed out"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn tests_need_a_test_script() {
        let tmp = TempDir::new().unwrap();
        let mut runner = ScriptedRunner::default();
        match run_one(tmp.path(), &SubValidation::Tests, &mut runner) {
            SubOutcome::Failed { errors, .. } => {
                assert_eq!(errors[0].category, ErrorCategory::TestFailure);
                assert!(errors[0].message.contains("package.json not found"));
            }
            other => panic!("expected failure, got {:?}", other),
        }

        write(tmp.path(), "package.json", r#"{"scripts": {"build": "tsc"}}"#);
        match run_one(tmp.path(), &SubValidation::Tests, &mut runner) {
            SubOutcome::Failed { errors, .. } => {
                assert!(errors[0].message.contains("no test script"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(runner.calls.is_empty());
    }

    #[test]
    fn tests_retry_until_green() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "package.json", r#"{"scripts": {"test": "vitest run"}}"#);
        let mut runner = ScriptedRunner::default().script(
            "tests",
            vec![ScriptedRunner::exit(1, "flaky"), ScriptedRunner::exit(1, "flaky")],
        );
        let outcome = run_one(tmp.path(), &SubValidation::Tests, &mut runner);
        assert_eq!(
            outcome,
            SubOutcome::Passed {
                attempts: 3,
                note: None
            }
        );
        assert_eq!(runner.calls_to("tests"), 3);
    }

    #[test]
    fn tests_exhausting_retries_yield_one_error() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "package.json", r#"{"scripts": {"test": "vitest run"}}"#);
        let mut runner = ScriptedRunner::default().script(
            "tests",
            vec![
                ScriptedRunner::exit(1, "first"),
                ScriptedRunner::exit(1, "second"),
                ScriptedRunner::exit(1, "third"),
            ],
        );
        match run_one(tmp.path(), &SubValidation::Tests, &mut runner) {
            SubOutcome::Failed { attempts, errors } => {
                assert_eq!(attempts, 3);
                assert_eq!(errors.len(), 1);
                assert!(errors[0].fixable);
                assert!(errors[0].message.contains("after 3 attempts"));
                assert!(errors[0].message.contains("third"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn app_assembly_skips_without_entry_file() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "tools/validate-app-assembly.js", "");
        let mut runner = ScriptedRunner::default();
        assert!(matches!(
            run_one(tmp.path(), &SubValidation::AppAssembly, &mut runner),
            SubOutcome::Skipped(_)
        ));

        write(tmp.path(), "src/App.tsx", "export default function App() {}");
        let mut runner = ScriptedRunner::default()
            .script("app-assembly", vec![ScriptedRunner::exit(1, "Header not mounted")]);
        match run_one(tmp.path(), &SubValidation::AppAssembly, &mut runner) {
            SubOutcome::Failed { errors, .. } => {
                assert_eq!(errors[0].category, ErrorCategory::AppAssembly);
                assert!(errors[0].message.contains("Header not mounted"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn boundaries_skip_without_src() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "tools/validate-boundaries.js", "");
        let mut runner = ScriptedRunner::default();
        assert_eq!(
            run_one(tmp.path(), &SubValidation::Boundaries, &mut runner),
            SubOutcome::Skipped("no src/ directory".to_string())
        );
    }
}
