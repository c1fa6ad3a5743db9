//! Runs one gate: resolve its definition, then check in fixed order
//! (configuration → artifacts → patterns → sections → sub-validations →
//! finalizer) and collect every finding as a [`ValidationError`].

use crate::core::config::{GateCheckConfig, LoadedConfig, ProjectConfig};
use crate::core::error::PhaseGateError;
use crate::core::output;
use crate::core::store::PipelineState;
use crate::core::time;
use crate::gates::definition::{self, GateDefinition, SubValidation};
use crate::gates::pattern::{Pattern, SortOrder};
use crate::gates::process::ProcessRunner;
use crate::gates::report::{CheckReport, CheckStatus, ErrorCategory, GateResult, ValidationError};
use crate::gates::validators::{self, SubOutcome, ValidatorEnv};
use std::cell::OnceCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub struct Orchestrator<R: ProcessRunner> {
    root: PathBuf,
    config: GateCheckConfig,
    config_problems: Vec<String>,
    project: OnceCell<ProjectConfig>,
    runner: R,
}

impl<R: ProcessRunner> Orchestrator<R> {
    pub fn new(root: &Path, loaded: LoadedConfig, runner: R) -> Self {
        Self {
            root: root.to_path_buf(),
            config: loaded.config,
            config_problems: loaded.problems,
            project: OnceCell::new(),
            runner,
        }
    }

    #[cfg(test)]
    pub(crate) fn runner(&self) -> &R {
        &self.runner
    }

    /// Only an unknown gate or a broken definition is an `Err`; every
    /// validation finding ends up in the result.
    pub fn run_gate(
        &mut self,
        gate: u8,
        state: &PipelineState,
    ) -> Result<GateResult, PhaseGateError> {
        let def = definition::resolve(gate, state, &self.root)?;
        let span = tracing::info_span!("gate", gate, run_id = %time::new_run_id());
        let _entered = span.enter();
        tracing::info!(
            "checking gate {} ({}), iteration v{}",
            def.gate,
            def.name,
            state.evolution_version
        );

        let mut errors: Vec<ValidationError> = self
            .config_problems
            .iter()
            .map(|p| ValidationError::new(ErrorCategory::ConfigInvalid, p.clone()))
            .collect();
        errors.extend(self.check_artifacts(&def));
        errors.extend(self.check_patterns(&def)?);
        errors.extend(self.check_sections(&def));

        let mut checks = Vec::new();
        for sub in &def.sub_validations {
            let (report, found) = self.run_sub(sub);
            errors.extend(found);
            checks.push(report);
        }

        if let Some(finalizer) = &def.finalizer {
            if errors.is_empty() {
                let (report, found) = self.run_sub(finalizer);
                errors.extend(found);
                checks.push(report);
            } else {
                tracing::info!(
                    "{} not attempted: {} prior error(s)",
                    finalizer.name(),
                    errors.len()
                );
                checks.push(CheckReport {
                    name: finalizer.name().to_string(),
                    status: CheckStatus::Skipped,
                    attempts: 0,
                    detail: Some("prior errors".to_string()),
                });
            }
        }

        let result = GateResult::from_errors(def.gate, def.name, errors, checks);
        let messages: Vec<String> = result.errors.iter().map(|e| e.message.clone()).collect();
        tracing::info!(
            "gate {} {}: {} error(s), {} blocking {}",
            result.gate,
            result.status,
            result.summary.total,
            result.summary.blocking,
            output::preview_messages(&messages, 3, 120)
        );
        Ok(result)
    }

    fn check_artifacts(&self, def: &GateDefinition) -> Vec<ValidationError> {
        def.artifacts
            .iter()
            .filter(|a| !self.root.join(&a.path).is_file())
            .map(|a| {
                ValidationError::new(
                    ErrorCategory::MissingFile,
                    format!("Missing file: {}", a.path),
                )
            })
            .collect()
    }

    fn check_patterns(&self, def: &GateDefinition) -> Result<Vec<ValidationError>, PhaseGateError> {
        let mut errors = Vec::new();
        for req in &def.patterns {
            let found = Pattern::compile(&req.pattern)?.walk(
                &self.root,
                &self.config.skip_dirs,
                SortOrder::Numeric,
            );
            tracing::debug!("{} matched {} file(s)", req.pattern, found.len());
            if found.len() < req.min_matches {
                errors.push(ValidationError::new(
                    ErrorCategory::MissingPattern,
                    format!(
                        "Pattern {}: {} file(s), minimum {} required",
                        req.pattern,
                        found.len(),
                        req.min_matches
                    ),
                ));
            }
        }
        Ok(errors)
    }

    /// Sections are only checked in artifacts that exist; a missing artifact
    /// is already reported once as `missing_file`.
    fn check_sections(&self, def: &GateDefinition) -> Vec<ValidationError> {
        let mut contents: BTreeMap<&str, Option<String>> = BTreeMap::new();
        let mut errors = Vec::new();
        for req in &def.sections {
            let content = contents.entry(req.artifact.as_str()).or_insert_with(|| {
                let path = self.root.join(&req.artifact);
                if !path.is_file() {
                    return None;
                }
                match fs::read(&path) {
                    Ok(bytes) => Some(String::from_utf8_lossy(&bytes).to_string()),
                    Err(e) => {
                        tracing::warn!("cannot read {}: {}", req.artifact, e);
                        Some(String::new())
                    }
                }
            });
            let Some(content) = content.as_deref() else {
                continue;
            };
            if !req.marker.is_present(content) {
                errors.push(ValidationError::new(
                    ErrorCategory::MissingSection,
                    format!("Missing section in {}: {}", req.artifact, req.marker.label()),
                ));
            }
        }
        errors
    }

    fn run_sub(&mut self, sub: &SubValidation) -> (CheckReport, Vec<ValidationError>) {
        let env = ValidatorEnv {
            root: &self.root,
            config: &self.config,
            project: &self.project,
        };
        let outcome = validators::run(sub, &env, &mut self.runner);
        let name = sub.name().to_string();
        match outcome {
            SubOutcome::Passed { attempts, note } => {
                tracing::info!("{} passed", name);
                (
                    CheckReport {
                        name,
                        status: CheckStatus::Passed,
                        attempts,
                        detail: note,
                    },
                    Vec::new(),
                )
            }
            SubOutcome::Skipped(why) => {
                tracing::info!("{} skipped: {}", name, why);
                (
                    CheckReport {
                        name,
                        status: CheckStatus::Skipped,
                        attempts: 0,
                        detail: Some(why),
                    },
                    Vec::new(),
                )
            }
            SubOutcome::Failed { attempts, errors } => {
                tracing::info!("{} failed with {} error(s)", name, errors.len());
                (
                    CheckReport {
                        name,
                        status: CheckStatus::Failed,
                        attempts,
                        detail: None,
                    },
                    errors,
                )
            }
        }
    }
}
