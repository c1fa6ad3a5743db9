//! Error classification and gate result rendering.

use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const EXIT_PASS: i32 = 0;
pub const EXIT_FAULT: i32 = 1;
pub const EXIT_FAIL: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    MissingFile,
    MissingSection,
    MissingPattern,
    Requirements,
    Structure,
    SecretsCritical,
    PiiWarning,
    TaskIncomplete,
    TaskReference,
    TestFailure,
    CodeQuality,
    AppAssembly,
    BoundaryViolation,
    ConfigInvalid,
    ExportFailure,
}

impl ErrorCategory {
    /// Whether the producing phase can resolve this by retrying with corrected
    /// output. Everything else must be escalated.
    pub fn is_fixable(self) -> bool {
        matches!(
            self,
            ErrorCategory::MissingFile
                | ErrorCategory::MissingSection
                | ErrorCategory::MissingPattern
                | ErrorCategory::TaskIncomplete
                | ErrorCategory::TaskReference
                | ErrorCategory::TestFailure
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::MissingFile => "missing_file",
            ErrorCategory::MissingSection => "missing_section",
            ErrorCategory::MissingPattern => "missing_pattern",
            ErrorCategory::Requirements => "requirements",
            ErrorCategory::Structure => "structure",
            ErrorCategory::SecretsCritical => "secrets_critical",
            ErrorCategory::PiiWarning => "pii_warning",
            ErrorCategory::TaskIncomplete => "task_incomplete",
            ErrorCategory::TaskReference => "task_reference",
            ErrorCategory::TestFailure => "test_failure",
            ErrorCategory::CodeQuality => "code_quality",
            ErrorCategory::AppAssembly => "app_assembly",
            ErrorCategory::BoundaryViolation => "boundary_violation",
            ErrorCategory::ConfigInvalid => "config_invalid",
            ErrorCategory::ExportFailure => "export_failure",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub message: String,
    pub category: ErrorCategory,
    pub fixable: bool,
}

impl ValidationError {
    /// `fixable` always follows the category.
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            category,
            fixable: category.is_fixable(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateStatus {
    #[serde(rename = "PASS")]
    Pass,
    #[serde(rename = "FAIL")]
    Fail,
}

impl GateStatus {
    pub fn exit_code(self) -> i32 {
        match self {
            GateStatus::Pass => EXIT_PASS,
            GateStatus::Fail => EXIT_FAIL,
        }
    }
}

impl fmt::Display for GateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GateStatus::Pass => "PASS",
            GateStatus::Fail => "FAIL",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub fixable: usize,
    pub blocking: usize,
}

pub fn classify(errors: &[ValidationError]) -> Summary {
    let fixable = errors.iter().filter(|e| e.fixable).count();
    Summary {
        total: errors.len(),
        fixable,
        blocking: errors.len() - fixable,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Passed,
    Skipped,
    Failed,
}

/// What one sub-validation did, for the text rendering only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckReport {
    pub name: String,
    pub status: CheckStatus,
    pub attempts: u32,
    pub detail: Option<String>,
}

impl CheckReport {
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateResult {
    pub gate: u8,
    pub name: String,
    pub status: GateStatus,
    pub errors: Vec<ValidationError>,
    pub summary: Summary,
    #[serde(skip)]
    pub checks: Vec<CheckReport>,
}

impl GateResult {
    /// Status and summary are derived here and nowhere else.
    pub fn from_errors(
        gate: u8,
        name: impl Into<String>,
        errors: Vec<ValidationError>,
        checks: Vec<CheckReport>,
    ) -> Self {
        let status = if errors.is_empty() {
            GateStatus::Pass
        } else {
            GateStatus::Fail
        };
        Self {
            gate,
            name: name.into(),
            status,
            summary: classify(&errors),
            errors,
            checks,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }

    /// FAIL with only fixable errors: the producing phase may retry.
    pub fn retry_appropriate(&self) -> bool {
        self.status == GateStatus::Fail && self.summary.blocking == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

pub fn render(result: &GateResult, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => render_json(result),
        OutputFormat::Text => render_text(result),
    }
}

fn render_json(result: &GateResult) -> String {
    // Serialization of these plain types cannot fail; keep the one-line
    // contract even if it somehow does.
    serde_json::to_string(result).unwrap_or_else(|e| {
        serde_json::json!({
            "gate": result.gate,
            "name": result.name,
            "status": result.status,
            "errors": [{
                "message": format!("report serialization failed: {}", e),
                "category": ErrorCategory::ConfigInvalid,
                "fixable": false,
            }],
            "summary": {"total": 1, "fixable": 0, "blocking": 1},
        })
        .to_string()
    })
}

fn render_text(result: &GateResult) -> String {
    let mut out = String::new();
    for check in &result.checks {
        let line = match (check.status, check.retries()) {
            (CheckStatus::Skipped, _) => format!(
                "  - {} skipped{}",
                check.name,
                check.detail.as_deref().map(|d| format!(" ({})", d)).unwrap_or_default()
            )
            .dimmed()
            .to_string(),
            (CheckStatus::Passed, 0) => format!("  - {} ok", check.name),
            (CheckStatus::Passed, n) => format!(
                "  - {} ok after {} retr{}",
                check.name,
                n,
                if n == 1 { "y" } else { "ies" }
            )
            .yellow()
            .to_string(),
            (CheckStatus::Failed, _) => format!("  - {} failed", check.name).red().to_string(),
        };
        out.push_str(&line);
        out.push('\n');
    }

    let headline = format!("Gate {} {}: {}", result.gate, result.status, result.name);
    match result.status {
        GateStatus::Pass => {
            out.push_str(&format!("{} {}\n", "✅", headline.green().bold()));
        }
        GateStatus::Fail => {
            out.push_str(&format!("{} {}\n", "❌", headline.red().bold()));
            for err in &result.errors {
                let marker = if err.fixable { "fixable" } else { "blocking" };
                out.push_str(&format!(
                    "  • {} {}\n",
                    err.message,
                    format!("[{} · {}]", err.category, marker).dimmed()
                ));
            }
            let s = &result.summary;
            out.push_str(&format!(
                "  {} error(s): {} fixable, {} blocking\n",
                s.total, s.fixable, s.blocking
            ));
        }
    }
    out
}
