//! Gate definitions, resolved per invocation from the gate number and the
//! current pipeline state.
//!
//! Resolution is a pure function of `(gate, state)` plus one discovery step
//! over `input/` for the latest requirements revision. Every requirement
//! carries a [`Resolution`] marker so callers can tell which parts moved with
//! `evolutionVersion`.

use crate::core::error::PhaseGateError;
use crate::core::store::{PipelineState, PlanningPaths};
use regex::Regex;
use std::fs;
use std::path::Path;

pub const REQUIREMENTS_DIR: &str = "input";
pub const DEFAULT_REQUIREMENTS: &str = "input/requirements.md";

const GATE_NAMES: [&str; 6] = [
    "→ intake (requirements)",
    "intake → specification",
    "specification → planning",
    "planning → build",
    "build → review",
    "review → release",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Static,
    /// Derived from `evolutionVersion` or from discovery on disk.
    Dynamic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRequirement {
    pub path: String,
    pub resolution: Resolution,
}

#[derive(Debug, Clone)]
pub enum SectionMarker {
    /// Plain substring.
    Literal(String),
    /// Line-anchored pattern tolerating accent and case variants.
    Tolerant { label: String, pattern: Regex },
}

impl SectionMarker {
    fn tolerant(label: &str, pattern: &str) -> Result<Self, PhaseGateError> {
        let pattern = Regex::new(pattern)
            .map_err(|e| PhaseGateError::PatternError(format!("{}: {}", label, e)))?;
        Ok(SectionMarker::Tolerant {
            label: label.to_string(),
            pattern,
        })
    }

    pub fn label(&self) -> &str {
        match self {
            SectionMarker::Literal(text) => text,
            SectionMarker::Tolerant { label, .. } => label,
        }
    }

    pub fn is_present(&self, content: &str) -> bool {
        match self {
            SectionMarker::Literal(text) => content.contains(text.as_str()),
            SectionMarker::Tolerant { pattern, .. } => pattern.is_match(content),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SectionRequirement {
    pub artifact: String,
    pub marker: SectionMarker,
    pub resolution: Resolution,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternRequirement {
    pub pattern: String,
    pub min_matches: usize,
    pub resolution: Resolution,
}

/// Named checks beyond presence, run in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubValidation {
    Requirements { document: String },
    Structure,
    SecretsScan,
    PlanningItems { paths: PlanningPaths },
    Tests,
    CodeQuality,
    AppAssembly,
    Boundaries,
    ExportRelease,
}

impl SubValidation {
    pub fn name(&self) -> &'static str {
        match self {
            SubValidation::Requirements { .. } => "requirements",
            SubValidation::Structure => "structure",
            SubValidation::SecretsScan => "secrets",
            SubValidation::PlanningItems { .. } => "planning-items",
            SubValidation::Tests => "tests",
            SubValidation::CodeQuality => "code-quality",
            SubValidation::AppAssembly => "app-assembly",
            SubValidation::Boundaries => "boundaries",
            SubValidation::ExportRelease => "export",
        }
    }

    /// Only the test run is allowed more than one attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SubValidation::Tests)
    }
}

#[derive(Debug, Clone)]
pub struct GateDefinition {
    pub gate: u8,
    pub name: &'static str,
    pub artifacts: Vec<ArtifactRequirement>,
    pub patterns: Vec<PatternRequirement>,
    pub sections: Vec<SectionRequirement>,
    pub sub_validations: Vec<SubValidation>,
    /// Runs only when everything before it produced zero errors.
    pub finalizer: Option<SubValidation>,
}

impl GateDefinition {
    fn new(gate: u8) -> Self {
        Self {
            gate,
            name: GATE_NAMES[gate as usize],
            artifacts: Vec::new(),
            patterns: Vec::new(),
            sections: Vec::new(),
            sub_validations: Vec::new(),
            finalizer: None,
        }
    }

    fn artifact(mut self, path: impl Into<String>, resolution: Resolution) -> Self {
        self.artifacts.push(ArtifactRequirement {
            path: path.into(),
            resolution,
        });
        self
    }

    fn pattern(
        mut self,
        pattern: impl Into<String>,
        min_matches: usize,
        resolution: Resolution,
    ) -> Self {
        self.patterns.push(PatternRequirement {
            pattern: pattern.into(),
            min_matches,
            resolution,
        });
        self
    }

    fn sections(
        mut self,
        artifact: &str,
        markers: Vec<SectionMarker>,
        resolution: Resolution,
    ) -> Self {
        self.sections
            .extend(markers.into_iter().map(|marker| SectionRequirement {
                artifact: artifact.to_string(),
                marker,
                resolution,
            }));
        self
    }

    fn literal_sections(self, artifact: &str, headings: &[&str]) -> Self {
        let markers = headings
            .iter()
            .map(|h| SectionMarker::Literal(h.to_string()))
            .collect();
        self.sections(artifact, markers, Resolution::Static)
    }

    fn check(mut self, sub: SubValidation) -> Self {
        self.sub_validations.push(sub);
        self
    }

    pub fn is_dynamic(&self) -> bool {
        self.artifacts.iter().any(|a| a.resolution == Resolution::Dynamic)
            || self.patterns.iter().any(|p| p.resolution == Resolution::Dynamic)
            || self.sections.iter().any(|s| s.resolution == Resolution::Dynamic)
    }
}

pub fn gate_name(gate: u8) -> Option<&'static str> {
    GATE_NAMES.get(gate as usize).copied()
}

/// `(number, name)` for every gate, for usage output.
pub fn catalog() -> Vec<(u8, &'static str)> {
    GATE_NAMES
        .iter()
        .enumerate()
        .map(|(i, name)| (i as u8, *name))
        .collect()
}

/// Highest-numbered requirements revision under `input/`.
///
/// `requirements.md` is revision 1 and `requirements-N.md` is revision N.
pub fn discover_latest_requirements(root: &Path) -> String {
    let revision = Regex::new(r"^requirements(?:-(\d+))?\.md$").ok();
    let entries = match fs::read_dir(root.join(REQUIREMENTS_DIR)) {
        Ok(entries) => entries,
        Err(_) => return DEFAULT_REQUIREMENTS.to_string(),
    };

    let mut best: Option<(u32, String)> = None;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(caps) = revision.as_ref().and_then(|re| re.captures(&name)) else {
            continue;
        };
        let version = caps
            .get(1)
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .unwrap_or(1);
        if best.as_ref().is_none_or(|(v, _)| version > *v) {
            best = Some((version, name));
        }
    }
    best.map(|(_, name)| format!("{}/{}", REQUIREMENTS_DIR, name))
        .unwrap_or_else(|| DEFAULT_REQUIREMENTS.to_string())
}

pub fn resolve(
    gate: u8,
    state: &PipelineState,
    root: &Path,
) -> Result<GateDefinition, PhaseGateError> {
    let def = match gate {
        0 => {
            let document = discover_latest_requirements(root);
            GateDefinition::new(0)
                .artifact(&document, Resolution::Dynamic)
                .check(SubValidation::Requirements { document })
        }
        1 => GateDefinition::new(1)
            .artifact("docs/brief.md", Resolution::Static)
            .artifact("docs/scope.md", Resolution::Static)
            .artifact("docs/acceptance.md", Resolution::Static)
            .literal_sections("docs/brief.md", &["## Résumé exécutif", "## Hypothèses explicites"])
            .literal_sections("docs/scope.md", &["## IN", "## OUT"])
            .literal_sections("docs/acceptance.md", &["## Critères globaux"])
            .check(SubValidation::Structure),
        2 => GateDefinition::new(2)
            .artifact("docs/specs/system.md", Resolution::Static)
            .artifact("docs/specs/domain.md", Resolution::Static)
            .artifact("docs/specs/api.md", Resolution::Static)
            .pattern("docs/adr/ADR-0001-*.md", 1, Resolution::Static)
            .literal_sections(
                "docs/specs/system.md",
                &["## Vue d'ensemble", "## Contraintes non-fonctionnelles"],
            )
            .literal_sections("docs/specs/domain.md", &["## Concepts clés", "## Entités"])
            .literal_sections("docs/specs/api.md", &["## Endpoints", "## Authentification"])
            .check(SubValidation::SecretsScan),
        3 => {
            let paths = state.planning_paths();
            GateDefinition::new(3)
                .artifact(&paths.epics_file, Resolution::Dynamic)
                .pattern(format!("{}/US-*.md", paths.us_dir), 1, Resolution::Dynamic)
                .pattern(format!("{}/TASK-*.md", paths.tasks_dir), 1, Resolution::Dynamic)
                .check(SubValidation::PlanningItems { paths })
        }
        4 => GateDefinition::new(4)
            .artifact("docs/testing/plan.md", Resolution::Static)
            .pattern("{tests,src}/**/*.test.*", 1, Resolution::Static)
            .check(SubValidation::Tests)
            .check(SubValidation::CodeQuality)
            .check(SubValidation::AppAssembly)
            .check(SubValidation::Boundaries),
        5 => release_gate(state.evolution_version.max(1))?,
        other => return Err(PhaseGateError::UnknownGate(other)),
    };
    Ok(def)
}

fn release_gate(version: u32) -> Result<GateDefinition, PhaseGateError> {
    let mut def = if version == 1 {
        GateDefinition::new(5)
            .artifact("docs/qa/report.md", Resolution::Static)
            .artifact("docs/release/checklist.md", Resolution::Static)
            .artifact("CHANGELOG.md", Resolution::Static)
            .literal_sections("docs/qa/report.md", &["## Résumé", "## Tests exécutés"])
            .literal_sections("docs/release/checklist.md", &["## Pré-release"])
            .literal_sections("CHANGELOG.md", &["## ["])
    } else {
        let report = format!("docs/qa/report-v{}.md", version);
        let checklist = format!("docs/release/checklist-v{}.md", version);
        GateDefinition::new(5)
            .artifact(&report, Resolution::Dynamic)
            .artifact(&checklist, Resolution::Dynamic)
            .artifact("CHANGELOG.md", Resolution::Static)
            .sections(
                &report,
                vec![
                    SectionMarker::tolerant("## Résumé", r"(?mi)^##\s*R[ée]sum[ée]")?,
                    SectionMarker::tolerant(
                        "## Tests exécutés",
                        r"(?mi)^##\s*Tests\s+ex[ée]cut[ée]s",
                    )?,
                ],
                Resolution::Dynamic,
            )
            .sections(
                &checklist,
                vec![SectionMarker::tolerant("## Pré-release", r"(?mi)^##\s*Pr[ée]-?release")?],
                Resolution::Dynamic,
            )
            .literal_sections("CHANGELOG.md", &["## ["])
    };
    def.finalizer = Some(SubValidation::ExportRelease);
    Ok(def)
}
