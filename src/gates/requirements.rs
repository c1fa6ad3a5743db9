//! Intake document check: twelve numbered sections, each present and filled.

use crate::core::error::PhaseGateError;
use crate::gates::report::{ErrorCategory, ValidationError};
use regex::Regex;
use std::fs;
use std::path::Path;

/// `(number, title, heading pattern)`. Headings tolerate missing accents and case.
const REQUIRED_SECTIONS: [(u8, &str, &str); 12] = [
    (1, "Contexte & Problème", r"(?im)^##\s*1\.\s*Contexte\s*(?:&|et)\s*Probl[èe]me"),
    (2, "Objectifs métier", r"(?im)^##\s*2\.\s*Objectifs\s*m[ée]tier"),
    (3, "Utilisateurs / Personas", r"(?im)^##\s*3\.\s*Utilisateurs"),
    (4, "Parcours utilisateurs", r"(?im)^##\s*4\.\s*Parcours\s*utilisateurs"),
    (5, "Fonctionnalités attendues", r"(?im)^##\s*5\.\s*Fonctionnalit[ée]s\s*attendues"),
    (6, "Données manipulées", r"(?im)^##\s*6\.\s*Donn[ée]es\s*manipul[ée]es"),
    (7, "Contraintes non-fonctionnelles", r"(?im)^##\s*7\.\s*Contraintes\s*non-fonctionnelles"),
    (8, "Hors-scope explicite", r"(?im)^##\s*8\.\s*Hors-scope"),
    (9, "Critères d'acceptation", r"(?im)^##\s*9\.\s*Crit[èe]res\s*d'acceptation"),
    (10, "Intégrations externes", r"(?im)^##\s*10\.\s*Int[ée]grations\s*externes"),
    (11, "Stack / Préférences techniques", r"(?im)^##\s*11\.\s*Stack"),
    (12, "Qualité attendue", r"(?im)^##\s*12\.\s*Qualit[ée]\s*attendue"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionIssue {
    Missing,
    /// Only template leftovers: comments, blank lines, bare list markers.
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionFinding {
    pub number: u8,
    pub title: &'static str,
    pub issue: SectionIssue,
}

pub struct RequirementsChecker {
    sections: Vec<(u8, &'static str, Regex)>,
    next_heading: Regex,
    comment: Regex,
    placeholder: Regex,
}

fn compile(pattern: &str) -> Result<Regex, PhaseGateError> {
    Regex::new(pattern).map_err(|e| PhaseGateError::PatternError(e.to_string()))
}

impl RequirementsChecker {
    pub fn new() -> Result<Self, PhaseGateError> {
        let sections = REQUIRED_SECTIONS
            .iter()
            .map(|(n, title, pat)| Ok((*n, *title, compile(pat)?)))
            .collect::<Result<Vec<_>, PhaseGateError>>()?;
        Ok(Self {
            sections,
            next_heading: compile(r"(?m)^##\s*\d+\.")?,
            comment: compile(r"(?s)<!--.*?-->")?,
            placeholder: compile(r"^(-|\d+\.)$")?,
        })
    }

    /// Body of the section whose heading matches `heading`, up to the next
    /// numbered heading. `None` when the heading is absent.
    fn section_body<'a>(&self, content: &'a str, heading: &Regex) -> Option<&'a str> {
        let found = heading.find(content)?;
        let after_heading = content[found.end()..]
            .find('\n')
            .map(|i| found.end() + i + 1)
            .unwrap_or(content.len());
        let rest = &content[after_heading..];
        let end = self
            .next_heading
            .find(rest)
            .map(|m| m.start())
            .unwrap_or(rest.len());
        Some(&rest[..end])
    }

    fn is_empty(&self, body: &str) -> bool {
        let stripped = self.comment.replace_all(body, "");
        stripped
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .all(|line| self.placeholder.is_match(line))
    }

    pub fn check(&self, content: &str) -> Vec<SectionFinding> {
        self.sections
            .iter()
            .filter_map(|(number, title, heading)| {
                let issue = match self.section_body(content, heading) {
                    None => SectionIssue::Missing,
                    Some(body) if self.is_empty(body) => SectionIssue::Empty,
                    Some(_) => return None,
                };
                Some(SectionFinding {
                    number: *number,
                    title,
                    issue,
                })
            })
            .collect()
    }
}

/// Check `document` (root-relative) and convert findings to gate errors.
pub fn validate(root: &Path, document: &str) -> Result<Vec<ValidationError>, PhaseGateError> {
    let path = root.join(document);
    if !path.is_file() {
        return Ok(vec![ValidationError::new(
            ErrorCategory::Requirements,
            format!("Requirements document not found: {}", document),
        )]);
    }
    let content = String::from_utf8_lossy(&fs::read(&path)?).into_owned();
    let findings = RequirementsChecker::new()?.check(&content);
    tracing::debug!(
        "{}: {}/{} sections complete",
        document,
        REQUIRED_SECTIONS.len() - findings.len(),
        REQUIRED_SECTIONS.len()
    );
    Ok(findings
        .into_iter()
        .map(|f| {
            let issue = match f.issue {
                SectionIssue::Missing => "is missing",
                SectionIssue::Empty => "is empty (template placeholder only)",
            };
            ValidationError::new(
                ErrorCategory::Requirements,
                format!("{}: section {}. {} {}", document, f.number, f.title, issue),
            )
        })
        .collect())
}

/// A filled-in document with every section, for tests across the crate.
#[cfg(test)]
pub(crate) fn complete_document() -> String {
    REQUIRED_SECTIONS
        .iter()
        .map(|(n, title, _)| format!("## {}. {}\n\nContent for section {}.\n", n, title, n))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn complete_document_has_no_findings() {
        let checker = RequirementsChecker::new().unwrap();
        assert!(checker.check(&complete_document()).is_empty());
    }

    #[test]
    fn headings_tolerate_accents_and_case() {
        let checker = RequirementsChecker::new().unwrap();
        let doc = complete_document()
            .replace("## 1. Contexte & Problème", "## 1. contexte et probleme")
            .replace("## 6. Données manipulées", "##6. Donnees manipulees");
        assert!(checker.check(&doc).is_empty());
    }

    #[test]
    fn missing_section_is_reported() {
        let checker = RequirementsChecker::new().unwrap();
        let doc = complete_document().replace("## 9. Critères d'acceptation", "## Notes");
        let findings = checker.check(&doc);
        assert_eq!(
            findings,
            vec![SectionFinding {
                number: 9,
                title: "Critères d'acceptation",
                issue: SectionIssue::Missing,
            }]
        );
    }

    #[test]
    fn template_placeholders_count_as_empty() {
        let checker = RequirementsChecker::new().unwrap();
        let doc = complete_document().replace(
            "Content for section 4.",
            "<!-- Décrire les parcours\n sur plusieurs lignes -->\n-\n1.\n",
        );
        let findings = checker.check(&doc);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].number, 4);
        assert_eq!(findings[0].issue, SectionIssue::Empty);
    }

    #[test]
    fn heading_line_text_is_not_content() {
        let checker = RequirementsChecker::new().unwrap();
        let doc = complete_document().replace("Content for section 3.", "");
        let findings = checker.check(&doc);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].number, 3);
    }

    #[test]
    fn validate_maps_findings_to_blocking_errors() {
        let tmp = TempDir::new().unwrap();
        let errors = validate(tmp.path(), "input/requirements.md").unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("not found"));

        fs::create_dir_all(tmp.path().join("input")).unwrap();
        let partial = complete_document()
            .split("## 11.")
            .next()
            .unwrap()
            .to_string();
        fs::write(tmp.path().join("input/requirements.md"), partial).unwrap();
        let errors = validate(tmp.path(), "input/requirements.md").unwrap();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e.category == ErrorCategory::Requirements && !e.fixable));
        assert!(errors[0].message.contains("section 11."));
    }

    #[test]
    fn latin1_bytes_do_not_hide_section_findings() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("input")).unwrap();
        let partial = complete_document().split("## 12.").next().unwrap().to_string();
        let mut bytes = partial.into_bytes();
        bytes.extend_from_slice(b"\nNote: donn\xe9es de test.\n");
        fs::write(tmp.path().join("input/requirements.md"), bytes).unwrap();

        let errors = validate(tmp.path(), "input/requirements.md").unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].category, ErrorCategory::Requirements);
        assert!(errors[0].message.contains("section 12."));
    }
}
