//! Planning-item checks for the current iteration: every task file carries
//! its required sections and only references user stories that exist.

use crate::core::error::PhaseGateError;
use crate::core::store::PlanningPaths;
use crate::gates::pattern::{self, SortOrder};
use crate::gates::report::{ErrorCategory, ValidationError};
use regex::Regex;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

pub const TASK_SECTIONS: [&str; 3] = [
    "## Objectif technique",
    "## Definition of Done",
    "## Tests attendus",
];

pub fn validate(
    root: &Path,
    paths: &PlanningPaths,
    skip_dirs: &[String],
) -> Result<Vec<ValidationError>, PhaseGateError> {
    let tasks = pattern::walk(
        root,
        &format!("{}/TASK-*.md", paths.tasks_dir),
        skip_dirs,
        SortOrder::Numeric,
    )?;
    let stories = pattern::walk(
        root,
        &format!("{}/US-*.md", paths.us_dir),
        skip_dirs,
        SortOrder::Numeric,
    )?;

    let story_ref =
        Regex::new(r"\bUS-\d{4}\b").map_err(|e| PhaseGateError::PatternError(e.to_string()))?;
    let known_stories: BTreeSet<String> = stories
        .iter()
        .filter_map(|p| {
            let name = p.rsplit('/').next()?;
            story_ref.find(name).filter(|m| m.start() == 0).map(|m| m.as_str().to_string())
        })
        .collect();

    let mut errors = Vec::new();
    for task in &tasks {
        let content = String::from_utf8_lossy(&fs::read(root.join(task))?).into_owned();

        let missing: Vec<&str> = TASK_SECTIONS
            .iter()
            .copied()
            .filter(|section| !content.contains(section))
            .collect();
        if !missing.is_empty() {
            errors.push(ValidationError::new(
                ErrorCategory::TaskIncomplete,
                format!("{} is missing: {}", task, missing.join(", ")),
            ));
        }

        let referenced: BTreeSet<&str> =
            story_ref.find_iter(&content).map(|m| m.as_str()).collect();
        for story in referenced {
            if !known_stories.contains(story) {
                errors.push(ValidationError::new(
                    ErrorCategory::TaskReference,
                    format!(
                        "{} references {} but no {}*.md exists in {}",
                        task, story, story, paths.us_dir
                    ),
                ));
            }
        }
    }
    tracing::debug!(
        "checked {} task(s) against {} user stor{}",
        tasks.len(),
        known_stories.len(),
        if known_stories.len() == 1 { "y" } else { "ies" }
    );
    Ok(errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const GOOD_TASK: &str = "# TASK\nUS: US-0001\n\
        ## Objectif technique\nx\n\
        ## Definition of Done\n- [ ] y\n\
        ## Tests attendus\nz\n";

    fn setup() -> (TempDir, PlanningPaths) {
        let tmp = TempDir::new().unwrap();
        let paths = PlanningPaths::for_version(1);
        fs::create_dir_all(tmp.path().join(&paths.us_dir)).unwrap();
        fs::create_dir_all(tmp.path().join(&paths.tasks_dir)).unwrap();
        fs::write(tmp.path().join(&paths.us_dir).join("US-0001-login.md"), "# US").unwrap();
        (tmp, paths)
    }

    #[test]
    fn well_formed_tasks_pass() {
        let (tmp, paths) = setup();
        fs::write(tmp.path().join(&paths.tasks_dir).join("TASK-0001-a.md"), GOOD_TASK).unwrap();
        assert!(validate(tmp.path(), &paths, &[]).unwrap().is_empty());
    }

    #[test]
    fn incomplete_task_lists_missing_sections() {
        let (tmp, paths) = setup();
        let partial = GOOD_TASK.replace("## Tests attendus\nz\n", "");
        fs::write(tmp.path().join(&paths.tasks_dir).join("TASK-0002-b.md"), partial).unwrap();
        let errors = validate(tmp.path(), &paths, &[]).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].category, ErrorCategory::TaskIncomplete);
        assert!(errors[0].fixable);
        assert!(errors[0].message.contains("## Tests attendus"));
    }

    #[test]
    fn dangling_story_reference_is_reported_once() {
        let (tmp, paths) = setup();
        let dangling = GOOD_TASK.replace("US-0001", "US-0007 and again US-0007");
        fs::write(tmp.path().join(&paths.tasks_dir).join("TASK-0003-c.md"), dangling).unwrap();
        let errors = validate(tmp.path(), &paths, &[]).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].category, ErrorCategory::TaskReference);
        assert!(errors[0].message.contains("US-0007"));
    }

    #[test]
    fn errors_follow_numeric_task_order() {
        let (tmp, paths) = setup();
        let dir = tmp.path().join(&paths.tasks_dir);
        fs::write(dir.join("TASK-0010-late.md"), "empty").unwrap();
        fs::write(dir.join("TASK-0002-early.md"), "empty").unwrap();
        let errors = validate(tmp.path(), &paths, &[]).unwrap();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].message.contains("TASK-0002"));
        assert!(errors[1].message.contains("TASK-0010"));
    }

    #[test]
    fn latin1_task_file_still_reports_its_findings() {
        let (tmp, paths) = setup();
        let dir = tmp.path().join(&paths.tasks_dir);
        let mut bytes = b"# T\xe2che\nUS: US-0009\n## Objectif technique\n".to_vec();
        bytes.extend_from_slice(b"## Definition of Done\n");
        fs::write(dir.join("TASK-0001-latin1.md"), bytes).unwrap();
        let partial = GOOD_TASK.replace("## Tests attendus\nz\n", "");
        fs::write(dir.join("TASK-0002-ok.md"), partial).unwrap();

        let errors = validate(tmp.path(), &paths, &[]).unwrap();
        let categories: Vec<ErrorCategory> = errors.iter().map(|e| e.category).collect();
        assert_eq!(
            categories,
            vec![
                ErrorCategory::TaskIncomplete,
                ErrorCategory::TaskReference,
                ErrorCategory::TaskIncomplete,
            ]
        );
        assert!(errors[0].message.contains("TASK-0001"));
        assert!(errors[2].message.contains("TASK-0002"));
    }

    #[test]
    fn story_references_need_exact_identifiers() {
        let (tmp, paths) = setup();
        let task = GOOD_TASK.replace("US: US-0001", "US: US-0001, see BUS-0002 and US-00013");
        fs::write(tmp.path().join(&paths.tasks_dir).join("TASK-0004-d.md"), task).unwrap();
        assert!(validate(tmp.path(), &paths, &[]).unwrap().is_empty());
    }
}
