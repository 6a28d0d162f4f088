//! Per-hook file selection.
//!
//! Each hook sees the candidate set filtered through up to four gates:
//! the top-level exclude pattern, the hook's `files` and `exclude`
//! patterns, and its type tag filters. Patterns use search semantics
//! against the repo-relative path. Selection preserves candidate order,
//! so a hook's argv is stable across runs.

use std::collections::HashSet;
use std::path::Path;

use regex::Regex;

use crate::error::Error;
use crate::identify;
use crate::registry::Hook;

/// Compiled filter chain for one hook.
#[derive(Debug)]
pub struct FileSelector {
    files: Option<Regex>,
    exclude: Option<Regex>,
    global_exclude: Option<Regex>,
    types: Vec<String>,
    types_or: Vec<String>,
    exclude_types: Vec<String>,
}

impl FileSelector {
    /// Compile the filter chain of a hook.
    ///
    /// Patterns were syntax-checked during config validation, so a
    /// compile failure here means the manifest slipped one through.
    pub fn for_hook(hook: &Hook, global_exclude: Option<&str>) -> Result<Self, Error> {
        Ok(Self {
            files: compile(&hook.id, "files", hook.files.as_deref())?,
            exclude: compile(&hook.id, "exclude", hook.exclude.as_deref())?,
            global_exclude: compile(&hook.id, "top-level exclude", global_exclude)?,
            types: hook.types.clone(),
            types_or: hook.types_or.clone(),
            exclude_types: hook.exclude_types.clone(),
        })
    }

    /// Pattern gates only, no filesystem access.
    pub fn matches_path(&self, rel: &str) -> bool {
        if let Some(re) = &self.global_exclude {
            if re.is_match(rel) {
                return false;
            }
        }
        if let Some(re) = &self.files {
            if !re.is_match(rel) {
                return false;
            }
        }
        if let Some(re) = &self.exclude {
            if re.is_match(rel) {
                return false;
            }
        }
        true
    }

    fn has_tag_filters(&self) -> bool {
        !self.types.is_empty() || !self.types_or.is_empty() || !self.exclude_types.is_empty()
    }

    fn matches_tags(&self, tags: &HashSet<&'static str>) -> bool {
        if !self.types.iter().all(|t| tags.contains(t.as_str())) {
            return false;
        }
        if !self.types_or.is_empty() && !self.types_or.iter().any(|t| tags.contains(t.as_str())) {
            return false;
        }
        if self.exclude_types.iter().any(|t| tags.contains(t.as_str())) {
            return false;
        }
        true
    }

    /// Full filter chain for one repo-relative path.
    pub fn matches(&self, repo_root: &Path, rel: &str) -> bool {
        if !self.matches_path(rel) {
            return false;
        }
        if !self.has_tag_filters() {
            // Classification stats the file; skip it when nothing asks for tags.
            return true;
        }
        let tags = identify::tags_for_file(&repo_root.join(rel));
        self.matches_tags(&tags)
    }

    /// Filter a candidate list, preserving its order.
    pub fn select(&self, repo_root: &Path, candidates: &[String]) -> Vec<String> {
        candidates
            .iter()
            .filter(|rel| self.matches(repo_root, rel))
            .cloned()
            .collect()
    }

    /// Whether the `exclude` pattern removes anything from the given set.
    ///
    /// Drives the `check-useless-excludes` meta hook.
    pub fn exclude_is_used(&self, candidates: &[String]) -> bool {
        match &self.exclude {
            None => true,
            Some(re) => candidates.iter().any(|rel| re.is_match(rel)),
        }
    }
}

fn compile(hook_id: &str, field: &str, pattern: Option<&str>) -> Result<Option<Regex>, Error> {
    match pattern {
        None => Ok(None),
        Some(p) => Regex::new(p).map(Some).map_err(|e| {
            Error::config(format!("hook '{}' {} is not a valid regex: {}", hook_id, field, e))
        }),
    }
}
