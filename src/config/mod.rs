//! Pipeline configuration.
//!
//! Handles loading and validating `.tollgate.yaml`: an ordered list of
//! repository entries, each pinning a set of hooks, plus a few top-level
//! knobs. Entries keep their file order because declaration order is the
//! execution order.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Config file name, looked up at the repository root.
pub const CONFIG_FILE: &str = ".tollgate.yaml";

/// Manifest file name exported by hook repositories.
pub const MANIFEST_FILE: &str = ".tollgate-hooks.yaml";

/// Trigger points a hook can be assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    PreCommit,
    CommitMsg,
    PrePush,
    PostCommit,
    /// Never triggered by git; only via `run --hook-stage manual`.
    Manual,
}

impl Stage {
    /// Script name under `.git/hooks/` for this stage.
    ///
    /// Returns `None` for stages git never calls.
    pub fn git_hook_name(&self) -> Option<&'static str> {
        match self {
            Stage::PreCommit => Some("pre-commit"),
            Stage::CommitMsg => Some("commit-msg"),
            Stage::PrePush => Some("pre-push"),
            Stage::PostCommit => Some("post-commit"),
            Stage::Manual => None,
        }
    }

    /// All stages that correspond to a git hook script.
    pub fn installable() -> &'static [Stage] {
        &[
            Stage::PreCommit,
            Stage::CommitMsg,
            Stage::PrePush,
            Stage::PostCommit,
        ]
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::PreCommit => "pre-commit",
            Stage::CommitMsg => "commit-msg",
            Stage::PrePush => "pre-push",
            Stage::PostCommit => "post-commit",
            Stage::Manual => "manual",
        };
        f.write_str(name)
    }
}

/// Where a repository entry's hooks come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoSource {
    /// Cloned from a git URL at the entry's pin.
    Git(String),
    /// Defined inline in the config, run from the working tree.
    Local,
    /// Built-in self-check hooks.
    Meta,
}

/// One entry of the ordered `repos:` sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoEntry {
    /// Source identifier: a git URL, `local`, or `meta`.
    pub repo: String,

    /// Version pin. Required for git sources, forbidden otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,

    /// Hook selections/overrides for this entry.
    #[serde(default)]
    pub hooks: Vec<HookSpec>,
}

impl RepoEntry {
    /// Classify the `repo:` string.
    pub fn source(&self) -> RepoSource {
        match self.repo.as_str() {
            "local" => RepoSource::Local,
            "meta" => RepoSource::Meta,
            url => RepoSource::Git(url.to_string()),
        }
    }
}

/// A hook selection inside a repository entry.
///
/// For git and meta sources this selects a hook by id and optionally
/// overrides fields from its manifest definition. For `local` entries it
/// is the whole definition, so `entry` and `language` become mandatory
/// (checked in [`ConfigFile::validate`]).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookSpec {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_version: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Include pattern (regex, search semantics).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<String>,

    /// Exclude pattern (regex, search semantics).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude: Option<String>,

    /// File tags that must ALL be present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub types: Option<Vec<String>>,

    /// File tags of which at least ONE must be present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub types_or: Option<Vec<String>>,

    /// File tags none of which may be present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_types: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stages: Option<Vec<Stage>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_dependencies: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub always_run: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_serial: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass_filenames: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verbose: Option<bool>,
}

/// Top-level `.tollgate.yaml` model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Ordered repository entries. Order is execution order.
    pub repos: Vec<RepoEntry>,

    /// Stages a hook runs at when it declares none.
    #[serde(default = "default_stages")]
    pub default_stages: Vec<Stage>,

    /// Stop scheduling new batches after the first failure.
    #[serde(default)]
    pub fail_fast: bool,

    /// Global exclude pattern applied before any per-hook filtering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude: Option<String>,

    /// Cap on concurrently running hooks. Defaults to available
    /// parallelism at run time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,

    /// Per-hook wall clock limit in seconds. 0 disables the limit.
    #[serde(default)]
    pub hook_timeout_secs: u64,
}

fn default_stages() -> Vec<Stage> {
    vec![Stage::PreCommit]
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            repos: Vec::new(),
            default_stages: default_stages(),
            fail_fast: false,
            exclude: None,
            max_workers: None,
            hook_timeout_secs: 0,
        }
    }
}

impl ConfigFile {
    /// Get the config file path for a repository.
    pub fn path(repo_root: &Path) -> PathBuf {
        repo_root.join(CONFIG_FILE)
    }

    /// Load and validate the config of a repository.
    pub fn load(repo_root: &Path) -> Result<Self, Error> {
        let config_path = Self::path(repo_root);
        if !config_path.exists() {
            return Err(Error::ConfigNotFound(config_path));
        }
        let content = fs::read_to_string(&config_path)?;
        Self::parse(&content)
    }

    /// Parse and validate config text.
    pub fn parse(content: &str) -> Result<Self, Error> {
        let config: ConfigFile = serde_yaml::from_str(content)
            .map_err(|e| Error::config(format!("{}: {}", CONFIG_FILE, e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Structural validation that does not need the store or the network.
    ///
    /// Cross-repository checks (unknown hook ids, duplicates per stage)
    /// happen later during registry resolution.
    pub fn validate(&self) -> Result<(), Error> {
        if self.repos.is_empty() {
            return Err(Error::config("no repository entries declared"));
        }

        for entry in &self.repos {
            match entry.source() {
                RepoSource::Git(_) => match entry.rev.as_deref() {
                    None => {
                        return Err(Error::config(format!(
                            "repo '{}' needs a version pin (rev)",
                            entry.repo
                        )));
                    }
                    Some(rev) if rev.is_empty() || rev.chars().any(char::is_whitespace) => {
                        return Err(Error::config(format!(
                            "repo '{}' has a malformed pin: {:?}",
                            entry.repo, rev
                        )));
                    }
                    Some(_) => {}
                },
                RepoSource::Local | RepoSource::Meta => {
                    if entry.rev.is_some() {
                        return Err(Error::config(format!(
                            "'{}' entries take no version pin",
                            entry.repo
                        )));
                    }
                }
            }

            if entry.hooks.is_empty() {
                return Err(Error::config(format!(
                    "repo '{}' declares no hooks",
                    entry.repo
                )));
            }

            for hook in &entry.hooks {
                if hook.id.is_empty() {
                    return Err(Error::config(format!(
                        "repo '{}' has a hook without an id",
                        entry.repo
                    )));
                }
                if entry.source() == RepoSource::Local {
                    if hook.entry.is_none() {
                        return Err(Error::config(format!(
                            "local hook '{}' needs an entry",
                            hook.id
                        )));
                    }
                    if hook.language.is_none() {
                        return Err(Error::config(format!(
                            "local hook '{}' needs a language",
                            hook.id
                        )));
                    }
                }
                check_pattern(&hook.id, "files", hook.files.as_deref())?;
                check_pattern(&hook.id, "exclude", hook.exclude.as_deref())?;
            }
        }

        if let Some(pattern) = self.exclude.as_deref() {
            regex::Regex::new(pattern).map_err(|e| {
                Error::config(format!("top-level exclude is not a valid regex: {}", e))
            })?;
        }

        Ok(())
    }
}

/// Validate a per-hook regex pattern field.
fn check_pattern(hook_id: &str, field: &str, pattern: Option<&str>) -> Result<(), Error> {
    if let Some(pattern) = pattern {
        regex::Regex::new(pattern).map_err(|e| {
            Error::config(format!(
                "hook '{}' {} is not a valid regex: {}",
                hook_id, field, e
            ))
        })?;
    }
    Ok(())
}
