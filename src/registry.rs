//! Hook registry.
//!
//! Resolves the ordered repository entries of `.tollgate.yaml` into
//! executable hook definitions. Git entries are backed by a manifest
//! (`.tollgate-hooks.yaml`) inside the pinned checkout; `local` entries
//! are self-contained; `meta` entries map to built-in self-checks.
//!
//! Resolution happens in two passes: [`HookRegistry::plan`] performs every
//! check that needs no store or network (duplicate ids, unknown meta
//! hooks, unknown type tags), and [`HookRegistry::resolve`] materializes
//! checkouts and merges manifest definitions with per-entry overrides.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::Deserialize;
use tracing::debug;

use crate::config::{ConfigFile, HookSpec, RepoSource, Stage, MANIFEST_FILE};
use crate::env::Language;
use crate::error::Error;
use crate::identify;
use crate::store::Store;

/// Built-in hooks provided by the `meta` source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaHook {
    /// Every configured hook matches at least one file in the tree.
    CheckHooksApply,
    /// Every exclude pattern actually excludes something.
    CheckUselessExcludes,
}

impl MetaHook {
    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "check-hooks-apply" => Some(MetaHook::CheckHooksApply),
            "check-useless-excludes" => Some(MetaHook::CheckUselessExcludes),
            _ => None,
        }
    }
}

/// Where a resolved hook's command runs from.
#[derive(Debug, Clone)]
pub enum HookSource {
    /// Pinned checkout under the store.
    Git {
        url: String,
        rev: String,
        checkout: PathBuf,
    },
    /// The working tree itself.
    Local,
    /// Implemented natively, no subprocess.
    Meta(MetaHook),
}

/// A fully resolved hook definition. Immutable once resolved.
#[derive(Debug, Clone)]
pub struct Hook {
    pub id: String,
    pub name: String,
    pub entry: String,
    pub language: Language,
    pub language_version: Option<String>,
    pub args: Vec<String>,
    pub files: Option<String>,
    pub exclude: Option<String>,
    pub types: Vec<String>,
    pub types_or: Vec<String>,
    pub exclude_types: Vec<String>,
    pub stages: Vec<Stage>,
    pub additional_dependencies: Vec<String>,
    pub always_run: bool,
    pub require_serial: bool,
    pub pass_filenames: bool,
    pub verbose: bool,
    pub source: HookSource,
}

impl Hook {
    /// The version pin of the owning repository entry, if any.
    pub fn pin(&self) -> Option<&str> {
        match &self.source {
            HookSource::Git { rev, .. } => Some(rev),
            HookSource::Local | HookSource::Meta(_) => None,
        }
    }

    /// Whether this hook runs at the given stage.
    pub fn runs_at(&self, stage: Stage) -> bool {
        self.stages.contains(&stage)
    }
}

/// One hook definition from a repository's `.tollgate-hooks.yaml`.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestHook {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub entry: String,
    pub language: String,
    #[serde(default)]
    pub language_version: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub files: Option<String>,
    #[serde(default)]
    pub exclude: Option<String>,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub types_or: Vec<String>,
    #[serde(default)]
    pub exclude_types: Vec<String>,
    #[serde(default)]
    pub stages: Option<Vec<Stage>>,
    #[serde(default)]
    pub additional_dependencies: Vec<String>,
    #[serde(default)]
    pub always_run: bool,
    #[serde(default)]
    pub require_serial: bool,
    #[serde(default = "default_pass_filenames")]
    pub pass_filenames: bool,
}

fn default_pass_filenames() -> bool {
    true
}

/// Load a repository's hook manifest.
pub fn load_manifest(checkout: &std::path::Path, repo: &str) -> Result<Vec<ManifestHook>, Error> {
    let manifest_path = checkout.join(MANIFEST_FILE);
    if !manifest_path.exists() {
        return Err(Error::config(format!(
            "repo '{}' does not export {}",
            repo, MANIFEST_FILE
        )));
    }
    let content = std::fs::read_to_string(&manifest_path)?;
    let hooks: Vec<ManifestHook> = serde_yaml::from_str(&content)
        .map_err(|e| Error::config(format!("{} of '{}': {}", MANIFEST_FILE, repo, e)))?;
    Ok(hooks)
}

/// Resolved view of the configured pipeline.
#[derive(Debug, Default)]
pub struct HookRegistry {
    hooks: Vec<Hook>,
}

impl HookRegistry {
    /// Run every resolution check that needs neither store nor network.
    ///
    /// This is the whole of `validate`'s registry pass and the first part
    /// of a real resolution: duplicate identifiers, unknown meta hooks,
    /// unknown type tags.
    pub fn plan(config: &ConfigFile) -> Result<(), Error> {
        let mut seen: HashSet<&str> = HashSet::new();

        for entry in &config.repos {
            for spec in &entry.hooks {
                if !seen.insert(spec.id.as_str()) {
                    return Err(Error::config(format!(
                        "duplicate hook id '{}'",
                        spec.id
                    )));
                }

                if entry.source() == RepoSource::Meta && MetaHook::from_id(&spec.id).is_none() {
                    return Err(Error::config(format!(
                        "unknown meta hook '{}'",
                        spec.id
                    )));
                }

                if entry.source() == RepoSource::Local {
                    // Parse eagerly so `validate` catches it without a run.
                    spec.language
                        .as_deref()
                        .unwrap_or_default()
                        .parse::<Language>()
                        .map_err(|e| Error::config(format!("hook '{}': {}", spec.id, e)))?;
                }

                for tag in iter_tags(spec) {
                    if !identify::is_known_tag(tag) {
                        return Err(Error::config(format!(
                            "hook '{}' references unknown file type '{}'",
                            spec.id, tag
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// Fully resolve the configuration against the store.
    ///
    /// Ensures pinned checkouts exist (cloning on a miss), loads their
    /// manifests, and merges per-entry overrides on top of the manifest
    /// definitions. Declaration order of the config is preserved.
    pub async fn resolve(config: &ConfigFile, store: &Store) -> Result<Self, Error> {
        Self::plan(config)?;

        let mut hooks = Vec::new();
        for entry in &config.repos {
            match entry.source() {
                RepoSource::Git(url) => {
                    let rev = entry.rev.clone().unwrap_or_default();
                    let checkout = store.repo_checkout(&url, &rev).await?;
                    let manifest = load_manifest(&checkout, &entry.repo)?;
                    for spec in &entry.hooks {
                        let base = manifest.iter().find(|m| m.id == spec.id).ok_or_else(|| {
                            Error::config(format!(
                                "hook '{}' is not provided by repo '{}'",
                                spec.id, entry.repo
                            ))
                        })?;
                        let source = HookSource::Git {
                            url: url.clone(),
                            rev: rev.clone(),
                            checkout: checkout.clone(),
                        };
                        hooks.push(merge(base, spec, source, config)?);
                    }
                }
                RepoSource::Local => {
                    for spec in &entry.hooks {
                        hooks.push(local_hook(spec, config)?);
                    }
                }
                RepoSource::Meta => {
                    for spec in &entry.hooks {
                        // plan() already guarantees the id is known
                        let meta = MetaHook::from_id(&spec.id)
                            .ok_or_else(|| Error::config(format!("unknown meta hook '{}'", spec.id)))?;
                        hooks.push(meta_hook(spec, meta, config));
                    }
                }
            }
        }

        debug!(hooks = hooks.len(), "resolved hook registry");
        Ok(Self { hooks })
    }

    /// Look a hook up by identifier.
    pub fn lookup(&self, id: &str) -> Option<&Hook> {
        self.hooks.iter().find(|h| h.id == id)
    }

    /// Hooks assigned to a stage, in declaration order.
    pub fn hooks_for_stage(&self, stage: Stage) -> Vec<&Hook> {
        self.hooks.iter().filter(|h| h.runs_at(stage)).collect()
    }

    /// All resolved hooks, in declaration order.
    pub fn hooks(&self) -> &[Hook] {
        &self.hooks
    }
}

/// Tags referenced by a config-level hook spec.
fn iter_tags(spec: &HookSpec) -> impl Iterator<Item = &str> {
    spec.types
        .iter()
        .flatten()
        .chain(spec.types_or.iter().flatten())
        .chain(spec.exclude_types.iter().flatten())
        .map(String::as_str)
}

/// Merge a manifest definition with its config override.
fn merge(
    base: &ManifestHook,
    spec: &HookSpec,
    source: HookSource,
    config: &ConfigFile,
) -> Result<Hook, Error> {
    let language: Language = base
        .language
        .parse()
        .map_err(|e| Error::config(format!("hook '{}': {}", base.id, e)))?;

    for tag in base
        .types
        .iter()
        .chain(&base.types_or)
        .chain(&base.exclude_types)
    {
        if !identify::is_known_tag(tag) {
            return Err(Error::config(format!(
                "hook '{}' manifest references unknown file type '{}'",
                base.id, tag
            )));
        }
    }

    Ok(Hook {
        id: base.id.clone(),
        name: spec
            .name
            .clone()
            .or_else(|| base.name.clone())
            .unwrap_or_else(|| base.id.clone()),
        entry: spec.entry.clone().unwrap_or_else(|| base.entry.clone()),
        language,
        language_version: spec
            .language_version
            .clone()
            .or_else(|| base.language_version.clone()),
        args: if spec.args.is_empty() {
            base.args.clone()
        } else {
            spec.args.clone()
        },
        files: spec.files.clone().or_else(|| base.files.clone()),
        exclude: spec.exclude.clone().or_else(|| base.exclude.clone()),
        types: spec.types.clone().unwrap_or_else(|| base.types.clone()),
        types_or: spec
            .types_or
            .clone()
            .unwrap_or_else(|| base.types_or.clone()),
        exclude_types: spec
            .exclude_types
            .clone()
            .unwrap_or_else(|| base.exclude_types.clone()),
        stages: spec
            .stages
            .clone()
            .or_else(|| base.stages.clone())
            .unwrap_or_else(|| config.default_stages.clone()),
        additional_dependencies: if spec.additional_dependencies.is_empty() {
            base.additional_dependencies.clone()
        } else {
            spec.additional_dependencies.clone()
        },
        always_run: spec.always_run.unwrap_or(base.always_run),
        require_serial: spec.require_serial.unwrap_or(base.require_serial),
        pass_filenames: spec.pass_filenames.unwrap_or(base.pass_filenames),
        verbose: spec.verbose.unwrap_or(false),
        source,
    })
}

/// Build a hook from a self-contained `local` spec.
fn local_hook(spec: &HookSpec, config: &ConfigFile) -> Result<Hook, Error> {
    // validate() guarantees entry and language are present
    let entry = spec.entry.clone().unwrap_or_default();
    let language: Language = spec
        .language
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(|e| Error::config(format!("hook '{}': {}", spec.id, e)))?;

    Ok(Hook {
        id: spec.id.clone(),
        name: spec.name.clone().unwrap_or_else(|| spec.id.clone()),
        entry,
        language,
        language_version: spec.language_version.clone(),
        args: spec.args.clone(),
        files: spec.files.clone(),
        exclude: spec.exclude.clone(),
        types: spec.types.clone().unwrap_or_default(),
        types_or: spec.types_or.clone().unwrap_or_default(),
        exclude_types: spec.exclude_types.clone().unwrap_or_default(),
        stages: spec
            .stages
            .clone()
            .unwrap_or_else(|| config.default_stages.clone()),
        additional_dependencies: spec.additional_dependencies.clone(),
        always_run: spec.always_run.unwrap_or(false),
        require_serial: spec.require_serial.unwrap_or(false),
        pass_filenames: spec.pass_filenames.unwrap_or(true),
        verbose: spec.verbose.unwrap_or(false),
        source: HookSource::Local,
    })
}

/// Build a built-in meta hook.
fn meta_hook(spec: &HookSpec, meta: MetaHook, config: &ConfigFile) -> Hook {
    Hook {
        id: spec.id.clone(),
        name: spec.name.clone().unwrap_or_else(|| spec.id.clone()),
        entry: String::new(),
        language: Language::System,
        language_version: None,
        args: Vec::new(),
        files: spec.files.clone(),
        exclude: spec.exclude.clone(),
        types: Vec::new(),
        types_or: Vec::new(),
        exclude_types: Vec::new(),
        stages: spec
            .stages
            .clone()
            .unwrap_or_else(|| config.default_stages.clone()),
        additional_dependencies: Vec::new(),
        // Meta hooks inspect the whole config, not individual files.
        always_run: spec.always_run.unwrap_or(true),
        require_serial: false,
        pass_filenames: false,
        verbose: spec.verbose.unwrap_or(false),
        source: HookSource::Meta(meta),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigFile;
    use crate::store::Store;
    use tempfile::TempDir;

    const MANIFEST: &str = r#"
- id: fmt
  name: Formatter
  entry: fmt-tool
  language: system
  types: [rust]
  require_serial: true
- id: lint
  entry: lint-tool
  language: system
  args: ["--strict"]
"#;

    fn seeded_store(url: &str, rev: &str) -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::at(dir.path().join("cache"));
        let checkout = store.repo_dir(url, rev);
        std::fs::create_dir_all(&checkout).unwrap();
        std::fs::write(checkout.join(MANIFEST_FILE), MANIFEST).unwrap();
        (dir, store)
    }

    fn git_config(url: &str, rev: &str) -> ConfigFile {
        let yaml = format!(
            r#"
repos:
  - repo: {}
    rev: {}
    hooks:
      - id: fmt
      - id: lint
        args: ["--fast"]
        stages: [pre-push]
"#,
            url, rev
        );
        ConfigFile::parse(&yaml).unwrap()
    }

    #[tokio::test]
    async fn test_resolve_merges_manifest_and_overrides() {
        let url = "https://example.com/hooks";
        let (_dir, store) = seeded_store(url, "v1.0.0");
        let config = git_config(url, "v1.0.0");

        let registry = HookRegistry::resolve(&config, &store).await.unwrap();

        let fmt = registry.lookup("fmt").unwrap();
        assert_eq!(fmt.name, "Formatter");
        assert_eq!(fmt.entry, "fmt-tool");
        assert!(fmt.require_serial);
        assert_eq!(fmt.types, vec!["rust"]);
        assert_eq!(fmt.stages, vec![crate::config::Stage::PreCommit]);

        let lint = registry.lookup("lint").unwrap();
        // Override replaces manifest args entirely.
        assert_eq!(lint.args, vec!["--fast"]);
        assert_eq!(lint.stages, vec![crate::config::Stage::PrePush]);
    }

    #[tokio::test]
    async fn test_all_hooks_of_entry_share_pin() {
        let url = "https://example.com/hooks";
        let (_dir, store) = seeded_store(url, "v1.0.0");
        let config = git_config(url, "v1.0.0");

        let registry = HookRegistry::resolve(&config, &store).await.unwrap();
        let pins: Vec<_> = registry.hooks().iter().map(|h| h.pin()).collect();
        assert_eq!(pins, vec![Some("v1.0.0"), Some("v1.0.0")]);
    }

    #[tokio::test]
    async fn test_unknown_hook_id_in_repo() {
        let url = "https://example.com/hooks";
        let (_dir, store) = seeded_store(url, "v1.0.0");
        let config = ConfigFile::parse(&format!(
            "repos:\n  - repo: {}\n    rev: v1.0.0\n    hooks:\n      - id: nope\n",
            url
        ))
        .unwrap();

        let err = HookRegistry::resolve(&config, &store).await.unwrap_err();
        assert!(err.to_string().contains("not provided by repo"));
    }

    #[test]
    fn test_plan_rejects_duplicate_ids() {
        let config = ConfigFile::parse(
            r#"
repos:
  - repo: local
    hooks:
      - id: twice
        entry: "true"
        language: system
      - id: twice
        entry: "false"
        language: system
"#,
        )
        .unwrap();

        let err = HookRegistry::plan(&config).unwrap_err();
        assert!(err.to_string().contains("duplicate hook id"));
    }

    #[test]
    fn test_plan_rejects_unknown_meta_hook() {
        let config = ConfigFile::parse(
            "repos:\n  - repo: meta\n    hooks:\n      - id: check-everything\n",
        )
        .unwrap();

        let err = HookRegistry::plan(&config).unwrap_err();
        assert!(err.to_string().contains("unknown meta hook"));
    }

    #[test]
    fn test_plan_rejects_unknown_tag() {
        let config = ConfigFile::parse(
            r#"
repos:
  - repo: local
    hooks:
      - id: a
        entry: "true"
        language: system
        types: [pythn]
"#,
        )
        .unwrap();

        let err = HookRegistry::plan(&config).unwrap_err();
        assert!(err.to_string().contains("unknown file type"));
    }

    #[tokio::test]
    async fn test_stage_listing_preserves_declaration_order() {
        let config = ConfigFile::parse(
            r#"
repos:
  - repo: local
    hooks:
      - id: b-first
        entry: "true"
        language: system
      - id: a-second
        entry: "true"
        language: system
"#,
        )
        .unwrap();
        let dir = TempDir::new().unwrap();
        let store = Store::at(dir.path().to_path_buf());

        let registry = HookRegistry::resolve(&config, &store).await.unwrap();
        let ids: Vec<_> = registry
            .hooks_for_stage(crate::config::Stage::PreCommit)
            .iter()
            .map(|h| h.id.as_str())
            .collect();
        assert_eq!(ids, vec!["b-first", "a-second"]);
    }
}
