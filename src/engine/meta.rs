//! Built-in self-check hooks from the `meta` source.
//!
//! These run natively instead of spawning a process. They inspect the
//! loaded configuration against the tracked file set, reusing the same
//! selector the engine uses for real hooks.

use std::path::Path;

use super::Outcome;
use crate::config::ConfigFile;
use crate::registry::{HookRegistry, HookSource, MetaHook};
use crate::selector::FileSelector;

/// Execute a meta hook against the tracked file set.
pub fn run_meta(
    kind: MetaHook,
    config: &ConfigFile,
    registry: &HookRegistry,
    repo_root: &Path,
    tree_files: &[String],
) -> (Outcome, String) {
    match kind {
        MetaHook::CheckHooksApply => check_hooks_apply(config, registry, repo_root, tree_files),
        MetaHook::CheckUselessExcludes => {
            check_useless_excludes(config, registry, repo_root, tree_files)
        }
    }
}

/// Every configured hook must match at least one tracked file.
fn check_hooks_apply(
    config: &ConfigFile,
    registry: &HookRegistry,
    repo_root: &Path,
    tree_files: &[String],
) -> (Outcome, String) {
    let mut complaints = Vec::new();
    for hook in registry.hooks() {
        if matches!(hook.source, HookSource::Meta(_)) || hook.always_run {
            continue;
        }
        let selector = match FileSelector::for_hook(hook, config.exclude.as_deref()) {
            Ok(selector) => selector,
            Err(e) => {
                return (
                    Outcome::Errored {
                        message: e.to_string(),
                    },
                    String::new(),
                )
            }
        };
        if selector.select(repo_root, tree_files).is_empty() {
            complaints.push(format!("{} does not apply to any file", hook.id));
        }
    }
    verdict(complaints)
}

/// Every exclude pattern must actually exclude something.
fn check_useless_excludes(
    config: &ConfigFile,
    registry: &HookRegistry,
    repo_root: &Path,
    tree_files: &[String],
) -> (Outcome, String) {
    let mut complaints = Vec::new();

    if let Some(pattern) = config.exclude.as_deref() {
        match regex::Regex::new(pattern) {
            Ok(re) => {
                if !tree_files.iter().any(|f| re.is_match(f)) {
                    complaints.push("the top-level exclude matches no files".to_string());
                }
            }
            Err(e) => {
                return (
                    Outcome::Errored {
                        message: e.to_string(),
                    },
                    String::new(),
                )
            }
        }
    }

    for hook in registry.hooks() {
        if hook.exclude.is_none() {
            continue;
        }
        // What the hook would see without its own exclude.
        let mut probe = hook.clone();
        probe.exclude = None;
        let included = match FileSelector::for_hook(&probe, config.exclude.as_deref()) {
            Ok(selector) => selector.select(repo_root, tree_files),
            Err(e) => {
                return (
                    Outcome::Errored {
                        message: e.to_string(),
                    },
                    String::new(),
                )
            }
        };
        let excluding = match FileSelector::for_hook(hook, None) {
            Ok(selector) => selector,
            Err(e) => {
                return (
                    Outcome::Errored {
                        message: e.to_string(),
                    },
                    String::new(),
                )
            }
        };
        if !excluding.exclude_is_used(&included) {
            complaints.push(format!(
                "the exclude pattern for {} matches no files",
                hook.id
            ));
        }
    }

    verdict(complaints)
}

fn verdict(complaints: Vec<String>) -> (Outcome, String) {
    if complaints.is_empty() {
        (Outcome::Passed, String::new())
    } else {
        (Outcome::Failed { code: 1 }, complaints.join("\n"))
    }
}
