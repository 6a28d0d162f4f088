//! Validate the hook configuration without touching the network.

use crate::config::{ConfigFile, RepoSource};
use crate::error::Error;
use crate::git;
use crate::registry::HookRegistry;

/// Parse and cross-check the config, then report what it declares.
pub async fn run() -> Result<(), Error> {
    let cwd = std::env::current_dir()?;
    let repo_root = git::repo_root(&cwd).await?;
    let config = ConfigFile::load(&repo_root)?;

    // Local and meta entries resolve fully offline; git entries are
    // checked for shape only, their manifests load at run time.
    HookRegistry::plan(&config)?;

    let mut git_repos = 0usize;
    let mut hooks = 0usize;
    for entry in &config.repos {
        if matches!(entry.source(), RepoSource::Git(_)) {
            git_repos += 1;
        }
        hooks += entry.hooks.len();
    }

    println!(
        "Config OK: {} repo entries ({} remote), {} hooks.",
        config.repos.len(),
        git_repos,
        hooks
    );
    Ok(())
}
