//! Bump configured pins to the latest upstream release.
//!
//! For each git entry the pinned checkout fetches the remote default
//! branch head plus tags, then `git describe` picks the newest reachable
//! tag (falling back to the head commit id for repos that never tag).
//! Only the `rev:` lines of updated entries are rewritten; every other
//! byte of the config survives untouched.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use regex::Regex;
use tracing::debug;

use crate::config::{ConfigFile, RepoSource, CONFIG_FILE};
use crate::error::Error;
use crate::git;
use crate::store::Store;

/// One planned pin bump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinUpdate {
    pub repo: String,
    pub old: String,
    pub new: String,
}

/// Run autoupdate for the current repository.
pub async fn run(dry_run: bool) -> Result<(), Error> {
    let cwd = std::env::current_dir()?;
    let repo_root = git::repo_root(&cwd).await?;
    let store = Store::open()?;

    let updates = update_pins(&repo_root, &store, dry_run).await?;
    if updates.is_empty() {
        println!("Everything is up to date.");
    } else if dry_run {
        println!("Dry run: {} not rewritten.", CONFIG_FILE);
    }
    Ok(())
}

/// Fetch upstreams and rewrite outdated pins unless `dry_run`.
pub async fn update_pins(
    repo_root: &Path,
    store: &Store,
    dry_run: bool,
) -> Result<Vec<PinUpdate>, Error> {
    let config_path = ConfigFile::path(repo_root);
    if !config_path.exists() {
        return Err(Error::ConfigNotFound(config_path));
    }
    let original = fs::read_to_string(&config_path)?;
    let config = ConfigFile::parse(&original)?;

    let _lock = store.lock().await?;
    let mut updates = Vec::new();
    for entry in &config.repos {
        let url = match entry.source() {
            RepoSource::Git(url) => url,
            RepoSource::Local | RepoSource::Meta => continue,
        };
        let rev = entry.rev.clone().unwrap_or_default();
        let checkout = store.repo_checkout(&url, &rev).await?;
        git::fetch_remote_head(&checkout).await?;
        let latest = git::describe_fetched_head(&checkout).await?;
        debug!(url = %url, rev = %rev, latest = %latest, "checked upstream");

        if latest == rev {
            println!("{} already at {}", url, rev);
        } else {
            println!("{}: {} -> {}", url, rev, latest);
            updates.push(PinUpdate {
                repo: url,
                old: rev,
                new: latest,
            });
        }
    }

    if !dry_run && !updates.is_empty() {
        let rewritten = rewrite_revs(&original, &updates)?;
        fs::write(&config_path, rewritten)?;
    }
    Ok(updates)
}

/// Rewrite `rev:` lines for the updated entries, byte-for-byte otherwise.
fn rewrite_revs(original: &str, updates: &[PinUpdate]) -> Result<String, Error> {
    let by_repo: HashMap<&str, &PinUpdate> =
        updates.iter().map(|u| (u.repo.as_str(), u)).collect();
    let repo_line =
        Regex::new(r"^\s*-\s*repo:\s*(.+?)\s*$").map_err(|e| Error::config(e.to_string()))?;
    let rev_line =
        Regex::new(r"^(\s*rev:\s*)(\S+)(\s*(?:#.*)?)$").map_err(|e| Error::config(e.to_string()))?;

    let mut out = String::with_capacity(original.len());
    let mut current_repo: Option<String> = None;

    for raw in original.split_inclusive('\n') {
        let (line, terminator) = split_line(raw);

        if let Some(caps) = repo_line.captures(line) {
            current_repo = caps.get(1).map(|m| unquote(m.as_str()).to_string());
        } else if let Some(caps) = rev_line.captures(line) {
            let update = current_repo
                .as_deref()
                .and_then(|repo| by_repo.get(repo).copied());
            if let (Some(update), Some(token)) = (update, caps.get(2)) {
                if unquote(token.as_str()) == update.old {
                    let prefix = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                    let suffix = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
                    out.push_str(prefix);
                    out.push_str(&requote(token.as_str(), &update.new));
                    out.push_str(suffix);
                    out.push_str(terminator);
                    continue;
                }
            }
        }

        out.push_str(line);
        out.push_str(terminator);
    }
    Ok(out)
}

fn split_line(raw: &str) -> (&str, &str) {
    if let Some(line) = raw.strip_suffix("\r\n") {
        (line, "\r\n")
    } else if let Some(line) = raw.strip_suffix('\n') {
        (line, "\n")
    } else {
        (raw, "")
    }
}

fn unquote(s: &str) -> &str {
    let s = s.trim();
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"'))
            || (s.starts_with('\'') && s.ends_with('\'')))
    {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

/// Carry the old token's quoting style over to the new value.
fn requote(old_token: &str, new: &str) -> String {
    if old_token.len() >= 2 && old_token.starts_with('"') && old_token.ends_with('"') {
        format!("\"{}\"", new)
    } else if old_token.len() >= 2 && old_token.starts_with('\'') && old_token.ends_with('\'') {
        format!("'{}'", new)
    } else {
        new.to_string()
    }
}
