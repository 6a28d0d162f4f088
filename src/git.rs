//! Thin wrapper over the `git` binary.
//!
//! Everything tollgate needs from git goes through here: repository
//! discovery, file listings for the selector, pinned clones for the
//! store, and the fetch/describe pair behind `autoupdate`. File listings
//! use NUL-separated output so unusual file names survive.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::error::Error;

/// Spawn git and wait, leaving the exit status to the caller.
async fn spawn_git(cwd: Option<&Path>, args: &[&str]) -> Result<std::process::Output, Error> {
    let mut cmd = Command::new("git");
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| spawn_error(&format!("git {}", args.join(" ")), &e))
}

/// Map a failure to launch git at all, naming a missing binary.
fn spawn_error(command: &str, e: &std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::NotFound {
        Error::git(command, "git executable not found on PATH")
    } else {
        Error::git(command, e.to_string())
    }
}

/// Run git with the given args, failing on a non-zero exit.
async fn run_git(cwd: Option<&Path>, args: &[&str]) -> Result<std::process::Output, Error> {
    let output = spawn_git(cwd, args).await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::git(
            format!("git {}", args.join(" ")),
            stderr.trim().to_string(),
        ));
    }
    Ok(output)
}

/// Run git and return trimmed stdout.
async fn output(cwd: Option<&Path>, args: &[&str]) -> Result<String, Error> {
    let out = run_git(cwd, args).await?;
    Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
}

/// Parse NUL-separated path output.
fn split_nul(raw: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(raw)
        .split('\0')
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Find the working tree root containing `start`.
///
/// `NotAGitRepo` means rev-parse ran and said no; failing to launch git
/// at all comes back as [`Error::Git`].
pub async fn repo_root(start: &Path) -> Result<PathBuf, Error> {
    let out = spawn_git(Some(start), &["rev-parse", "--show-toplevel"]).await?;
    if !out.status.success() {
        return Err(Error::NotAGitRepo);
    }
    let top = String::from_utf8_lossy(&out.stdout).trim().to_string();
    Ok(PathBuf::from(top))
}

/// The directory git hook scripts live in, honoring `core.hooksPath`.
pub async fn hooks_dir(repo: &Path) -> Result<PathBuf, Error> {
    let raw = output(Some(repo), &["rev-parse", "--git-path", "hooks"]).await?;
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(repo.join(path))
    }
}

/// Staged files, excluding deletions.
pub async fn staged_files(repo: &Path) -> Result<Vec<String>, Error> {
    let out = run_git(
        Some(repo),
        &[
            "diff",
            "--staged",
            "--name-only",
            "--diff-filter=ACMR",
            "-z",
        ],
    )
    .await?;
    Ok(split_nul(&out.stdout))
}

/// Every tracked file.
pub async fn all_files(repo: &Path) -> Result<Vec<String>, Error> {
    let out = run_git(Some(repo), &["ls-files", "-z"]).await?;
    Ok(split_nul(&out.stdout))
}

/// Files that differ between two revisions, excluding deletions.
///
/// Uses merge-base semantics so a pre-push run only sees the commits
/// being pushed.
pub async fn changed_files(repo: &Path, from: &str, to: &str) -> Result<Vec<String>, Error> {
    let range = format!("{}...{}", from, to);
    let out = run_git(
        Some(repo),
        &[
            "diff",
            "--name-only",
            "--diff-filter=ACMR",
            "-z",
            &range,
            "--",
        ],
    )
    .await?;
    Ok(split_nul(&out.stdout))
}

/// Clone `url` into `dest` and check out `rev`.
///
/// Fetches the pin directly first, which works for tags, branches and
/// reachable commit ids on servers that allow it; falls back to a full
/// fetch for servers that only serve advertised refs.
pub async fn clone_at_rev(url: &str, rev: &str, dest: &Path) -> Result<(), Error> {
    std::fs::create_dir_all(dest)?;
    run_git(Some(dest), &["init", "--quiet", "."]).await?;
    run_git(Some(dest), &["remote", "add", "origin", url]).await?;

    match run_git(Some(dest), &["fetch", "--quiet", "--tags", "origin", rev]).await {
        Ok(_) => {
            run_git(Some(dest), &["checkout", "--quiet", "FETCH_HEAD"]).await?;
        }
        Err(_) => {
            debug!(url, rev, "direct fetch of pin refused, fetching everything");
            run_git(Some(dest), &["fetch", "--quiet", "--tags", "origin"]).await?;
            run_git(Some(dest), &["checkout", "--quiet", rev]).await?;
        }
    }
    Ok(())
}

/// Fetch the remote default branch head and all tags into `clone`.
pub async fn fetch_remote_head(clone: &Path) -> Result<(), Error> {
    run_git(Some(clone), &["fetch", "--quiet", "--tags", "origin", "HEAD"]).await?;
    Ok(())
}

/// Newest pin for the previously fetched remote head.
///
/// Prefers the most recent reachable tag; falls back to the commit id
/// for repositories that never tag.
pub async fn describe_fetched_head(clone: &Path) -> Result<String, Error> {
    match output(
        Some(clone),
        &["describe", "FETCH_HEAD", "--tags", "--abbrev=0"],
    )
    .await
    {
        Ok(tag) => Ok(tag),
        Err(_) => output(Some(clone), &["rev-parse", "FETCH_HEAD"]).await,
    }
}
