//! Shared on-disk store.
//!
//! Everything tollgate caches lives under one root (by default
//! `~/.cache/tollgate/`): pinned clones of hook repositories under
//! `repos/`, provisioned language environments under `envs/`, a
//! `state.json` with last-use records, and a `lock` file that serializes
//! mutating phases across concurrent invocations.
//!
//! Clones land under a staging name and are renamed into place, so a
//! directory that exists is always a complete checkout.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Error;
use crate::git;

const LOCK_FILE: &str = "lock";
const STATE_FILE: &str = "state.json";

/// A lock file untouched for this long belongs to a dead process.
const LOCK_STALE_AFTER: Duration = Duration::from_secs(10 * 60);
/// Held locks re-touch their file on this interval, well inside the
/// staleness window.
const LOCK_REFRESH_EVERY: Duration = Duration::from_secs(60);
const LOCK_POLL: Duration = Duration::from_millis(100);

/// Last-use record for a pinned clone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoRecord {
    pub url: String,
    pub rev: String,
    pub last_used: DateTime<Utc>,
}

/// Last-use record for a provisioned environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvRecord {
    pub language: String,
    pub last_used: DateTime<Utc>,
}

/// Contents of `state.json`, keyed by directory name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreState {
    #[serde(default)]
    pub repos: BTreeMap<String, RepoRecord>,
    #[serde(default)]
    pub envs: BTreeMap<String, EnvRecord>,
}

/// Handle to the store root.
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    /// Open the store at the user's cache directory.
    pub fn open() -> Result<Self, Error> {
        let cache = dirs::cache_dir().ok_or(Error::HomeDirNotFound)?;
        Ok(Self::at(cache.join("tollgate")))
    }

    /// Open a store at an explicit root.
    pub fn at(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn repos_dir(&self) -> PathBuf {
        self.root.join("repos")
    }

    pub fn envs_dir(&self) -> PathBuf {
        self.root.join("envs")
    }

    /// Short content hash used in directory names.
    pub fn key_hash(parts: &[&str]) -> String {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.as_bytes());
            hasher.update(b"\n");
        }
        let digest = hasher.finalize();
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        hex[..16].to_string()
    }

    /// Directory a pinned clone of `url` at `rev` lives in.
    pub fn repo_dir(&self, url: &str, rev: &str) -> PathBuf {
        let key = Self::key_hash(&[url, rev]);
        self.repos_dir().join(format!("{}-{}", slug(url), key))
    }

    /// Directory an environment with the given cache key lives in.
    pub fn env_dir(&self, language: &str, key: &str) -> PathBuf {
        self.envs_dir().join(format!("{}-{}", language, key))
    }

    /// Ensure a complete pinned checkout exists and return its path.
    ///
    /// Clones on a miss. Two racing invocations may both clone; the
    /// loser's rename fails against the winner's directory and its
    /// staging copy is discarded.
    pub async fn repo_checkout(&self, url: &str, rev: &str) -> Result<PathBuf, Error> {
        let dest = self.repo_dir(url, rev);
        if !dest.exists() {
            let staging = self
                .repos_dir()
                .join(format!(".staging-{}", Uuid::new_v4()));
            info!(url, rev, "cloning hook repository");
            git::clone_at_rev(url, rev, &staging).await?;
            if let Err(e) = fs::rename(&staging, &dest) {
                if dest.exists() {
                    debug!(url, rev, "lost clone race, using existing checkout");
                    let _ = fs::remove_dir_all(&staging);
                } else {
                    return Err(e.into());
                }
            }
        }
        self.touch_repo(url, rev)?;
        Ok(dest)
    }

    /// Record that a clone was used.
    fn touch_repo(&self, url: &str, rev: &str) -> Result<(), Error> {
        let name = format!("{}-{}", slug(url), Self::key_hash(&[url, rev]));
        let mut state = self.load_state();
        state.repos.insert(
            name,
            RepoRecord {
                url: url.to_string(),
                rev: rev.to_string(),
                last_used: Utc::now(),
            },
        );
        self.save_state(&state)
    }

    /// Record that an environment was used.
    pub fn touch_env(&self, dir_name: &str, language: &str) -> Result<(), Error> {
        let mut state = self.load_state();
        state.envs.insert(
            dir_name.to_string(),
            EnvRecord {
                language: language.to_string(),
                last_used: Utc::now(),
            },
        );
        self.save_state(&state)
    }

    pub fn state_path(&self) -> PathBuf {
        self.root.join(STATE_FILE)
    }

    /// Load `state.json`, starting fresh if missing or unreadable.
    pub fn load_state(&self) -> StoreState {
        let path = self.state_path();
        if !path.exists() {
            return StoreState::default();
        }
        match fs::read_to_string(&path) {
            Ok(data) => serde_json::from_str(&data).unwrap_or_else(|e| {
                warn!(error = %e, "Failed to parse store state, starting fresh");
                StoreState::default()
            }),
            Err(_) => StoreState::default(),
        }
    }

    fn save_state(&self, state: &StoreState) -> Result<(), Error> {
        fs::create_dir_all(&self.root)?;
        let data = serde_json::to_string_pretty(state)?;
        fs::write(self.state_path(), data)?;
        Ok(())
    }

    /// Take the cross-invocation lock, waiting for other holders.
    ///
    /// The lock file carries the holder's pid and a one-shot token and is
    /// re-touched every [`LOCK_REFRESH_EVERY`] while held, so only a file
    /// untouched for [`LOCK_STALE_AFTER`] gets reclaimed. Release removes
    /// the file only while it still carries the holder's own token.
    pub async fn lock(&self) -> Result<StoreLock, Error> {
        self.lock_with_refresh(LOCK_REFRESH_EVERY).await
    }

    async fn lock_with_refresh(&self, refresh_every: Duration) -> Result<StoreLock, Error> {
        fs::create_dir_all(&self.root)?;
        let path = self.root.join(LOCK_FILE);
        let token = format!("{} {}", std::process::id(), Uuid::new_v4());
        let mut announced = false;
        loop {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(mut file) => {
                    let _ = write!(file, "{}", token);
                    debug!(path = %path.display(), "acquired store lock");
                    let refresh =
                        tokio::spawn(refresh_lock(path.clone(), token.clone(), refresh_every));
                    return Ok(StoreLock {
                        path,
                        token,
                        refresh,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if lock_is_stale(&path) {
                        warn!(path = %path.display(), "reclaiming stale store lock");
                        let _ = fs::remove_file(&path);
                        continue;
                    }
                    if !announced {
                        let holder = fs::read_to_string(&path).unwrap_or_default();
                        info!(
                            holder = holder.split_whitespace().next().unwrap_or("?"),
                            "waiting for store lock"
                        );
                        announced = true;
                    }
                    tokio::time::sleep(LOCK_POLL).await;
                }
                Err(e) => {
                    return Err(Error::StoreLock {
                        path,
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    /// Total size of the store on disk.
    pub fn size_bytes(&self) -> u64 {
        dir_size(&self.root)
    }
}

/// Held store lock. Released on drop.
#[derive(Debug)]
pub struct StoreLock {
    path: PathBuf,
    token: String,
    refresh: tokio::task::JoinHandle<()>,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        self.refresh.abort();
        match fs::read_to_string(&self.path) {
            Ok(content) if content == self.token => {
                if let Err(e) = fs::remove_file(&self.path) {
                    warn!(error = %e, "Failed to release store lock");
                }
            }
            // Reclaimed while we held it; the file belongs to the new
            // holder now.
            Ok(_) => warn!(path = %self.path.display(), "store lock changed hands"),
            Err(_) => {}
        }
    }
}

/// Keep a held lock's file fresh. Stops once the file vanishes or
/// changes hands.
async fn refresh_lock(path: PathBuf, token: String, every: Duration) {
    loop {
        tokio::time::sleep(every).await;
        match fs::read_to_string(&path) {
            Ok(content) if content == token => {
                if fs::write(&path, &token).is_err() {
                    return;
                }
            }
            _ => return,
        }
    }
}

fn lock_is_stale(path: &Path) -> bool {
    match fs::metadata(path).and_then(|m| m.modified()) {
        Ok(modified) => matches!(modified.elapsed(), Ok(age) if age > LOCK_STALE_AFTER),
        Err(_) => false,
    }
}

/// Human-readable tail of a repo url, for directory names.
fn slug(url: &str) -> String {
    let tail = url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(url)
        .trim_end_matches(".git");
    let cleaned: String = tail
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "repo".to_string()
    } else {
        cleaned
    }
}

fn dir_size(path: &Path) -> u64 {
    let mut total = 0;
    if let Ok(entries) = fs::read_dir(path) {
        for entry in entries.flatten() {
            let entry_path = entry.path();
            if entry_path.is_dir() {
                total += dir_size(&entry_path);
            } else if let Ok(meta) = entry.metadata() {
                total += meta.len();
            }
        }
    }
    total
}
