//! Per-language execution environments.
//!
//! Hooks declare the runtime they need. `system` and `script` use the
//! host as-is; `python` and `node` get an isolated environment under the
//! store, keyed by a content hash of everything that influences the
//! build. A cache hit is a marker-file check; a changed dependency set
//! changes the key, so stale environments are never reused.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;

use tokio::process::Command;
use tracing::{info, warn};

use crate::error::Error;
use crate::registry::{Hook, HookSource};
use crate::store::Store;

/// Marker written after a successful provision.
const READY_MARKER: &str = ".ready";

/// Runtimes a hook can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    /// Executable resolved on the host PATH, no provisioning.
    System,
    /// Script shipped inside the hook repository.
    Script,
    /// Virtualenv with the hook repo and extra packages installed.
    Python,
    /// npm prefix install of the hook repo.
    Node,
    /// No executable at all: matching any file fails the hook.
    Fail,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::System => "system",
            Language::Script => "script",
            Language::Python => "python",
            Language::Node => "node",
            Language::Fail => "fail",
        }
    }

    /// Whether this language builds anything under the store.
    pub fn needs_env(&self) -> bool {
        matches!(self, Language::Python | Language::Node)
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Language::System),
            "script" => Ok(Language::Script),
            "python" => Ok(Language::Python),
            "node" => Ok(Language::Node),
            "fail" => Ok(Language::Fail),
            other => Err(format!("unknown language '{}'", other)),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution context handed to the engine for one hook.
#[derive(Debug, Clone, Default)]
pub struct Env {
    /// Directories prepended to PATH for the hook process.
    pub path_prepend: Vec<PathBuf>,
    /// Extra environment variables for the hook process.
    pub vars: Vec<(String, String)>,
}

/// Provisions and caches environments in the store.
pub struct EnvManager<'a> {
    store: &'a Store,
}

impl<'a> EnvManager<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Cache key over everything that influences an environment build.
    fn cache_key(hook: &Hook) -> String {
        let mut deps: Vec<&str> = hook
            .additional_dependencies
            .iter()
            .map(String::as_str)
            .collect();
        deps.sort_unstable();

        let mut parts = vec![
            hook.language.as_str(),
            hook.language_version.as_deref().unwrap_or(""),
            hook.pin().unwrap_or("local"),
        ];
        parts.extend(deps);
        Store::key_hash(&parts)
    }

    /// Ensure the hook's environment exists and return its context.
    ///
    /// Call with the store lock held; concurrent builds of the same key
    /// would trample each other.
    pub async fn ensure(&self, hook: &Hook) -> Result<Env, Error> {
        match hook.language {
            Language::System | Language::Script | Language::Fail => Ok(Env::default()),
            Language::Python => self.ensure_python(hook).await,
            Language::Node => self.ensure_node(hook).await,
        }
    }

    async fn ensure_python(&self, hook: &Hook) -> Result<Env, Error> {
        let key = Self::cache_key(hook);
        let name = format!("python-{}", key);
        let dir = self.store.env_dir("python", &key);

        if !is_ready(&dir) {
            discard_partial(&dir)?;
            let wanted = match hook.language_version.as_deref() {
                Some(version) => format!("python{}", version),
                None => "python3".to_string(),
            };
            let python = which::which(&wanted).map_err(|_| {
                Error::provision(&hook.id, format!("interpreter '{}' not found on PATH", wanted))
            })?;
            info!(hook = %hook.id, env = %dir.display(), "provisioning python environment");

            let mut venv = Command::new(&python);
            venv.args(["-m", "venv"]).arg(&dir);
            run_build_tool(&hook.id, &mut venv).await?;

            let pip = dir.join("bin").join("pip");
            let mut install = Command::new(&pip);
            install.args(["install", "--quiet"]);
            let mut has_target = false;
            if let HookSource::Git { checkout, .. } = &hook.source {
                install.arg(checkout);
                has_target = true;
            }
            for dep in &hook.additional_dependencies {
                install.arg(dep);
                has_target = true;
            }
            if has_target {
                run_build_tool(&hook.id, &mut install).await?;
            }

            mark_ready(&dir)?;
        }

        self.store.touch_env(&name, "python")?;
        Ok(Env {
            path_prepend: vec![dir.join("bin")],
            vars: vec![("VIRTUAL_ENV".to_string(), dir.display().to_string())],
        })
    }

    async fn ensure_node(&self, hook: &Hook) -> Result<Env, Error> {
        if hook.language_version.is_some() {
            // Runtime selection is out of scope for node; the host npm decides.
            warn!(hook = %hook.id, "language_version is ignored for node hooks");
        }
        let key = Self::cache_key(hook);
        let name = format!("node-{}", key);
        let dir = self.store.env_dir("node", &key);

        if !is_ready(&dir) {
            discard_partial(&dir)?;
            let npm = which::which("npm")
                .map_err(|_| Error::provision(&hook.id, "npm not found on PATH"))?;
            fs::create_dir_all(&dir)?;
            info!(hook = %hook.id, env = %dir.display(), "provisioning node environment");

            let mut install = Command::new(&npm);
            install
                .args(["install", "--silent", "--no-audit", "--no-fund", "--prefix"])
                .arg(&dir);
            let mut has_target = false;
            if let HookSource::Git { checkout, .. } = &hook.source {
                install.arg(checkout);
                has_target = true;
            }
            for dep in &hook.additional_dependencies {
                install.arg(dep);
                has_target = true;
            }
            if has_target {
                run_build_tool(&hook.id, &mut install).await?;
            }

            mark_ready(&dir)?;
        }

        self.store.touch_env(&name, "node")?;
        Ok(Env {
            path_prepend: vec![dir.join("node_modules").join(".bin")],
            vars: Vec::new(),
        })
    }
}

/// Run a provisioning command, mapping any failure to `EnvProvision`.
async fn run_build_tool(hook: &str, cmd: &mut Command) -> Result<(), Error> {
    let output = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| Error::provision(hook, e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::provision(hook, stderr.trim().to_string()));
    }
    Ok(())
}

fn is_ready(dir: &Path) -> bool {
    dir.join(READY_MARKER).exists()
}

/// Remove a directory left behind by an interrupted build.
fn discard_partial(dir: &Path) -> Result<(), Error> {
    if dir.exists() {
        warn!(env = %dir.display(), "discarding partially built environment");
        fs::remove_dir_all(dir)?;
    }
    Ok(())
}

fn mark_ready(dir: &Path) -> Result<(), Error> {
    fs::write(dir.join(READY_MARKER), b"")?;
    Ok(())
}
