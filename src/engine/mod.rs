//! Execution engine.
//!
//! Takes the hooks resolved for a stage, computes each hook's file set,
//! provisions environments, and runs everything in declaration order.
//! Consecutive hooks without `require_serial` form a parallel batch
//! bounded by a worker cap; a `require_serial` hook runs alone holding
//! the worktree write guard. Batch boundaries never reorder hooks and
//! results always come back in declaration order, so two runs over an
//! unchanged tree produce the same report.

mod exec;
mod meta;
pub mod report;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::{ConfigFile, Stage};
use crate::env::{Env, EnvManager};
use crate::error::{exit, Error};
use crate::git;
use crate::registry::{Hook, HookRegistry, HookSource};
use crate::selector::FileSelector;
use crate::store::{Store, StoreLock};

/// What to run and against which files.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub stage: Stage,
    /// Restrict the run to a single hook id.
    pub hook: Option<String>,
    /// Run against every tracked file instead of the staged set.
    pub all_files: bool,
    /// Explicit file list, intersected with tracked files.
    pub files: Vec<String>,
    pub from_ref: Option<String>,
    pub to_ref: Option<String>,
    /// Commit message file; set by the installed commit-msg script.
    pub commit_msg_file: Option<PathBuf>,
    pub fail_fast: bool,
    pub verbose: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            stage: Stage::PreCommit,
            hook: None,
            all_files: false,
            files: Vec::new(),
            from_ref: None,
            to_ref: None,
            commit_msg_file: None,
            fail_fast: false,
            verbose: false,
        }
    }
}

/// Terminal state of one hook in one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    Failed { code: i32 },
    /// The tool exited 0 but rewrote files; treated as failing.
    Modified,
    Skipped { reason: String },
    /// The hook could not be executed at all.
    Errored { message: String },
}

impl Outcome {
    /// Whether this outcome blocks the triggering action.
    pub fn blocks(&self) -> bool {
        matches!(
            self,
            Outcome::Failed { .. } | Outcome::Modified | Outcome::Errored { .. }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Passed => "Passed",
            Outcome::Failed { .. } => "Failed",
            Outcome::Modified => "Modified",
            Outcome::Skipped { .. } => "Skipped",
            Outcome::Errored { .. } => "Errored",
        }
    }
}

/// Per-hook result, kept in declaration order.
#[derive(Debug, Clone)]
pub struct HookResult {
    pub id: String,
    pub name: String,
    pub outcome: Outcome,
    pub duration: Duration,
    pub output: String,
    /// Show output even on success.
    pub verbose: bool,
}

/// Aggregate of one run; discarded after reporting.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub results: Vec<HookResult>,
}

impl RunSummary {
    /// Whether anything failed, errored, or modified files.
    pub fn blocking(&self) -> bool {
        self.results.iter().any(|r| r.outcome.blocks())
    }

    pub fn exit_code(&self) -> i32 {
        if self.blocking() {
            exit::FAILURE
        } else {
            exit::OK
        }
    }
}

/// One hook prepared for execution.
struct HookPlan<'r> {
    hook: &'r Hook,
    files: Vec<String>,
    env: Env,
    /// Outcome decided before execution (skip, provisioning failure).
    preset: Option<HookResult>,
}

/// Run the pipeline for the given options.
///
/// The store lock must be held on entry; it is released before execution
/// unless the run contains serial hooks, which keeps serial hooks from
/// overlapping across concurrent invocations.
pub async fn run(
    repo_root: &Path,
    config: &ConfigFile,
    registry: &HookRegistry,
    store: &Store,
    lock: StoreLock,
    options: &RunOptions,
) -> Result<RunSummary, Error> {
    let candidates = candidate_files(repo_root, options).await?;
    let hooks = select_hooks(registry, options)?;
    debug!(
        stage = %options.stage,
        hooks = hooks.len(),
        candidates = candidates.len(),
        "starting run"
    );

    // Meta hooks judge every configured hook against the whole tree.
    let tree_files = if hooks
        .iter()
        .any(|h| matches!(h.source, HookSource::Meta(_)))
    {
        git::all_files(repo_root).await?
    } else {
        Vec::new()
    };

    let mut plans = build_plans(repo_root, config, store, &hooks, &candidates, options).await?;

    // Serial hooks stay under the store lock for their whole run; a
    // purely parallel run releases it before executing anything.
    let has_serial = plans
        .iter()
        .any(|p| p.hook.require_serial && p.preset.is_none());
    let mut lock = Some(lock);
    if !has_serial {
        lock = None;
    }

    let results = execute_batches(repo_root, config, registry, &tree_files, &mut plans, options).await;
    drop(lock);

    Ok(RunSummary { results })
}

/// Hooks for the requested stage, optionally narrowed to one id.
fn select_hooks<'r>(
    registry: &'r HookRegistry,
    options: &RunOptions,
) -> Result<Vec<&'r Hook>, Error> {
    let mut hooks = registry.hooks_for_stage(options.stage);
    if let Some(id) = &options.hook {
        hooks.retain(|h| &h.id == id);
        if hooks.is_empty() {
            return Err(Error::config(format!(
                "no hook with id '{}' in stage '{}'",
                id, options.stage
            )));
        }
    }
    Ok(hooks)
}

/// The candidate file set for this run, repo-relative.
async fn candidate_files(repo_root: &Path, options: &RunOptions) -> Result<Vec<String>, Error> {
    if let Some(msg_file) = &options.commit_msg_file {
        return Ok(vec![msg_file.to_string_lossy().into_owned()]);
    }
    if !options.files.is_empty() {
        let requested: HashSet<&str> = options.files.iter().map(String::as_str).collect();
        let tracked = git::all_files(repo_root).await?;
        return Ok(tracked
            .into_iter()
            .filter(|f| requested.contains(f.as_str()))
            .collect());
    }
    if let (Some(from), Some(to)) = (&options.from_ref, &options.to_ref) {
        return git::changed_files(repo_root, from, to).await;
    }
    if options.all_files {
        return git::all_files(repo_root).await;
    }
    git::staged_files(repo_root).await
}

/// Compute file sets and provision environments.
///
/// A provisioning failure becomes that hook's Errored preset; siblings
/// are unaffected.
async fn build_plans<'r>(
    repo_root: &Path,
    config: &ConfigFile,
    store: &Store,
    hooks: &[&'r Hook],
    candidates: &[String],
    options: &RunOptions,
) -> Result<Vec<HookPlan<'r>>, Error> {
    let manager = EnvManager::new(store);
    let mut plans = Vec::with_capacity(hooks.len());

    for &hook in hooks {
        // Commit-msg hooks get the message file directly; type selection
        // would never match it.
        let files = if options.commit_msg_file.is_some() {
            candidates.to_vec()
        } else {
            let selector = FileSelector::for_hook(hook, config.exclude.as_deref())?;
            selector.select(repo_root, candidates)
        };

        if files.is_empty() && !hook.always_run {
            plans.push(HookPlan {
                hook,
                files,
                env: Env::default(),
                preset: Some(preset_result(hook, Outcome::Skipped {
                    reason: "no files to check".to_string(),
                })),
            });
            continue;
        }

        match manager.ensure(hook).await {
            Ok(env) => plans.push(HookPlan {
                hook,
                files,
                env,
                preset: None,
            }),
            Err(e) => plans.push(HookPlan {
                hook,
                files,
                env: Env::default(),
                preset: Some(preset_result(hook, Outcome::Errored {
                    message: e.to_string(),
                })),
            }),
        }
    }

    Ok(plans)
}

fn preset_result(hook: &Hook, outcome: Outcome) -> HookResult {
    HookResult {
        id: hook.id.clone(),
        name: hook.name.clone(),
        outcome,
        duration: Duration::ZERO,
        output: String::new(),
        verbose: hook.verbose,
    }
}

/// Split plan indices into the execution schedule.
///
/// Runs of parallel hooks become one batch; each serial hook is its own
/// batch. Indices stay in declaration order throughout.
fn batches(plans: &[HookPlan<'_>]) -> Vec<Vec<usize>> {
    let mut out: Vec<Vec<usize>> = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    for (i, plan) in plans.iter().enumerate() {
        if plan.hook.require_serial {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            out.push(vec![i]);
        } else {
            current.push(i);
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn worker_count(config: &ConfigFile) -> usize {
    config
        .max_workers
        .filter(|&n| n > 0)
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
}

async fn execute_batches(
    repo_root: &Path,
    config: &ConfigFile,
    registry: &HookRegistry,
    tree_files: &[String],
    plans: &mut [HookPlan<'_>],
    options: &RunOptions,
) -> Vec<HookResult> {
    let worktree = Arc::new(RwLock::new(()));
    let semaphore = Arc::new(Semaphore::new(worker_count(config)));
    let timeout = Duration::from_secs(config.hook_timeout_secs);
    let mut results: Vec<Option<HookResult>> = (0..plans.len()).map(|_| None).collect();

    let schedule = batches(plans);
    for batch in &schedule {
        let mut spawned: JoinSet<(usize, HookResult)> = JoinSet::new();

        for &i in batch {
            if let Some(preset) = plans[i].preset.take() {
                results[i] = Some(preset);
                continue;
            }

            if let HookSource::Meta(kind) = &plans[i].hook.source {
                let started = Instant::now();
                let (outcome, output) =
                    meta::run_meta(*kind, config, registry, repo_root, tree_files);
                let mut result = preset_result(plans[i].hook, outcome);
                result.duration = started.elapsed();
                result.output = output;
                results[i] = Some(result);
                continue;
            }

            let task = exec::ExecTask {
                hook: plans[i].hook.clone(),
                env: plans[i].env.clone(),
                files: plans[i].files.clone(),
                repo_root: repo_root.to_path_buf(),
                timeout,
                // Message-file runs expect hooks to rewrite the file.
                detect_modified: options.commit_msg_file.is_none(),
            };

            if plans[i].hook.require_serial {
                // Alone in its batch; prior read guards are all released.
                let _guard = worktree.write().await;
                results[i] = Some(exec::execute(task).await);
            } else {
                let sem = semaphore.clone();
                let wt = worktree.clone();
                spawned.spawn(async move {
                    let _permit = sem.acquire_owned().await.ok();
                    let _read = wt.read().await;
                    (i, exec::execute(task).await)
                });
            }
        }

        while let Some(joined) = spawned.join_next().await {
            match joined {
                Ok((i, result)) => results[i] = Some(result),
                Err(e) => warn!(error = %e, "hook task failed"),
            }
        }

        let batch_blocked = batch.iter().any(|&i| {
            results[i]
                .as_ref()
                .map(|r| r.outcome.blocks())
                .unwrap_or(false)
        });
        if batch_blocked && options.fail_fast {
            let resume = batch.iter().copied().max().unwrap_or(0) + 1;
            for (j, plan) in plans.iter().enumerate().skip(resume) {
                results[j] = Some(preset_result(plan.hook, Outcome::Skipped {
                    reason: "fail-fast".to_string(),
                }));
            }
            break;
        }
    }

    results
        .into_iter()
        .enumerate()
        .map(|(i, r)| {
            r.unwrap_or_else(|| {
                preset_result(plans[i].hook, Outcome::Errored {
                    message: "hook task was lost".to_string(),
                })
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigFile;
    use crate::env::Language;
    use tempfile::TempDir;
    use tokio::process::Command;

    fn plan_for(hook: &Hook) -> HookPlan<'_> {
        HookPlan {
            hook,
            files: Vec::new(),
            env: Env::default(),
            preset: None,
        }
    }

    fn local_hook(id: &str, serial: bool) -> Hook {
        Hook {
            id: id.to_string(),
            name: id.to_string(),
            entry: "true".to_string(),
            language: Language::System,
            language_version: None,
            args: Vec::new(),
            files: None,
            exclude: None,
            types: Vec::new(),
            types_or: Vec::new(),
            exclude_types: Vec::new(),
            stages: vec![Stage::PreCommit],
            additional_dependencies: Vec::new(),
            always_run: false,
            require_serial: serial,
            pass_filenames: true,
            verbose: false,
            source: HookSource::Local,
        }
    }

    #[test]
    fn test_batches_split_on_serial_hooks() {
        let hooks = vec![
            local_hook("a", false),
            local_hook("b", false),
            local_hook("c", true),
            local_hook("d", false),
        ];
        let plans: Vec<_> = hooks.iter().map(plan_for).collect();
        let schedule = batches(&plans);
        assert_eq!(schedule, vec![vec![0, 1], vec![2], vec![3]]);
    }

    #[test]
    fn test_batches_all_parallel_is_one_batch() {
        let hooks = vec![local_hook("a", false), local_hook("b", false)];
        let plans: Vec<_> = hooks.iter().map(plan_for).collect();
        assert_eq!(batches(&plans), vec![vec![0, 1]]);
    }

    fn git_missing() -> bool {
        which::which("git").is_err()
    }

    async fn git(repo: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(repo)
            .output()
            .await
            .unwrap();
        assert!(status.status.success(), "git {:?} failed", args);
    }

    /// Temp git repo with the given files, all staged.
    async fn setup_repo(files: &[(&str, &str)]) -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        git(&root, &["init", "--quiet", "."]).await;
        git(&root, &["config", "user.email", "t@example.com"]).await;
        git(&root, &["config", "user.name", "t"]).await;
        for (name, content) in files {
            if let Some(parent) = root.join(name).parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(root.join(name), content).unwrap();
        }
        git(&root, &["add", "."]).await;
        (dir, root)
    }

    async fn run_config(
        root: &Path,
        yaml: &str,
        options: &RunOptions,
    ) -> Result<RunSummary, Error> {
        let config = ConfigFile::parse(yaml).unwrap();
        let store_dir = TempDir::new().unwrap();
        let store = Store::at(store_dir.path().to_path_buf());
        let registry = HookRegistry::resolve(&config, &store).await?;
        let lock = store.lock().await?;
        run(root, &config, &registry, &store, lock, options).await
    }

    #[tokio::test]
    async fn test_empty_selection_never_invokes_command() {
        if git_missing() {
            return;
        }
        let (_dir, root) = setup_repo(&[("notes.txt", "hello")]).await;
        let yaml = r#"
repos:
  - repo: local
    hooks:
      - id: marker
        entry: sh -c "touch ran.marker"
        language: system
        files: '\.py$'
"#;
        let summary = run_config(&root, yaml, &RunOptions::default())
            .await
            .unwrap();

        assert!(matches!(
            summary.results[0].outcome,
            Outcome::Skipped { .. }
        ));
        assert!(!root.join("ran.marker").exists());
        assert_eq!(summary.exit_code(), exit::OK);
    }

    #[tokio::test]
    async fn test_modifying_hook_fails_the_run() {
        if git_missing() {
            return;
        }
        let (_dir, root) = setup_repo(&[("a.txt", "original\n")]).await;
        let yaml = r#"
repos:
  - repo: local
    hooks:
      - id: rewriter
        entry: sh -c "echo extra >> a.txt"
        language: system
        pass_filenames: false
"#;
        let summary = run_config(&root, yaml, &RunOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.results[0].outcome, Outcome::Modified);
        assert_eq!(summary.exit_code(), exit::FAILURE);
    }

    #[tokio::test]
    async fn test_fail_fast_skips_later_hooks() {
        if git_missing() {
            return;
        }
        let (_dir, root) = setup_repo(&[("a.txt", "x")]).await;
        let yaml = r#"
repos:
  - repo: local
    hooks:
      - id: boom
        entry: "false"
        language: system
        require_serial: true
      - id: after
        entry: "true"
        language: system
"#;
        let options = RunOptions {
            fail_fast: true,
            ..RunOptions::default()
        };
        let summary = run_config(&root, yaml, &options).await.unwrap();

        assert!(matches!(summary.results[0].outcome, Outcome::Failed { .. }));
        assert_eq!(
            summary.results[1].outcome,
            Outcome::Skipped {
                reason: "fail-fast".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_repeated_runs_agree() {
        if git_missing() {
            return;
        }
        let (_dir, root) = setup_repo(&[("a.txt", "x"), ("b.rs", "fn main() {}")]).await;
        let yaml = r#"
repos:
  - repo: local
    hooks:
      - id: ok
        entry: "true"
        language: system
      - id: rust-only
        entry: "true"
        language: system
        types: [rust]
      - id: bad
        entry: "false"
        language: system
"#;
        let first = run_config(&root, yaml, &RunOptions::default())
            .await
            .unwrap();
        let second = run_config(&root, yaml, &RunOptions::default())
            .await
            .unwrap();

        let shape = |s: &RunSummary| {
            s.results
                .iter()
                .map(|r| (r.id.clone(), r.outcome.label()))
                .collect::<Vec<_>>()
        };
        assert_eq!(shape(&first), shape(&second));
        assert_eq!(first.exit_code(), exit::FAILURE);
    }

    #[tokio::test]
    async fn test_commit_msg_file_bypasses_selection() {
        // No git involved: the message file is the whole candidate set.
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let msg_path = root.join("COMMIT_EDITMSG");
        std::fs::write(&msg_path, "feat: something\n").unwrap();

        let yaml = r#"
repos:
  - repo: local
    hooks:
      - id: msg-check
        entry: sh -c "cp \"$1\" witness" sh
        language: system
        files: '\.rs$'
        stages: [commit-msg]
"#;
        let options = RunOptions {
            stage: Stage::CommitMsg,
            commit_msg_file: Some(msg_path),
            ..RunOptions::default()
        };
        let summary = run_config(&root, yaml, &options).await.unwrap();

        assert_eq!(summary.results[0].outcome, Outcome::Passed);
        let witness = std::fs::read_to_string(root.join("witness")).unwrap();
        assert_eq!(witness, "feat: something\n");
    }

    #[tokio::test]
    async fn test_commit_msg_rewrite_passes() {
        // Trailer-adding hooks rewrite the message file; that is not a
        // modification of the worktree.
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let msg_path = root.join("COMMIT_EDITMSG");
        std::fs::write(&msg_path, "feat: something\n").unwrap();

        let yaml = r#"
repos:
  - repo: local
    hooks:
      - id: add-trailer
        entry: sh -c "echo extra >> \"$1\"" sh
        language: system
        stages: [commit-msg]
"#;
        let options = RunOptions {
            stage: Stage::CommitMsg,
            commit_msg_file: Some(msg_path.clone()),
            ..RunOptions::default()
        };
        let summary = run_config(&root, yaml, &options).await.unwrap();

        assert_eq!(summary.results[0].outcome, Outcome::Passed);
        assert_eq!(summary.exit_code(), exit::OK);
        let message = std::fs::read_to_string(&msg_path).unwrap();
        assert!(message.ends_with("extra\n"));
    }

    #[tokio::test]
    async fn test_unknown_hook_id_is_a_config_error() {
        let dir = TempDir::new().unwrap();
        let yaml = r#"
repos:
  - repo: local
    hooks:
      - id: real
        entry: "true"
        language: system
"#;
        let options = RunOptions {
            hook: Some("ghost".to_string()),
            // Avoid touching git for candidates.
            commit_msg_file: Some(dir.path().join("msg")),
            ..RunOptions::default()
        };
        let err = run_config(dir.path(), yaml, &options).await.unwrap_err();
        assert!(err.to_string().contains("no hook with id"));
    }

    #[tokio::test]
    async fn test_missing_executable_is_errored_not_fatal() {
        if git_missing() {
            return;
        }
        let (_dir, root) = setup_repo(&[("a.txt", "x")]).await;
        let yaml = r#"
repos:
  - repo: local
    hooks:
      - id: ghost-tool
        entry: tollgate-definitely-not-installed
        language: system
      - id: fine
        entry: "true"
        language: system
"#;
        let summary = run_config(&root, yaml, &RunOptions::default())
            .await
            .unwrap();

        assert!(matches!(
            summary.results[0].outcome,
            Outcome::Errored { .. }
        ));
        assert_eq!(summary.results[1].outcome, Outcome::Passed);
        assert_eq!(summary.exit_code(), exit::FAILURE);
    }

    #[tokio::test]
    async fn test_serial_run_holds_store_lock_until_done() {
        if git_missing() {
            return;
        }
        let (_dir, root) = setup_repo(&[("a.txt", "x")]).await;
        let yaml = r#"
repos:
  - repo: local
    hooks:
      - id: slow-serial
        entry: sh -c "sleep 1"
        language: system
        require_serial: true
        pass_filenames: false
"#;
        let config = ConfigFile::parse(yaml).unwrap();
        let store_dir = TempDir::new().unwrap();
        let store = Store::at(store_dir.path().to_path_buf());
        let registry = HookRegistry::resolve(&config, &store).await.unwrap();
        let lock = store.lock().await.unwrap();

        let options = RunOptions::default();
        let pipeline = run(&root, &config, &registry, &store, lock, &options);
        let contender = store.clone();
        let during = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            tokio::time::timeout(Duration::from_millis(250), contender.lock())
                .await
                .is_ok()
        };

        let (summary, acquired_during) = tokio::join!(pipeline, during);
        assert!(!acquired_during, "lock was free while a serial hook ran");
        assert_eq!(summary.unwrap().results[0].outcome, Outcome::Passed);

        // Released once the run is over.
        let after = tokio::time::timeout(Duration::from_secs(5), store.lock()).await;
        assert!(after.is_ok());
    }

    #[tokio::test]
    async fn test_parallel_run_frees_store_lock_during_execution() {
        if git_missing() {
            return;
        }
        let (_dir, root) = setup_repo(&[("a.txt", "x")]).await;
        let yaml = r#"
repos:
  - repo: local
    hooks:
      - id: slow-parallel
        entry: sh -c "sleep 1"
        language: system
        pass_filenames: false
"#;
        let config = ConfigFile::parse(yaml).unwrap();
        let store_dir = TempDir::new().unwrap();
        let store = Store::at(store_dir.path().to_path_buf());
        let registry = HookRegistry::resolve(&config, &store).await.unwrap();
        let lock = store.lock().await.unwrap();

        let options = RunOptions::default();
        let pipeline = run(&root, &config, &registry, &store, lock, &options);
        let contender = store.clone();
        let during = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            tokio::time::timeout(Duration::from_secs(5), contender.lock())
                .await
                .is_ok()
        };

        let (summary, acquired_during) = tokio::join!(pipeline, during);
        assert!(acquired_during, "lock stayed held through a parallel run");
        assert_eq!(summary.unwrap().results[0].outcome, Outcome::Passed);
    }
}
