//! Single-hook process execution.
//!
//! Assembles the argv from the hook's `entry` template, appends matched
//! files in argv-safe chunks, runs the process with the environment
//! manager's PATH additions, and classifies the outcome. File
//! modifications are detected by content-hashing the matched set before
//! and after.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tokio::process::Command;
use tracing::debug;

use super::{HookResult, Outcome};
use crate::env::{Env, Language};
use crate::registry::{Hook, HookSource};

/// Byte budget for filenames appended to one invocation.
const MAX_ARG_BYTES: usize = 32 * 1024;

/// Everything needed to run one hook, owned for task spawning.
pub struct ExecTask {
    pub hook: Hook,
    pub env: Env,
    pub files: Vec<String>,
    pub repo_root: PathBuf,
    /// Whole-hook wall clock budget; zero means unlimited.
    pub timeout: Duration,
    /// Hash the file set before and after to catch rewrites.
    pub detect_modified: bool,
}

/// Run one hook to completion and classify the outcome.
pub async fn execute(task: ExecTask) -> HookResult {
    let started = Instant::now();
    debug!(hook = %task.hook.id, files = task.files.len(), "executing hook");
    let (outcome, output) = run_task(&task).await;
    HookResult {
        id: task.hook.id.clone(),
        name: task.hook.name.clone(),
        outcome,
        duration: started.elapsed(),
        output,
        verbose: task.hook.verbose,
    }
}

async fn run_task(task: &ExecTask) -> (Outcome, String) {
    if task.hook.language == Language::Fail {
        let mut output = task.hook.entry.clone();
        if !task.files.is_empty() {
            output.push('\n');
            output.push_str(&task.files.join("\n"));
            output.push('\n');
        }
        return (Outcome::Failed { code: 1 }, output);
    }

    let argv = match build_argv(&task.hook) {
        Ok(argv) => argv,
        Err(message) => return (Outcome::Errored { message }, String::new()),
    };

    let deadline = if task.timeout.is_zero() {
        None
    } else {
        Some(Instant::now() + task.timeout)
    };

    let before = task
        .detect_modified
        .then(|| snapshot(&task.repo_root, &task.files));
    let mut worst = 0;
    let mut output = String::new();
    for chunk in chunks(&task.files, task.hook.pass_filenames) {
        match run_process(task, &argv, chunk, deadline).await {
            Ok((code, text)) => {
                worst = worst.max(code);
                output.push_str(&text);
            }
            Err(message) => return (Outcome::Errored { message }, output),
        }
    }
    let modified = before.is_some_and(|b| snapshot(&task.repo_root, &task.files) != b);

    let outcome = if worst != 0 {
        Outcome::Failed { code: worst }
    } else if modified {
        Outcome::Modified
    } else {
        Outcome::Passed
    };
    (outcome, output)
}

/// Split the entry template and append fixed args.
fn build_argv(hook: &Hook) -> Result<Vec<String>, String> {
    let mut parts =
        shell_words::split(&hook.entry).map_err(|e| format!("entry does not parse: {}", e))?;
    if parts.is_empty() {
        return Err("entry is empty".to_string());
    }
    if hook.language == Language::Script {
        // Scripts ship inside the hook repo; local scripts resolve
        // against the working tree, which is the process cwd.
        if let HookSource::Git { checkout, .. } = &hook.source {
            parts[0] = checkout.join(&parts[0]).to_string_lossy().into_owned();
        }
    }
    parts.extend(hook.args.iter().cloned());
    Ok(parts)
}

/// Partition files into argv-safe chunks, preserving order.
///
/// Always yields at least one chunk so the command runs even with no
/// file arguments.
fn chunks(files: &[String], pass_filenames: bool) -> Vec<&[String]> {
    if !pass_filenames || files.is_empty() {
        return vec![&[]];
    }
    let mut out = Vec::new();
    let mut start = 0;
    let mut bytes = 0;
    for (i, file) in files.iter().enumerate() {
        let cost = file.len() + 1;
        if bytes + cost > MAX_ARG_BYTES && i > start {
            out.push(&files[start..i]);
            start = i;
            bytes = 0;
        }
        bytes += cost;
    }
    out.push(&files[start..]);
    out
}

async fn run_process(
    task: &ExecTask,
    argv: &[String],
    files: &[String],
    deadline: Option<Instant>,
) -> Result<(i32, String), String> {
    let mut cmd = Command::new(&argv[0]);
    cmd.args(&argv[1..])
        .args(files)
        .current_dir(&task.repo_root)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if !task.env.path_prepend.is_empty() {
        cmd.env("PATH", prepend_path(&task.env.path_prepend));
    }
    for (key, value) in &task.env.vars {
        cmd.env(key, value);
    }

    let result = match deadline {
        None => cmd.output().await,
        Some(deadline) => {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(timeout_message(task.timeout));
            }
            match tokio::time::timeout(remaining, cmd.output()).await {
                Ok(result) => result,
                // Dropping the future kills the child (kill_on_drop).
                Err(_) => return Err(timeout_message(task.timeout)),
            }
        }
    };

    match result {
        Ok(out) => {
            let mut text = String::from_utf8_lossy(&out.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&out.stderr));
            Ok((out.status.code().unwrap_or(1), text))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(format!("executable '{}' not found", argv[0]))
        }
        Err(e) => Err(e.to_string()),
    }
}

fn timeout_message(timeout: Duration) -> String {
    format!("timed out after {}s", timeout.as_secs())
}

/// Content digests of the matched files; unreadable files hash as None.
fn snapshot(root: &Path, files: &[String]) -> Vec<Option<Vec<u8>>> {
    files
        .iter()
        .map(|rel| {
            std::fs::read(root.join(rel))
                .ok()
                .map(|data| Sha256::digest(&data).to_vec())
        })
        .collect()
}

fn prepend_path(prepend: &[PathBuf]) -> OsString {
    let current = std::env::var_os("PATH").unwrap_or_default();
    let mut paths: Vec<PathBuf> = prepend.to_vec();
    paths.extend(std::env::split_paths(&current));
    std::env::join_paths(paths).unwrap_or(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Stage;
    use tempfile::TempDir;

    fn task(entry: &str, files: &[&str], root: &Path) -> ExecTask {
        ExecTask {
            hook: Hook {
                id: "t".to_string(),
                name: "t".to_string(),
                entry: entry.to_string(),
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
                require_serial: false,
                pass_filenames: true,
                verbose: false,
                source: HookSource::Local,
            },
            env: Env::default(),
            files: files.iter().map(|s| s.to_string()).collect(),
            repo_root: root.to_path_buf(),
            timeout: Duration::ZERO,
            detect_modified: true,
        }
    }

    #[test]
    fn test_chunks_respect_byte_budget() {
        let long = "x".repeat(15_000);
        let files = vec![long.clone(), long.clone(), long];
        let split = chunks(&files, true);
        assert_eq!(split.len(), 2);
        assert_eq!(split[0].len(), 2);
        assert_eq!(split[1].len(), 1);
    }

    #[test]
    fn test_chunks_without_filenames() {
        let files = vec!["a.txt".to_string()];
        assert_eq!(chunks(&files, false), vec![&[] as &[String]]);
        assert_eq!(chunks(&[], true), vec![&[] as &[String]]);
    }

    #[test]
    fn test_argv_appends_fixed_args() {
        let mut hook = task("tool --flag", &[], Path::new(".")).hook;
        hook.args = vec!["--strict".to_string()];
        let argv = build_argv(&hook).unwrap();
        assert_eq!(argv, vec!["tool", "--flag", "--strict"]);
    }

    #[test]
    fn test_argv_rejects_empty_entry() {
        let hook = task("", &[], Path::new(".")).hook;
        assert!(build_argv(&hook).is_err());
    }

    #[tokio::test]
    async fn test_exit_codes_map_to_outcomes() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();

        let pass = execute(task("true", &["a.txt"], dir.path())).await;
        assert_eq!(pass.outcome, Outcome::Passed);

        let fail = execute(task("false", &["a.txt"], dir.path())).await;
        assert_eq!(fail.outcome, Outcome::Failed { code: 1 });
    }

    #[tokio::test]
    async fn test_missing_executable_is_errored() {
        let dir = TempDir::new().unwrap();
        let result = execute(task("tollgate-no-such-tool", &[], dir.path())).await;
        match result.outcome {
            Outcome::Errored { message } => assert!(message.contains("not found")),
            other => panic!("expected Errored, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_modification_detected_by_content_hash() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "before\n").unwrap();

        let result = execute(task(
            r#"sh -c "echo after >> a.txt""#,
            &["a.txt"],
            dir.path(),
        ))
        .await;
        assert_eq!(result.outcome, Outcome::Modified);
    }

    #[tokio::test]
    async fn test_rewrites_pass_with_detection_off() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("m.txt"), "before\n").unwrap();

        let mut t = task(r#"sh -c "echo after >> m.txt""#, &["m.txt"], dir.path());
        t.detect_modified = false;
        let result = execute(t).await;
        assert_eq!(result.outcome, Outcome::Passed);
    }

    #[tokio::test]
    async fn test_timeout_kills_the_hook() {
        let dir = TempDir::new().unwrap();
        let mut t = task("sleep 5", &[], dir.path());
        t.timeout = Duration::from_millis(300);
        t.hook.pass_filenames = false;

        let started = Instant::now();
        let result = execute(t).await;
        assert!(started.elapsed() < Duration::from_secs(3));
        match result.outcome {
            Outcome::Errored { message } => assert!(message.contains("timed out")),
            other => panic!("expected Errored, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fail_language_lists_matched_files() {
        let dir = TempDir::new().unwrap();
        let mut t = task("do not commit secrets", &["creds.env"], dir.path());
        t.hook.language = Language::Fail;

        let result = execute(t).await;
        assert_eq!(result.outcome, Outcome::Failed { code: 1 });
        assert!(result.output.contains("do not commit secrets"));
        assert!(result.output.contains("creds.env"));
    }

    #[tokio::test]
    async fn test_output_captures_both_streams() {
        let dir = TempDir::new().unwrap();
        let result = execute(task(
            r#"sh -c "echo out; echo err >&2""#,
            &[],
            dir.path(),
        ))
        .await;
        assert!(result.output.contains("out"));
        assert!(result.output.contains("err"));
    }
}
