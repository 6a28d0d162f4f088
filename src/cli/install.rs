//! Git hook script installation and removal.
//!
//! `install` writes a small `/bin/sh` script per stage under the
//! repository's hooks directory; each script hands off to `tollgate run`
//! with the stage-appropriate arguments. Existing foreign hooks are
//! preserved by appending. `uninstall` removes exactly the sections
//! install wrote.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use tracing::info;

use crate::config::{ConfigFile, Stage};
use crate::error::Error;
use crate::git;

/// Marker comment every generated script carries.
const MARKER: &str = "tollgate hook (auto-installed)";

/// Pre-push scripts translate git's stdin protocol into run flags.
const PRE_PUSH_BODY: &str = r#"z=0000000000000000000000000000000000000000
while read local_ref local_sha remote_ref remote_sha; do
    if [ "$local_sha" = "$z" ]; then
        continue
    fi
    if [ "$remote_sha" = "$z" ]; then
        exec tollgate run --hook-stage pre-push --all-files
    fi
    exec tollgate run --hook-stage pre-push --from-ref "$remote_sha" --to-ref "$local_sha"
done
exit 0
"#;

fn script_header() -> String {
    format!("#!/bin/sh\n# {}\n", MARKER)
}

/// Full script content for one stage.
fn script_for(stage: Stage) -> String {
    let body = match stage {
        Stage::PreCommit | Stage::PostCommit => {
            format!("exec tollgate run --hook-stage {}\n", stage)
        }
        Stage::CommitMsg => {
            "exec tollgate run --hook-stage commit-msg --commit-msg-file \"$1\"\n".to_string()
        }
        Stage::PrePush => PRE_PUSH_BODY.to_string(),
        // Callers reject manual before getting here.
        Stage::Manual => String::new(),
    };
    format!("{}{}", script_header(), body)
}

/// Install stage scripts for the current repository.
pub async fn run(stages: &[Stage]) -> Result<(), Error> {
    let cwd = std::env::current_dir()?;
    let repo_root = git::repo_root(&cwd).await?;
    // A broken config should surface now, not mid-commit.
    ConfigFile::load(&repo_root)?;

    let hooks_dir = git::hooks_dir(&repo_root).await?;
    fs::create_dir_all(&hooks_dir)?;

    for &stage in stages {
        let name = match stage.git_hook_name() {
            Some(name) => name,
            None => {
                return Err(Error::config(
                    "the manual stage has no git hook to install",
                ));
            }
        };
        install_script(&hooks_dir.join(name), &script_for(stage))?;
        println!("Installed {} hook", name);
    }
    Ok(())
}

/// Remove tollgate scripts from the current repository.
pub async fn uninstall() -> Result<(), Error> {
    let cwd = std::env::current_dir()?;
    let repo_root = git::repo_root(&cwd).await?;
    let hooks_dir = git::hooks_dir(&repo_root).await?;
    if !hooks_dir.exists() {
        println!("No hooks installed.");
        return Ok(());
    }

    let mut removed = 0;
    for stage in Stage::installable() {
        if let Some(name) = stage.git_hook_name() {
            if remove_script(&hooks_dir.join(name))? {
                println!("Removed {} hook", name);
                removed += 1;
            }
        }
    }
    if removed == 0 {
        println!("No tollgate hooks found.");
    }
    Ok(())
}

/// Write a single script, preserving any existing foreign hook.
fn install_script(path: &Path, content: &str) -> Result<(), Error> {
    let final_content = if path.exists() {
        let existing = fs::read_to_string(path)?;

        // Already installed
        if existing.contains(MARKER) {
            info!(path = %path.display(), "hook already installed");
            return Ok(());
        }

        // Append to the existing foreign hook
        format!("{}\n\n{}", existing.trim(), content)
    } else {
        content.to_string()
    };

    fs::write(path, &final_content)?;

    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms)?;

    Ok(())
}

/// Remove our section from a hook script. Returns whether anything was
/// removed.
fn remove_script(path: &Path) -> Result<bool, Error> {
    if !path.exists() {
        return Ok(false);
    }
    let content = fs::read_to_string(path)?;
    let header = script_header();
    let idx = match content.find(&header) {
        Some(idx) => idx,
        None => return Ok(false),
    };

    if idx == 0 {
        fs::remove_file(path)?;
    } else {
        // We were appended to a foreign hook; cut our section off.
        let kept = content[..idx].trim_end();
        fs::write(path, format!("{}\n", kept))?;
    }
    Ok(true)
}
