//! Run the hook pipeline for a stage.

use tracing::debug;

use crate::config::ConfigFile;
use crate::engine::{self, report, RunOptions};
use crate::error::{exit, Error};
use crate::git;
use crate::registry::HookRegistry;
use crate::store::Store;

/// Execute the pipeline and return the process exit code.
pub async fn run(mut options: RunOptions) -> Result<i32, Error> {
    let cwd = std::env::current_dir()?;
    let repo_root = git::repo_root(&cwd).await?;
    let config = ConfigFile::load(&repo_root)?;
    options.fail_fast |= config.fail_fast;

    let store = Store::open()?;
    // Held through resolution and provisioning; the engine releases it
    // before execution unless the run contains serial hooks.
    let lock = store.lock().await?;
    let registry = HookRegistry::resolve(&config, &store).await?;

    debug!(repo = %repo_root.display(), stage = %options.stage, "pipeline start");
    let pipeline = engine::run(&repo_root, &config, &registry, &store, lock, &options);

    tokio::select! {
        summary = pipeline => {
            let summary = summary?;
            report::print_summary(&summary, options.verbose);
            Ok(summary.exit_code())
        }
        _ = tokio::signal::ctrl_c() => {
            // Dropping the pipeline future kills any running hooks.
            println!();
            println!("Interrupted.");
            Ok(exit::INTERRUPTED)
        }
    }
}
