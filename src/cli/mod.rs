//! CLI commands for tollgate.

pub mod autoupdate;
pub mod clean;
pub mod install;
pub mod run;
pub mod sample;
pub mod validate;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Stage;

/// tollgate - run configured hook pipelines at git trigger points
#[derive(Parser)]
#[command(name = "tollgate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the hooks of a stage
    Run {
        /// Run a single hook id instead of the whole stage
        hook: Option<String>,

        /// Stage to run hooks for
        #[arg(long = "hook-stage", value_enum, default_value_t = Stage::PreCommit)]
        stage: Stage,

        /// Run against every tracked file instead of the staged set
        #[arg(long, short = 'a')]
        all_files: bool,

        /// Run against these files only
        #[arg(long, num_args = 1..)]
        files: Vec<String>,

        /// Old end of a revision range (pre-push)
        #[arg(long, requires = "to_ref")]
        from_ref: Option<String>,

        /// New end of a revision range (pre-push)
        #[arg(long, requires = "from_ref")]
        to_ref: Option<String>,

        /// Stop scheduling new batches after the first failure
        #[arg(long)]
        fail_fast: bool,

        /// Show output of passing hooks too
        #[arg(long, short = 'v')]
        verbose: bool,

        /// Internal: commit message file (set by the commit-msg script)
        #[arg(long, hide = true)]
        commit_msg_file: Option<PathBuf>,
    },

    /// Bump every pinned repo to its latest upstream release
    Autoupdate {
        /// Print planned bumps without rewriting the config
        #[arg(long)]
        dry_run: bool,
    },

    /// Install stage scripts under .git/hooks
    Install {
        /// Stages to install scripts for
        #[arg(long = "stage", value_enum, default_values_t = [Stage::PreCommit])]
        stages: Vec<Stage>,
    },

    /// Remove tollgate scripts from .git/hooks
    Uninstall,

    /// Check the configuration without running anything
    Validate,

    /// Remove cached hook repos and environments
    Clean {
        /// List what would be removed without removing it
        #[arg(long)]
        dry_run: bool,

        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },

    /// Print a starter .tollgate.yaml
    SampleConfig,
}
