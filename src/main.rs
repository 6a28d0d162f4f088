//! tollgate binary - run configured hook pipelines at git trigger points.

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tollgate::cli::{self, Cli, Commands};
use tollgate::engine::RunOptions;
use tollgate::Error;

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("tollgate=warn".parse().unwrap()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            hook,
            stage,
            all_files,
            files,
            from_ref,
            to_ref,
            fail_fast,
            verbose,
            commit_msg_file,
        } => {
            let options = RunOptions {
                stage,
                hook,
                all_files,
                files,
                from_ref,
                to_ref,
                commit_msg_file,
                fail_fast,
                verbose,
            };
            let exit_code = cli::run::run(options).await?;
            if exit_code != 0 {
                std::process::exit(exit_code);
            }
        }
        Commands::Autoupdate { dry_run } => {
            cli::autoupdate::run(dry_run).await?;
        }
        Commands::Install { stages } => {
            cli::install::run(&stages).await?;
        }
        Commands::Uninstall => {
            cli::install::uninstall().await?;
        }
        Commands::Validate => {
            cli::validate::run().await?;
        }
        Commands::Clean { dry_run, yes } => {
            cli::clean::run(dry_run, yes).await?;
        }
        Commands::SampleConfig => {
            cli::sample::run();
        }
    }

    Ok(())
}
