//! Clean cached hook repositories and environments.

use std::fs;
use std::io::{self, Write};

use crate::error::Error;
use crate::store::Store;

/// Run clean command.
pub async fn run(dry_run: bool, yes: bool) -> Result<(), Error> {
    let store = Store::open()?;
    clean_store(&store, dry_run, yes).await
}

/// Wipe the store's clones, environments, and usage records.
pub async fn clean_store(store: &Store, dry_run: bool, yes: bool) -> Result<(), Error> {
    if !store.root().exists() {
        println!("Nothing to clean.");
        return Ok(());
    }

    let state = store.load_state();
    println!("Store at {}", store.root().display());
    println!(
        "  {} cached repositories, {} environments, {} on disk",
        state.repos.len(),
        state.envs.len(),
        format_size(store.size_bytes())
    );
    for record in state.repos.values() {
        println!("  repo {} @ {}", record.url, record.rev);
    }
    for (name, record) in &state.envs {
        println!("  env  {} ({})", name, record.language);
    }

    if dry_run {
        println!("Dry run: nothing removed.");
        return Ok(());
    }

    if !yes {
        print!("\nProceed? [y/N] ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Cancelled.");
            return Ok(());
        }
    }

    // Hold the lock so a concurrent run cannot watch its checkout vanish.
    // The lock file lives at the store root, so the root itself stays.
    let _lock = store.lock().await?;
    for dir in [store.repos_dir(), store.envs_dir()] {
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
    }
    let state_path = store.state_path();
    if state_path.exists() {
        fs::remove_file(&state_path)?;
    }

    println!("Clean complete.");
    Ok(())
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }

    #[tokio::test]
    async fn test_clean_removes_store_contents() {
        let dir = TempDir::new().unwrap();
        let store = Store::at(dir.path().join("store"));
        fs::create_dir_all(store.repos_dir().join("repo-a")).unwrap();
        fs::create_dir_all(store.envs_dir().join("python-abc")).unwrap();
        fs::write(store.state_path(), "{}").unwrap();

        clean_store(&store, false, true).await.unwrap();

        assert!(store.root().exists());
        assert!(!store.repos_dir().exists());
        assert!(!store.envs_dir().exists());
        assert!(!store.state_path().exists());
    }

    #[tokio::test]
    async fn test_dry_run_removes_nothing() {
        let dir = TempDir::new().unwrap();
        let store = Store::at(dir.path().join("store"));
        fs::create_dir_all(store.repos_dir().join("repo-a")).unwrap();

        clean_store(&store, true, true).await.unwrap();

        assert!(store.repos_dir().join("repo-a").exists());
    }

    #[tokio::test]
    async fn test_missing_store_is_fine() {
        let dir = TempDir::new().unwrap();
        let store = Store::at(dir.path().join("absent"));
        clean_store(&store, false, true).await.unwrap();
    }
}
