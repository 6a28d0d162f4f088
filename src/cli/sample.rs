//! Print a starter configuration.

use crate::config::CONFIG_FILE;

/// Starter config written for a fresh repository.
pub const SAMPLE_CONFIG: &str = r#"# Commit gate configuration. Hooks run top to bottom.
repos:
  - repo: meta
    hooks:
      - id: check-hooks-apply

  - repo: local
    hooks:
      - id: forbid-env-files
        name: Forbid committed .env files
        entry: ".env files carry secrets and stay out of the repository"
        language: fail
        files: '(^|/)\.env(\..*)?$'

  # Pinned upstream hooks. `tollgate autoupdate` bumps the rev lines.
  # - repo: https://github.com/psf/black
  #   rev: 24.4.2
  #   hooks:
  #     - id: black
"#;

/// Run sample-config command.
pub fn run() {
    print!("{}", SAMPLE_CONFIG);
    eprintln!();
    eprintln!("Save this as {} in your repository root.", CONFIG_FILE);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigFile;
    use crate::registry::HookRegistry;
    use crate::store::Store;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_sample_config_parses_and_resolves() {
        let config = ConfigFile::parse(SAMPLE_CONFIG).unwrap();
        assert_eq!(config.repos.len(), 2);

        // Meta and local entries resolve without any checkout.
        let dir = TempDir::new().unwrap();
        let store = Store::at(dir.path().to_path_buf());
        let registry = HookRegistry::resolve(&config, &store).await.unwrap();
        assert!(registry.lookup("check-hooks-apply").is_some());
        assert!(registry.lookup("forbid-env-files").is_some());
    }
}
