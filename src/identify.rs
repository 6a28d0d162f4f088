//! File type classification.
//!
//! Assigns tags to working tree files so hooks can scope themselves with
//! `types`/`types_or`/`exclude_types` instead of regexes. Tags come from
//! the extension, well-known file names, the shebang line of extensionless
//! executables, and a text/binary probe.

use std::collections::HashSet;
use std::fs;
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// Tag carried by every classified path.
pub const TAG_FILE: &str = "file";

/// Extension to tags. An extension may imply several tags.
const EXTENSIONS: &[(&str, &[&str])] = &[
    ("c", &["c"]),
    ("cc", &["c++"]),
    ("cpp", &["c++"]),
    ("cfg", &["ini"]),
    ("css", &["css"]),
    ("go", &["go"]),
    ("h", &["c", "header"]),
    ("hpp", &["c++", "header"]),
    ("html", &["html"]),
    ("ini", &["ini"]),
    ("java", &["java"]),
    ("js", &["javascript"]),
    ("json", &["json"]),
    ("jsx", &["javascript", "jsx"]),
    ("lock", &["lockfile"]),
    ("lua", &["lua"]),
    ("md", &["markdown"]),
    ("proto", &["protobuf"]),
    ("py", &["python"]),
    ("pyi", &["python", "pyi"]),
    ("rb", &["ruby"]),
    ("rs", &["rust"]),
    ("sh", &["shell"]),
    ("bash", &["shell", "bash"]),
    ("zsh", &["shell", "zsh"]),
    ("sql", &["sql"]),
    ("svg", &["svg", "image"]),
    ("png", &["png", "image"]),
    ("jpg", &["jpeg", "image"]),
    ("jpeg", &["jpeg", "image"]),
    ("tf", &["terraform"]),
    ("toml", &["toml"]),
    ("ts", &["typescript"]),
    ("tsx", &["typescript", "tsx"]),
    ("txt", &["plain-text"]),
    ("xml", &["xml"]),
    ("yaml", &["yaml"]),
    ("yml", &["yaml"]),
];

/// Exact file names with a meaning of their own.
const FILENAMES: &[(&str, &[&str])] = &[
    ("Dockerfile", &["dockerfile"]),
    ("Makefile", &["makefile"]),
    ("makefile", &["makefile"]),
    ("Cargo.toml", &["toml", "cargo"]),
    ("Cargo.lock", &["toml", "cargo-lock", "lockfile"]),
    (".gitignore", &["gitignore"]),
];

/// Interpreter name (basename, version suffix stripped) to tags.
const INTERPRETERS: &[(&str, &[&str])] = &[
    ("python", &["python"]),
    ("sh", &["shell"]),
    ("bash", &["shell", "bash"]),
    ("zsh", &["shell", "zsh"]),
    ("node", &["javascript"]),
    ("ruby", &["ruby"]),
    ("perl", &["perl"]),
];

/// Bytes probed when deciding text vs binary.
const PROBE_LEN: usize = 1024;

/// Classify a file on disk.
///
/// `path` must point at the real file; tags are derived from its name and
/// contents. A path that cannot be read (raced deletion) still gets its
/// name-derived tags.
pub fn tags_for_file(path: &Path) -> HashSet<&'static str> {
    let mut tags = tags_from_name(path);
    tags.insert(TAG_FILE);

    let Ok(metadata) = fs::symlink_metadata(path) else {
        return tags;
    };

    if metadata.file_type().is_symlink() {
        tags.insert("symlink");
        return tags;
    }

    let executable = metadata.permissions().mode() & 0o111 != 0;
    tags.insert(if executable {
        "executable"
    } else {
        "non-executable"
    });

    match probe_head(path) {
        Some(head) => {
            if head.contains(&0) {
                tags.insert("binary");
            } else {
                tags.insert("text");
                // Extensionless executables are classified by shebang.
                if executable && path.extension().is_none() {
                    if let Some(interpreter) = parse_shebang(&head) {
                        for (name, interp_tags) in INTERPRETERS {
                            if interpreter == *name {
                                tags.extend(*interp_tags);
                            }
                        }
                    }
                }
            }
        }
        None => {
            tags.insert("text");
        }
    }

    tags
}

/// Tags derivable from the file name alone.
pub fn tags_from_name(path: &Path) -> HashSet<&'static str> {
    let mut tags = HashSet::new();
    tags.insert(TAG_FILE);

    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        for (filename, name_tags) in FILENAMES {
            if name == *filename {
                tags.extend(*name_tags);
            }
        }
    }

    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        let ext = ext.to_ascii_lowercase();
        for (known, ext_tags) in EXTENSIONS {
            if ext == *known {
                tags.extend(*ext_tags);
            }
        }
    }

    tags
}

/// Whether a tag can ever be produced by this classifier.
///
/// Used to reject typos like `types: [pythn]` at resolution time.
pub fn is_known_tag(tag: &str) -> bool {
    if matches!(
        tag,
        "file" | "symlink" | "executable" | "non-executable" | "text" | "binary"
    ) {
        return true;
    }
    EXTENSIONS
        .iter()
        .chain(FILENAMES)
        .chain(INTERPRETERS)
        .any(|(_, tags)| tags.contains(&tag))
}

/// Read up to [`PROBE_LEN`] bytes; `None` for empty or unreadable files.
fn probe_head(path: &Path) -> Option<Vec<u8>> {
    let mut file = fs::File::open(path).ok()?;
    let mut buf = vec![0u8; PROBE_LEN];
    let n = file.read(&mut buf).ok()?;
    if n == 0 {
        return None;
    }
    buf.truncate(n);
    Some(buf)
}

/// Extract the interpreter basename from a `#!` line.
///
/// Handles the `#!/usr/bin/env <interp>` indirection and strips trailing
/// version digits (`python3.12` -> `python`).
fn parse_shebang(head: &[u8]) -> Option<String> {
    let head = std::str::from_utf8(head).ok()?;
    let first_line = head.lines().next()?;
    let rest = first_line.strip_prefix("#!")?;

    let mut words = rest.split_whitespace();
    let command = words.next()?;
    let basename = command.rsplit('/').next()?;

    let name = if basename == "env" {
        words.next()?.rsplit('/').next()?
    } else {
        basename
    };

    let trimmed = name.trim_end_matches(|c: char| c.is_ascii_digit() || c == '.');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::OpenOptionsExt;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_extension_tags() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "main.rs", b"fn main() {}\n");

        let tags = tags_for_file(&path);
        assert!(tags.contains("rust"));
        assert!(tags.contains("text"));
        assert!(tags.contains("file"));
        assert!(tags.contains("non-executable"));
    }

    #[test]
    fn test_filename_tags() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "Dockerfile", b"FROM scratch\n");

        let tags = tags_for_file(&path);
        assert!(tags.contains("dockerfile"));
    }

    #[test]
    fn test_binary_detection() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "blob.bin", &[0u8, 159, 146, 150]);

        let tags = tags_for_file(&path);
        assert!(tags.contains("binary"));
        assert!(!tags.contains("text"));
    }

    #[test]
    fn test_shebang_classification() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deploy");
        {
            use std::io::Write;
            let mut f = fs::OpenOptions::new()
                .create(true)
                .write(true)
                .mode(0o755)
                .open(&path)
                .unwrap();
            f.write_all(b"#!/usr/bin/env python3\nprint('hi')\n").unwrap();
        }

        let tags = tags_for_file(&path);
        assert!(tags.contains("python"));
        assert!(tags.contains("executable"));
    }

    #[test]
    fn test_parse_shebang() {
        assert_eq!(parse_shebang(b"#!/bin/sh\n").as_deref(), Some("sh"));
        assert_eq!(
            parse_shebang(b"#!/usr/bin/env bash\n").as_deref(),
            Some("bash")
        );
        assert_eq!(
            parse_shebang(b"#!/usr/local/bin/python3.12\n").as_deref(),
            Some("python")
        );
        assert_eq!(parse_shebang(b"no shebang here"), None);
    }

    #[test]
    fn test_missing_file_keeps_name_tags() {
        let tags = tags_for_file(Path::new("/nonexistent/thing.py"));
        assert!(tags.contains("python"));
        assert!(tags.contains("file"));
        assert!(!tags.contains("text"));
    }

    #[test]
    fn test_known_tags() {
        assert!(is_known_tag("rust"));
        assert!(is_known_tag("text"));
        assert!(is_known_tag("dockerfile"));
        assert!(!is_known_tag("pythn"));
    }
}
