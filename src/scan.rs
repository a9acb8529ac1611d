use ignore::WalkBuilder;
use std::path::{Path, PathBuf};

use crate::error::{LoaderError, Result};

/// Recursively collects every non-directory file under `root`, visiting all
/// siblings at every level. Paths come back sorted by file name per directory
/// so registration order is stable across runs.
pub fn collect(root: &Path) -> Result<Vec<PathBuf>> {
    if root.as_os_str().is_empty() {
        return Err(LoaderError::invalid("directory name is empty"));
    }
    if !root.is_dir() {
        return Err(LoaderError::invalid(format!(
            "not a directory: {}",
            root.display()
        )));
    }

    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(root = %root.display(), error = %err, "skipping unreadable path");
                continue;
            }
        };
        if entry.depth() == 0 {
            continue;
        }
        if entry.file_type().is_some_and(|t| t.is_dir()) {
            continue;
        }
        tracing::debug!(path = %entry.path().display(), "collected archive candidate");
        files.push(entry.into_path());
    }

    if files.is_empty() {
        tracing::debug!(root = %root.display(), "directory does not contain files");
    }
    Ok(files)
}

/// Collects each root of a `delimiter`-joined list independently, in list
/// order. Empty segments are skipped.
pub fn collect_joined(roots: &str, delimiter: &str) -> Result<Vec<PathBuf>> {
    if roots.trim().is_empty() {
        return Err(LoaderError::invalid("directory list is empty"));
    }
    if delimiter.is_empty() {
        return Err(LoaderError::invalid("directory delimiter is empty"));
    }

    let mut files = Vec::new();
    for root in roots.split(delimiter).filter(|r| !r.trim().is_empty()) {
        tracing::debug!(directory = root, "collecting directory");
        files.extend(collect(Path::new(root.trim()))?);
    }
    Ok(files)
}

/// The platform's `PATH`-style list separator.
pub fn default_delimiter() -> &'static str {
    if cfg!(windows) { ";" } else { ":" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn collect_visits_every_sibling_subtree() -> anyhow::Result<()> {
        let base = tempfile::tempdir()?;
        let root = base.path();
        fs::create_dir_all(root.join("dirA"))?;
        fs::create_dir_all(root.join("dirB/nested"))?;
        fs::write(root.join("dirA/jarX.jar"), b"x")?;
        fs::write(root.join("fileY.jar"), b"y")?;
        fs::write(root.join("dirB/jarZ.jar"), b"z")?;
        fs::write(root.join("dirB/nested/deep.jar"), b"d")?;

        let found = collect(root)?;
        let rel: Vec<String> = found
            .iter()
            .map(|p| {
                p.strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect();
        assert_eq!(
            rel,
            vec![
                "dirA/jarX.jar",
                "dirB/jarZ.jar",
                "dirB/nested/deep.jar",
                "fileY.jar"
            ]
        );
        Ok(())
    }

    #[test]
    fn collect_includes_hidden_and_ignored_files() -> anyhow::Result<()> {
        let base = tempfile::tempdir()?;
        fs::write(base.path().join(".hidden.jar"), b"h")?;
        fs::write(base.path().join(".gitignore"), b"*.jar\n")?;
        fs::write(base.path().join("plain.jar"), b"p")?;

        let found = collect(base.path())?;
        assert_eq!(found.len(), 3);
        Ok(())
    }

    #[test]
    fn collect_rejects_missing_root() {
        assert!(matches!(
            collect(Path::new("")),
            Err(LoaderError::InvalidInput(_))
        ));
        assert!(matches!(
            collect(Path::new("/definitely/not/here/class-cache")),
            Err(LoaderError::InvalidInput(_))
        ));
    }

    #[test]
    fn collect_joined_handles_each_root() -> anyhow::Result<()> {
        let a = tempfile::tempdir()?;
        let b = tempfile::tempdir()?;
        fs::write(a.path().join("a.jar"), b"a")?;
        fs::write(b.path().join("b.jar"), b"b")?;

        let joined = format!("{};;{}", a.path().display(), b.path().display());
        let found = collect_joined(&joined, ";")?;
        assert_eq!(found, vec![a.path().join("a.jar"), b.path().join("b.jar")]);

        assert!(collect_joined("", ";").is_err());
        assert!(collect_joined(&joined, "").is_err());
        Ok(())
    }
}
