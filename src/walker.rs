use std::{
    path::{Path, PathBuf},
    time::SystemTime,
};

use globset::GlobMatcher;

use crate::error::{Error, Result};

/// A discovered source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// Path relative to the directory it was found in (the file name for
    /// files given directly).
    pub relative_path: PathBuf,
    /// Fully resolved absolute path, used as the source id.
    pub absolute_path: PathBuf,
    /// Last modification time as seconds since the Unix epoch.
    pub mtime: u64,
}

impl DiscoveredFile {
    pub fn source_id(&self) -> String {
        self.absolute_path.display().to_string()
    }
}

/// Supported file extensions for directory discovery.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "md", "txt"];

/// Resolve command-line inputs into source files.
///
/// Files are taken as given, whatever their extension. Directories are
/// walked recursively for supported files, skipping hidden entries; the
/// optional `filter` is matched against paths relative to that directory.
/// Results are deduplicated and sorted by absolute path.
pub fn collect_inputs(
    inputs: &[PathBuf],
    filter: Option<&GlobMatcher>,
) -> Result<Vec<DiscoveredFile>> {
    let mut results = Vec::new();

    for input in inputs {
        if input.is_dir() {
            results.extend(discover_files(input)?.into_iter().filter(|f| {
                filter.is_none_or(|g| g.is_match(&f.relative_path))
            }));
        } else if input.is_file() {
            let absolute = input.canonicalize()?;
            let relative = absolute
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| absolute.clone());
            results.push(make_discovered(relative, &absolute)?);
        } else {
            return Err(Error::NotFound {
                kind: "path",
                name: input.display().to_string(),
            });
        }
    }

    results.sort_by(|a, b| a.absolute_path.cmp(&b.absolute_path));
    results.dedup_by(|a, b| a.absolute_path == b.absolute_path);
    Ok(results)
}

/// Recursively walk a directory and discover eligible source files.
///
/// Skips hidden files/directories (names starting with `.`) and only
/// returns files with supported extensions (.pdf, .md, .txt).
pub fn discover_files(root: &Path) -> Result<Vec<DiscoveredFile>> {
    let canonical_root = root.canonicalize()?;
    let mut results = Vec::new();
    walk_dir(&canonical_root, &canonical_root, &mut results)?;
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(results)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    results: &mut Vec<DiscoveredFile>,
) -> Result<()> {
    let entries = std::fs::read_dir(current)?;

    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();

        // Skip hidden files and directories.
        if name.starts_with('.') {
            continue;
        }

        let file_type = entry.file_type()?;
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();

        if file_type.is_dir() {
            walk_dir(root, &path, results)?;
        } else if file_type.is_symlink() {
            let resolved = match path.canonicalize() {
                Ok(p) => p,
                Err(_) => continue, // Skip broken symlinks
            };
            // Linked directories are not followed, so cycles cannot form.
            if resolved.is_file() && is_supported(&resolved) {
                results.push(make_discovered(relative, &resolved)?);
            }
        } else if file_type.is_file() && is_supported(&path) {
            let absolute = path.canonicalize()?;
            results.push(make_discovered(relative, &absolute)?);
        }
    }

    Ok(())
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|supported| ext.eq_ignore_ascii_case(supported))
        })
}

/// Modification time of `path` in whole seconds since the Unix epoch.
pub fn file_mtime(path: &Path) -> Result<u64> {
    Ok(std::fs::metadata(path)?
        .modified()
        .unwrap_or(SystemTime::UNIX_EPOCH)
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs())
}

fn make_discovered(
    relative_path: PathBuf,
    absolute_path: &Path,
) -> Result<DiscoveredFile> {
    Ok(DiscoveredFile {
        relative_path,
        absolute_path: absolute_path.to_path_buf(),
        mtime: file_mtime(absolute_path)?,
    })
}

#[cfg(test)]
mod tests {
    use globset::Glob;

    use super::*;

    fn names(files: &[DiscoveredFile]) -> Vec<String> {
        files
            .iter()
            .map(|f| f.relative_path.to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn discovers_pdf_md_and_txt() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("paper.PDF"), "%PDF").unwrap();
        std::fs::write(tmp.path().join("note.md"), "# Hello").unwrap();
        std::fs::write(tmp.path().join("readme.txt"), "Hello").unwrap();
        std::fs::write(tmp.path().join("image.png"), "binary").unwrap();

        let files = discover_files(tmp.path()).unwrap();
        assert_eq!(names(&files), vec!["note.md", "paper.PDF", "readme.txt"]);
    }

    #[test]
    fn skips_hidden_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let hidden = tmp.path().join(".git");
        std::fs::create_dir(&hidden).unwrap();
        std::fs::write(hidden.join("config.md"), "git config").unwrap();
        std::fs::write(tmp.path().join(".hidden.md"), "secret").unwrap();
        std::fs::write(tmp.path().join("visible.md"), "hello").unwrap();

        let files = discover_files(tmp.path()).unwrap();
        assert_eq!(names(&files), vec!["visible.md"]);
    }

    #[test]
    fn recurses_subdirectories() {
        let tmp = tempfile::tempdir().unwrap();
        let sub = tmp.path().join("subdir");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("deep.md"), "deep").unwrap();
        std::fs::write(tmp.path().join("top.md"), "top").unwrap();

        let files = discover_files(tmp.path()).unwrap();
        assert_eq!(names(&files), vec!["subdir/deep.md", "top.md"]);
        assert!(files.iter().all(|f| f.mtime > 0));
    }

    #[test]
    fn collects_files_and_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let docs = tmp.path().join("docs");
        std::fs::create_dir(&docs).unwrap();
        std::fs::write(docs.join("a.md"), "a").unwrap();
        std::fs::write(docs.join("b.pdf"), "b").unwrap();
        let loose = tmp.path().join("loose.txt");
        std::fs::write(&loose, "loose").unwrap();

        let files = collect_inputs(
            &[docs.clone(), loose.clone(), docs.join("a.md")],
            None,
        )
        .unwrap();
        assert_eq!(files.len(), 3);
        assert!(
            files
                .windows(2)
                .all(|w| w[0].absolute_path < w[1].absolute_path)
        );
        assert!(
            files
                .iter()
                .any(|f| f.relative_path == Path::new("loose.txt"))
        );
    }

    #[test]
    fn glob_filters_directory_entries() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.md"), "a").unwrap();
        std::fs::write(tmp.path().join("b.pdf"), "b").unwrap();

        let glob = Glob::new("*.pdf").unwrap().compile_matcher();
        let files =
            collect_inputs(&[tmp.path().to_path_buf()], Some(&glob)).unwrap();
        assert_eq!(names(&files), vec!["b.pdf"]);
    }

    #[test]
    fn missing_input_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let err =
            collect_inputs(&[tmp.path().join("nope.pdf")], None).unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "path", .. }));
    }

    #[test]
    fn empty_directory() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(discover_files(tmp.path()).unwrap().is_empty());
    }
}
