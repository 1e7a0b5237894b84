use anyhow::{Context, Result};
use ignore::overrides::{Override, OverrideBuilder};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};

/// Built-in high-noise excludes layered underneath the configured
/// `excludePatterns` list (config patterns are also always applied).
const BUILTIN_EXCLUDES: &[&str] = &[
    "**/.git/**",
    "**/node_modules/**",
    "**/target/**",
    "**/dist/**",
    "**/build/**",
    "**/*.lock",
];

fn build_overrides(repo_root: &Path, exclude_patterns: &[String]) -> Result<Override> {
    let mut ob = OverrideBuilder::new(repo_root);
    for pattern in BUILTIN_EXCLUDES {
        ob.add(pattern)?;
    }
    for pattern in exclude_patterns {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            continue;
        }
        ob.add(pattern)?;
    }
    Ok(ob.build()?)
}

#[derive(Debug, Clone)]
pub struct FileEntry {
    pub abs_path: PathBuf,
    pub rel_path: PathBuf,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub repo_root: PathBuf,
    pub target: PathBuf,
    pub max_file_bytes: u64,
    pub exclude_patterns: Vec<String>,
    pub supported_extensions: Vec<String>,
}

impl ScanOptions {
    pub fn target_root(&self) -> PathBuf {
        if self.target.is_absolute() {
            self.target.clone()
        } else {
            self.repo_root.join(&self.target)
        }
    }

    fn extension_supported(&self, path: &Path) -> bool {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("").to_ascii_lowercase();
        self.supported_extensions.iter().any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(&ext))
    }
}

/// Walk `opts.target` (file or directory) under `.gitignore`/`.ignore`
/// semantics plus the configured exclude globs, yielding every file whose
/// extension is in `supportedExtensions`, nonempty, and under `maxFileSize`.
pub fn scan_workspace(opts: &ScanOptions) -> Result<Vec<FileEntry>> {
    let target_root = opts.target_root();

    let meta = std::fs::metadata(&target_root).with_context(|| format!("target does not exist: {}", target_root.display()))?;

    if meta.is_file() {
        return Ok(scan_single_file(opts, &target_root)?.into_iter().collect());
    }

    let mut entries = Vec::new();
    let overrides = build_overrides(&opts.repo_root, &opts.exclude_patterns)?;
    let walker = WalkBuilder::new(&target_root).standard_filters(true).overrides(overrides).build();

    for item in walker {
        let dent = match item {
            Ok(d) => d,
            Err(_) => continue,
        };
        if !dent.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }
        let abs_path = dent.into_path();
        if !opts.extension_supported(&abs_path) {
            continue;
        }
        let bytes = match std::fs::metadata(&abs_path).map(|m| m.len()) {
            Ok(b) => b,
            Err(_) => continue,
        };
        if bytes == 0 || bytes > opts.max_file_bytes {
            continue;
        }
        let rel_path = path_relative_to(&abs_path, &opts.repo_root).with_context(|| format!("failed to relativize path: {}", abs_path.display()))?;
        entries.push(FileEntry { abs_path, rel_path, bytes });
    }

    entries.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(entries)
}

fn scan_single_file(opts: &ScanOptions, abs_path: &Path) -> Result<Vec<FileEntry>> {
    let ov = build_overrides(&opts.repo_root, &opts.exclude_patterns)?;
    if ov.matched(abs_path, false).is_ignore() {
        return Ok(vec![]);
    }
    if !opts.extension_supported(abs_path) {
        return Ok(vec![]);
    }
    let bytes = std::fs::metadata(abs_path)?.len();
    if bytes == 0 || bytes > opts.max_file_bytes {
        return Ok(vec![]);
    }
    let rel_path = path_relative_to(abs_path, &opts.repo_root)?;
    Ok(vec![FileEntry {
        abs_path: abs_path.to_path_buf(),
        rel_path,
        bytes,
    }])
}

fn path_relative_to(path: &Path, base: &Path) -> Result<PathBuf> {
    let rel = path.strip_prefix(base).with_context(|| format!("{} is not under {}", path.display(), base.display()))?;
    Ok(rel.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn filters_by_supported_extension() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.rs"), "fn main() {}").unwrap();
        fs::write(dir.path().join("a.png"), [0u8; 10]).unwrap();
        let opts = ScanOptions {
            repo_root: dir.path().to_path_buf(),
            target: PathBuf::from("."),
            max_file_bytes: 1024 * 1024,
            exclude_patterns: vec![],
            supported_extensions: vec!["rs".to_string()],
        };
        let entries = scan_workspace(&opts).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].rel_path, PathBuf::from("a.rs"));
    }

    #[test]
    fn excludes_configured_glob_patterns() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("vendor")).unwrap();
        fs::write(dir.path().join("vendor/a.rs"), "fn main() {}").unwrap();
        fs::write(dir.path().join("b.rs"), "fn main() {}").unwrap();
        let opts = ScanOptions {
            repo_root: dir.path().to_path_buf(),
            target: PathBuf::from("."),
            max_file_bytes: 1024 * 1024,
            exclude_patterns: vec!["**/vendor/**".to_string()],
            supported_extensions: vec!["rs".to_string()],
        };
        let entries = scan_workspace(&opts).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].rel_path, PathBuf::from("b.rs"));
    }

    #[test]
    fn rejects_oversized_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.rs"), "x".repeat(200)).unwrap();
        let opts = ScanOptions {
            repo_root: dir.path().to_path_buf(),
            target: PathBuf::from("."),
            max_file_bytes: 50,
            exclude_patterns: vec![],
            supported_extensions: vec!["rs".to_string()],
        };
        assert!(scan_workspace(&opts).unwrap().is_empty());
    }
}
