//! Atomic Writer & Write-Scope Guard.
//!
//! Every mutating path in the crate writes through [`write_atomic`] /
//! [`write_json_atomic`] under a [`WriteScope`]. A scope pins down exactly
//! which file names a writer is permitted to touch inside a root directory;
//! anything else is a [`CoreError::ScopeViolation`] before a single byte hits
//! disk. Writes themselves are temp-file-then-rename so a crash never leaves
//! a half-written artifact behind. The manifest (the thing verification
//! trusts) is always the last file renamed into place by convention at the
//! call site.

use crate::error::{CoreError, CoreResult};
use serde_json::Value;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

/// A declared, enforceable boundary for atomic writes.
#[derive(Debug, Clone)]
pub struct WriteScope {
    root_dir: PathBuf,
    allowed_exact_names: HashSet<String>,
    allowed_basename_prefixes: Vec<String>,
}

impl WriteScope {
    /// A scope that permits only the given exact file names under `root_dir`.
    pub fn exact(root_dir: impl Into<PathBuf>, names: &[&str]) -> Self {
        Self {
            root_dir: root_dir.into(),
            allowed_exact_names: names.iter().map(|s| s.to_string()).collect(),
            allowed_basename_prefixes: Vec::new(),
        }
    }

    /// Add basename prefixes (e.g. `"plan_"`) that are also permitted.
    pub fn with_prefixes(mut self, prefixes: &[&str]) -> Self {
        self.allowed_basename_prefixes
            .extend(prefixes.iter().map(|s| s.to_string()));
        self
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Validate `relative_name` against this scope and return the full path it
    /// resolves to. Does not touch the filesystem beyond reading existing
    /// ancestor directories to detect symlink escapes.
    pub fn validate(&self, relative_name: &str) -> CoreResult<PathBuf> {
        let rel = Path::new(relative_name);
        if rel.is_absolute() {
            return Err(CoreError::ScopeViolation(rel.to_path_buf()));
        }
        for component in rel.components() {
            match component {
                Component::Normal(_) => {}
                _ => return Err(CoreError::ScopeViolation(rel.to_path_buf())),
            }
        }
        let basename = rel
            .file_name()
            .and_then(|s| s.to_str())
            .ok_or_else(|| CoreError::ScopeViolation(rel.to_path_buf()))?;
        let allowed = self.allowed_exact_names.contains(basename)
            || self
                .allowed_basename_prefixes
                .iter()
                .any(|p| basename.starts_with(p.as_str()));
        if !allowed {
            return Err(CoreError::ScopeViolation(rel.to_path_buf()));
        }

        let candidate = self.root_dir.join(rel);
        self.assert_no_escape(&candidate)?;
        Ok(candidate)
    }

    /// Walk up from `candidate` to the nearest existing ancestor and confirm
    /// its canonical form still lives inside the canonical root. Catches a
    /// symlinked intermediate directory pointing outside the scope.
    fn assert_no_escape(&self, candidate: &Path) -> CoreResult<()> {
        let root_canon = match self.root_dir.canonicalize() {
            Ok(p) => p,
            Err(_) => return Ok(()), // root not created yet; nothing to escape from
        };
        let mut probe = candidate.to_path_buf();
        loop {
            if probe.exists() {
                let probe_canon = probe.canonicalize().map_err(CoreError::Io)?;
                if !probe_canon.starts_with(&root_canon) {
                    return Err(CoreError::ScopeViolation(candidate.to_path_buf()));
                }
                return Ok(());
            }
            if !probe.pop() {
                return Ok(());
            }
        }
    }
}

/// Write `bytes` atomically to `relative_name` inside `scope`.
///
/// Writes to a sibling `.tmp` file, `fsync`s it, then renames over the final
/// path. On any failure the `.tmp` file is removed and the error propagated;
/// the target path is never left partially written.
pub fn write_atomic(scope: &WriteScope, relative_name: &str, bytes: &[u8]) -> CoreResult<PathBuf> {
    let final_path = scope.validate(relative_name)?;
    if let Some(parent) = final_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = sibling_tmp_path(&final_path);

    let result = (|| -> CoreResult<()> {
        let mut f = File::create(&tmp_path)?;
        f.write_all(bytes)?;
        f.sync_all()?;
        drop(f);
        fs::rename(&tmp_path, &final_path)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result.map(|()| final_path)
}

/// Canonicalize `value` and write it atomically, so the bytes on disk are
/// exactly the bytes any hash in a manifest was computed over.
pub fn write_json_atomic(scope: &WriteScope, relative_name: &str, value: &Value) -> CoreResult<PathBuf> {
    let bytes = crate::canon::to_canonical_bytes(value);
    write_atomic(scope, relative_name, &bytes)
}

fn sibling_tmp_path(final_path: &Path) -> PathBuf {
    let mut os = final_path.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}

/// Ensure a directory exists, without granting write access beyond creation.
/// Used by stores that "create their root directory eagerly" per the
/// governance contract.
pub fn ensure_dir(path: &Path) -> CoreResult<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

/// Append a line to a JSONL file, creating parent directories as needed.
/// Used by the append-only run history ledger. This is not atomic-replace
/// (the file is meant to grow), but each line is flushed before return so a
/// reader never observes a partial line.
pub fn append_line(path: &Path, line: &str) -> CoreResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut f = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(f, "{line}")?;
    f.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn rejects_absolute_path() {
        let tmp = TempDir::new().unwrap();
        let scope = WriteScope::exact(tmp.path(), &["manifest.json"]);
        let err = scope.validate("/etc/passwd").unwrap_err();
        assert!(matches!(err, CoreError::ScopeViolation(_)));
    }

    #[test]
    fn rejects_parent_dir_component() {
        let tmp = TempDir::new().unwrap();
        let scope = WriteScope::exact(tmp.path(), &["manifest.json"]);
        let err = scope.validate("../manifest.json").unwrap_err();
        assert!(matches!(err, CoreError::ScopeViolation(_)));
    }

    #[test]
    fn rejects_name_not_whitelisted() {
        let tmp = TempDir::new().unwrap();
        let scope = WriteScope::exact(tmp.path(), &["manifest.json"]);
        let err = scope.validate("other.json").unwrap_err();
        assert!(matches!(err, CoreError::ScopeViolation(_)));
    }

    #[test]
    fn accepts_prefix_match() {
        let tmp = TempDir::new().unwrap();
        let scope = WriteScope::exact(tmp.path(), &["portfolio_plan.json"]).with_prefixes(&["plan_"]);
        assert!(scope.validate("plan_manifest.json").is_ok());
    }

    #[test]
    fn write_atomic_leaves_no_tmp_on_success() {
        let tmp = TempDir::new().unwrap();
        let scope = WriteScope::exact(tmp.path(), &["manifest.json"]);
        let path = write_atomic(&scope, "manifest.json", b"hello").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"hello");
        assert!(!sibling_tmp_path(&path).exists());
    }

    #[test]
    fn write_atomic_rejects_out_of_scope_name() {
        let tmp = TempDir::new().unwrap();
        let scope = WriteScope::exact(tmp.path(), &["manifest.json"]);
        let err = write_atomic(&scope, "evil.json", b"x").unwrap_err();
        assert!(matches!(err, CoreError::ScopeViolation(_)));
    }

    #[test]
    fn escaping_symlink_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let root = tmp.path().join("root");
        fs::create_dir_all(&root).unwrap();
        let link = root.join("escape");
        #[cfg(unix)]
        std::os::unix::fs::symlink(outside.path(), &link).unwrap();
        #[cfg(unix)]
        {
            let scope = WriteScope::exact(&root, &["manifest.json"]);
            let err = scope.validate("escape/manifest.json").unwrap_err();
            assert!(matches!(err, CoreError::ScopeViolation(_)));
        }
    }
}
