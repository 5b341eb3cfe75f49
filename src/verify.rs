//! Manifest Verifier. Checks a directory against its own self-hashing
//! manifest: every file the manifest names must exist with the declared
//! hash, and the directory must contain nothing the manifest doesn't name.

use crate::canon;
use crate::error::{CoreError, CoreResult};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub manifest_filename: String,
    pub verified_files: Vec<String>,
}

/// Verify `dir` against `manifest_filename` inside it.
///
/// `files_field` names the manifest key holding the `{relative name -> sha256}`
/// map (e.g. `"files"`); `self_hash_field` names the manifest's own self-hash
/// key (e.g. `"manifest_sha256"`).
pub fn verify_manifest(
    dir: &Path,
    manifest_filename: &str,
    files_field: &str,
    self_hash_field: &str,
) -> CoreResult<VerifyReport> {
    let manifest_path = dir.join(manifest_filename);
    let manifest: Value = serde_json::from_slice(&fs::read(&manifest_path)?)?;

    if !canon::verify_self_hash(&manifest, self_hash_field)? {
        return Err(CoreError::TamperDetected(format!(
            "{manifest_filename}: self-hash under '{self_hash_field}' does not match its content"
        )));
    }

    let files_obj = manifest
        .get(files_field)
        .and_then(Value::as_object)
        .ok_or_else(|| CoreError::ContractViolation(format!("manifest missing object field '{files_field}'")))?;

    let expected_hashes: std::collections::BTreeMap<String, String> = files_obj
        .iter()
        .filter_map(|(name, hash)| hash.as_str().map(|h| (name.clone(), h.to_string())))
        .collect();
    let expected_names: BTreeSet<String> = expected_hashes.keys().cloned().collect();

    let on_disk: BTreeSet<String> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name != manifest_filename)
        .collect();

    if on_disk != expected_names {
        let extra: Vec<&String> = on_disk.difference(&expected_names).collect();
        let missing: Vec<&String> = expected_names.difference(&on_disk).collect();
        return Err(CoreError::TamperDetected(format!(
            "{manifest_filename}: directory does not match manifest (extra on disk: {extra:?}, missing from disk: {missing:?})"
        )));
    }

    for (name, expected_hash) in &expected_hashes {
        let bytes = fs::read(dir.join(name))?;
        let value: Value = serde_json::from_slice(&bytes)?;
        let actual_hash = canon::sha256_hex(&canon::to_canonical_bytes(&value));
        if &actual_hash != expected_hash {
            return Err(CoreError::TamperDetected(format!("{name}: content hash does not match manifest")));
        }
    }

    if let Some(declared) = manifest.get("files_sha256").and_then(Value::as_str) {
        let recomputed = canon::sha256_hex(&canon::to_canonical_bytes(&Value::Object(files_obj.clone())));
        if declared != recomputed {
            return Err(CoreError::TamperDetected(format!(
                "{manifest_filename}: files_sha256 aggregate does not match files map"
            )));
        }
    }

    Ok(VerifyReport {
        manifest_filename: manifest_filename.to_string(),
        verified_files: expected_names.into_iter().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atomic::{write_json_atomic, WriteScope};
    use serde_json::json;
    use tempfile::TempDir;

    fn write_fixture(dir: &Path) {
        let scope = WriteScope::exact(dir, &["a.json", "b.json", "manifest.json"]);
        write_json_atomic(&scope, "a.json", &json!({"x": 1})).unwrap();
        write_json_atomic(&scope, "b.json", &json!({"y": 2})).unwrap();

        let mut files = serde_json::Map::new();
        files.insert("a.json".to_string(), json!(canon::sha256_hex(&canon::to_canonical_bytes(&json!({"x": 1})))));
        files.insert("b.json".to_string(), json!(canon::sha256_hex(&canon::to_canonical_bytes(&json!({"y": 2})))));
        let mut manifest = json!({ "files": files });
        canon::stamp_self_hash(&mut manifest, "manifest_sha256").unwrap();
        write_json_atomic(&scope, "manifest.json", &manifest).unwrap();
    }

    #[test]
    fn verifies_clean_directory() {
        let tmp = TempDir::new().unwrap();
        write_fixture(tmp.path());
        let report = verify_manifest(tmp.path(), "manifest.json", "files", "manifest_sha256").unwrap();
        assert_eq!(report.verified_files, vec!["a.json".to_string(), "b.json".to_string()]);
    }

    #[test]
    fn detects_extra_file_not_in_manifest() {
        let tmp = TempDir::new().unwrap();
        write_fixture(tmp.path());
        fs::write(tmp.path().join("intruder.json"), b"{}").unwrap();
        let err = verify_manifest(tmp.path(), "manifest.json", "files", "manifest_sha256").unwrap_err();
        assert!(matches!(err, CoreError::TamperDetected(_)));
    }

    #[test]
    fn detects_tampered_content() {
        let tmp = TempDir::new().unwrap();
        write_fixture(tmp.path());
        fs::write(tmp.path().join("a.json"), br#"{"x":999}"#).unwrap();
        let err = verify_manifest(tmp.path(), "manifest.json", "files", "manifest_sha256").unwrap_err();
        assert!(matches!(err, CoreError::TamperDetected(_)));
    }

    #[test]
    fn detects_missing_file() {
        let tmp = TempDir::new().unwrap();
        write_fixture(tmp.path());
        fs::remove_file(tmp.path().join("b.json")).unwrap();
        let err = verify_manifest(tmp.path(), "manifest.json", "files", "manifest_sha256").unwrap_err();
        assert!(matches!(err, CoreError::TamperDetected(_)));
    }
}
