//! Dependency manifest parsing and hashing
//!
//! A manifest is a flat `requirements.txt`-style list: one requirement per
//! line, `#` comments and blank lines ignored. The digest covers the
//! normalised requirement list so that whitespace and comment edits do not
//! change it.

use crate::error::ProvisionError;
use crate::Result;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::debug;

/// One requirement line, e.g. `pandas>=2.0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    /// Distribution name.
    pub name: String,

    /// Version constraint and markers, possibly empty.
    pub constraint: String,
}

impl std::fmt::Display for Requirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.name, self.constraint)
    }
}

/// Parsed dependency manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyManifest {
    /// Manifest location
    pub path: PathBuf,
    /// Requirements in file order
    pub requirements: Vec<Requirement>,
    /// SHA256 (hex) of the normalised requirement list
    pub digest: String,
}

impl DependencyManifest {
    /// Read and parse a manifest file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(ProvisionError::ManifestMissing(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse(path, &content)
    }

    /// Parse manifest text
    pub fn parse(path: &Path, content: &str) -> Result<Self> {
        let line_re = Regex::new(r"^([A-Za-z0-9][A-Za-z0-9._-]*)(\[[^\]]*\])?\s*(.*)$")
            .map_err(|e| invalid(path, 0, e.to_string()))?;

        let mut requirements = Vec::new();
        for (idx, raw) in content.lines().enumerate() {
            let line = strip_comment(raw).trim();
            if line.is_empty() {
                continue;
            }
            if line.starts_with('-') {
                return Err(invalid(
                    path,
                    idx + 1,
                    format!("installer options are not allowed: {line}"),
                ));
            }
            let caps = line_re
                .captures(line)
                .ok_or_else(|| invalid(path, idx + 1, format!("not a requirement: {line}")))?;

            let name = caps[1].to_string();
            let extras = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            let constraint = format!("{extras}{}", caps[3].trim());
            requirements.push(Requirement { name, constraint });
        }

        let digest = digest_requirements(&requirements);
        debug!(
            manifest = %path.display(),
            count = requirements.len(),
            "Manifest digest: {}",
            &digest[..12]
        );

        Ok(DependencyManifest {
            path: path.to_path_buf(),
            requirements,
            digest,
        })
    }

    /// Whether there is nothing to install
    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// Get short digest (first 12 characters)
    pub fn short_digest(&self) -> &str {
        &self.digest[..12.min(self.digest.len())]
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(pos) => &line[..pos],
        None => line,
    }
}

fn invalid(path: &Path, line: usize, message: String) -> ProvisionError {
    ProvisionError::InvalidManifest {
        path: path.to_path_buf(),
        line,
        message,
    }
}

fn digest_requirements(requirements: &[Requirement]) -> String {
    let mut hasher = Sha256::new();
    for req in requirements {
        hasher.update(req.to_string().as_bytes());
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Result<DependencyManifest> {
        DependencyManifest::parse(Path::new("requirements.txt"), content)
    }

    #[test]
    fn test_parse_names_and_constraints() {
        let m = parse("pandas>=2.0\nnumpy\nscikit-learn == 1.4.0 ; python_version >= '3.9'\n")
            .unwrap();
        assert_eq!(m.requirements.len(), 3);
        assert_eq!(m.requirements[0].name, "pandas");
        assert_eq!(m.requirements[0].constraint, ">=2.0");
        assert_eq!(m.requirements[1].constraint, "");
        assert_eq!(m.requirements[2].name, "scikit-learn");
        assert!(m.requirements[2].constraint.starts_with("== 1.4.0"));
    }

    #[test]
    fn test_parse_extras() {
        let m = parse("uvicorn[standard]>=0.20").unwrap();
        assert_eq!(m.requirements[0].name, "uvicorn");
        assert_eq!(m.requirements[0].constraint, "[standard]>=0.20");
    }

    #[test]
    fn test_comments_do_not_change_digest() {
        let a = parse("pytest\nnltk\n").unwrap();
        let b = parse("# test deps\npytest   # runner\n\nnltk\n").unwrap();
        assert_eq!(a.digest, b.digest);
        assert_eq!(a.digest.len(), 64);
    }

    #[test]
    fn test_order_changes_digest() {
        let a = parse("pytest\nnltk\n").unwrap();
        let b = parse("nltk\npytest\n").unwrap();
        assert_ne!(a.digest, b.digest);
    }

    #[test]
    fn test_options_rejected() {
        let err = parse("pytest\n--index-url http://evil.example\n").unwrap_err();
        match err {
            ProvisionError::InvalidManifest { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_empty_manifest() {
        let m = parse("# nothing yet\n\n").unwrap();
        assert!(m.is_empty());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = DependencyManifest::load(&dir.path().join("requirements.txt")).unwrap_err();
        assert!(matches!(err, ProvisionError::ManifestMissing(_)));
    }
}
