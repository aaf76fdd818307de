// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use tracing::debug;

/// The three optional convention scopes, merged in fixed order.
/// Absence at any level is normal.
#[derive(Debug, Clone, Default)]
pub struct ConventionScopes {
    pub enterprise: Option<PathBuf>,
    pub project: Option<PathBuf>,
    pub directory: Option<PathBuf>,
}

impl ConventionScopes {
    /// Read and merge all present scope files: enterprise, then project,
    /// then directory.  Returns `None` when no scope yields content.
    pub fn load(&self) -> Option<String> {
        let blobs: Vec<String> = [&self.enterprise, &self.project, &self.directory]
            .into_iter()
            .filter_map(|p| p.as_ref())
            .filter_map(|p| match std::fs::read_to_string(p) {
                Ok(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Ok(_) => None,
                Err(_) => {
                    debug!(path = %p.display(), "conventions file absent");
                    None
                }
            })
            .collect();
        merge_conventions(&blobs)
    }
}

/// Concatenate convention blobs in order with blank-line separators.
/// The merged blob is treated as opaque by everything downstream.
pub fn merge_conventions(blobs: &[String]) -> Option<String> {
    let non_empty: Vec<&str> = blobs
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();
    if non_empty.is_empty() {
        return None;
    }
    Some(non_empty.join("\n\n"))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn merge_preserves_order() {
        let merged = merge_conventions(&[
            "enterprise rules".into(),
            "project rules".into(),
            "directory rules".into(),
        ])
        .unwrap();
        let e = merged.find("enterprise").unwrap();
        let p = merged.find("project").unwrap();
        let d = merged.find("directory").unwrap();
        assert!(e < p && p < d);
    }

    #[test]
    fn merge_skips_empty_blobs() {
        assert_eq!(
            merge_conventions(&["".into(), "only".into(), "  ".into()]).as_deref(),
            Some("only")
        );
    }

    #[test]
    fn merge_of_nothing_is_none() {
        assert!(merge_conventions(&[]).is_none());
    }

    #[test]
    fn load_tolerates_missing_files() {
        let tmp = TempDir::new().unwrap();
        let present = tmp.path().join("CLAUDE.md");
        fs::write(&present, "project conventions").unwrap();
        let scopes = ConventionScopes {
            enterprise: Some(tmp.path().join("missing.md")),
            project: Some(present),
            directory: None,
        };
        assert_eq!(scopes.load().as_deref(), Some("project conventions"));
    }

    #[test]
    fn load_all_absent_is_none() {
        let scopes = ConventionScopes::default();
        assert!(scopes.load().is_none());
    }
}
