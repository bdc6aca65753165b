//! Artifact path sandbox.
//!
//! All artifact access goes through [`PathResolver`], which confines logical
//! paths to a fixed set of root directories under the configured data root.
//! Absolute paths, NUL bytes, parent-directory components and symlink escapes
//! are rejected before any filesystem access happens.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// The fixed artifact storage roots, one per pipeline stage boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactRoot {
    /// Raw uploaded source files.
    Uploads,
    /// Extracted plain text, output of the ingest stage.
    Output,
    /// Generated QA documents, output of the create stage.
    Generated,
    /// Curated QA documents, output of the curate stage.
    Cleaned,
    /// Exported datasets, output of the save-as stage.
    Final,
}

impl ArtifactRoot {
    /// All roots, in pipeline order.
    pub const ALL: [ArtifactRoot; 5] = [
        ArtifactRoot::Uploads,
        ArtifactRoot::Output,
        ArtifactRoot::Generated,
        ArtifactRoot::Cleaned,
        ArtifactRoot::Final,
    ];

    /// Directory name of this root under the data root.
    pub fn dir_name(&self) -> &'static str {
        match self {
            ArtifactRoot::Uploads => "uploads",
            ArtifactRoot::Output => "output",
            ArtifactRoot::Generated => "generated",
            ArtifactRoot::Cleaned => "cleaned",
            ArtifactRoot::Final => "final",
        }
    }
}

impl std::fmt::Display for ArtifactRoot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// A rejected path, with the reason it was rejected.
#[derive(Debug, Error)]
pub enum PathViolation {
    /// Absolute paths are never accepted as logical paths.
    #[error("Absolute path not allowed: {0}")]
    Absolute(String),

    /// Embedded NUL byte.
    #[error("Path contains a NUL byte")]
    NulByte,

    /// Any `..` component, regardless of where normalization would land.
    #[error("Parent-directory traversal not allowed: {0}")]
    Traversal(String),

    /// The resolved path escapes the sandbox root (e.g. via a symlink).
    #[error("Path {path} resolves outside root {root}")]
    OutsideRoot { path: String, root: String },
}

/// Resolves logical artifact paths to real filesystem paths inside the sandbox.
#[derive(Debug, Clone)]
pub struct PathResolver {
    data_root: PathBuf,
}

impl PathResolver {
    /// Creates a resolver rooted at `data_root`. The directory does not need
    /// to exist yet; call [`ensure_roots`](Self::ensure_roots) to create it.
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
        }
    }

    /// Creates the data root and every artifact root directory.
    pub fn ensure_roots(&self) -> std::io::Result<()> {
        for root in ArtifactRoot::ALL {
            std::fs::create_dir_all(self.data_root.join(root.dir_name()))?;
        }
        Ok(())
    }

    /// The real directory backing an artifact root.
    pub fn root_dir(&self, root: ArtifactRoot) -> PathBuf {
        self.data_root.join(root.dir_name())
    }

    /// Resolves a logical path to a real path under the given root.
    ///
    /// Logical paths may be bare (`doc.pdf`) or prefixed with the root's
    /// directory name (`uploads/doc.pdf`); both resolve to the same file.
    pub fn resolve(&self, logical: &str, root: ArtifactRoot) -> Result<PathBuf, PathViolation> {
        if logical.contains('\0') {
            return Err(PathViolation::NulByte);
        }

        let path = Path::new(logical);
        if path.is_absolute() {
            return Err(PathViolation::Absolute(logical.to_string()));
        }

        // Reject `..` anywhere, even when normalization would stay inside.
        if path
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(PathViolation::Traversal(logical.to_string()));
        }

        // Accept a leading root-directory prefix as part of the logical name.
        let relative = path
            .strip_prefix(root.dir_name())
            .unwrap_or(path)
            .to_path_buf();

        let root_dir = self.root_dir(root);
        let candidate = root_dir.join(&relative);

        // Symlink containment check against the deepest existing ancestor.
        // Freshly-created output paths do not exist yet, so walk up until a
        // canonicalizable ancestor is found.
        let canonical_root = root_dir.canonicalize().unwrap_or_else(|_| root_dir.clone());
        let mut cursor = candidate.clone();
        let resolved = loop {
            match cursor.canonicalize() {
                Ok(real) => break real,
                Err(_) => match cursor.parent() {
                    Some(parent) => cursor = parent.to_path_buf(),
                    // Nothing on disk yet; fall back to the lexical path,
                    // which contains no `..` by construction.
                    None => break candidate.clone(),
                },
            }
        };

        if !resolved.starts_with(&canonical_root) && !resolved.starts_with(&self.data_root) {
            return Err(PathViolation::OutsideRoot {
                path: logical.to_string(),
                root: root.dir_name().to_string(),
            });
        }

        Ok(candidate)
    }

    /// Converts a real path under a root back to its logical form
    /// (`root/name.ext`), as stored in job rows.
    pub fn relative_logical(&self, path: &Path, root: ArtifactRoot) -> String {
        let root_dir = self.root_dir(root);
        match path.strip_prefix(&root_dir) {
            Ok(rel) => format!("{}/{}", root.dir_name(), rel.display()),
            Err(_) => path.display().to_string(),
        }
    }
}

/// Builds a unique artifact file name: `{stem}_{timestamp}_{uuid8}.{ext}`.
///
/// Output artifacts are write-once; uniqueness means a rerun never clobbers
/// an earlier run's output.
pub fn timestamped_name(stem: &str, ext: &str) -> String {
    let ts = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let suffix = &uuid::Uuid::new_v4().simple().to_string()[..8];
    format!("{stem}_{ts}_{suffix}.{ext}")
}
