//! Per-version results archive
//!
//! One `<version>.csv` per swept version in a single flat directory. The
//! directory is emptied once at the start of each sweep so files from an
//! earlier run never mix with the current one.

use crate::error::ArchiveError;
use crate::types::VersionId;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Archive directory of a sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveDir {
    path: PathBuf,
}

impl ArchiveDir {
    #[inline]
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Archive location of a version's results
    #[inline]
    #[must_use]
    pub fn entry_path(&self, version: &VersionId) -> PathBuf {
        self.path.join(version.archive_file_name())
    }

    /// Remove the directory and everything in it, then recreate it empty
    ///
    /// # Errors
    /// Returns `ArchiveError::Io` if removal or creation fails.
    pub fn clear(&self) -> Result<(), ArchiveError> {
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => tracing::info!("cleared archive {}", self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(ArchiveError::io_error(&self.path, e)),
        }
        self.ensure()
    }

    /// Create the directory if it does not exist
    ///
    /// # Errors
    /// Returns `ArchiveError::Io` if creation fails.
    pub fn ensure(&self) -> Result<(), ArchiveError> {
        std::fs::create_dir_all(&self.path).map_err(|e| ArchiveError::io_error(&self.path, e))
    }

    /// Move a benchmark result file to `<archive>/<version>.csv`
    ///
    /// Only this version's entry is written; other entries are untouched.
    ///
    /// # Errors
    /// - `ArchiveError::MissingArtifact` if `source` does not exist
    /// - `ArchiveError::EmptyArtifact` if `source` is empty
    /// - `ArchiveError::Io` if the move fails
    pub fn archive(&self, version: &VersionId, source: &Path) -> Result<PathBuf, ArchiveError> {
        let metadata = match std::fs::metadata(source) {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Err(ArchiveError::MissingArtifact(source.to_path_buf())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ArchiveError::MissingArtifact(source.to_path_buf()));
            }
            Err(e) => return Err(ArchiveError::io_error(source, e)),
        };
        if metadata.len() == 0 {
            return Err(ArchiveError::EmptyArtifact(source.to_path_buf()));
        }

        self.ensure()?;
        let dest = self.entry_path(version);
        move_file(source, &dest)?;
        tracing::info!("archived {} as {}", source.display(), dest.display());
        Ok(dest)
    }

    /// Version stems of all archived `.csv` files, sorted
    ///
    /// A missing directory has no entries.
    ///
    /// # Errors
    /// Returns `ArchiveError::Io` if the directory cannot be read.
    pub fn entries(&self) -> Result<Vec<String>, ArchiveError> {
        let dir = match std::fs::read_dir(&self.path) {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ArchiveError::io_error(&self.path, e)),
        };

        let mut stems = Vec::new();
        for entry in dir {
            let path = entry.map_err(|e| ArchiveError::io_error(&self.path, e))?.path();
            if path.extension().is_some_and(|ext| ext == "csv") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    stems.push(stem.to_string());
                }
            }
        }
        stems.sort();
        Ok(stems)
    }

    /// Compare archived entries with an expected version list
    ///
    /// # Errors
    /// Returns `ArchiveError::Io` if the directory cannot be read.
    pub fn verify(&self, expected: &[VersionId]) -> Result<ArchiveMismatch, ArchiveError> {
        let entries = self.entries()?;
        let stems: Vec<String> = expected.iter().map(VersionId::archive_stem).collect();
        let missing = expected
            .iter()
            .zip(&stems)
            .filter(|(_, stem)| !entries.contains(stem))
            .map(|(v, _)| v.clone())
            .collect();
        let unexpected = entries
            .into_iter()
            .filter(|e| !stems.contains(e))
            .collect();
        Ok(ArchiveMismatch {
            missing,
            unexpected,
        })
    }
}

/// Difference between an archive and a version list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveMismatch {
    /// Expected versions with no archived file
    pub missing: Vec<VersionId>,
    /// Archived files for versions not in the list
    pub unexpected: Vec<String>,
}

impl ArchiveMismatch {
    /// Whether the archive matches the list exactly
    #[inline]
    #[must_use]
    pub fn is_exact(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty()
    }
}

fn move_file(source: &Path, dest: &Path) -> Result<(), ArchiveError> {
    if std::fs::rename(source, dest).is_ok() {
        return Ok(());
    }
    // rename cannot cross filesystems
    std::fs::copy(source, dest).map_err(|e| ArchiveError::io_error(dest, e))?;
    std::fs::remove_file(source).map_err(|e| ArchiveError::io_error(source, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(id: &str) -> VersionId {
        VersionId::new(id).unwrap()
    }

    #[test]
    fn clear_removes_stale_entries() {
        let dir = tempfile::tempdir().unwrap();
        let archive = ArchiveDir::new(dir.path().join("stats"));
        archive.ensure().unwrap();
        std::fs::write(archive.path().join("old.csv"), "name,time\n").unwrap();

        archive.clear().unwrap();

        assert!(archive.path().is_dir());
        assert!(!archive.path().join("old.csv").exists());
        assert!(archive.entries().unwrap().is_empty());
    }

    #[test]
    fn clear_twice_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let archive = ArchiveDir::new(dir.path().join("stats"));
        archive.clear().unwrap();
        archive.clear().unwrap();
        assert!(archive.path().is_dir());
    }

    #[test]
    fn archive_moves_and_renames() {
        let dir = tempfile::tempdir().unwrap();
        let archive = ArchiveDir::new(dir.path().join("stats"));
        let source = dir.path().join("results.csv");
        std::fs::write(&source, "name,iterations,real_time\nBM_add,100,1.5\n").unwrap();

        let dest = archive.archive(&v("0.14.0"), &source).unwrap();

        assert_eq!(dest, dir.path().join("stats").join("0.14.0.csv"));
        assert!(!source.exists());
        assert!(std::fs::read_to_string(dest).unwrap().contains("BM_add"));
    }

    #[test]
    fn archive_missing_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let archive = ArchiveDir::new(dir.path().join("stats"));
        let err = archive
            .archive(&v("master"), &dir.path().join("results.csv"))
            .unwrap_err();
        assert!(matches!(err, ArchiveError::MissingArtifact(_)));
        assert!(archive.entries().unwrap().is_empty());
    }

    #[test]
    fn archive_empty_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let archive = ArchiveDir::new(dir.path().join("stats"));
        let source = dir.path().join("results.csv");
        std::fs::write(&source, "").unwrap();
        assert!(matches!(
            archive.archive(&v("master"), &source),
            Err(ArchiveError::EmptyArtifact(_))
        ));
    }

    #[test]
    fn archive_keeps_other_versions() {
        let dir = tempfile::tempdir().unwrap();
        let archive = ArchiveDir::new(dir.path().join("stats"));
        let source = dir.path().join("results.csv");

        std::fs::write(&source, "master data\n").unwrap();
        archive.archive(&v("master"), &source).unwrap();
        std::fs::write(&source, "tag data\n").unwrap();
        archive.archive(&v("0.14.0"), &source).unwrap();

        assert_eq!(archive.entries().unwrap(), vec!["0.14.0", "master"]);
        let master = std::fs::read_to_string(archive.entry_path(&v("master"))).unwrap();
        assert_eq!(master, "master data\n");
    }

    #[test]
    fn entries_ignore_non_csv() {
        let dir = tempfile::tempdir().unwrap();
        let archive = ArchiveDir::new(dir.path());
        std::fs::write(dir.path().join("master.csv"), "x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        assert_eq!(archive.entries().unwrap(), vec!["master"]);
    }

    #[test]
    fn entries_of_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let archive = ArchiveDir::new(dir.path().join("nope"));
        assert!(archive.entries().unwrap().is_empty());
    }

    #[test]
    fn verify_reports_missing_and_unexpected() {
        let dir = tempfile::tempdir().unwrap();
        let archive = ArchiveDir::new(dir.path());
        std::fs::write(dir.path().join("master.csv"), "x").unwrap();
        std::fs::write(dir.path().join("old.csv"), "x").unwrap();

        let mismatch = archive.verify(&[v("master"), v("0.14.0")]).unwrap();
        assert!(!mismatch.is_exact());
        assert_eq!(mismatch.missing, vec![v("0.14.0")]);
        assert_eq!(mismatch.unexpected, vec!["old".to_string()]);

        std::fs::remove_file(dir.path().join("old.csv")).unwrap();
        std::fs::write(dir.path().join("0.14.0.csv"), "x").unwrap();
        assert!(archive.verify(&[v("master"), v("0.14.0")]).unwrap().is_exact());
    }

    #[test]
    fn nested_branch_archives_flat() {
        let dir = tempfile::tempdir().unwrap();
        let archive = ArchiveDir::new(dir.path().join("stats"));
        let source = dir.path().join("results.csv");
        std::fs::write(&source, "branch data\n").unwrap();

        let dest = archive.archive(&v("release/0.20"), &source).unwrap();

        assert_eq!(dest, dir.path().join("stats").join("release__0.20.csv"));
        assert_eq!(archive.entries().unwrap(), vec!["release__0.20"]);
        assert!(archive.verify(&[v("release/0.20")]).unwrap().is_exact());
    }
}
