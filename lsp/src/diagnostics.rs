//! Shared per-file diagnostics store.
//!
//! Cloning yields another handle to the same data, so the hub, its
//! diagnostics resource getter and refresh actions all read one store.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::types::{Diagnostic, DiagnosticsSnapshot};

#[derive(Clone, Default)]
pub(crate) struct DiagnosticsStore {
    data: Arc<Mutex<HashMap<PathBuf, Vec<Diagnostic>>>>,
}

impl DiagnosticsStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self) -> MutexGuard<'_, HashMap<PathBuf, Vec<Diagnostic>>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace one file's diagnostics; empty `items` clears the file.
    pub fn update(&self, path: PathBuf, items: Vec<Diagnostic>) {
        let mut data = self.data();
        if items.is_empty() {
            data.remove(&path);
        } else {
            data.insert(path, items);
        }
    }

    /// Replace the whole store.
    pub fn replace_all(&self, files: Vec<(PathBuf, Vec<Diagnostic>)>) {
        let fresh: HashMap<_, _> = files
            .into_iter()
            .filter(|(_, items)| !items.is_empty())
            .collect();
        *self.data() = fresh;
    }

    pub fn clear(&self) {
        self.data().clear();
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let mut files: Vec<(PathBuf, Vec<Diagnostic>)> = self
            .data()
            .iter()
            .map(|(path, items)| (path.clone(), items.clone()))
            .collect();

        files.sort_by(|a, b| {
            let a_errors = a.1.iter().any(|d| d.severity().is_error());
            let b_errors = b.1.iter().any(|d| d.severity().is_error());
            b_errors.cmp(&a_errors).then_with(|| a.0.cmp(&b.0))
        });

        DiagnosticsSnapshot::new(files)
    }

    pub fn errors_for_files(&self, paths: &[PathBuf]) -> Vec<(PathBuf, Vec<Diagnostic>)> {
        let data = self.data();
        paths
            .iter()
            .filter_map(|path| {
                let errors: Vec<Diagnostic> = data
                    .get(path)?
                    .iter()
                    .filter(|d| d.severity().is_error())
                    .cloned()
                    .collect();
                (!errors.is_empty()).then(|| (path.clone(), errors))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DiagnosticSeverity;

    fn diag(severity: DiagnosticSeverity, msg: &str) -> Diagnostic {
        Diagnostic::new(severity, msg, 0, 0, "test")
    }

    #[test]
    fn test_empty_diagnostics_removes_file() {
        let store = DiagnosticsStore::new();
        let path = PathBuf::from("Main.lean");
        store.update(path.clone(), vec![diag(DiagnosticSeverity::Error, "err")]);
        assert_eq!(store.snapshot().files().len(), 1);

        store.update(path, vec![]);
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_errors_first_then_alphabetical() {
        let store = DiagnosticsStore::new();
        store.update(
            PathBuf::from("b.lean"),
            vec![diag(DiagnosticSeverity::Warning, "warn")],
        );
        store.update(
            PathBuf::from("c.lean"),
            vec![diag(DiagnosticSeverity::Error, "err")],
        );
        store.update(
            PathBuf::from("a.lean"),
            vec![diag(DiagnosticSeverity::Hint, "hint")],
        );

        let snap = store.snapshot();
        let order: Vec<_> = snap.files().iter().map(|(p, _)| p.clone()).collect();
        assert_eq!(
            order,
            vec![
                PathBuf::from("c.lean"),
                PathBuf::from("a.lean"),
                PathBuf::from("b.lean"),
            ]
        );
    }

    #[test]
    fn test_clones_share_data() {
        let store = DiagnosticsStore::new();
        let handle = store.clone();
        handle.update(
            PathBuf::from("a.lean"),
            vec![diag(DiagnosticSeverity::Error, "err")],
        );
        assert_eq!(store.snapshot().error_count(), 1);

        store.clear();
        assert!(handle.snapshot().is_empty());
    }

    #[test]
    fn test_replace_all_drops_old_files_and_empty_entries() {
        let store = DiagnosticsStore::new();
        store.update(
            PathBuf::from("old.lean"),
            vec![diag(DiagnosticSeverity::Error, "err")],
        );

        store.replace_all(vec![
            (
                PathBuf::from("new.lean"),
                vec![diag(DiagnosticSeverity::Warning, "w")],
            ),
            (PathBuf::from("clean.lean"), vec![]),
        ]);

        let snap = store.snapshot();
        assert_eq!(snap.files().len(), 1);
        assert_eq!(snap.files()[0].0, PathBuf::from("new.lean"));
    }

    #[test]
    fn test_errors_for_files_skips_warning_only_and_unknown() {
        let store = DiagnosticsStore::new();
        let a = PathBuf::from("a.lean");
        let b = PathBuf::from("b.lean");
        store.update(
            a.clone(),
            vec![
                diag(DiagnosticSeverity::Error, "err"),
                diag(DiagnosticSeverity::Warning, "warn"),
            ],
        );
        store.update(b.clone(), vec![diag(DiagnosticSeverity::Warning, "warn")]);

        let result = store.errors_for_files(&[a.clone(), b, PathBuf::from("missing.lean")]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].0, a);
        assert_eq!(result[0].1.len(), 1);
    }
}
