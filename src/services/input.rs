use crate::ui::pagination::{PageInfo, Paginator};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::fs;
use std::ops::Range;
use std::sync::{Mutex, PoisonError};

/// File extensions accepted as conversion inputs (compared case-insensitively).
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "png", "jpg", "jpeg"];

/// Caller-supplied reference to one input document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputRef {
    pub path: Utf8PathBuf,
    pub display_name: String,
}

impl InputRef {
    /// Build a reference whose display name is the file stem.
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        let path = path.into();
        let display_name = path
            .file_stem()
            .map(str::to_string)
            .unwrap_or_else(|| path.to_string());
        Self { path, display_name }
    }

    pub fn with_name(path: impl Into<Utf8PathBuf>, display_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            display_name: display_name.into(),
        }
    }

    /// Whether the extension is one the pipeline accepts.
    pub fn is_supported(&self) -> bool {
        has_supported_extension(&self.path)
    }

    pub fn is_image(&self) -> bool {
        matches!(
            extension_lowercase(&self.path).as_deref(),
            Some("png" | "jpg" | "jpeg")
        )
    }
}

/// Result of expanding a user selection into conversion inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputSelection {
    pub accepted: Vec<InputRef>,
    /// Entries that were missing or had an unsupported extension
    pub skipped: usize,
}

pub fn has_supported_extension(path: &Utf8Path) -> bool {
    extension_lowercase(path)
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

fn extension_lowercase(path: &Utf8Path) -> Option<String> {
    path.extension().map(|ext| ext.to_ascii_lowercase())
}

/// Expand files and folders into the list of supported input documents.
///
/// Folders are scanned one level deep and their entries sorted by name, so
/// a folder selection enqueues in a stable order.
pub fn collect_inputs<P: AsRef<Utf8Path>>(paths: &[P]) -> InputSelection {
    let mut selection = InputSelection::default();

    for path in paths {
        let path = path.as_ref();

        if path.is_dir() {
            let entries = match fs::read_dir(path) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!("Failed to read folder {}: {}", path, e);
                    selection.skipped += 1;
                    continue;
                }
            };

            let mut files: Vec<Utf8PathBuf> = entries
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| Utf8PathBuf::try_from(entry.path()).ok())
                .filter(|p| p.is_file())
                .collect();
            files.sort();

            for file in files {
                if has_supported_extension(&file) {
                    selection.accepted.push(InputRef::new(file));
                } else {
                    tracing::debug!("Skipping unsupported file in folder: {}", file);
                }
            }
        } else if path.is_file() && has_supported_extension(path) {
            selection.accepted.push(InputRef::new(path));
        } else {
            tracing::debug!("Skipping invalid input: {}", path);
            selection.skipped += 1;
        }
    }

    tracing::info!(
        "Collected {} input files ({} skipped)",
        selection.accepted.len(),
        selection.skipped
    );

    selection
}

struct FileListInner {
    files: Vec<InputRef>,
    window: Paginator,
}

/// The currently selected input files, rendered through its own window.
///
/// Guarded by its own lock, independent of the job queue lock.
pub struct FileList {
    inner: Mutex<FileListInner>,
}

impl FileList {
    pub fn new(window_size: usize) -> Self {
        Self {
            inner: Mutex::new(FileListInner {
                files: Vec::new(),
                window: Paginator::new(window_size),
            }),
        }
    }

    fn with_inner<R>(&self, f: impl FnOnce(&mut FileListInner) -> R) -> R {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut inner)
    }

    /// Replace the selection and reset to the first page.
    pub fn replace(&self, files: Vec<InputRef>) {
        self.with_inner(|inner| {
            inner.files = files;
            inner.window.reset();
            inner.window.set_total(inner.files.len());
        });
    }

    /// Append files not already selected; returns how many were added.
    pub fn extend(&self, files: impl IntoIterator<Item = InputRef>) -> usize {
        self.with_inner(|inner| {
            let mut added = 0;
            for file in files {
                if !inner.files.iter().any(|f| f.path == file.path) {
                    inner.files.push(file);
                    added += 1;
                }
            }
            inner.window.set_total(inner.files.len());
            added
        })
    }

    /// Remove and return the whole selection (e.g. after enqueueing it).
    pub fn take_all(&self) -> Vec<InputRef> {
        self.with_inner(|inner| {
            inner.window.reset();
            inner.window.set_total(0);
            std::mem::take(&mut inner.files)
        })
    }

    pub fn len(&self) -> usize {
        self.with_inner(|inner| inner.files.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visible files and the page they belong to.
    pub fn page(&self) -> (Vec<InputRef>, PageInfo) {
        self.with_inner(|inner| {
            let range: Range<usize> = inner.window.current_slice();
            (inner.files[range].to_vec(), inner.window.page_info())
        })
    }

    pub fn next_page(&self) -> bool {
        self.with_inner(|inner| inner.window.next_page())
    }

    pub fn prev_page(&self) -> bool {
        self.with_inner(|inner| inner.window.prev_page())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Utf8Path, name: &str) -> Utf8PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"x").unwrap();
        path
    }

    #[test]
    fn test_input_ref_display_name_is_stem() {
        let input = InputRef::new("/docs/report.final.pdf");
        assert_eq!(input.display_name, "report.final");
        assert!(input.is_supported());
        assert!(!input.is_image());
    }

    #[test]
    fn test_supported_extensions_case_insensitive() {
        assert!(has_supported_extension(Utf8Path::new("a.PDF")));
        assert!(has_supported_extension(Utf8Path::new("a.Jpeg")));
        assert!(!has_supported_extension(Utf8Path::new("a.docx")));
        assert!(!has_supported_extension(Utf8Path::new("noext")));
    }

    #[test]
    fn test_collect_inputs_expands_folder_sorted() {
        let temp = TempDir::new().unwrap();
        let dir = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        touch(&dir, "b.png");
        touch(&dir, "a.pdf");
        touch(&dir, "notes.txt");

        let selection = collect_inputs(&[dir.clone()]);
        let names: Vec<_> = selection
            .accepted
            .iter()
            .map(|i| i.display_name.as_str())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_collect_inputs_counts_skipped() {
        let temp = TempDir::new().unwrap();
        let dir = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        let pdf = touch(&dir, "one.pdf");
        let txt = touch(&dir, "two.txt");
        let missing = dir.join("missing.pdf");

        let selection = collect_inputs(&[pdf, txt, missing]);
        assert_eq!(selection.accepted.len(), 1);
        assert_eq!(selection.skipped, 2);
    }

    #[test]
    fn test_file_list_windowing() {
        let list = FileList::new(30);
        list.replace(
            (0..70)
                .map(|i| InputRef::new(format!("/in/{}.pdf", i)))
                .collect(),
        );

        let (files, info) = list.page();
        assert_eq!(files.len(), 30);
        assert_eq!(info.total_pages, 3);

        assert!(list.next_page());
        assert!(list.next_page());
        let (files, info) = list.page();
        assert_eq!(info.start, 40);
        assert_eq!(files.len(), 30);
        assert!(!list.next_page());
    }

    #[test]
    fn test_file_list_extend_deduplicates() {
        let list = FileList::new(30);
        assert_eq!(list.extend(vec![InputRef::new("/a.pdf"), InputRef::new("/b.pdf")]), 2);
        assert_eq!(list.extend(vec![InputRef::new("/a.pdf")]), 0);
        assert_eq!(list.len(), 2);

        let taken = list.take_all();
        assert_eq!(taken.len(), 2);
        assert!(list.is_empty());
    }
}
