//! Scratch-directory scanning and output-file collection.
//!
//! Executors snapshot the scratch directory before a run and collect the
//! files that appeared afterwards. Names starting with `.` are invisible to
//! the scan on both sides of the protocol, which keeps staged support files
//! (the interpreter server script) out of every result.

use std::collections::HashSet;
use std::path::Path;

use crucible_core::result::OutputFile;

/// Caps applied while collecting outputs from a scratch directory.
#[derive(Debug, Clone)]
pub struct OutputCaps {
    /// Maximum number of files returned per execution.
    pub max_files: usize,
    /// Maximum size of a single returned file; larger files are reported
    /// by name with a truncation marker and no content.
    pub max_file_bytes: u64,
    /// Maximum bytes kept of each captured stream.
    pub max_stream_bytes: usize,
}

impl Default for OutputCaps {
    fn default() -> Self {
        Self {
            max_files: 20,
            max_file_bytes: 10 * 1024 * 1024,
            max_stream_bytes: 1024 * 1024,
        }
    }
}

/// Names of the regular files at the top level of a scratch directory.
///
/// # Errors
///
/// Returns an error if the directory cannot be read.
pub async fn snapshot_scratch(dir: &Path) -> std::io::Result<HashSet<String>> {
    let mut names = HashSet::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        if entry.file_type().await?.is_file() {
            names.insert(name);
        }
    }
    Ok(names)
}

/// Collect files that appeared in `dir` since `before` was taken.
///
/// Returns the collected files (sorted by name) and any warnings produced
/// by the caps: files beyond `max_files` are dropped with a note, files
/// over `max_file_bytes` come back truncated with empty content.
///
/// # Errors
///
/// Returns an error if the directory cannot be re-scanned.
pub async fn collect_new_files(
    dir: &Path,
    before: &HashSet<String>,
    caps: &OutputCaps,
) -> std::io::Result<(Vec<OutputFile>, Vec<String>)> {
    let after = snapshot_scratch(dir).await?;
    let mut new_names: Vec<String> = after.difference(before).cloned().collect();
    new_names.sort();

    let mut warnings = Vec::new();
    if new_names.len() > caps.max_files {
        warnings.push(format!(
            "{} output files produced; only the first {} are returned",
            new_names.len(),
            caps.max_files
        ));
        new_names.truncate(caps.max_files);
    }

    let mut files = Vec::with_capacity(new_names.len());
    for name in new_names {
        let path = dir.join(&name);
        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta,
            // The program may have deleted its own file between scans.
            Err(_) => continue,
        };

        if meta.len() > caps.max_file_bytes {
            warnings.push(format!(
                "output file {name:?} is {} bytes, cap is {}; content withheld",
                meta.len(),
                caps.max_file_bytes
            ));
            files.push(OutputFile {
                name,
                content: Vec::new(),
                truncated: true,
            });
            continue;
        }

        let content = tokio::fs::read(&path).await?;
        files.push(OutputFile {
            name,
            content,
            truncated: false,
        });
    }

    Ok((files, warnings))
}

/// Truncate a captured stream to the configured cap.
///
/// Returns the (possibly shortened) stream and whether truncation happened.
#[must_use]
pub fn truncate_stream(mut stream: String, caps: &OutputCaps) -> (String, bool) {
    if stream.len() <= caps.max_stream_bytes {
        return (stream, false);
    }
    // Cut on a character boundary at or below the cap.
    let mut cut = caps.max_stream_bytes;
    while !stream.is_char_boundary(cut) {
        cut -= 1;
    }
    stream.truncate(cut);
    (stream, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> OutputCaps {
        OutputCaps {
            max_files: 3,
            max_file_bytes: 16,
            max_stream_bytes: 8,
        }
    }

    #[tokio::test]
    async fn new_files_detected_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("existing.txt"), b"old").await.unwrap();
        let before = snapshot_scratch(dir.path()).await.unwrap();

        tokio::fs::write(dir.path().join("b.txt"), b"bb").await.unwrap();
        tokio::fs::write(dir.path().join("a.txt"), b"aa").await.unwrap();

        let (files, warnings) = collect_new_files(dir.path(), &before, &caps()).await.unwrap();
        assert!(warnings.is_empty());
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["a.txt", "b.txt"]);
        assert_eq!(files[0].content, b"aa");
    }

    #[tokio::test]
    async fn hidden_files_invisible() {
        let dir = tempfile::tempdir().unwrap();
        let before = snapshot_scratch(dir.path()).await.unwrap();

        tokio::fs::write(dir.path().join(".server.py"), b"print()").await.unwrap();
        tokio::fs::write(dir.path().join("out.txt"), b"x").await.unwrap();

        let (files, _) = collect_new_files(dir.path(), &before, &caps()).await.unwrap();
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["out.txt"]);
    }

    #[tokio::test]
    async fn oversized_file_reported_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let before = snapshot_scratch(dir.path()).await.unwrap();

        tokio::fs::write(dir.path().join("big.bin"), vec![0u8; 64]).await.unwrap();

        let (files, warnings) = collect_new_files(dir.path(), &before, &caps()).await.unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].truncated);
        assert!(files[0].content.is_empty());
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("big.bin"));
    }

    #[tokio::test]
    async fn file_count_capped_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        let before = snapshot_scratch(dir.path()).await.unwrap();

        for i in 0..5 {
            tokio::fs::write(dir.path().join(format!("f{i}.txt")), b"x").await.unwrap();
        }

        let (files, warnings) = collect_new_files(dir.path(), &before, &caps()).await.unwrap();
        assert_eq!(files.len(), 3);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("first 3"));
    }

    #[test]
    fn stream_truncation_respects_char_boundaries() {
        let caps = caps();
        let (s, truncated) = truncate_stream("short".to_string(), &caps);
        assert_eq!(s, "short");
        assert!(!truncated);

        let (s, truncated) = truncate_stream("ééééééé".to_string(), &caps);
        assert!(truncated);
        assert!(s.len() <= 8);
        assert!(s.chars().all(|c| c == 'é'));
    }
}
