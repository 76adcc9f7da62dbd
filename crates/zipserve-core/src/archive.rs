//! Builds zip archives from resolved files.
//!
//! Every file is read by its own job on the [`TaskPool`]. Reads complete in
//! any order, but entries are written in the order of the input paths, so a
//! given sorted path set always yields the same archive.

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Cursor, Write};
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::pool::{TaskPool, submit_blocking};
use crate::resolver::ResolvedPath;

/// Deflate level used when none is configured.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 5;

/// Archive build errors.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// A file could not be read. The whole build is abandoned.
    #[error("failed to read {path}: {source}")]
    Read {
        /// Path that failed.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The zip writer failed.
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// A pool job ended without reporting a result.
    #[error("archive task ended without a result")]
    TaskDropped,
}

/// Where file contents come from.
pub trait ContentSource: Send + Sync + fmt::Debug {
    /// Read a whole file.
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
}

/// Reads files from the local file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsSource;

impl ContentSource for FsSource {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }
}

/// Builds deflate-compressed zip archives.
#[derive(Debug, Clone)]
pub struct ArchiveBuilder {
    pool: Arc<dyn TaskPool>,
    source: Arc<dyn ContentSource>,
    compression_level: u32,
}

impl ArchiveBuilder {
    /// Create a builder that reads from the file system.
    pub fn new(pool: Arc<dyn TaskPool>, compression_level: u32) -> Self {
        Self::with_source(pool, Arc::new(FsSource), compression_level)
    }

    /// Create a builder with a custom content source.
    pub fn with_source(
        pool: Arc<dyn TaskPool>,
        source: Arc<dyn ContentSource>,
        compression_level: u32,
    ) -> Self {
        Self { pool, source, compression_level }
    }

    /// Build an archive holding one entry per path, named by base file name.
    ///
    /// Paths sharing a base name share one entry: it stays where the name
    /// first appeared and holds the content of the last such path. Any read
    /// failure fails the whole build.
    pub async fn build(&self, paths: &[ResolvedPath]) -> Result<Bytes, ArchiveError> {
        let mut slots: Vec<(String, &ResolvedPath)> = Vec::with_capacity(paths.len());
        let mut by_name: HashMap<String, usize> = HashMap::new();

        for path in paths {
            let name = path.file_name();
            if let Some(&slot) = by_name.get(&name) {
                warn!(path = %path, replaced = %slots[slot].1, entry = %name, "Duplicate entry name, later file wins");
                slots[slot].1 = path;
            } else {
                by_name.insert(name.clone(), slots.len());
                slots.push((name, path));
            }
        }

        let mut pending = Vec::with_capacity(slots.len());
        for (name, path) in slots {
            let source = Arc::clone(&self.source);
            let job_path = path.clone();
            let rx = submit_blocking(self.pool.as_ref(), move || {
                let content = source.read(job_path.as_path());
                if content.is_ok() {
                    debug!(path = %job_path, "File read");
                }
                content
            });
            pending.push((name, path, rx));
        }

        let mut entries = Vec::with_capacity(pending.len());
        for (name, path, rx) in pending {
            let content = rx
                .await
                .map_err(|_| ArchiveError::TaskDropped)?
                .map_err(|source| ArchiveError::Read { path: path.to_string(), source })?;
            entries.push((name, content));
        }

        let level = self.compression_level;
        let count = entries.len();
        let archive = submit_blocking(self.pool.as_ref(), move || write_archive(entries, level))
            .await
            .map_err(|_| ArchiveError::TaskDropped)??;

        info!(entries = count, size = archive.len(), "Files zipped");
        Ok(Bytes::from(archive))
    }
}

fn write_archive(entries: Vec<(String, Vec<u8>)>, level: u32) -> Result<Vec<u8>, ArchiveError> {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(i64::from(level)));

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in entries {
        writer.start_file(name, options)?;
        writer.write_all(&content).map_err(zip::result::ZipError::from)?;
    }
    Ok(writer.finish()?.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{InlinePool, WorkerPool};
    use std::fs;
    use std::io::Read;
    use std::time::Duration;
    use tempfile::TempDir;
    use zip::ZipArchive;

    fn entries_of(bytes: &Bytes) -> Vec<(String, Vec<u8>)> {
        let mut archive = ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
        (0..archive.len())
            .map(|i| {
                let mut file = archive.by_index(i).unwrap();
                let mut content = Vec::new();
                file.read_to_end(&mut content).unwrap();
                (file.name().to_string(), content)
            })
            .collect()
    }

    fn write_files(dir: &TempDir, files: &[(&str, &str)]) -> Vec<ResolvedPath> {
        files
            .iter()
            .map(|(name, content)| {
                let path = dir.path().join(name);
                fs::write(&path, content).unwrap();
                ResolvedPath::new(path)
            })
            .collect()
    }

    /// Sleeps longest for the first path so reads finish in reverse order.
    #[derive(Debug)]
    struct SlowFirstSource {
        delays: Vec<(String, Duration)>,
    }

    impl ContentSource for SlowFirstSource {
        fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            if let Some((_, delay)) = self.delays.iter().find(|(n, _)| *n == name) {
                std::thread::sleep(*delay);
            }
            Ok(name.into_bytes())
        }
    }

    #[tokio::test]
    async fn test_build_round_trips_content() {
        let dir = TempDir::new().unwrap();
        let paths = write_files(&dir, &[("a.txt", "alpha"), ("b.txt", "bravo")]);
        let builder = ArchiveBuilder::new(Arc::new(InlinePool), DEFAULT_COMPRESSION_LEVEL);

        let bytes = builder.build(&paths).await.unwrap();

        assert_eq!(
            entries_of(&bytes),
            vec![
                ("a.txt".to_string(), b"alpha".to_vec()),
                ("b.txt".to_string(), b"bravo".to_vec()),
            ]
        );
    }

    #[tokio::test]
    async fn test_entries_use_base_names() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested/deep.txt"), "deep").unwrap();
        let paths = vec![ResolvedPath::new(dir.path().join("nested/deep.txt"))];
        let builder = ArchiveBuilder::new(Arc::new(InlinePool), DEFAULT_COMPRESSION_LEVEL);

        let bytes = builder.build(&paths).await.unwrap();

        assert_eq!(entries_of(&bytes)[0].0, "deep.txt");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_entry_order_ignores_read_completion_order() {
        let source = SlowFirstSource {
            delays: vec![
                ("a.txt".to_string(), Duration::from_millis(150)),
                ("b.txt".to_string(), Duration::from_millis(75)),
            ],
        };
        let paths = vec![
            ResolvedPath::new("/virtual/a.txt"),
            ResolvedPath::new("/virtual/b.txt"),
            ResolvedPath::new("/virtual/c.txt"),
        ];
        let pool = Arc::new(WorkerPool::current().unwrap());
        let builder = ArchiveBuilder::with_source(pool, Arc::new(source), DEFAULT_COMPRESSION_LEVEL);

        let bytes = builder.build(&paths).await.unwrap();

        let names: Vec<String> = entries_of(&bytes).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "c.txt"]);
    }

    #[tokio::test]
    async fn test_same_paths_build_identical_archives() {
        let dir = TempDir::new().unwrap();
        let paths = write_files(&dir, &[("a.txt", "alpha"), ("b.txt", "bravo")]);
        let builder = ArchiveBuilder::new(Arc::new(InlinePool), DEFAULT_COMPRESSION_LEVEL);

        let first = builder.build(&paths).await.unwrap();
        let second = builder.build(&paths).await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_read_failure_aborts_build() {
        let dir = TempDir::new().unwrap();
        let mut paths = write_files(&dir, &[("a.txt", "alpha")]);
        paths.push(ResolvedPath::new(dir.path().join("vanished.txt")));
        let builder = ArchiveBuilder::new(Arc::new(InlinePool), DEFAULT_COMPRESSION_LEVEL);

        let err = builder.build(&paths).await.unwrap_err();

        match err {
            ArchiveError::Read { path, source } => {
                assert!(path.ends_with("vanished.txt"));
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("Expected Read error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_duplicate_base_names_keep_last() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("one")).unwrap();
        fs::create_dir_all(dir.path().join("two")).unwrap();
        fs::write(dir.path().join("one/same.txt"), "first").unwrap();
        fs::write(dir.path().join("two/same.txt"), "second").unwrap();
        let paths = vec![
            ResolvedPath::new(dir.path().join("one/same.txt")),
            ResolvedPath::new(dir.path().join("two/same.txt")),
        ];
        let builder = ArchiveBuilder::new(Arc::new(InlinePool), DEFAULT_COMPRESSION_LEVEL);

        let bytes = builder.build(&paths).await.unwrap();

        assert_eq!(entries_of(&bytes), vec![("same.txt".to_string(), b"second".to_vec())]);
    }

    #[tokio::test]
    async fn test_duplicate_entry_keeps_first_position() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("one")).unwrap();
        fs::create_dir_all(dir.path().join("two")).unwrap();
        fs::write(dir.path().join("one/same.txt"), "first").unwrap();
        fs::write(dir.path().join("other.txt"), "other").unwrap();
        fs::write(dir.path().join("two/same.txt"), "second").unwrap();
        let paths = vec![
            ResolvedPath::new(dir.path().join("one/same.txt")),
            ResolvedPath::new(dir.path().join("other.txt")),
            ResolvedPath::new(dir.path().join("two/same.txt")),
        ];
        let builder = ArchiveBuilder::new(Arc::new(InlinePool), DEFAULT_COMPRESSION_LEVEL);

        let bytes = builder.build(&paths).await.unwrap();

        assert_eq!(
            entries_of(&bytes),
            vec![
                ("same.txt".to_string(), b"second".to_vec()),
                ("other.txt".to_string(), b"other".to_vec()),
            ]
        );
    }

    #[tokio::test]
    async fn test_content_is_deflated() {
        let dir = TempDir::new().unwrap();
        let text = "zipserve ".repeat(1000);
        let paths = write_files(&dir, &[("big.txt", text.as_str())]);
        let builder = ArchiveBuilder::new(Arc::new(InlinePool), DEFAULT_COMPRESSION_LEVEL);

        let bytes = builder.build(&paths).await.unwrap();

        assert!(bytes.len() < text.len());
        let mut archive = ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
        assert_eq!(archive.by_index(0).unwrap().compression(), CompressionMethod::Deflated);
    }
}
