//! Turns a request target into a response outcome.
//!
//! The handler knows nothing about sockets: it takes the raw request target
//! (`/a.txt&b.txt`) and returns an [`Outcome`] that the server layer turns
//! into an HTTP response.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{error, info, warn};

use crate::archive::ArchiveBuilder;
use crate::cache::{ArchiveCache, CacheKey};
use crate::config::ArchiveConfig;
use crate::pool::TaskPool;
use crate::resolver::FileResolver;

/// Separator between file names in a request target.
pub const NAME_DELIMITER: char = '&';

/// Browsers request this on their own; it is never served.
pub const FAVICON_TARGET: &str = "favicon.ico";

/// Body text when the target names no files.
pub const NO_FILES_REQUESTED: &str = "No Files Requested";

/// Body text when none of the named files exist.
pub const NO_FILES_FOUND: &str = "No Files Found!";

/// Body text when the archive could not be built.
pub const BUILD_FAILED: &str = "Failed to build archive";

/// A parsed request target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestTarget {
    /// `/` or nothing at all.
    Empty,
    /// The browser's automatic icon request.
    Favicon,
    /// Requested names in request order, duplicates included.
    Files(Vec<String>),
}

impl RequestTarget {
    /// Parse a raw request target such as `/a.txt&docs%2Fb.txt?x=1`.
    ///
    /// The query string is dropped and each name is percent-decoded; a name
    /// that does not decode to UTF-8 is kept as written.
    pub fn parse(target: &str) -> Self {
        let path = target.split_once('?').map_or(target, |(path, _)| path);
        let path = path.strip_prefix('/').unwrap_or(path);

        if path.is_empty() {
            return Self::Empty;
        }
        if path == FAVICON_TARGET {
            return Self::Favicon;
        }

        let names = path
            .split(NAME_DELIMITER)
            .map(|name| urlencoding::decode(name).map_or_else(|_| name.to_string(), |n| n.into_owned()))
            .collect();
        Self::Files(names)
    }
}

/// What the server should send back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing was requested; informational text.
    NoFilesRequested,
    /// Favicon request; send nothing.
    Ignored,
    /// None of the requested names exist; informational text.
    NoFilesFound,
    /// The archive, fresh or from the cache.
    Archive {
        /// Archive bytes.
        bytes: Bytes,
        /// Whether the bytes came from the cache.
        cached: bool,
    },
    /// The archive could not be built.
    ServerError(String),
}

/// Wrap informational text the way every text response is sent.
pub fn html_body(message: &str) -> String {
    format!("<html><body>{message}</body></html>")
}

/// Orchestrates resolution, caching and archive building per request.
#[derive(Debug, Clone)]
pub struct RequestHandler {
    resolver: FileResolver,
    cache: Arc<ArchiveCache>,
    builder: ArchiveBuilder,
    ttl: Duration,
}

impl RequestHandler {
    /// Assemble a handler from its parts.
    pub fn new(
        resolver: FileResolver,
        cache: Arc<ArchiveCache>,
        builder: ArchiveBuilder,
        ttl: Duration,
    ) -> Self {
        Self { resolver, cache, builder, ttl }
    }

    /// Build a handler from configuration, reading files on `pool`.
    pub fn from_config(
        config: &ArchiveConfig,
        pool: Arc<dyn TaskPool>,
        cache: Arc<ArchiveCache>,
    ) -> Self {
        Self::new(
            FileResolver::new(&config.root, config.confine_to_root),
            cache,
            ArchiveBuilder::new(pool, config.compression_level),
            config.cache_ttl(),
        )
    }

    /// The cache shared by every request.
    pub fn cache(&self) -> &Arc<ArchiveCache> {
        &self.cache
    }

    /// Handle one request target.
    pub async fn handle(&self, target: &str) -> Outcome {
        let names = match RequestTarget::parse(target) {
            RequestTarget::Empty => {
                warn!("No files requested");
                return Outcome::NoFilesRequested;
            }
            RequestTarget::Favicon => return Outcome::Ignored,
            RequestTarget::Files(names) => names,
        };

        let mut resolved = self.resolver.resolve(&names).resolved;
        if resolved.is_empty() {
            warn!(requested = names.len(), "No files found");
            return Outcome::NoFilesFound;
        }

        resolved.sort();
        let key = CacheKey::from_sorted(&resolved);

        if let Some(bytes) = self.cache.get(&key) {
            info!(files = resolved.len(), size = bytes.len(), "Request is already cached");
            return Outcome::Archive { bytes, cached: true };
        }
        info!(files = resolved.len(), "Request not cached");

        match self.builder.build(&resolved).await {
            Ok(bytes) => {
                self.cache.put(key, bytes.clone(), self.ttl);
                Outcome::Archive { bytes, cached: false }
            }
            Err(e) => {
                error!(error = %e, "Failed to build archive");
                Outcome::ServerError(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ContentSource;
    use crate::pool::InlinePool;
    use std::fs;
    use std::io;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Counts reads so tests can tell whether a build happened.
    #[derive(Debug, Default)]
    struct CountingSource {
        reads: AtomicUsize,
    }

    impl ContentSource for CountingSource {
        fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            std::fs::read(path)
        }
    }

    fn root_with(files: &[&str]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for file in files {
            let path = dir.path().join(file);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, format!("contents of {file}")).unwrap();
        }
        dir
    }

    fn entries_of(bytes: &Bytes) -> Vec<(String, String)> {
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes.to_vec())).unwrap();
        (0..archive.len())
            .map(|i| {
                let mut file = archive.by_index(i).unwrap();
                let mut content = String::new();
                std::io::Read::read_to_string(&mut file, &mut content).unwrap();
                (file.name().to_string(), content)
            })
            .collect()
    }

    fn handler_for(dir: &TempDir, source: Arc<CountingSource>, ttl: Duration) -> RequestHandler {
        RequestHandler::new(
            FileResolver::new(dir.path(), true),
            Arc::new(ArchiveCache::new()),
            ArchiveBuilder::with_source(Arc::new(InlinePool), source, 5),
            ttl,
        )
    }

    #[test]
    fn test_parse_empty_targets() {
        assert_eq!(RequestTarget::parse(""), RequestTarget::Empty);
        assert_eq!(RequestTarget::parse("/"), RequestTarget::Empty);
        assert_eq!(RequestTarget::parse("/?download=1"), RequestTarget::Empty);
    }

    #[test]
    fn test_parse_favicon() {
        assert_eq!(RequestTarget::parse("/favicon.ico"), RequestTarget::Favicon);
    }

    #[test]
    fn test_parse_splits_on_delimiter() {
        assert_eq!(
            RequestTarget::parse("/b.txt&a.txt&b.txt"),
            RequestTarget::Files(vec!["b.txt".into(), "a.txt".into(), "b.txt".into()])
        );
    }

    #[test]
    fn test_parse_decodes_names_and_drops_query() {
        assert_eq!(
            RequestTarget::parse("/my%20notes.txt&docs%2Freadme.md?x=1"),
            RequestTarget::Files(vec!["my notes.txt".into(), "docs/readme.md".into()])
        );
    }

    #[test]
    fn test_parse_keeps_undecodable_names() {
        assert_eq!(
            RequestTarget::parse("/bad%FF.txt"),
            RequestTarget::Files(vec!["bad%FF.txt".into()])
        );
    }

    #[test]
    fn test_html_body() {
        assert_eq!(html_body(NO_FILES_FOUND), "<html><body>No Files Found!</body></html>");
    }

    #[tokio::test]
    async fn test_empty_target_yields_no_files_requested() {
        let dir = root_with(&[]);
        let handler = handler_for(&dir, Arc::default(), Duration::from_secs(60));

        assert_eq!(handler.handle("/").await, Outcome::NoFilesRequested);
        assert_eq!(handler.handle("").await, Outcome::NoFilesRequested);
    }

    #[tokio::test]
    async fn test_favicon_is_ignored() {
        let dir = root_with(&["favicon.ico"]);
        let handler = handler_for(&dir, Arc::default(), Duration::from_secs(60));

        assert_eq!(handler.handle("/favicon.ico").await, Outcome::Ignored);
    }

    #[tokio::test]
    async fn test_all_missing_yields_no_files_found() {
        let dir = root_with(&[]);
        let source = Arc::new(CountingSource::default());
        let handler = handler_for(&dir, Arc::clone(&source), Duration::from_secs(60));

        assert_eq!(handler.handle("/nope.txt&gone.txt").await, Outcome::NoFilesFound);
        assert_eq!(source.reads.load(Ordering::SeqCst), 0);
        assert!(handler.cache().is_empty());
    }

    #[tokio::test]
    async fn test_partial_match_builds_found_files_only() {
        let dir = root_with(&["x.txt"]);
        let source = Arc::new(CountingSource::default());
        let handler = handler_for(&dir, Arc::clone(&source), Duration::from_secs(60));

        let outcome = handler.handle("/x.txt&missing.txt").await;

        assert!(matches!(outcome, Outcome::Archive { cached: false, .. }));
        assert_eq!(source.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_second_request_is_served_from_cache() {
        let dir = root_with(&["a.txt", "b.txt"]);
        let source = Arc::new(CountingSource::default());
        let handler = handler_for(&dir, Arc::clone(&source), Duration::from_secs(60));

        let Outcome::Archive { bytes: first, cached: false } = handler.handle("/a.txt&b.txt").await
        else {
            panic!("Expected fresh archive");
        };
        let Outcome::Archive { bytes: second, cached: true } = handler.handle("/b.txt&a.txt").await
        else {
            panic!("Expected cached archive");
        };

        assert_eq!(first, second);
        assert_eq!(source.reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_expired_entry_forces_rebuild() {
        let dir = root_with(&["a.txt"]);
        let source = Arc::new(CountingSource::default());
        let handler = handler_for(&dir, Arc::clone(&source), Duration::from_millis(20));

        let _ = handler.handle("/a.txt").await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        let outcome = handler.handle("/a.txt").await;

        assert!(matches!(outcome, Outcome::Archive { cached: false, .. }));
        assert_eq!(source.reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_build_failure_is_not_cached() {
        #[derive(Debug)]
        struct FailingSource;

        impl ContentSource for FailingSource {
            fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
                Err(io::Error::new(io::ErrorKind::PermissionDenied, path.display().to_string()))
            }
        }

        let dir = root_with(&["a.txt"]);
        let handler = RequestHandler::new(
            FileResolver::new(dir.path(), true),
            Arc::new(ArchiveCache::new()),
            ArchiveBuilder::with_source(Arc::new(InlinePool), Arc::new(FailingSource), 5),
            Duration::from_secs(60),
        );

        let outcome = handler.handle("/a.txt").await;

        assert!(matches!(outcome, Outcome::ServerError(_)));
        assert!(handler.cache().is_empty());
    }

    #[tokio::test]
    async fn test_entries_follow_string_order_of_paths() {
        let dir = root_with(&["a/b.txt", "a-c.txt"]);
        let source = Arc::new(CountingSource::default());
        let handler = handler_for(&dir, source, Duration::from_secs(60));

        let Outcome::Archive { bytes, .. } = handler.handle("/a/b.txt&a-c.txt").await else {
            panic!("Expected archive");
        };

        assert_eq!(
            entries_of(&bytes),
            vec![
                ("a-c.txt".to_string(), "contents of a-c.txt".to_string()),
                ("b.txt".to_string(), "contents of a/b.txt".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_colliding_base_names_keep_later_content() {
        let dir = root_with(&["same.txt", "sub/same.txt"]);
        let source = Arc::new(CountingSource::default());
        let handler = handler_for(&dir, source, Duration::from_secs(60));

        let Outcome::Archive { bytes, .. } = handler.handle("/sub/same.txt&same.txt").await else {
            panic!("Expected archive");
        };

        assert_eq!(
            entries_of(&bytes),
            vec![("same.txt".to_string(), "contents of sub/same.txt".to_string())]
        );
    }
}
