//! Maps requested file names onto files under the serving root.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

/// A file that existed under the serving root when it was resolved.
///
/// Existence is checked once; the file may be gone by the time it is read.
///
/// Paths compare as plain strings, so `a-c.txt` sorts before `a/b.txt`.
/// `PathBuf` itself compares component by component, which would not.
#[derive(Debug, Clone)]
pub struct ResolvedPath(PathBuf);

impl ResolvedPath {
    /// Wrap a path without checking it. Intended for callers that already
    /// know the path exists, and for tests.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// The underlying path.
    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Base file name, used as the archive entry name.
    #[must_use]
    pub fn file_name(&self) -> String {
        self.0
            .file_name()
            .map_or_else(|| self.0.to_string_lossy().into_owned(), |n| n.to_string_lossy().into_owned())
    }
}

impl fmt::Display for ResolvedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl PartialEq for ResolvedPath {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_os_str() == other.0.as_os_str()
    }
}

impl Eq for ResolvedPath {}

impl PartialOrd for ResolvedPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ResolvedPath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.as_os_str().cmp(other.0.as_os_str())
    }
}

impl Hash for ResolvedPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.as_os_str().hash(state);
    }
}

impl AsRef<Path> for ResolvedPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

/// Outcome of resolving a requested file set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Files found, in request order. Duplicates are kept.
    pub resolved: Vec<ResolvedPath>,
    /// Requested names with no matching file, in request order.
    pub missing: Vec<String>,
}

impl Resolution {
    /// True when none of the requested names matched a file.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }
}

/// Resolves requested names against a fixed root directory.
#[derive(Debug, Clone)]
pub struct FileResolver {
    root: PathBuf,
    confine_to_root: bool,
}

impl FileResolver {
    /// Create a resolver for `root`.
    ///
    /// With `confine_to_root` set, absolute names and names containing `..`
    /// are reported as missing instead of being joined onto the root.
    pub fn new(root: impl Into<PathBuf>, confine_to_root: bool) -> Self {
        Self { root: root.into(), confine_to_root }
    }

    /// The serving root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve each name to `root/name`, splitting found from missing.
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> Resolution {
        let mut resolution = Resolution::default();

        for name in names {
            let name = name.as_ref();
            debug!(name = %name, "File requested");

            if self.confine_to_root && escapes_root(name) {
                warn!(name = %name, root = %self.root.display(), "Requested name escapes serving root, rejected");
                resolution.missing.push(name.to_string());
                continue;
            }

            let candidate = self.root.join(name);
            if candidate.is_file() {
                debug!(name = %name, path = %candidate.display(), "File found");
                resolution.resolved.push(ResolvedPath(candidate));
            } else {
                warn!(name = %name, "File not found");
                resolution.missing.push(name.to_string());
            }
        }

        resolution
    }
}

fn escapes_root(name: &str) -> bool {
    Path::new(name).components().any(|c| {
        matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_))
    })
}
