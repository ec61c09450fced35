//! Maps caller-relative paths to provider-absolute keys under a work dir.

/// Resolves paths against a configured work directory.
///
/// The work directory is kept as configured; one leading `/` is dropped when
/// building keys because providers address objects without it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathResolver {
    work_dir: String,
}

impl PathResolver {
    pub fn new(work_dir: impl Into<String>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    pub fn work_dir(&self) -> &str {
        &self.work_dir
    }

    fn prefix(&self) -> &str {
        self.work_dir.strip_prefix('/').unwrap_or(&self.work_dir)
    }

    /// Provider key for a caller path.
    pub fn to_absolute(&self, path: &str) -> String {
        format!("{}{}", self.prefix(), path)
    }

    /// Caller path for a provider key.
    ///
    /// Keys outside the work dir come back with exactly one leading `/`.
    pub fn to_relative(&self, key: &str) -> String {
        match key.strip_prefix(self.prefix()) {
            Some(rel) => rel.to_string(),
            None => format!("/{}", key.trim_start_matches('/')),
        }
    }
}

impl Default for PathResolver {
    fn default() -> Self {
        Self::new("/")
    }
}
