use std::collections::{BTreeMap, BTreeSet};

/// Subsystem an image is linked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Subsystem {
    #[default]
    Console,
    Gui,
}

/// A resolved executable image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub path: String,
    pub subsystem: Subsystem,
}

/// The filesystem view consulted while creating processes.
pub trait Loader: Send + Sync {
    /// Resolves an image name candidate, or `None` if nothing matches.
    fn resolve(&self, candidate: &str) -> Option<ImageInfo>;

    /// Whether `path` names an existing directory.
    fn is_directory(&self, path: &str) -> bool;
}

/// A [`Loader`] backed by fixed tables of images and directories.
#[derive(Debug, Clone, Default)]
pub struct StaticLoader {
    permissive: bool,
    images: BTreeMap<String, Subsystem>,
    directories: BTreeSet<String>,
}

impl StaticLoader {
    /// An empty loader that resolves nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// A loader that accepts any image as a console image and any path as a
    /// directory. Registered images still take precedence.
    pub fn permissive() -> Self {
        Self {
            permissive: true,
            ..Self::default()
        }
    }

    pub fn with_image(mut self, path: impl Into<String>, subsystem: Subsystem) -> Self {
        self.images.insert(path.into(), subsystem);
        self
    }

    pub fn with_directory(mut self, path: impl Into<String>) -> Self {
        self.directories.insert(path.into());
        self
    }
}

impl Loader for StaticLoader {
    fn resolve(&self, candidate: &str) -> Option<ImageInfo> {
        if let Some(&subsystem) = self.images.get(candidate) {
            return Some(ImageInfo {
                path: candidate.to_owned(),
                subsystem,
            });
        }
        self.permissive.then(|| ImageInfo {
            path: candidate.to_owned(),
            subsystem: Subsystem::Console,
        })
    }

    fn is_directory(&self, path: &str) -> bool {
        self.permissive || self.directories.contains(path)
    }
}
