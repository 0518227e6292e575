use core::cell::OnceCell;
use std::{
    collections::{BTreeMap, BTreeSet},
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::trace;

use crate::{ArchiveIndex, ClassLoadingError, ClassName, ClassOrigin, HostEnvironment, SourceScanError};

/// An immutable origin of raw class images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassSource {
    /// A JSON archive file, see [`ArchiveIndex`].
    Archive(PathBuf),
    /// A directory holding one image per class at its entry path.
    Directory(PathBuf),
    /// In-memory images keyed by entry path.
    Memory {
        /// Human-readable label used in diagnostics.
        label: String,
        /// Raw images keyed by entry path.
        entries: BTreeMap<String, Vec<u8>>,
    },
}

impl ClassSource {
    /// Creates an archive source.
    pub fn archive(path: impl Into<PathBuf>) -> Self {
        Self::Archive(path.into())
    }

    /// Creates a directory source.
    pub fn directory(path: impl Into<PathBuf>) -> Self {
        Self::Directory(path.into())
    }

    /// Creates an in-memory source from class images.
    pub fn memory(
        label: impl Into<String>,
        classes: impl IntoIterator<Item = (ClassName, Vec<u8>)>,
    ) -> Self {
        Self::Memory {
            label: label.into(),
            entries: classes.into_iter().map(|(name, bytes)| (name.entry_path(), bytes)).collect(),
        }
    }

    /// Guesses the source kind of a path: directories become directory sources, files archives.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if path.is_dir() {
            Self::Directory(path)
        } else {
            Self::Archive(path)
        }
    }

    /// The label of the source, used in diagnostics and as the origin of loaded classes.
    pub fn label(&self) -> String {
        match self {
            Self::Archive(path) => format!("archive:{}", path.display()),
            Self::Directory(path) => format!("directory:{}", path.display()),
            Self::Memory { label, .. } => format!("memory:{label}"),
        }
    }
}

/// Raw class image bytes and where they came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassBytes {
    /// The undecoded class image.
    pub bytes: Vec<u8>,
    /// The source the image was read from.
    pub origin: ClassOrigin,
}

/// Reads raw class images from an ordered list of [`ClassSource`]s.
///
/// Sources are scanned in declaration order and the first match wins. When no source declares a
/// class, the host environment's bootstrap library is consulted. The loader performs no
/// transformation. Archive indexes are read at most once per loader.
#[derive(Debug)]
pub struct SourceClassLoader {
    sources: Vec<ClassSource>,
    archives: Vec<OnceCell<ArchiveIndex>>,
    host: Arc<dyn HostEnvironment>,
}

impl SourceClassLoader {
    /// Creates a loader over `sources` falling back to `host`.
    pub fn new(sources: Vec<ClassSource>, host: Arc<dyn HostEnvironment>) -> Self {
        let archives = sources.iter().map(|_| OnceCell::new()).collect();
        Self { sources, archives, host }
    }

    /// The configured sources, in search order.
    pub fn sources(&self) -> &[ClassSource] {
        &self.sources
    }

    /// Reads the raw image of a class.
    pub fn read(&self, name: &ClassName) -> Result<ClassBytes, ClassLoadingError> {
        let entry = name.entry_path();
        for (index, source) in self.sources.iter().enumerate() {
            if let Some(bytes) = self.read_entry(index, source, name, &entry)? {
                trace!(class = %name, source = %source.label(), "read class image");
                return Ok(ClassBytes { bytes, origin: ClassOrigin::Source(source.label()) })
            }
        }
        if let Some(bytes) = self.host.class_bytes(name) {
            trace!(class = %name, "read class image from the bootstrap library");
            return Ok(ClassBytes { bytes, origin: ClassOrigin::Bootstrap })
        }
        Err(ClassLoadingError::ClassNotFound {
            name: name.clone(),
            entry,
            searched: self.sources.iter().map(ClassSource::label).collect(),
        })
    }

    /// Enumerates every class declared by the sources, bootstrap classes excluded.
    pub fn class_names(&self) -> Result<BTreeSet<ClassName>, SourceScanError> {
        let mut names = BTreeSet::new();
        for (index, source) in self.sources.iter().enumerate() {
            let scan_error = |path: &Path, error: io::Error| SourceScanError {
                label: source.label(),
                path: path.to_path_buf(),
                source: Arc::new(error),
            };
            match source {
                ClassSource::Archive(path) => {
                    let archive = self.archive(index, path).map_err(|e| scan_error(path, e))?;
                    names.extend(archive.entry_paths().filter_map(ClassName::from_entry_path));
                }
                ClassSource::Directory(root) => {
                    collect_directory(root, root, &mut names).map_err(|e| scan_error(root, e))?;
                }
                ClassSource::Memory { entries, .. } => {
                    names.extend(entries.keys().filter_map(|entry| ClassName::from_entry_path(entry)));
                }
            }
        }
        Ok(names)
    }

    fn read_entry(
        &self,
        index: usize,
        source: &ClassSource,
        name: &ClassName,
        entry: &str,
    ) -> Result<Option<Vec<u8>>, ClassLoadingError> {
        match source {
            ClassSource::Archive(path) => {
                let archive = self.archive(index, path).map_err(|e| io_error(name, path, e))?;
                Ok(archive.entry(entry).map(<[u8]>::to_vec))
            }
            ClassSource::Directory(root) => {
                let path = root.join(entry);
                match fs::read(&path) {
                    Ok(bytes) => Ok(Some(bytes)),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                    Err(e) => Err(io_error(name, &path, e)),
                }
            }
            ClassSource::Memory { entries, .. } => Ok(entries.get(entry).cloned()),
        }
    }

    fn archive(&self, index: usize, path: &Path) -> io::Result<&ArchiveIndex> {
        let cell = &self.archives[index];
        if let Some(archive) = cell.get() {
            return Ok(archive)
        }
        let archive = ArchiveIndex::read(path)?;
        trace!(path = %path.display(), "indexed archive");
        Ok(cell.get_or_init(|| archive))
    }
}

fn io_error(name: &ClassName, path: &Path, error: io::Error) -> ClassLoadingError {
    ClassLoadingError::Io { name: name.clone(), path: path.to_path_buf(), source: Arc::new(error) }
}

fn collect_directory(root: &Path, dir: &Path, names: &mut BTreeSet<ClassName>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_directory(root, &path, names)?;
        } else if let Some(name) = path
            .strip_prefix(root)
            .ok()
            .and_then(Path::to_str)
            .and_then(ClassName::from_entry_path)
        {
            names.insert(name);
        }
    }
    Ok(())
}
