use std::{collections::BTreeMap, fs, io, path::Path};

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::ClassDefinition;

/// The index of an archive source.
///
/// An archive is a JSON document mapping entry paths to class images:
///
/// ```json
/// { "entries": { "com/acme/Contract.class": { "name": "com.acme.Contract" } } }
/// ```
///
/// Entries are kept as raw JSON and handed out byte-for-byte; the archive never interprets them.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ArchiveIndex {
    entries: BTreeMap<String, Box<RawValue>>,
}

impl ArchiveIndex {
    /// Reads and indexes an archive file.
    pub fn read(path: &Path) -> io::Result<Self> {
        let contents = fs::read(path)?;
        serde_json::from_slice(&contents).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Builds an archive from class definitions.
    pub fn from_classes<'a>(
        classes: impl IntoIterator<Item = &'a ClassDefinition>,
    ) -> serde_json::Result<Self> {
        let mut entries = BTreeMap::new();
        for class in classes {
            entries.insert(class.name.entry_path(), serde_json::value::to_raw_value(class)?);
        }
        Ok(Self { entries })
    }

    /// Writes the archive to a file.
    pub fn write(&self, path: &Path) -> io::Result<()> {
        let contents = serde_json::to_vec_pretty(self).map_err(io::Error::other)?;
        fs::write(path, contents)
    }

    /// Returns the raw image stored under an entry path.
    pub fn entry(&self, entry: &str) -> Option<&[u8]> {
        self.entries.get(entry).map(|raw| raw.get().as_bytes())
    }

    /// Returns every entry path in the archive.
    pub fn entry_paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_are_kept_verbatim() {
        let json = r#"{"entries": {"com/acme/A.class": {"name":  "com.acme.A"}, "notes.txt": 1}}"#;
        let index: ArchiveIndex = serde_json::from_str(json).unwrap();
        assert_eq!(index.entry("com/acme/A.class"), Some(br#"{"name":  "com.acme.A"}"#.as_slice()));
        assert_eq!(index.entry_paths().collect::<Vec<_>>(), ["com/acme/A.class", "notes.txt"]);
        assert_eq!(index.entry("com/acme/B.class"), None);
    }

    #[test]
    fn test_archive_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classes.json");
        let class = ClassDefinition::new("com.acme.A");
        ArchiveIndex::from_classes([&class]).unwrap().write(&path).unwrap();

        let index = ArchiveIndex::read(&path).unwrap();
        let bytes = index.entry("com/acme/A.class").unwrap();
        assert_eq!(ClassDefinition::decode(bytes).unwrap(), class);
    }

    #[test]
    fn test_malformed_archive_is_invalid_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{").unwrap();
        assert_eq!(ArchiveIndex::read(&path).unwrap_err().kind(), io::ErrorKind::InvalidData);
    }
}
