//! Flat JSON history files, read and rewritten wholesale.

use crate::error::Result;
use crate::schema::{BillRecord, WeatherHistory};
use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_str(&content)?))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut serializer)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, buf)?;
    debug!("Wrote {}", path.display());
    Ok(())
}

/// JSON array of [`BillRecord`]s keyed by source file name.
#[derive(Debug, Clone)]
pub struct BillStore {
    path: PathBuf,
}

impl BillStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `None` when the file does not exist yet.
    pub fn load(&self) -> Result<Option<Vec<BillRecord>>> {
        read_json(&self.path)
    }

    pub fn save(&self, bills: &[BillRecord]) -> Result<()> {
        write_json(&self.path, &bills)
    }
}

/// JSON object holding the daily weather columns.
#[derive(Debug, Clone)]
pub struct WeatherStore {
    path: PathBuf,
}

impl WeatherStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `None` when the file does not exist yet.
    pub fn load(&self) -> Result<Option<WeatherHistory>> {
        read_json(&self.path)
    }

    pub fn save(&self, history: &WeatherHistory) -> Result<()> {
        write_json(&self.path, history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::BillExtraction;

    #[test]
    fn test_missing_files_load_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(BillStore::new(dir.path().join("bills.json"))
            .load()
            .unwrap()
            .is_none());
        assert!(WeatherStore::new(dir.path().join("weather.json"))
            .load()
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_bill_store_writes_readable_json() {
        let dir = tempfile::tempdir().unwrap();
        let store = BillStore::new(dir.path().join("nested").join("bills.json"));
        let record = BillRecord::new(
            BillExtraction {
                reference_month: Some("MARÇO/2024".to_string()),
                ..Default::default()
            },
            "março.pdf",
            "2024-04-01 09:30:00",
        );

        store.save(std::slice::from_ref(&record)).unwrap();

        let text = fs::read_to_string(store.path()).unwrap();
        assert!(text.contains("\n    {"));
        assert!(text.contains("MARÇO/2024"));
        assert_eq!(store.load().unwrap(), Some(vec![record]));
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bills.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(BillStore::new(path).load().is_err());
    }
}
