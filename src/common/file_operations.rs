use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use atomicwrites::{AtomicFile, OverwriteBehavior};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub fn atomic_save_json<T: Serialize>(path: &Path, object: &T) -> Result<(), FileOperationError> {
    let af = AtomicFile::new(path, OverwriteBehavior::AllowOverwrite);
    af.write(|f| serde_json::to_writer(io::BufWriter::new(f), object))?;
    Ok(())
}

pub fn atomic_save_text(path: &Path, text: &str) -> Result<(), FileOperationError> {
    let af = AtomicFile::new(path, OverwriteBehavior::AllowOverwrite);
    af.write(|f| io::Write::write_all(f, text.as_bytes()))?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, FileOperationError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let data = serde_json::from_reader(reader)?;
    Ok(data)
}

pub fn read_text(path: &Path) -> Result<String, FileOperationError> {
    let mut text = String::new();
    BufReader::new(File::open(path)?).read_to_string(&mut text)?;
    Ok(text)
}

#[derive(Debug, Error)]
pub enum FileOperationError {
    #[error(transparent)]
    IoError(#[from] io::Error),

    #[error(transparent)]
    BinCodeError(#[from] bincode::Error),

    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),

    #[error(transparent)]
    AtomicWriteError(#[from] atomicwrites::Error<io::Error>),

    #[error(transparent)]
    AtomicWriteSerdeJsonError(#[from] atomicwrites::Error<serde_json::Error>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_atomic_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.json");
        let mut object = BTreeMap::new();
        object.insert("highest_etag".to_string(), "00ff".to_string());
        atomic_save_json(&path, &object).unwrap();
        let read_back: BTreeMap<String, String> = read_json(&path).unwrap();
        assert_eq!(object, read_back);
    }

    #[test]
    fn test_text_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.version");
        atomic_save_text(&path, "1\n").unwrap();
        assert_eq!(read_text(&path).unwrap(), "1\n");
    }
}
