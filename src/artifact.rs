//! Artifacts
//!
//! Trained methods are persisted as JSON at a fixed path convention,
//! `<out_dir>/weights/<run_name>_<method>.weights.xml`. Storage is injected
//! so that application can run against any backing store.
use crate::constants::{OUTPUT_SEPARATOR, WEIGHTS_DIR, WEIGHTS_SUFFIX};
use crate::errors::CalibrationError;
use crate::regressor::TrainedModel;
use hashbrown::HashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Where the artifact of `method` lives for a given run.
pub fn weights_path<P: AsRef<Path>>(out_dir: P, run_name: &str, method: &str) -> PathBuf {
    out_dir
        .as_ref()
        .join(WEIGHTS_DIR)
        .join(format!("{}{}{}{}", run_name, OUTPUT_SEPARATOR, method, WEIGHTS_SUFFIX))
}

/// Backing storage for trained artifacts.
pub trait ArtifactStore {
    fn exists(&self, path: &Path) -> bool;
    fn open(&self, path: &Path) -> Result<String, CalibrationError>;
    fn write(&mut self, path: &Path, contents: &str) -> Result<(), CalibrationError>;
}

/// Artifacts stored on the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileArtifactStore;

impl ArtifactStore for FileArtifactStore {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn open(&self, path: &Path) -> Result<String, CalibrationError> {
        fs::read_to_string(path).map_err(|e| CalibrationError::UnableToRead(format!("{}: {}", path.display(), e)))
    }

    fn write(&mut self, path: &Path, contents: &str) -> Result<(), CalibrationError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| CalibrationError::UnableToWrite(e.to_string()))?;
        }
        fs::write(path, contents).map_err(|e| CalibrationError::UnableToWrite(e.to_string()))
    }
}

/// Artifacts held in memory, keyed by path.
#[derive(Debug, Default, Clone)]
pub struct MemoryArtifactStore {
    files: HashMap<PathBuf, String>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        MemoryArtifactStore::default()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn remove(&mut self, path: &Path) -> Option<String> {
        self.files.remove(path)
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    fn open(&self, path: &Path) -> Result<String, CalibrationError> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| CalibrationError::UnableToRead(path.display().to_string()))
    }

    fn write(&mut self, path: &Path, contents: &str) -> Result<(), CalibrationError> {
        self.files.insert(path.to_path_buf(), contents.to_string());
        Ok(())
    }
}

pub trait ArtifactIO: Serialize + DeserializeOwned + Sized {
    /// Dump the artifact as a json object
    fn json_dump(&self) -> Result<String, CalibrationError> {
        serde_json::to_string(self).map_err(|e| CalibrationError::UnableToWrite(e.to_string()))
    }

    /// Load an artifact from Json string
    ///
    /// * `json_str` - String object, which can be serialized to json.
    fn from_json(json_str: &str) -> Result<Self, CalibrationError> {
        serde_json::from_str::<Self>(json_str).map_err(|e| CalibrationError::UnableToRead(e.to_string()))
    }

    /// Save the artifact to a store.
    fn save_artifact<S: ArtifactStore + ?Sized>(&self, store: &mut S, path: &Path) -> Result<(), CalibrationError> {
        store.write(path, &self.json_dump()?)
    }

    /// Load an artifact from a store.
    fn load_artifact<S: ArtifactStore + ?Sized>(store: &S, path: &Path) -> Result<Self, CalibrationError> {
        let json_str = store.open(path)?;
        Self::from_json(&json_str)
    }
}

impl ArtifactIO for TrainedModel {}
