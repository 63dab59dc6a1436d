//! Artifact handles passed between actions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where an artifact lives in the external artifact store.
///
/// Locations are opaque to the engine: they are produced by source and build
/// backends and handed, unchanged, to the actions that consume them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactLocation {
    /// The store (bucket) holding the object.
    pub store: String,
    /// The object key.
    pub key: String,
    /// The object version, when the store is versioned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ArtifactLocation {
    /// Creates a new unversioned location.
    #[must_use]
    pub fn new(store: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            store: store.into(),
            key: key.into(),
            version: None,
        }
    }

    /// Sets the object version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Points at a single file inside this artifact.
    #[must_use]
    pub fn at_path(&self, file: impl Into<String>) -> ArtifactPath {
        ArtifactPath {
            location: self.clone(),
            file: file.into(),
        }
    }
}

impl fmt::Display for ArtifactLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}/{}@{}", self.store, self.key, version),
            None => write!(f, "{}/{}", self.store, self.key),
        }
    }
}

/// A file inside an artifact, e.g. a deployment template.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactPath {
    /// The containing artifact.
    pub location: ArtifactLocation,
    /// The file name within the artifact.
    pub file: String,
}

impl fmt::Display for ArtifactPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.location, self.file)
    }
}

/// A named artifact produced by an action during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// The logical artifact name declared in the pipeline.
    pub name: String,
    /// Where the produced object lives.
    pub location: ArtifactLocation,
}

impl Artifact {
    /// Creates a new artifact.
    #[must_use]
    pub fn new(name: impl Into<String>, location: ArtifactLocation) -> Self {
        Self {
            name: name.into(),
            location,
        }
    }
}
