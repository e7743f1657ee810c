use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use sages_core::{ErrorInfo, SageError};

/// Serialized method state with an integrity digest.
///
/// Files ending in `.bin` are written with `bincode`; anything else is
/// pretty-printed JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateCheckpoint<S> {
    /// Engine step at which the state was captured.
    pub timestep: u64,
    /// Name of the method that produced the state.
    pub method: String,
    /// SHA-256 of the state's canonical JSON encoding.
    pub digest: String,
    /// The method state.
    pub state: S,
}

impl<S> StateCheckpoint<S>
where
    S: Serialize + DeserializeOwned,
{
    /// Captures `state`.
    pub fn new(timestep: u64, method: &str, state: S) -> Result<Self, SageError> {
        let digest = state_digest(&state)?;
        Ok(Self {
            timestep,
            method: method.to_string(),
            digest,
            state,
        })
    }

    /// Writes the checkpoint, creating parent directories as needed.
    pub fn store(&self, path: &Path) -> Result<(), SageError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                SageError::Serde(
                    ErrorInfo::new("checkpoint-mkdir", err.to_string())
                        .with_context("path", parent.display().to_string()),
                )
            })?;
        }
        let bytes = if is_binary(path) {
            bincode::serialize(self).map_err(|err| serialize_error(path, err.to_string()))?
        } else {
            serde_json::to_vec_pretty(self).map_err(|err| serialize_error(path, err.to_string()))?
        };
        fs::write(path, bytes).map_err(|err| {
            SageError::Serde(
                ErrorInfo::new("checkpoint-write", err.to_string())
                    .with_context("path", path.display().to_string()),
            )
        })
    }

    /// Reads a checkpoint and verifies its digest.
    pub fn load(path: &Path) -> Result<Self, SageError> {
        let bytes = fs::read(path).map_err(|err| {
            SageError::Serde(
                ErrorInfo::new("checkpoint-read", err.to_string())
                    .with_context("path", path.display().to_string()),
            )
        })?;
        let checkpoint: Self = if is_binary(path) {
            bincode::deserialize(&bytes).map_err(|err| parse_error(path, err.to_string()))?
        } else {
            serde_json::from_slice(&bytes).map_err(|err| parse_error(path, err.to_string()))?
        };
        let digest = state_digest(&checkpoint.state)?;
        if digest != checkpoint.digest {
            return Err(SageError::Serde(
                ErrorInfo::new("checkpoint-digest", "state digest does not match its contents")
                    .with_context("path", path.display().to_string())
                    .with_context("expected", checkpoint.digest.clone())
                    .with_context("found", digest),
            ));
        }
        Ok(checkpoint)
    }
}

/// Path of the checkpoint for `timestep` under `root`.
pub fn checkpoint_path(root: &Path, timestep: u64, binary: bool) -> PathBuf {
    let extension = if binary { "bin" } else { "json" };
    root.join(format!("state_{timestep:08}.{extension}"))
}

fn state_digest<S: Serialize>(state: &S) -> Result<String, SageError> {
    let json = serde_json::to_vec(state).map_err(|err| {
        SageError::Serde(ErrorInfo::new("checkpoint-serialize", err.to_string()))
    })?;
    Ok(hex::encode(Sha256::digest(&json)))
}

fn is_binary(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some("bin")
}

fn serialize_error(path: &Path, message: String) -> SageError {
    SageError::Serde(
        ErrorInfo::new("checkpoint-serialize", message).with_context("path", path.display().to_string()),
    )
}

fn parse_error(path: &Path, message: String) -> SageError {
    SageError::Serde(
        ErrorInfo::new("checkpoint-parse", message).with_context("path", path.display().to_string()),
    )
}
