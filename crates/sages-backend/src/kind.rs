use serde::{Deserialize, Serialize};

use sages_core::{ErrorInfo, IdLayout, SageError};

/// Engine implementations available in this build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Reference Langevin engine with packed `[v, m]` storage and reverse tags.
    #[default]
    Langevin,
    /// Reference Langevin engine with split velocity/mass buffers.
    LangevinSplit,
    /// Reference Langevin engine with per-type masses.
    LangevinTyped,
}

const SUPPORTED: [BackendKind; 3] = [
    BackendKind::Langevin,
    BackendKind::LangevinSplit,
    BackendKind::LangevinTyped,
];

/// Names accepted by [`BackendKind::from_name`].
pub fn supported_backends() -> Vec<&'static str> {
    SUPPORTED.iter().map(|kind| kind.name()).collect()
}

impl BackendKind {
    /// Resolves a backend by name.
    pub fn from_name(name: &str) -> Result<Self, SageError> {
        SUPPORTED
            .iter()
            .copied()
            .find(|kind| kind.name() == name)
            .ok_or_else(|| {
                SageError::Config(
                    ErrorInfo::new("unsupported-backend", "unknown simulation backend")
                        .with_context("backend", name)
                        .with_hint(format!("supported backends: {}", supported_backends().join(", "))),
                )
            })
    }

    /// Canonical name.
    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Langevin => "langevin",
            BackendKind::LangevinSplit => "langevin-split",
            BackendKind::LangevinTyped => "langevin-typed",
        }
    }

    /// Layout of the `ids` buffer this backend exposes.
    pub fn id_layout(&self) -> IdLayout {
        match self {
            BackendKind::Langevin => IdLayout::SlotPerTag,
            BackendKind::LangevinSplit | BackendKind::LangevinTyped => IdLayout::TagPerSlot,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for name in supported_backends() {
            assert_eq!(BackendKind::from_name(name).unwrap().name(), name);
        }
    }

    #[test]
    fn unknown_backend_lists_alternatives() {
        let err = BackendKind::from_name("hoomd").unwrap_err();
        assert!(err.is_config());
        assert_eq!(err.code(), "unsupported-backend");
        assert!(err.info().hint.as_deref().unwrap_or_default().contains("langevin-split"));
    }
}
