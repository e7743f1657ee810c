use std::fs;

use sages_backend::{BackendKind, ContextWrapper, ExternalForce, LangevinConfig, LangevinContext, NoCallback, ParticleSystem};
use sages_core::{SamplingMethod, Vec3};
use sages_cv::{Component, CvSet};
use sages_grid::Grid;
use sages_methods::checkpoint::checkpoint_path;
use sages_methods::{Abf, AbfState, StateCheckpoint};

fn abf_state(steps: u64) -> (Abf, AbfState, u64) {
    let cvs = CvSet::single(Component::new(vec![0], 0).unwrap()).unwrap();
    let grid = Grid::periodic(vec![0.0], vec![10.0], vec![8]).unwrap();
    let abf = Abf::new(cvs, grid).unwrap().with_n_min(10);
    let config = LangevinConfig {
        backend: BackendKind::LangevinSplit,
        seed: 11,
        external: ExternalForce::Constant {
            force: [0.5, 0.0, 0.0],
        },
        ..LangevinConfig::default()
    };
    let context = LangevinContext::new(config, ParticleSystem::at_rest(vec![Vec3::new(1.0, 2.0, 3.0)], 2.0)).unwrap();
    let mut wrapped = ContextWrapper::new(context, &abf, NoCallback).unwrap();
    wrapped.run(steps).unwrap();
    let step = wrapped.context().current_step();
    let state = wrapped.state().unwrap().clone();
    (abf, state, step)
}

#[test]
fn json_and_binary_checkpoints_round_trip() {
    let (abf, state, step) = abf_state(200);
    let dir = tempfile::tempdir().unwrap();
    for binary in [false, true] {
        let path = checkpoint_path(&dir.path().join("nested"), step, binary);
        let checkpoint = StateCheckpoint::new(step, abf.name(), state.clone()).unwrap();
        checkpoint.store(&path).unwrap();
        let loaded = StateCheckpoint::<AbfState>::load(&path).unwrap();
        assert_eq!(loaded, checkpoint);
        assert_eq!(loaded.method, "abf");
        assert_eq!(loaded.state.hist.iter().sum::<u32>(), 200);
    }
    assert!(dir.path().join("nested/state_00000200.json").exists());
    assert!(dir.path().join("nested/state_00000200.bin").exists());
}

#[test]
fn digest_detects_edited_state() {
    let (abf, state, step) = abf_state(20);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("abf.json");
    StateCheckpoint::new(step, abf.name(), state).unwrap().store(&path).unwrap();

    let mut document: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    document["state"]["hist"][0] = serde_json::json!(9999);
    fs::write(&path, serde_json::to_vec(&document).unwrap()).unwrap();

    let err = StateCheckpoint::<AbfState>::load(&path).unwrap_err();
    assert_eq!(err.code(), "checkpoint-digest");
}

#[test]
fn missing_and_garbled_files_are_serde_errors() {
    let dir = tempfile::tempdir().unwrap();
    let missing = StateCheckpoint::<AbfState>::load(&dir.path().join("absent.json")).unwrap_err();
    assert_eq!(missing.code(), "checkpoint-read");

    let garbled = dir.path().join("garbled.bin");
    fs::write(&garbled, b"\x01\x02").unwrap();
    let err = StateCheckpoint::<AbfState>::load(&garbled).unwrap_err();
    assert!(matches!(err, sages_core::SageError::Serde(_)));
    assert_eq!(err.code(), "checkpoint-parse");
}
