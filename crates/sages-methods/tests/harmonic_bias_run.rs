use sages_backend::{run, BackendKind, ExternalForce, LangevinConfig, LangevinContext, ParticleSystem};
use sages_core::Vec3;
use sages_cv::{Component, CvSet, Distance};
use sages_methods::{Center, HarmonicBias, HistogramLogger, Kspring};

fn thermal(backend: BackendKind, positions: Vec<Vec3>) -> LangevinContext {
    let config = LangevinConfig {
        backend,
        dt: 0.005,
        friction: 1.0,
        kt: 1.0,
        seed: 7,
        external: ExternalForce::Harmonic {
            stiffness: [5.0; 3],
            anchor: [5.0; 3],
        },
        ..LangevinConfig::default()
    };
    LangevinContext::new(config, ParticleSystem::at_rest(positions, 1.0)).unwrap()
}

#[test]
fn restrained_coordinate_fluctuates_around_the_center() {
    let cvs = CvSet::single(Component::new(vec![0], 0).unwrap()).unwrap();
    let method = HarmonicBias::new(cvs, &Kspring::Scalar(15.0), &Center::Scalar(5.0)).unwrap();
    let outcome = run(
        &method,
        || Ok(thermal(BackendKind::LangevinTyped, vec![Vec3::new(5.0, 5.0, 5.0)])),
        40_000,
        HistogramLogger::new(1, 2_000),
    )
    .unwrap();
    let logger = outcome.callback;
    assert_eq!(logger.data().len(), 38_000);
    let mean = logger.means().unwrap()[0];
    assert!((mean - 5.0).abs() < 0.1, "mean {mean}");
    // kT / (5 + 15)
    let variance = logger.covariance().unwrap()[(0, 0)];
    assert!(variance > 0.03 && variance < 0.08, "variance {variance}");
    assert!((outcome.state.xi[0] - logger.data()[37_999][0]).abs() < 1e-12);
}

#[test]
fn bias_on_a_distance_acts_on_both_ends() {
    let cvs = CvSet::single(Distance::new(0, 1).unwrap()).unwrap();
    let method = HarmonicBias::new(cvs, &Kspring::Scalar(10.0), &Center::Scalar(1.0)).unwrap();
    let positions = vec![Vec3::new(4.0, 5.0, 5.0), Vec3::new(6.0, 5.0, 5.0)];
    let outcome = run(
        &method,
        || Ok(thermal(BackendKind::Langevin, positions)),
        1,
        sages_backend::NoCallback,
    )
    .unwrap();
    let bias = &outcome.state.bias;
    // equal and opposite, pulling the pair together
    assert!((bias[0] + bias[1]).norm() < 1e-12);
    assert!(bias[0].x > 0.0);
    assert!(outcome.state.xi[0] > 1.0);
}
