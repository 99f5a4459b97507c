//! Gaussian measurement noise and an NLOS coin-flip, modelling a DS-TWR
//! radio's distance/angle error as a single LOS/NLOS split rather than a
//! full CIR/SNR model, since this crate only needs to exercise
//! `uwb-core`'s decode and filter paths.

use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::config::RadioNoiseConfig;

pub struct NoisyReading {
    pub distance_cm: f64,
    pub azimuth_deg: f64,
    pub elevation_deg: f64,
    pub los: bool,
}

pub fn apply_noise(
    true_distance_cm: f64,
    true_azimuth_deg: f64,
    true_elevation_deg: f64,
    cfg: &RadioNoiseConfig,
    rng: &mut impl Rng,
) -> NoisyReading {
    let los = !rng.gen_bool(cfg.nlos_rate.clamp(0.0, 1.0));
    let distance_sigma = if los { cfg.sigma_distance_cm } else { cfg.sigma_distance_cm * 4.0 };

    let distance_cm = (true_distance_cm
        + Normal::new(0.0, distance_sigma.max(0.01)).unwrap().sample(rng))
    .max(0.0);
    let azimuth_deg =
        true_azimuth_deg + Normal::new(0.0, cfg.sigma_azimuth_deg.max(0.01)).unwrap().sample(rng);
    let elevation_deg =
        true_elevation_deg + Normal::new(0.0, cfg.sigma_elevation_deg.max(0.01)).unwrap().sample(rng);

    NoisyReading { distance_cm, azimuth_deg, elevation_deg, los }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn zero_sigma_and_zero_nlos_rate_returns_true_values() {
        let cfg = RadioNoiseConfig {
            sigma_distance_cm: 0.0,
            sigma_azimuth_deg: 0.0,
            sigma_elevation_deg: 0.0,
            nlos_rate: 0.0,
        };
        let mut rng = StdRng::seed_from_u64(1);
        let reading = apply_noise(100.0, 5.0, -2.0, &cfg, &mut rng);
        assert!((reading.distance_cm - 100.0).abs() < 0.5);
        assert!(reading.los);
    }
}
