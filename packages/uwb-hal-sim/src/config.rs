//! Simulator configuration, loaded from `config.toml` and deserialized
//! with `toml`, falling back to a bundled default when the file is
//! absent so the demo harness always has something to run.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct PeerConfig {
    /// Hex-encoded peer MAC address.
    pub address_hex: String,
    pub true_distance_cm: f64,
    pub true_azimuth_deg: f64,
    pub true_elevation_deg: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RadioNoiseConfig {
    pub sigma_distance_cm: f64,
    pub sigma_azimuth_deg: f64,
    pub sigma_elevation_deg: f64,
    pub nlos_rate: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimConfig {
    pub update_rate_hz: f64,
    pub noise: RadioNoiseConfig,
    pub peers: Vec<PeerConfig>,
}

impl Default for SimConfig {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG_TOML).expect("bundled default config.toml must parse")
    }
}

impl SimConfig {
    pub fn load(path: &str) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!(path, error = %e, "failed to parse config, using bundled default");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }
}

const DEFAULT_CONFIG_TOML: &str = r#"
update_rate_hz = 10.0

[noise]
sigma_distance_cm = 3.0
sigma_azimuth_deg = 1.5
sigma_elevation_deg = 2.0
nlos_rate = 0.02

[[peers]]
address_hex = "0102"
true_distance_cm = 150.0
true_azimuth_deg = 10.0
true_elevation_deg = -4.0

[[peers]]
address_hex = "0304"
true_distance_cm = 420.0
true_azimuth_deg = -35.0
true_elevation_deg = 2.0
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_two_peers() {
        let cfg = SimConfig::default();
        assert_eq!(cfg.peers.len(), 2);
        assert_eq!(cfg.peers[0].address_hex, "0102");
    }

    #[test]
    fn missing_file_falls_back_to_default() {
        let cfg = SimConfig::load("/nonexistent/path/config.toml");
        assert_eq!(cfg.peers.len(), 2);
    }
}
