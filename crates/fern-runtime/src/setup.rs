//! Process setup: logging and configuration loading

use std::path::Path;

use fern_core::{MeshConfig, MeshError, MeshResult};

/// Install the global tracing subscriber. Filter via `RUST_LOG`; safe to
/// call more than once.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Load and validate a JSON device configuration.
pub fn load_config(path: impl AsRef<Path>) -> MeshResult<MeshConfig> {
    let text = std::fs::read_to_string(path.as_ref())
        .map_err(|err| MeshError::InvalidConfig(format!("read config: {err}")))?;
    let config: MeshConfig = serde_json::from_str(&text)
        .map_err(|err| MeshError::InvalidConfig(format!("parse config: {err}")))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_config_roundtrip() {
        let config = MeshConfig {
            device_id: 2,
            device_count: 3,
            routing: fern_core::RouteTable::new(vec![(1, 0), (2, 1)]),
            ..Default::default()
        };
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("device.json");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(serde_json::to_string(&config).unwrap().as_bytes())
            .unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.device_id, 2);
        assert_eq!(loaded.parent(), Some(fern_core::DeviceId::new(1)));
    }

    #[test]
    fn test_load_config_rejects_invalid() {
        let config = MeshConfig {
            device_id: 2,
            device_count: 3,
            routing: fern_core::RouteTable::new(vec![(1, 0)]), // 2 is orphaned
            ..Default::default()
        };
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("device.json");
        std::fs::write(&path, serde_json::to_string(&config).unwrap()).unwrap();

        assert!(load_config(&path).is_err());
    }
}
