//! Loading experiment specs from YAML

use super::schema::HarmonizeSpec;
use super::validate::validate_config;
use crate::error::{Error, Result};
use std::fs;
use std::path::Path;

/// Load, parse and validate an experiment spec
///
/// # Example
///
/// ```no_run
/// use armonizar::config::load_config;
///
/// let spec = load_config("hcoco.yaml")?;
/// println!("{} epochs", spec.training.last_epoch());
/// # Ok::<(), armonizar::Error>(())
/// ```
pub fn load_config<P: AsRef<Path>>(config_path: P) -> Result<HarmonizeSpec> {
    let yaml_content = fs::read_to_string(config_path.as_ref()).map_err(|e| {
        Error::ConfigError(format!(
            "Failed to read config file {}: {}",
            config_path.as_ref().display(),
            e
        ))
    })?;

    parse_config(&yaml_content)
}

/// Parse and validate a spec from YAML text
pub fn parse_config(yaml: &str) -> Result<HarmonizeSpec> {
    let spec: HarmonizeSpec = serde_yaml::from_str(yaml)
        .map_err(|e| Error::ConfigError(format!("Failed to parse YAML config: {}", e)))?;

    validate_config(&spec).map_err(|e| Error::ConfigError(format!("Invalid config: {}", e)))?;

    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_valid_config() {
        let yaml = r#"
name: hcoco
data:
  dataset_name: HCOCO
training:
  batch_size: 8
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml.as_bytes()).unwrap();

        let spec = load_config(temp_file.path()).unwrap();
        assert_eq!(spec.name, "hcoco");
        assert_eq!(spec.training.batch_size, 8);
    }

    #[test]
    fn test_load_invalid_config() {
        let yaml = r#"
name: hcoco
cadence:
  save_epoch_freq: 0
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml.as_bytes()).unwrap();

        let err = load_config(temp_file.path()).unwrap_err();
        assert!(matches!(err, Error::ConfigError(ref msg) if msg.contains("save_epoch_freq")));
    }

    #[test]
    fn test_load_malformed_yaml() {
        let result = parse_config("this is not valid yaml: [}");
        assert!(matches!(result, Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_config("/nonexistent/armonizar.yaml");
        assert!(matches!(result, Err(Error::ConfigError(_))));
    }
}
