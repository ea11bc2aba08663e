//! Write a starter configuration file for `smsbridge init`.

use anyhow::{Context, Result};
use std::path::Path;

/// Placeholder values; every one of them has to be edited before the bridge is useful.
const STARTER_CONFIG: &str = r#"{
  "name": "smsbridge",
  "botid": "bot000000000",
  "botkey": "replace-with-bot-key",
  "chattype": "chat",
  "chatid": "-1000000000000",
  "chattopic": "",
  "address": "127.0.0.1:8080",
  "smpp": "127.0.0.1:2775",
  "username": "replace-with-system-id",
  "password": "replace-with-password",
  "debug": 3
}
"#;

/// Create the parent directory and write the starter config. Fails if the file already exists.
pub fn init_config(config_path: &Path) -> Result<()> {
    if config_path.exists() {
        anyhow::bail!(
            "refusing to overwrite existing config at {}",
            config_path.display()
        );
    }
    if let Some(dir) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating config directory {}", dir.display()))?;
    }
    std::fs::write(config_path, STARTER_CONFIG)
        .with_context(|| format!("writing starter config to {}", config_path.display()))?;
    log::info!("wrote starter config to {}", config_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{load_config, parse_config, Verbosity};

    #[test]
    fn starter_config_parses() {
        let config = parse_config(STARTER_CONFIG).unwrap();
        assert_eq!(config.address, "127.0.0.1:8080");
        assert_eq!(config.verbosity(), Verbosity::Quiet);
    }

    #[test]
    fn writes_once_and_refuses_overwrite() {
        let dir = std::env::temp_dir().join(format!("smsbridge-init-{}", uuid::Uuid::new_v4()));
        let path = dir.join("nested").join("conf.json");
        init_config(&path).unwrap();
        let (config, used) = load_config(Some(path.clone())).unwrap();
        assert_eq!(used, path);
        assert_eq!(config.smpp, "127.0.0.1:2775");
        assert!(init_config(&path).is_err());
        let _ = std::fs::remove_dir_all(dir);
    }
}
