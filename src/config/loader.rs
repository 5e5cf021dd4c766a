use std::path::Path;

use config::{Config, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::ProxyConfig;

/// Load configuration from a file using the config crate
/// Supports multiple formats: YAML, JSON, TOML.
pub async fn load_config(config_path: &str) -> Result<ProxyConfig> {
    load_config_sync(config_path)
}

/// Load configuration synchronously
pub fn load_config_sync(config_path: &str) -> Result<ProxyConfig> {
    let config_path = Path::new(config_path);

    // Determine file format based on extension
    let format = match config_path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        _ => FileFormat::Toml,
    };

    let settings = Config::builder()
        .add_source(File::new(
            config_path
                .to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", config_path.display()))?,
            format,
        ))
        .build()
        .with_context(|| format!("Failed to build config from {}", config_path.display()))?;

    let proxy_config: ProxyConfig = settings.try_deserialize().with_context(|| {
        format!(
            "Failed to deserialize config from {}",
            config_path.display()
        )
    })?;

    Ok(proxy_config)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[tokio::test]
    async fn test_load_toml_config() {
        let toml_content = r#"
listen_addr = "127.0.0.1:3000"

[logging]
level = "debug"
json = false

[[vhosts]]
name = "main"
mount = "/"
rules = [
    'revproxy regexp="/p/(\d+)" server="up.example" uri="item/$1"',
    'revproxy regexp="/s/(.*)" server="secure.example" uri="$1" protocol="https" nopipeline',
]
"#;

        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        write!(temp_file, "{}", toml_content).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:3000");
        assert_eq!(config.vhosts.len(), 1);
        assert_eq!(config.vhosts[0].rules.len(), 2);
        assert!(config.vhosts[0].rules[0].contains(r"(\d+)"));
        assert_eq!(config.logging.level, "debug");
        assert!(!config.logging.json);
    }

    #[tokio::test]
    async fn test_load_yaml_config() {
        let yaml_content = r#"
listen_addr: "127.0.0.1:3000"
vhosts:
  - name: "api"
    hosts: ["api.example.com"]
    mount: "/api"
    rules:
      - 'revproxy regexp="/(.*)" server="backend" uri="$1" port="8080"'
"#;

        let mut temp_file = NamedTempFile::with_suffix(".yaml").unwrap();
        write!(temp_file, "{}", yaml_content).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(config.vhosts[0].hosts, vec!["api.example.com"]);
        assert_eq!(config.vhosts[0].mount, "/api");
        assert!(config.logging.json);
    }

    #[tokio::test]
    async fn test_load_json_defaults() {
        let json_content = r#"{ "vhosts": [ { "name": "bare" } ] }"#;

        let mut temp_file = NamedTempFile::with_suffix(".json").unwrap();
        write!(temp_file, "{}", json_content).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:8080");
        assert_eq!(config.vhosts[0].mount, "/");
        assert!(config.vhosts[0].rules.is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_has_context() {
        let err = load_config("/definitely/not/here.toml").await.unwrap_err();
        assert!(format!("{err:#}").contains("Failed to build config"));
    }
}
