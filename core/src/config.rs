use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    /// Expansion action used when the source does not announce one.
    pub default_action: String,
    pub action_header: String,
    pub join_column_header: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct ReaderConfig {
    pub directed_edges: bool,
    pub duplicate_edges: bool,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct FetchConfig {
    pub timeout_ms: u64,
    pub include_extant_nodes: bool,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct AuditConfig {
    pub jsonl_path: Option<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub reader: ReaderConfig,
    pub fetch: FetchConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig {
                default_action: "replace".to_string(),
                action_header: "X-Unfurl-Action".to_string(),
                join_column_header: "X-Unfurl-Join-Column".to_string(),
            },
            reader: ReaderConfig {
                directed_edges: false,
                duplicate_edges: false,
            },
            fetch: FetchConfig {
                timeout_ms: 30_000,
                include_extant_nodes: true,
            },
            audit: AuditConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .add_source(File::with_name("config/default"))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(Environment::with_prefix("UNFURL").separator("__"));

        builder.build()?.try_deserialize()
    }

    /// Load from an explicit file, still honouring `UNFURL__*` overrides.
    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("UNFURL").separator("__"))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("unfurl.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[source]
default_action = "augment"
action_header = "X-Action"
join_column_header = "X-Join"

[reader]
directed_edges = true
duplicate_edges = false

[fetch]
timeout_ms = 500
include_extant_nodes = false
"#
        )
        .unwrap();

        let config = AppConfig::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(config.source.default_action, "augment");
        assert!(config.reader.directed_edges);
        assert_eq!(config.fetch.timeout_ms, 500);
        assert_eq!(config.audit, AuditConfig::default());
    }
}
