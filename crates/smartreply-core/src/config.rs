use std::{fs, path::Path, time::Duration};

use anyhow::{anyhow, Context, Result};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use smartreply_provider::ProviderConfig;

fn default_max_messages() -> usize {
    30
}

fn default_context_window_size() -> usize {
    4000
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    150
}

fn default_generation_timeout_ms() -> u64 {
    60_000
}

fn default_cache_expiration_ms() -> u64 {
    300_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

/// Tunables of a pipeline run. Use [`validate_config`] before handing one out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    #[serde(default = "default_context_window_size")]
    pub context_window_size: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_generation_timeout_ms")]
    pub generation_timeout_ms: u64,
    #[serde(default = "default_cache_expiration_ms")]
    pub cache_expiration_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_model")]
    pub model: String,
    /// Serialize concurrent runs for the same (conversation, user) pair.
    #[serde(default)]
    pub serialize_per_key: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            context_window_size: default_context_window_size(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            generation_timeout_ms: default_generation_timeout_ms(),
            cache_expiration_ms: default_cache_expiration_ms(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            model: default_model(),
            serialize_per_key: false,
        }
    }
}

impl PipelineConfig {
    pub fn generation_timeout(&self) -> Duration {
        Duration::from_millis(self.generation_timeout_ms)
    }

    pub fn cache_expiration(&self) -> TimeDelta {
        TimeDelta::milliseconds(i64::try_from(self.cache_expiration_ms).unwrap_or(i64::MAX))
    }
}

/// Clamp every bounded field into its allowed range.
pub fn validate_config(config: PipelineConfig) -> PipelineConfig {
    let temperature = if config.temperature.is_finite() {
        config.temperature.clamp(0.0, 2.0)
    } else {
        default_temperature()
    };

    PipelineConfig {
        max_messages: config.max_messages.clamp(1, 100),
        context_window_size: config.context_window_size.clamp(1000, 8000),
        temperature,
        max_tokens: config.max_tokens.clamp(50, 500),
        generation_timeout_ms: config.generation_timeout_ms.clamp(10_000, 120_000),
        max_retries: config.max_retries.max(1),
        model: if config.model.trim().is_empty() {
            default_model()
        } else {
            config.model
        },
        ..config
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Ask the provider for context analysis before falling back to heuristics.
    #[serde(default)]
    pub enabled: bool,
    /// Defaults to the pipeline model.
    #[serde(default)]
    pub model: Option<String>,
}

fn default_database_path() -> String {
    "data/smartreply.db".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl AppConfig {
    pub fn analysis_model(&self) -> &str {
        self.analysis
            .model
            .as_deref()
            .unwrap_or(self.pipeline.model.as_str())
    }
}

pub fn resolve_env_var(raw: &str) -> String {
    let mut output = String::new();
    let mut rest = raw;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);

        let candidate = &rest[start + 2..];
        let Some(end) = candidate.find('}') else {
            output.push_str(&rest[start..]);
            return output;
        };

        let key = &candidate[..end];
        output.push_str(&std::env::var(key).unwrap_or_default());
        rest = &candidate[end + 1..];
    }

    output.push_str(rest);
    output
}

fn resolve_opt(value: &mut Option<String>) {
    if let Some(raw) = value.as_mut() {
        *raw = resolve_env_var(raw);
    }
}

fn resolve_app_env(config: &mut AppConfig) {
    config.provider.id = resolve_env_var(&config.provider.id);
    resolve_opt(&mut config.provider.api_key);
    resolve_opt(&mut config.provider.base_url);
    resolve_opt(&mut config.analysis.model);
    config.pipeline.model = resolve_env_var(&config.pipeline.model);
    config.database.path = resolve_env_var(&config.database.path);
}

/// Read a YAML config file, substitute `${VAR}` placeholders and clamp the
/// pipeline section.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let mut config: AppConfig = read_yaml_file(path)?;
    resolve_app_env(&mut config);

    if config.provider.id.trim().is_empty() {
        return Err(anyhow!("provider.id must not be empty"));
    }
    if config.database.path.trim().is_empty() {
        return Err(anyhow!("database.path must not be empty"));
    }

    config.pipeline = validate_config(config.pipeline);
    Ok(config)
}

fn read_yaml_file<T>(path: &Path) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse yaml file: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use smartreply_provider::ProviderType;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn validate_config_clamps_max_messages() {
        let config = validate_config(PipelineConfig {
            max_messages: 500,
            ..PipelineConfig::default()
        });
        assert_eq!(config.max_messages, 100);

        let config = validate_config(PipelineConfig {
            max_messages: 0,
            ..PipelineConfig::default()
        });
        assert_eq!(config.max_messages, 1);
    }

    #[test]
    fn validate_config_clamps_temperature() {
        let config = validate_config(PipelineConfig {
            temperature: -1.0,
            ..PipelineConfig::default()
        });
        assert_eq!(config.temperature, 0.0);

        let config = validate_config(PipelineConfig {
            temperature: 3.5,
            ..PipelineConfig::default()
        });
        assert_eq!(config.temperature, 2.0);

        let config = validate_config(PipelineConfig {
            temperature: f32::NAN,
            ..PipelineConfig::default()
        });
        assert_eq!(config.temperature, 0.7);
    }

    #[test]
    fn validate_config_clamps_remaining_bounds() {
        let config = validate_config(PipelineConfig {
            context_window_size: 10,
            max_tokens: 10_000,
            generation_timeout_ms: 1,
            max_retries: 0,
            model: "  ".into(),
            ..PipelineConfig::default()
        });
        assert_eq!(config.context_window_size, 1000);
        assert_eq!(config.max_tokens, 500);
        assert_eq!(config.generation_timeout_ms, 10_000);
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.model, "gpt-4o-mini");
    }

    #[test]
    fn validate_config_keeps_defaults() {
        assert_eq!(validate_config(PipelineConfig::default()), PipelineConfig::default());
    }

    #[test]
    fn cache_expiration_converts_to_time_delta() {
        let config = PipelineConfig::default();
        assert_eq!(config.cache_expiration(), TimeDelta::minutes(5));
        assert_eq!(config.generation_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn load_config_fills_defaults_and_clamps() {
        let file = write_config(
            r#"
provider:
  id: stub
  type: stub
pipeline:
  max_messages: 250
  temperature: 5.0
"#,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.provider.provider_type, ProviderType::Stub);
        assert_eq!(config.pipeline.max_messages, 100);
        assert_eq!(config.pipeline.temperature, 2.0);
        assert_eq!(config.pipeline.cache_expiration_ms, 300_000);
        assert!(!config.analysis.enabled);
        assert_eq!(config.database.path, "data/smartreply.db");
        assert_eq!(config.analysis_model(), "gpt-4o-mini");
    }

    #[test]
    fn load_config_resolves_env_placeholders() {
        let home = std::env::var("HOME").unwrap_or_default();
        let file = write_config(
            r#"
provider:
  id: openai
  type: openai
  api_key: "${SMARTREPLY_TEST_MISSING_KEY_XYZ}"
analysis:
  enabled: true
  model: gpt-4o
database:
  path: "${HOME}/replies.db"
"#,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.provider.api_key.as_deref(), Some(""));
        assert_eq!(config.database.path, format!("{home}/replies.db"));
        assert_eq!(config.analysis_model(), "gpt-4o");
    }

    #[test]
    fn load_config_reports_missing_file() {
        let err = load_config(Path::new("/definitely/not/here.yaml")).unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }

    #[test]
    fn load_config_reports_bad_yaml() {
        let file = write_config("provider: [unclosed");
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("failed to parse yaml file"));
    }

    #[test]
    fn resolve_env_var_returns_raw_when_not_placeholder() {
        assert_eq!(resolve_env_var("plain-value"), "plain-value");
    }

    #[test]
    fn resolve_env_var_unclosed_bracket() {
        assert_eq!(resolve_env_var("prefix_${UNCLOSED"), "prefix_${UNCLOSED");
    }

    #[test]
    fn resolve_env_var_missing_env_returns_empty() {
        assert_eq!(resolve_env_var("val=${SMARTREPLY_NONEXISTENT_VAR_XYZ}"), "val=");
    }
}
