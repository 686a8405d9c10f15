use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use captionist_contracts::models::{ModelCatalog, ModelChoice};

use crate::retry::RetryPolicy;
use crate::reveal::RevealTiming;

pub const DEFAULT_API_BASE: &str = "http://localhost:8000/api";
const DEFAULT_TIMEOUT_S: u64 = 120;
const DEFAULT_TRANSPORT_RETRIES: u32 = 1;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;
const DEFAULT_REVEAL_MS_PER_CHAR: u64 = 30;
const DEFAULT_STATE_DIR: &str = ".captionist";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub api_base: String,
    pub request_timeout: Duration,
    pub transport_retries: u32,
    pub retry_backoff: Duration,
    pub reveal_per_char: Duration,
    pub model_a_id: Option<String>,
    pub model_b_id: Option<String>,
    pub state_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_S),
            transport_retries: DEFAULT_TRANSPORT_RETRIES,
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
            reveal_per_char: Duration::from_millis(DEFAULT_REVEAL_MS_PER_CHAR),
            model_a_id: None,
            model_b_id: None,
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
        }
    }
}

impl EngineConfig {
    /// Process environment first, then `.env` in the working directory.
    pub fn from_env() -> Self {
        let mut vars = parse_dotenv(Path::new(".env"));
        for (key, value) in env::vars() {
            if key.starts_with("CAPTIONIST_") {
                vars.insert(key, value);
            }
        }
        Self::from_vars(&vars)
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        let lookup = |key: &str| {
            vars.get(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let number = |key: &str, default: u64, min: u64, max: u64| {
            lookup(key)
                .and_then(|value| value.parse::<u64>().ok())
                .unwrap_or(default)
                .clamp(min, max)
        };

        Self {
            api_base: lookup("CAPTIONIST_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            request_timeout: Duration::from_secs(number(
                "CAPTIONIST_HTTP_TIMEOUT_S",
                DEFAULT_TIMEOUT_S,
                1,
                600,
            )),
            transport_retries: number(
                "CAPTIONIST_TRANSPORT_RETRIES",
                DEFAULT_TRANSPORT_RETRIES as u64,
                0,
                5,
            ) as u32,
            retry_backoff: Duration::from_millis(number(
                "CAPTIONIST_RETRY_BACKOFF_MS",
                DEFAULT_RETRY_BACKOFF_MS,
                0,
                10_000,
            )),
            reveal_per_char: Duration::from_millis(number(
                "CAPTIONIST_REVEAL_MS_PER_CHAR",
                DEFAULT_REVEAL_MS_PER_CHAR,
                1,
                1_000,
            )),
            model_a_id: lookup("CAPTIONIST_MODEL_A_ID"),
            model_b_id: lookup("CAPTIONIST_MODEL_B_ID"),
            state_dir: lookup("CAPTIONIST_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR)),
        }
    }

    pub fn catalog(&self) -> ModelCatalog {
        let mut catalog = ModelCatalog::default();
        if let Some(id) = &self.model_a_id {
            catalog = catalog.with_model_id(ModelChoice::ModelA, id);
        }
        if let Some(id) = &self.model_b_id {
            catalog = catalog.with_model_id(ModelChoice::ModelB, id);
        }
        catalog
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.transport_retries, self.retry_backoff)
    }

    pub fn fresh_reveal(&self) -> RevealTiming {
        RevealTiming::fresh(self.reveal_per_char)
    }

    pub fn rehydrated_reveal(&self) -> RevealTiming {
        RevealTiming::rehydrated(self.reveal_per_char)
    }

    pub fn seen_cache_path(&self) -> PathBuf {
        self.state_dir.join("seen.json")
    }

    pub fn events_path(&self) -> PathBuf {
        self.state_dir.join("events.jsonl")
    }
}

pub fn parse_dotenv(path: &Path) -> HashMap<String, String> {
    let content = std::fs::read_to_string(path).unwrap_or_default();
    let mut vars = HashMap::new();
    for raw_line in content.lines() {
        let mut line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(stripped) = line.strip_prefix("export ") {
            line = stripped.trim();
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value.trim();
        let unquoted = value
            .strip_prefix('"')
            .and_then(|rest| rest.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|rest| rest.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), unquoted.to_string());
    }
    vars
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use captionist_contracts::models::ModelChoice;

    use super::{parse_dotenv, EngineConfig, DEFAULT_API_BASE};

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn empty_vars_give_defaults() {
        let config = EngineConfig::from_vars(&HashMap::new());
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.api_base, DEFAULT_API_BASE);
    }

    #[test]
    fn numbers_are_clamped_and_junk_ignored() {
        let config = EngineConfig::from_vars(&vars(&[
            ("CAPTIONIST_HTTP_TIMEOUT_S", "9000"),
            ("CAPTIONIST_TRANSPORT_RETRIES", "lots"),
            ("CAPTIONIST_REVEAL_MS_PER_CHAR", "0"),
            ("CAPTIONIST_API_BASE", "http://captions.internal/api/"),
        ]));
        assert_eq!(config.request_timeout, Duration::from_secs(600));
        assert_eq!(config.transport_retries, 1);
        assert_eq!(config.reveal_per_char, Duration::from_millis(1));
        assert_eq!(config.api_base, "http://captions.internal/api");
    }

    #[test]
    fn model_overrides_reach_catalog() {
        let config = EngineConfig::from_vars(&vars(&[("CAPTIONIST_MODEL_B_ID", "acme/r2")]));
        let catalog = config.catalog();
        assert_eq!(catalog.model_id(ModelChoice::ModelB), Some("acme/r2"));
        assert_eq!(
            catalog.model_id(ModelChoice::ModelA),
            Some("openai/gpt-oss-120b:together")
        );
    }

    #[test]
    fn dotenv_parsing_handles_quotes_and_exports() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join(".env");
        std::fs::write(
            &path,
            "# comment\nexport CAPTIONIST_API_BASE=\"http://x/api\"\nCAPTIONIST_STATE_DIR='/tmp/cap'\nbroken line\n=nokey\n",
        )?;
        let parsed = parse_dotenv(&path);
        assert_eq!(parsed.get("CAPTIONIST_API_BASE").unwrap(), "http://x/api");
        assert_eq!(parsed.get("CAPTIONIST_STATE_DIR").unwrap(), "/tmp/cap");
        assert_eq!(parsed.len(), 2);
        Ok(())
    }
}
