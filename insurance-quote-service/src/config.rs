use std::time::Duration;

use crate::collaborators::Timeouts;

pub const DEFAULT_LLM_MODEL: &str = "openai/gpt-4o-mini";
pub const DEFAULT_VISION_MODEL: &str = "openai/gpt-4.1-mini";

/// Configuration for the quote service
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Without a key every model call degrades to a fallback reply
    pub openrouter_api_key: Option<String>,
    pub llm_model: String,
    pub vision_model: String,
    /// Postgres session storage when set, in-memory otherwise
    pub database_url: Option<String>,
    pub port: u16,
    pub max_chat_messages: usize,
    pub timeouts: Timeouts,
}

impl ServiceConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let parse_number = |key: &str, default: u64| -> anyhow::Result<u64> {
            match non_empty(key) {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .map_err(|_| anyhow::anyhow!("{key} must be a positive number, got '{raw}'")),
                None => Ok(default),
            }
        };

        let database_url = non_empty("DATABASE_URL");
        if let Some(url) = &database_url {
            if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                anyhow::bail!("DATABASE_URL must start with postgresql:// or postgres://");
            }
        }

        let port = u16::try_from(parse_number("PORT", 3000)?)
            .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?;

        let max_chat_messages = parse_number("MAX_CHAT_MESSAGES", 50)? as usize;
        if max_chat_messages == 0 {
            anyhow::bail!("MAX_CHAT_MESSAGES must be at least 1");
        }

        let parse_timeout = |key: &str, default: Duration| -> anyhow::Result<Duration> {
            match parse_number(key, default.as_secs())? {
                0 => anyhow::bail!("{key} must be at least 1 second"),
                secs => Ok(Duration::from_secs(secs)),
            }
        };

        let defaults = Timeouts::default();
        let timeouts = Timeouts {
            model: parse_timeout("LLM_TIMEOUT_SECS", defaults.model)?,
            retrieval: parse_timeout("RETRIEVAL_TIMEOUT_SECS", defaults.retrieval)?,
            extraction: parse_timeout("EXTRACTION_TIMEOUT_SECS", defaults.extraction)?,
        };

        Ok(Self {
            openrouter_api_key: non_empty("OPENROUTER_API_KEY"),
            llm_model: non_empty("LLM_MODEL").unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
            vision_model: non_empty("VISION_MODEL")
                .unwrap_or_else(|| DEFAULT_VISION_MODEL.to_string()),
            database_url,
            port,
            max_chat_messages,
            timeouts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<ServiceConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServiceConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config(&[]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.max_chat_messages, 50);
        assert_eq!(config.llm_model, DEFAULT_LLM_MODEL);
        assert_eq!(config.timeouts, Timeouts::default());
        assert!(config.openrouter_api_key.is_none());
        assert!(config.database_url.is_none());
    }

    #[test]
    fn reads_overrides() {
        let config = config(&[
            ("OPENROUTER_API_KEY", "sk-test"),
            ("PORT", "8080"),
            ("LLM_TIMEOUT_SECS", "5"),
            ("DATABASE_URL", "postgres://localhost/quotes"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.timeouts.model, Duration::from_secs(5));
        assert_eq!(config.openrouter_api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(config(&[("PORT", "99999")]).is_err());
        assert!(config(&[("MAX_CHAT_MESSAGES", "lots")]).is_err());
        assert!(config(&[("DATABASE_URL", "mysql://db")]).is_err());
    }

    #[test]
    fn rejects_zero_timeouts() {
        for key in [
            "LLM_TIMEOUT_SECS",
            "RETRIEVAL_TIMEOUT_SECS",
            "EXTRACTION_TIMEOUT_SECS",
        ] {
            let err = config(&[(key, "0")]).unwrap_err();
            assert!(err.to_string().contains(key));
        }
        assert_eq!(
            config(&[("RETRIEVAL_TIMEOUT_SECS", "1")]).unwrap().timeouts.retrieval,
            Duration::from_secs(1)
        );
    }
}
