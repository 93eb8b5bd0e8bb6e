use crate::variation::{Limits, LimitsError};
use anyhow::{bail, Context};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

fn default_database_path() -> String {
    String::from("variant_bot.db")
}

fn default_webhook_port() -> u16 {
    3000
}

fn default_variations() -> usize {
    50
}

fn default_max_variations() -> usize {
    500
}

fn default_flip_probability() -> f64 {
    0.5
}

fn default_max_attempts() -> usize {
    20_000
}

fn default_generate_timeout_ms() -> u64 {
    2_000
}

fn default_max_templates_per_user() -> usize {
    20
}

fn default_page_size() -> usize {
    10
}

fn default_broadcast_delay_ms() -> u64 {
    50
}

/// Runtime settings read from the environment. The bot token is not part of
/// it: teloxide picks `TELOXIDE_TOKEN` up by itself.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub admin_id: u64,
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_webhook_port")]
    pub webhook_port: u16,
    #[serde(default = "default_variations")]
    pub default_variations: usize,
    #[serde(default = "default_max_variations")]
    pub max_variations: usize,
    #[serde(default = "default_flip_probability")]
    pub flip_probability: f64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_generate_timeout_ms")]
    pub generate_timeout_ms: u64,
    #[serde(default = "default_max_templates_per_user")]
    pub max_templates_per_user: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_broadcast_delay_ms")]
    pub broadcast_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Polling,
    Webhook(Url),
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            log::debug!("no .env file loaded: {}", e);
        }
        let config: Config = envy::from_env().context("failed to read configuration")?;
        config.check()?;
        Ok(config)
    }

    pub fn check(&self) -> anyhow::Result<()> {
        if self.max_variations == 0 {
            bail!("MAX_VARIATIONS must be positive");
        }
        if self.default_variations == 0 || self.default_variations > self.max_variations {
            bail!(
                "DEFAULT_VARIATIONS must be between 1 and MAX_VARIATIONS ({}), got {}",
                self.max_variations,
                self.default_variations
            );
        }
        if self.page_size == 0 {
            bail!("PAGE_SIZE must be positive");
        }
        if self.max_templates_per_user == 0 {
            bail!("MAX_TEMPLATES_PER_USER must be positive");
        }
        self.limits(self.default_variations)
            .context("invalid generation settings")?;
        self.mode()?;
        Ok(())
    }

    pub fn mode(&self) -> anyhow::Result<Mode> {
        match &self.webhook_url {
            None => Ok(Mode::Polling),
            Some(raw) => {
                let url = Url::parse(raw).with_context(|| format!("bad WEBHOOK_URL {raw:?}"))?;
                if url.scheme() != "https" {
                    bail!("WEBHOOK_URL must use https, got {}", url.scheme());
                }
                Ok(Mode::Webhook(url))
            }
        }
    }

    pub fn limits(&self, target: usize) -> Result<Limits, LimitsError> {
        if target > self.max_variations {
            return Err(LimitsError::TargetTooLarge {
                requested: target,
                max: self.max_variations,
            });
        }
        let limits = Limits {
            target,
            flip_probability: self.flip_probability,
            max_attempts: self.max_attempts,
            timeout: Duration::from_millis(self.generate_timeout_ms),
        };
        limits.validate()?;
        Ok(limits)
    }

    pub fn broadcast_delay(&self) -> Duration {
        Duration::from_millis(self.broadcast_delay_ms)
    }

    pub fn is_admin(&self, user_id: u64) -> bool {
        user_id == self.admin_id
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    envy::from_iter([(String::from("ADMIN_ID"), String::from("42"))])
        .expect("minimal config deserializes")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let config: Config = envy::from_iter(
            vars.iter()
                .map(|(k, v)| (k.to_string(), v.to_string())),
        )?;
        config.check()?;
        Ok(config)
    }

    #[test]
    fn defaults_apply() {
        let config = config_from(&[("ADMIN_ID", "7")]).unwrap();
        assert_eq!(config.admin_id, 7);
        assert_eq!(config.database_path, "variant_bot.db");
        assert_eq!(config.max_variations, 500);
        assert_eq!(config.default_variations, 50);
        assert_eq!(config.mode().unwrap(), Mode::Polling);
        assert!(config.is_admin(7));
        assert!(!config.is_admin(8));
    }

    #[test]
    fn admin_id_is_required() {
        assert!(config_from(&[]).is_err());
    }

    #[test]
    fn webhook_url_selects_webhook_mode() {
        let config = config_from(&[
            ("ADMIN_ID", "1"),
            ("WEBHOOK_URL", "https://bot.example.org/hook"),
        ])
        .unwrap();
        match config.mode().unwrap() {
            Mode::Webhook(url) => assert_eq!(url.path(), "/hook"),
            Mode::Polling => panic!("expected webhook mode"),
        }
    }

    #[test]
    fn rejects_inconsistent_settings() {
        assert!(config_from(&[("ADMIN_ID", "1"), ("WEBHOOK_URL", "http://plain.example")]).is_err());
        assert!(config_from(&[("ADMIN_ID", "1"), ("WEBHOOK_URL", "not a url")]).is_err());
        assert!(config_from(&[("ADMIN_ID", "1"), ("DEFAULT_VARIATIONS", "600")]).is_err());
        assert!(config_from(&[("ADMIN_ID", "1"), ("FLIP_PROBABILITY", "1.5")]).is_err());
        assert!(config_from(&[("ADMIN_ID", "1"), ("PAGE_SIZE", "0")]).is_err());
    }

    #[test]
    fn limits_are_capped() {
        let config = test_config();
        let limits = config.limits(100).unwrap();
        assert_eq!(limits.target, 100);
        assert_eq!(limits.timeout, Duration::from_secs(2));
        assert_eq!(
            config.limits(501),
            Err(LimitsError::TargetTooLarge {
                requested: 501,
                max: 500
            })
        );
    }
}
