// src/config.rs

use std::env;
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub api_base: String,
}

#[derive(Debug, Clone)]
pub struct PayPalConfig {
    pub client_id: String,
    pub client_secret: String,
    pub api_base: String,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub bucket: String,
    pub endpoint: Option<String>,
    pub public_base_url: String,
    /// Skip S3 calls entirely (tests, local dev).
    pub mock: bool,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub interval_secs: u64,
    pub batch_size: i64,
    pub purchase_ttl_hours: i64,
    pub rejected_retention_days: i64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub port: u16,
    pub jwt_secret: String,
    pub admin_emails: Vec<String>,
    pub currency: String,
    pub email_api_base: String,
    pub stripe: StripeConfig,
    pub paypal: PayPalConfig,
    pub storage: StorageConfig,
    pub worker: WorkerConfig,
}

impl Config {
    /// Reads the process environment. Call `dotenvy::dotenv()` first to pick up `.env`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let s3_bucket = required("S3_BUCKET")?;
        let s3_public_base_url = optional("S3_PUBLIC_BASE_URL")
            .unwrap_or_else(|| format!("https://{}.s3.amazonaws.com", s3_bucket));

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            bind_addr: optional("BIND_ADDR").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parsed("PORT", 8065)?,
            jwt_secret: required("JWT_SECRET")?,
            admin_emails: parse_email_list(&optional("ADMIN_EMAILS").unwrap_or_default()),
            currency: optional("CURRENCY")
                .unwrap_or_else(|| "usd".to_string())
                .to_lowercase(),
            email_api_base: required("EMAIL_API_BASE")?,
            stripe: StripeConfig {
                secret_key: required("STRIPE_SECRET_KEY")?,
                webhook_secret: required("STRIPE_WEBHOOK_SECRET")?,
                api_base: optional("STRIPE_API_BASE")
                    .unwrap_or_else(|| "https://api.stripe.com".to_string()),
            },
            paypal: PayPalConfig {
                client_id: required("PAYPAL_CLIENT_ID")?,
                client_secret: required("PAYPAL_CLIENT_SECRET")?,
                api_base: optional("PAYPAL_API_BASE")
                    .unwrap_or_else(|| "https://api-m.paypal.com".to_string()),
            },
            storage: StorageConfig {
                bucket: s3_bucket,
                endpoint: optional("S3_ENDPOINT"),
                public_base_url: s3_public_base_url,
                mock: optional("MOCK_S3").as_deref() == Some("true"),
            },
            worker: WorkerConfig {
                interval_secs: parsed("WORKER_INTERVAL_SECS", 60)?,
                batch_size: parsed("WORKER_BATCH_SIZE", 50)?,
                purchase_ttl_hours: parsed("PURCHASE_TTL_HOURS", 24)?,
                rejected_retention_days: parsed("REJECTED_RETENTION_DAYS", 30)?,
            },
        })
    }

    pub fn is_admin_email(&self, email: &str) -> bool {
        let email = email.trim().to_lowercase();
        self.admin_emails.iter().any(|e| *e == email)
    }
}

fn optional(key: &'static str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    optional(key).ok_or(ConfigError::Missing(key))
}

fn parsed<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match optional(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

fn parse_email_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_list_is_trimmed_and_case_insensitive() {
        let emails = parse_email_list(" Admin@Example.com ,, ops@example.com");
        assert_eq!(emails, vec!["admin@example.com", "ops@example.com"]);
    }
}
