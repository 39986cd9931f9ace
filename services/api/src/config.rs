//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use ride_platform_core::services::{ComparisonConfig, DocumentPolicy, SubscriptionPolicy};
use ride_platform_core::workers::{OcrWorkerConfig, RenewalConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Which OCR backend the worker calls.
#[derive(Clone, Debug, PartialEq)]
pub enum OcrProvider {
    Mock,
    GoogleVision { api_key: String },
    AwsTextract {
        region: String,
        access_key_id: String,
        secret_access_key: String,
    },
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub root: PathBuf,
    pub public_url: String,
    pub signing_key: String,
}

#[derive(Clone, Debug)]
pub struct PaymentConfig {
    /// When unset the service runs against the in-process scripted processor.
    pub gateway_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub database_max_connections: u32,
    pub database_acquire_timeout: Duration,
    pub log_filter: String,
    pub cors_origin: String,
    pub storage: StorageConfig,
    pub ocr_provider: OcrProvider,
    pub payment: PaymentConfig,
    pub expiry_sweep_tick: Duration,
    pub documents: DocumentPolicy,
    pub subscriptions: SubscriptionPolicy,
    pub ocr_worker: OcrWorkerConfig,
    pub renewal: RenewalConfig,
}

/// Reads an optional variable; an empty value counts as unset.
fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn required(name: &str) -> Result<String, ConfigError> {
    optional(name).ok_or_else(|| ConfigError::MissingVar(name.to_string()))
}

/// Parses an optional variable, falling back to `default` when unset.
fn parsed<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        None => Ok(default),
    }
}

fn seconds(name: &str, default: u64) -> Result<Duration, ConfigError> {
    let secs: u64 = parsed(name, default)?;
    if secs == 0 {
        return Err(ConfigError::InvalidValue(
            name.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(Duration::from_secs(secs))
}

fn ocr_provider() -> Result<OcrProvider, ConfigError> {
    let name = optional("OCR_PROVIDER").unwrap_or_else(|| "mock".to_string());
    match name.to_lowercase().as_str() {
        "mock" => Ok(OcrProvider::Mock),
        "google_vision" => Ok(OcrProvider::GoogleVision {
            api_key: required("GOOGLE_VISION_API_KEY")?,
        }),
        "aws_textract" => Ok(OcrProvider::AwsTextract {
            region: optional("AWS_REGION").unwrap_or_else(|| "us-east-1".to_string()),
            access_key_id: required("AWS_ACCESS_KEY_ID")?,
            secret_access_key: required("AWS_SECRET_ACCESS_KEY")?,
        }),
        other => Err(ConfigError::InvalidValue(
            "OCR_PROVIDER".to_string(),
            format!("'{}' is not one of mock, google_vision, aws_textract", other),
        )),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Load Server and Database Settings ---
        let bind_address: SocketAddr = parsed("BIND_ADDRESS", SocketAddr::from(([0, 0, 0, 0], 3000)))?;
        let database_url = required("DATABASE_URL")?;
        let database_max_connections: u32 = parsed("DATABASE_MAX_CONNECTIONS", 10)?;
        let database_acquire_timeout = seconds("DATABASE_ACQUIRE_TIMEOUT_SECS", 5)?;
        let log_filter = optional("RUST_LOG").unwrap_or_else(|| "info".to_string());
        let cors_origin =
            optional("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:3000".to_string());

        // --- Load Document Settings ---
        let defaults = DocumentPolicy::default();
        let allowed_mime_types = match optional("ALLOWED_MIME_TYPES") {
            Some(raw) => raw
                .split(',')
                .map(|m| m.trim().to_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
            None => defaults.allowed_mime_types.clone(),
        };
        let max_upload_bytes: i64 = parsed("MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?;
        if max_upload_bytes <= 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_UPLOAD_BYTES".to_string(),
                "must be greater than zero".to_string(),
            ));
        }
        let ocr_max_retries: i32 = parsed("OCR_MAX_RETRIES", defaults.ocr_max_retries)?;
        let documents = DocumentPolicy {
            allowed_mime_types,
            max_upload_bytes,
            ocr_max_retries,
            ..defaults
        };

        let storage = StorageConfig {
            root: optional("STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./storage")),
            public_url: optional("STORAGE_PUBLIC_URL")
                .unwrap_or_else(|| format!("http://{}", bind_address)),
            signing_key: required("STORAGE_SIGNING_KEY")?,
        };

        // --- Load Worker Settings ---
        let ocr_defaults = OcrWorkerConfig::default();
        let min_confidence: f64 = parsed("OCR_MIN_CONFIDENCE", ocr_defaults.min_confidence)?;
        if !(0.0..=1.0).contains(&min_confidence) {
            return Err(ConfigError::InvalidValue(
                "OCR_MIN_CONFIDENCE".to_string(),
                "must be between 0 and 1".to_string(),
            ));
        }
        let ocr_worker = OcrWorkerConfig {
            tick: seconds("OCR_TICK_SECS", ocr_defaults.tick.as_secs())?,
            batch_size: parsed("OCR_BATCH_SIZE", ocr_defaults.batch_size)?,
            min_confidence,
            job_timeout: seconds("OCR_JOB_TIMEOUT_SECS", ocr_defaults.job_timeout.as_secs())?,
            ..ocr_defaults
        };

        let payment = PaymentConfig {
            gateway_url: optional("PAYMENT_GATEWAY_URL"),
            api_key: optional("PAYMENT_API_KEY"),
            timeout: seconds("PAYMENT_TIMEOUT_SECS", 30)?,
        };
        if payment.gateway_url.is_some() && payment.api_key.is_none() {
            return Err(ConfigError::MissingVar("PAYMENT_API_KEY".to_string()));
        }

        let renewal_defaults = RenewalConfig::default();
        let renewal = RenewalConfig {
            tick: seconds("RENEWAL_TICK_SECS", renewal_defaults.tick.as_secs())?,
            batch_size: parsed("RENEWAL_BATCH_SIZE", renewal_defaults.batch_size)?,
            payment_timeout: payment.timeout,
            ..renewal_defaults
        };

        let comparison_defaults = ComparisonConfig::default();
        let subscriptions = SubscriptionPolicy {
            past_due_threshold: renewal.past_due_threshold,
            payment_timeout: payment.timeout,
            comparison: ComparisonConfig {
                window_months: parsed("COMPARISON_WINDOW_MONTHS", comparison_defaults.window_months)?,
                rides_per_month: parsed(
                    "COMPARISON_RIDES_PER_MONTH",
                    comparison_defaults.rides_per_month,
                )?,
            },
        };
        if subscriptions.comparison.window_months == 0 {
            return Err(ConfigError::InvalidValue(
                "COMPARISON_WINDOW_MONTHS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            bind_address,
            database_url,
            database_max_connections,
            database_acquire_timeout,
            log_filter,
            cors_origin,
            storage,
            ocr_provider: ocr_provider()?,
            payment,
            expiry_sweep_tick: seconds("EXPIRY_SWEEP_TICK_SECS", 3600)?,
            documents,
            subscriptions,
            ocr_worker,
            renewal,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // The environment is process-global; tests that touch it take turns.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const VARS: [&str; 12] = [
        "DATABASE_URL",
        "STORAGE_SIGNING_KEY",
        "BIND_ADDRESS",
        "OCR_PROVIDER",
        "GOOGLE_VISION_API_KEY",
        "OCR_MIN_CONFIDENCE",
        "ALLOWED_MIME_TYPES",
        "PAYMENT_GATEWAY_URL",
        "PAYMENT_API_KEY",
        "COMPARISON_RIDES_PER_MONTH",
        "RENEWAL_TICK_SECS",
        "MAX_UPLOAD_BYTES",
    ];

    fn with_env<F: FnOnce()>(vars: &[(&str, &str)], f: F) {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        for name in VARS {
            std::env::remove_var(name);
        }
        for (name, value) in vars {
            std::env::set_var(name, value);
        }
        f();
        for (name, _) in vars {
            std::env::remove_var(name);
        }
    }

    const BASE: [(&str, &str); 2] = [
        ("DATABASE_URL", "postgres://localhost/rides"),
        ("STORAGE_SIGNING_KEY", "dev-key"),
    ];

    #[test]
    fn defaults_apply_when_optional_vars_are_unset() {
        with_env(&BASE, || {
            let config = Config::from_env().unwrap();
            assert_eq!(config.bind_address.port(), 3000);
            assert_eq!(config.ocr_provider, OcrProvider::Mock);
            assert_eq!(config.documents.max_upload_bytes, 10 * 1024 * 1024);
            assert_eq!(config.subscriptions.comparison.rides_per_month, 20);
            assert_eq!(config.subscriptions.comparison.window_months, 3);
            assert_eq!(config.ocr_worker.min_confidence, 0.7);
            assert!(config.payment.gateway_url.is_none());
            assert_eq!(config.storage.public_url, "http://0.0.0.0:3000");
        });
    }

    #[test]
    fn overrides_are_parsed() {
        let mut vars = BASE.to_vec();
        vars.extend([
            ("ALLOWED_MIME_TYPES", "image/png, Application/PDF"),
            ("COMPARISON_RIDES_PER_MONTH", "30"),
            ("RENEWAL_TICK_SECS", "60"),
            ("OCR_PROVIDER", "google_vision"),
            ("GOOGLE_VISION_API_KEY", "k"),
        ]);
        with_env(&vars, || {
            let config = Config::from_env().unwrap();
            assert_eq!(config.documents.allowed_mime_types, vec!["image/png", "application/pdf"]);
            assert_eq!(config.subscriptions.comparison.rides_per_month, 30);
            assert_eq!(config.renewal.tick, Duration::from_secs(60));
            assert_eq!(
                config.ocr_provider,
                OcrProvider::GoogleVision { api_key: "k".into() }
            );
        });
    }

    #[test]
    fn missing_and_invalid_values_are_reported() {
        with_env(&[("STORAGE_SIGNING_KEY", "k")], || {
            assert!(matches!(
                Config::from_env(),
                Err(ConfigError::MissingVar(name)) if name == "DATABASE_URL"
            ));
        });

        let mut vars = BASE.to_vec();
        vars.push(("OCR_MIN_CONFIDENCE", "1.5"));
        with_env(&vars, || {
            assert!(matches!(
                Config::from_env(),
                Err(ConfigError::InvalidValue(name, _)) if name == "OCR_MIN_CONFIDENCE"
            ));
        });

        let mut vars = BASE.to_vec();
        vars.push(("OCR_PROVIDER", "google_vision"));
        with_env(&vars, || {
            assert!(matches!(
                Config::from_env(),
                Err(ConfigError::MissingVar(name)) if name == "GOOGLE_VISION_API_KEY"
            ));
        });

        let mut vars = BASE.to_vec();
        vars.push(("PAYMENT_GATEWAY_URL", "https://pay.example.com"));
        with_env(&vars, || {
            assert!(matches!(
                Config::from_env(),
                Err(ConfigError::MissingVar(name)) if name == "PAYMENT_API_KEY"
            ));
        });
    }
}
