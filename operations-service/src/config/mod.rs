use crate::models::{BusinessHoursTable, WEEKDAY_KEYS};
use chrono::{FixedOffset, Offset, Utc};
use secrecy::Secret;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct OperationsConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub service_name: String,
    pub otlp_endpoint: Option<String>,
    /// `None` runs against the in-memory store.
    pub mongodb: Option<MongoConfig>,
    pub business: BusinessConfig,
    pub calendar: CalendarConfig,
    pub invoicing: InvoicingConfig,
    pub smtp: SmtpConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BusinessConfig {
    pub utc_offset_minutes: i32,
    pub slot_minutes: u32,
    /// Seed for the stored business-hours table.
    pub default_hours: BusinessHoursTable,
}

impl BusinessConfig {
    pub fn utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CalendarConfig {
    pub timeout_ms: u64,
}

impl CalendarConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoicingConfig {
    pub due_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Secret<String>,
    pub from_email: String,
    pub from_name: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl Default for OperationsConfig {
    fn default() -> Self {
        Self {
            common: core_config::Config::default(),
            service_name: "operations-service".to_string(),
            otlp_endpoint: None,
            mongodb: None,
            business: BusinessConfig {
                utc_offset_minutes: 0,
                slot_minutes: 30,
                default_hours: default_hours_table(),
            },
            calendar: CalendarConfig { timeout_ms: 3000 },
            invoicing: InvoicingConfig { due_days: 15 },
            smtp: SmtpConfig {
                host: "smtp.gmail.com".to_string(),
                port: 587,
                user: String::new(),
                password: Secret::new(String::new()),
                from_email: "noreply@example.com".to_string(),
                from_name: "Operations".to_string(),
                enabled: false,
            },
            scheduler: SchedulerConfig {
                enabled: false,
                interval_secs: 86_400,
            },
        }
    }
}

impl OperationsConfig {
    pub fn load() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";
        let defaults = Self::default();

        let mongodb = match env::var("MONGODB_URI") {
            Ok(uri) if !uri.is_empty() => Some(MongoConfig {
                uri,
                database: get_env("MONGODB_DATABASE", Some("operations_db"), is_prod)?,
            }),
            _ if is_prod => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "MONGODB_URI is required in production but not set"
                )))
            }
            _ => None,
        };

        let utc_offset_minutes = parse_env("BUSINESS_UTC_OFFSET_MINUTES", 0i32)?;
        if FixedOffset::east_opt(utc_offset_minutes * 60).is_none() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "BUSINESS_UTC_OFFSET_MINUTES out of range: {}",
                utc_offset_minutes
            )));
        }

        let slot_minutes = parse_env("SLOT_MINUTES", 30u32)?;
        if slot_minutes == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SLOT_MINUTES must be positive"
            )));
        }

        let mut default_hours = default_hours_table();
        for day in WEEKDAY_KEYS {
            let key = format!("BUSINESS_HOURS_{}", day.to_ascii_uppercase());
            if let Ok(hours) = env::var(&key) {
                default_hours.insert(day.to_string(), hours);
            }
        }

        Ok(OperationsConfig {
            common,
            service_name: env::var("SERVICE_NAME").unwrap_or(defaults.service_name),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            mongodb,
            business: BusinessConfig {
                utc_offset_minutes,
                slot_minutes,
                default_hours,
            },
            calendar: CalendarConfig {
                timeout_ms: parse_env("CALENDAR_TIMEOUT_MS", defaults.calendar.timeout_ms)?,
            },
            invoicing: InvoicingConfig {
                due_days: parse_env("INVOICE_DUE_DAYS", defaults.invoicing.due_days)?,
            },
            smtp: SmtpConfig {
                host: get_env("SMTP_HOST", Some("smtp.gmail.com"), is_prod)?,
                port: parse_env("SMTP_PORT", 587u16)?,
                user: get_env("SMTP_USER", Some(""), is_prod)?,
                password: Secret::new(get_env("SMTP_PASSWORD", Some(""), is_prod)?),
                from_email: get_env("SMTP_FROM_EMAIL", Some("noreply@example.com"), is_prod)?,
                from_name: get_env("SMTP_FROM_NAME", Some("Operations"), is_prod)?,
                enabled: parse_env("SMTP_ENABLED", false)?,
            },
            scheduler: SchedulerConfig {
                enabled: parse_env("BILLING_SCHEDULER_ENABLED", false)?,
                interval_secs: parse_env(
                    "BILLING_SCHEDULER_INTERVAL_SECS",
                    defaults.scheduler.interval_secs,
                )?,
            },
        })
    }
}

fn default_hours_table() -> BusinessHoursTable {
    crate::models::BusinessHours::standard_week().into_table()
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("{} has an invalid value '{}': {}", key, raw, e))
        }),
        Err(_) => Ok(default),
    }
}
