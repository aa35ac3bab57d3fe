use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};

/// Upper bound for the reconciliation windows: ten years.
pub const MAX_WINDOW_SECS: u64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub bind_address: String,
    pub provider: ProviderSettings,
    pub reconcile: ReconcileSettings,
    pub scheduler_token: String,
    pub order_rate_limit_per_minute: u32,
}

#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    /// A PENDING order untouched for this long is re-dispatched.
    pub pending_timeout: Duration,
    /// A PROCESSING order without a webhook for this long is polled.
    pub processing_poll_after: Duration,
    /// A PROCESSING order older than this is failed and refunded.
    pub processing_deadline: Duration,
    pub max_dispatch_attempts: i32,
    pub batch_size: i64,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            pending_timeout: Duration::from_secs(300),
            processing_poll_after: Duration::from_secs(600),
            processing_deadline: Duration::from_secs(86400),
            max_dispatch_attempts: 3,
            batch_size: 100,
        }
    }
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let required = |key: &str| lookup(key).filter(|v| !v.is_empty()).ok_or_else(|| anyhow!("{key} must be set"));

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            bind_address: lookup("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            provider: ProviderSettings {
                base_url: required("PROVIDER_BASE_URL")?,
                api_key: required("PROVIDER_API_KEY")?,
                timeout: Duration::from_secs(parse_var(&lookup, "PROVIDER_TIMEOUT_SECS", "15")?),
            },
            reconcile: ReconcileSettings {
                pending_timeout: parse_window(&lookup, "PENDING_TIMEOUT_SECS", "300")?,
                processing_poll_after: parse_window(&lookup, "PROCESSING_POLL_SECS", "600")?,
                processing_deadline: parse_window(&lookup, "PROCESSING_DEADLINE_SECS", "86400")?,
                max_dispatch_attempts: parse_var(&lookup, "MAX_DISPATCH_ATTEMPTS", "3")?,
                batch_size: parse_var(&lookup, "SWEEP_BATCH_SIZE", "100")?,
            },
            scheduler_token: required("SCHEDULER_TOKEN")?,
            order_rate_limit_per_minute: parse_var(&lookup, "ORDER_RATE_LIMIT_PER_MINUTE", "10")?,
        })
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value = lookup(key).unwrap_or_else(|| default.to_string());
    value.trim().parse::<T>().with_context(|| format!("{key} has invalid value {value:?}"))
}

// reconciliation cutoffs are computed as `now - window`
fn parse_window(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> anyhow::Result<Duration> {
    let secs: u64 = parse_var(lookup, key, default)?;
    if secs == 0 || secs > MAX_WINDOW_SECS {
        bail!("{key} must be between 1 and {MAX_WINDOW_SECS} seconds, got {secs}");
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 4] = [
        ("DATABASE_URL", "postgres://localhost/points"),
        ("PROVIDER_BASE_URL", "https://provider.test/api"),
        ("PROVIDER_API_KEY", "secret"),
        ("SCHEDULER_TOKEN", "cron"),
    ];

    #[test]
    fn test_defaults() {
        let settings = Settings::from_lookup(lookup_from(&REQUIRED)).unwrap();
        assert_eq!(settings.bind_address, "0.0.0.0:8080");
        assert_eq!(settings.provider.timeout, Duration::from_secs(15));
        assert_eq!(settings.reconcile.max_dispatch_attempts, 3);
        assert_eq!(settings.reconcile.pending_timeout, Duration::from_secs(300));
        assert_eq!(settings.order_rate_limit_per_minute, 10);
    }

    #[test]
    fn test_overrides_and_errors() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("PROVIDER_TIMEOUT_SECS", "3"));
        pairs.push(("SWEEP_BATCH_SIZE", "7"));
        let settings = Settings::from_lookup(lookup_from(&pairs)).unwrap();
        assert_eq!(settings.provider.timeout, Duration::from_secs(3));
        assert_eq!(settings.reconcile.batch_size, 7);

        pairs.push(("MAX_DISPATCH_ATTEMPTS", "many"));
        let err = Settings::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert!(err.to_string().contains("MAX_DISPATCH_ATTEMPTS"), "{err}");
    }

    #[test]
    fn test_window_bounds() {
        for bad in ["0", "10000000000000", "18446744073709551615"] {
            let mut pairs = REQUIRED.to_vec();
            pairs.push(("PROCESSING_DEADLINE_SECS", bad));
            let err = Settings::from_lookup(lookup_from(&pairs)).unwrap_err();
            assert!(err.to_string().contains("PROCESSING_DEADLINE_SECS"), "{err}");
        }

        let mut pairs = REQUIRED.to_vec();
        let max = MAX_WINDOW_SECS.to_string();
        pairs.push(("PENDING_TIMEOUT_SECS", max.as_str()));
        let settings = Settings::from_lookup(lookup_from(&pairs)).unwrap();
        assert_eq!(settings.reconcile.pending_timeout, Duration::from_secs(MAX_WINDOW_SECS));
    }

    #[test]
    fn test_missing_required() {
        let err = Settings::from_lookup(lookup_from(&REQUIRED[1..])).unwrap_err();
        assert_eq!(err.to_string(), "DATABASE_URL must be set");
    }
}
