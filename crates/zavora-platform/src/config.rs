use std::time::Duration;

use anyhow::{Context, Result};

const DEFAULT_RECALC_TIMEOUT_SECS: u64 = 30;
const DEFAULT_AUDIT_REASON: &str = "recalculation";

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub database_url: String,
    pub redis_url: String,
    /// Upper bound for one recalculation, also applied as the Postgres
    /// `statement_timeout` of its transaction.
    pub recalc_timeout: Duration,
    pub audit_reason: String,
}

impl ServiceConfig {
    pub fn worker_from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url = lookup("DATABASE_URL").context("DATABASE_URL is required")?;
        let redis_url = lookup("REDIS_URL").context("REDIS_URL is required")?;

        let recalc_timeout = match lookup("RECALC_TIMEOUT_SECS") {
            Some(raw) => {
                let secs: u64 = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("RECALC_TIMEOUT_SECS is not a number: {raw}"))?;
                if secs == 0 {
                    anyhow::bail!("RECALC_TIMEOUT_SECS must be greater than zero");
                }
                Duration::from_secs(secs)
            }
            None => Duration::from_secs(DEFAULT_RECALC_TIMEOUT_SECS),
        };

        let audit_reason = lookup("AUDIT_REASON")
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_AUDIT_REASON.to_string());

        Ok(Self {
            database_url,
            redis_url,
            recalc_timeout,
            audit_reason,
        })
    }
}
