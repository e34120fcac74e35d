use anyhow::{Context, Result};
use chrono::Utc;
use futures_util::StreamExt;
use redis::Msg;
use sqlx::PgPool;
use tracing::{error, info, warn};
use zavora_inventory::{RecalculationSummary, recalculate_from_date};
use zavora_platform::{
    PgStockLedger, RECALCULATE_CHANNEL, RECALCULATED_CHANNEL, RECALCULATION_FAILED_CHANNEL,
    RecalculationCompleted, RecalculationFailed, RecalculationRequested, RedisBus, ServiceConfig,
    apply_schema, connect_database,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "zavora_ops=info,zavora_inventory=info".to_string()),
        )
        .init();

    let config = ServiceConfig::worker_from_env()?;
    let pool = connect_database(&config.database_url).await?;
    apply_schema(&pool).await?;
    let redis = RedisBus::connect(&config.redis_url)?;

    let mut pubsub = redis.client().get_async_pubsub().await?;
    pubsub.subscribe(RECALCULATE_CHANNEL).await?;
    let mut messages = pubsub.on_message();

    info!(
        timeout_secs = config.recalc_timeout.as_secs(),
        "ops worker subscribed to {RECALCULATE_CHANNEL}"
    );

    loop {
        let msg = messages
            .next()
            .await
            .with_context(|| format!("{RECALCULATE_CHANNEL} stream ended unexpectedly"))?;
        if let Err(err) = handle_message(&pool, &redis, &config, msg).await {
            error!("failed to process message: {err:#}");
        }
    }
}

async fn handle_message(
    pool: &PgPool,
    redis: &RedisBus,
    config: &ServiceConfig,
    msg: Msg,
) -> Result<()> {
    let payload: String = msg.get_payload()?;
    let request: RecalculationRequested =
        serde_json::from_str(&payload).context("malformed recalculation request")?;

    let outcome = tokio::time::timeout(
        config.recalc_timeout,
        run_recalculation(pool, config, &request),
    )
    .await
    .unwrap_or_else(|_| {
        Err(anyhow::anyhow!(
            "recalculation timed out after {}s",
            config.recalc_timeout.as_secs()
        ))
    });

    match outcome {
        Ok(summary) => {
            if !summary.warnings.is_empty() {
                warn!(
                    product_id = %summary.product_id,
                    warnings = summary.warnings.len(),
                    "recalculation costed shortfalls at fallback cost"
                );
            }
            redis
                .publish_json(RECALCULATED_CHANNEL, &completed_event(&summary))
                .await?;
            info!(
                product_id = %summary.product_id,
                from_date = %summary.from_date,
                replayed = summary.replayed.len(),
                "recalculation committed"
            );
            Ok(())
        }
        Err(err) => {
            let failed = RecalculationFailed {
                product_id: request.product_id,
                from_date: request.from_date,
                error: format!("{err:#}"),
                failed_at: Utc::now(),
            };
            redis
                .publish_json(RECALCULATION_FAILED_CHANNEL, &failed)
                .await?;
            Err(err)
        }
    }
}

/// One recalculation in its own transaction. Any error or a timeout drops
/// the ledger before commit, which rolls the whole replay back.
async fn run_recalculation(
    pool: &PgPool,
    config: &ServiceConfig,
    request: &RecalculationRequested,
) -> Result<RecalculationSummary> {
    let mut ledger = PgStockLedger::begin(pool, config.recalc_timeout).await?;
    let reason = request.reason.as_deref().unwrap_or(&config.audit_reason);

    let summary = recalculate_from_date(
        &mut ledger,
        request.product_id,
        request.from_date,
        reason,
        request.requested_by.as_deref(),
    )
    .await
    .with_context(|| {
        format!(
            "recalculation of product {} from {} failed",
            request.product_id, request.from_date
        )
    })?;

    ledger.commit().await?;
    Ok(summary)
}

fn completed_event(summary: &RecalculationSummary) -> RecalculationCompleted {
    RecalculationCompleted {
        product_id: summary.product_id,
        from_date: summary.from_date,
        skipped: summary.skipped,
        replayed_lines: summary.replayed.len(),
        audit_entries: summary.audit_entries,
        warnings: summary.warnings.clone(),
        completed_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use uuid::Uuid;
    use zavora_core::LineRef;
    use zavora_inventory::LineReplay;

    use super::*;

    #[test]
    fn test_completed_event_counts_replayed_lines() {
        let from_date = NaiveDate::from_ymd_opt(2024, 1, 5).expect("valid date");
        let summary = RecalculationSummary {
            product_id: Uuid::new_v4(),
            from_date,
            skipped: false,
            lots_reset: 2,
            consumptions_purged: 3,
            replayed: vec![
                LineReplay {
                    line: LineRef::sale(Uuid::new_v4()),
                    transaction_date: from_date,
                    old_cogs: dec!(18),
                    new_cogs: dec!(15),
                    shortfall: dec!(0),
                },
                LineReplay {
                    line: LineRef::sale(Uuid::new_v4()),
                    transaction_date: from_date,
                    old_cogs: dec!(20),
                    new_cogs: dec!(23),
                    shortfall: dec!(1),
                },
            ],
            audit_entries: 2,
            warnings: vec!["insufficient stock".to_string()],
        };

        let event = completed_event(&summary);

        assert_eq!(event.product_id, summary.product_id);
        assert_eq!(event.replayed_lines, 2);
        assert_eq!(event.audit_entries, 2);
        assert_eq!(event.warnings.len(), 1);
        assert!(!event.skipped);
    }
}
