//! Daily scheduled batch run.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Days, FixedOffset, NaiveTime, Utc};

use crate::config::SchedulerConfig;
use crate::ingest::Pipeline;

/// First instant strictly after `now` whose wall-clock time in `offset`
/// is `hour:minute`.
pub fn next_fire_after(
    now: DateTime<Utc>,
    hour: u32,
    minute: u32,
    offset: &FixedOffset,
) -> Result<DateTime<Utc>> {
    let at = NaiveTime::from_hms_opt(hour, minute, 0)
        .ok_or_else(|| anyhow!("invalid schedule time {:02}:{:02}", hour, minute))?;
    let local = now.with_timezone(offset);

    let today = local
        .date_naive()
        .and_time(at)
        .and_local_timezone(*offset)
        .single()
        .ok_or_else(|| anyhow!("unrepresentable schedule time"))?;
    if today > local {
        return Ok(today.with_timezone(&Utc));
    }

    let tomorrow = local
        .date_naive()
        .checked_add_days(Days::new(1))
        .ok_or_else(|| anyhow!("date out of range"))?
        .and_time(at)
        .and_local_timezone(*offset)
        .single()
        .ok_or_else(|| anyhow!("unrepresentable schedule time"))?;
    Ok(tomorrow.with_timezone(&Utc))
}

/// Run all active sources every day at the configured time. Never returns
/// unless the schedule itself is invalid.
pub async fn run_daily(
    pipeline: Arc<Pipeline>,
    schedule: &SchedulerConfig,
    offset: FixedOffset,
) -> Result<()> {
    loop {
        let now = Utc::now();
        let next = next_fire_after(now, schedule.hour, schedule.minute, &offset)?;
        tracing::info!(next_run = %next.with_timezone(&offset), "scheduler_waiting");

        let wait = (next - now).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;

        match pipeline.run_all_active_sources().await {
            Ok(batch) => tracing::info!(
                total = batch.total_sources,
                success = batch.success_count,
                failed = batch.failed_count,
                "scheduled_run_done"
            ),
            Err(e) => tracing::error!(error = %e, "scheduled_run_failed"),
        }
    }
}
