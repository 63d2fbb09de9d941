use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use governor::{Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;

use super::CandleCollector;
use crate::error::TradingError;
use crate::execution::{ProgressReporter, QueueStats, Task, TaskHandler, TaskQueue, TaskState};
use crate::models::Timeframe;
use crate::Result;

pub const BACKFILL_TASK: &str = "backfill";

type BackfillRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Months of history to load for one market. The end defaults to the
/// current month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillRequest {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub start_year: i32,
    pub start_month: u32,
    pub end_year: Option<i32>,
    pub end_month: Option<u32>,
}

/// One month of one market; the payload of a backfill task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillJob {
    pub job_id: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub year: i32,
    pub month: u32,
}

impl BackfillJob {
    pub fn new(symbol: &str, timeframe: Timeframe, year: i32, month: u32) -> Self {
        Self {
            job_id: format!("{}-{}-{:04}-{:02}", symbol, timeframe, year, month),
            symbol: symbol.to_string(),
            timeframe,
            year,
            month,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillJobStatus {
    pub job_id: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub year: i32,
    pub month: u32,
    pub state: TaskState,
    pub progress: u8,
    pub error: Option<String>,
}

/// First and last millisecond of a calendar month, UTC
pub fn month_range(year: i32, month: u32) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let invalid = || TradingError::InvalidRequest(format!("invalid month {}-{:02}", year, month));

    let start = Utc
        .with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .ok_or_else(invalid)?;
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let next = Utc
        .with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0)
        .single()
        .ok_or_else(invalid)?;

    Ok((start, next - Duration::milliseconds(1)))
}

/// Expand a request into one job per month, oldest first
pub fn plan_jobs(request: &BackfillRequest, now: DateTime<Utc>) -> Result<Vec<BackfillJob>> {
    let end_year = request.end_year.unwrap_or(now.year());
    let end_month = request.end_month.unwrap_or(now.month());

    for month in [request.start_month, end_month] {
        if !(1..=12).contains(&month) {
            return Err(TradingError::InvalidRequest(format!("month out of range: {}", month)));
        }
    }
    if (request.start_year, request.start_month) > (end_year, end_month) {
        return Err(TradingError::InvalidRequest(format!(
            "backfill starts after it ends: {}-{:02} > {}-{:02}",
            request.start_year, request.start_month, end_year, end_month
        )));
    }

    let mut jobs = Vec::new();
    let (mut year, mut month) = (request.start_year, request.start_month);
    while (year, month) <= (end_year, end_month) {
        jobs.push(BackfillJob::new(&request.symbol, request.timeframe, year, month));
        if month == 12 {
            year += 1;
            month = 1;
        } else {
            month += 1;
        }
    }
    Ok(jobs)
}

/// Schedules month-sized backfill jobs and reports on them
pub struct BackfillService {
    queue: TaskQueue,
}

impl BackfillService {
    pub fn new(queue: TaskQueue) -> Self {
        Self { queue }
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// Enqueue every month of the request and return the job ids. Months
    /// that are already waiting or running are left alone.
    pub async fn start(&self, request: &BackfillRequest) -> Result<Vec<String>> {
        let jobs = plan_jobs(request, Utc::now())?;
        let mut ids = Vec::with_capacity(jobs.len());

        for job in jobs {
            let payload = serde_json::to_value(&job)?;
            self.queue.enqueue(BACKFILL_TASK, job.job_id.clone(), payload).await?;
            ids.push(job.job_id);
        }

        tracing::info!(
            symbol = %request.symbol,
            timeframe = %request.timeframe,
            jobs = ids.len(),
            "📥 Backfill scheduled"
        );
        Ok(ids)
    }

    pub async fn status(&self, job_id: &str) -> Option<BackfillJobStatus> {
        let status = self.queue.status(job_id).await?;
        to_job_status(status)
    }

    pub async fn list(&self) -> Vec<BackfillJobStatus> {
        self.queue
            .statuses()
            .await
            .into_iter()
            .filter_map(to_job_status)
            .collect()
    }

    pub async fn stats(&self) -> QueueStats {
        self.queue.stats().await
    }
}

fn to_job_status(status: crate::execution::TaskStatus) -> Option<BackfillJobStatus> {
    if status.name != BACKFILL_TASK {
        return None;
    }
    let job: BackfillJob = serde_json::from_value(status.payload).ok()?;
    Some(BackfillJobStatus {
        job_id: job.job_id,
        symbol: job.symbol,
        timeframe: job.timeframe,
        year: job.year,
        month: job.month,
        state: status.state,
        progress: status.progress,
        error: status.error,
    })
}

/// Pages through one month of candles, `batch_size` at a time
pub struct BackfillHandler {
    collector: Arc<CandleCollector>,
    batch_size: usize,
    limiter: Arc<BackfillRateLimiter>,
}

impl BackfillHandler {
    pub fn new(collector: Arc<CandleCollector>, batch_size: usize, requests_per_second: u32) -> Self {
        let rps = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            collector,
            batch_size: batch_size.max(1),
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(rps))),
        }
    }

    async fn run_job(&self, job: &BackfillJob, progress: &ProgressReporter) -> Result<usize> {
        let (start, end) = month_range(job.year, job.month)?;
        let step_ms = job.timeframe.duration_ms();
        let span_ms = (end - start).num_milliseconds() + 1;
        let total_candles = ((span_ms + step_ms - 1) / step_ms).max(1) as usize;

        tracing::info!(
            job_id = %job.job_id,
            from = %start,
            to = %end,
            expected = total_candles,
            "Backfill job started"
        );

        let mut since = start;
        let mut iteration = 0usize;
        let mut stored = 0usize;

        while since <= end {
            self.limiter.until_ready().await;

            let batch = self
                .collector
                .fetch_batch(&job.symbol, job.timeframe, Some(since), Some(end), self.batch_size)
                .await?;
            stored += batch.stored;
            iteration += 1;

            let pct = (iteration * self.batch_size * 100 / total_candles).min(100);
            progress.report(pct as u8).await;

            match batch.last_timestamp {
                Some(last) if batch.fetched > 0 && last >= since => {
                    since = last + job.timeframe.duration();
                }
                _ => break,
            }
        }

        tracing::info!(job_id = %job.job_id, stored, batches = iteration, "✅ Backfill job finished");
        Ok(stored)
    }
}

#[async_trait]
impl TaskHandler for BackfillHandler {
    async fn handle(&self, task: &Task, progress: &ProgressReporter) -> Result<()> {
        let job: BackfillJob = serde_json::from_value(task.payload.clone())
            .map_err(|e| TradingError::InvalidRequest(format!("bad backfill payload: {}", e)))?;
        self.run_job(&job, progress).await?;
        Ok(())
    }
}
