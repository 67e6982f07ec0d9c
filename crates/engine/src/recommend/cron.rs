//! Minute-granularity cron evaluation and the tick thread
//!
//! The recommend service evaluates a standard 5-field cron expression
//! (`minute hour day-of-month month day-of-week`) once per 60-second tick.
//! Fields accept `*`, values, lists, ranges, and `/step` suffixes. A
//! day-of-week of 7 is accepted as Sunday.

use chrono::{DateTime, Datelike, Timelike, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::debug;
use vireo_core::{EngineError, EngineResult};

/// One cron field as a bitmask over its value range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSet {
    mask: u64,
}

impl FieldSet {
    fn contains(&self, value: u32) -> bool {
        value < 64 && (self.mask >> value) & 1 == 1
    }
}

fn parse_field(spec: &str, min: u32, max: u32) -> EngineResult<FieldSet> {
    let mut mask = 0u64;
    for part in spec.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| {
                    EngineError::invalid_config(format!("cron step '{}' is not a number", step))
                })?;
                if step == 0 {
                    return Err(EngineError::invalid_config("cron step of 0"));
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((lo, hi)) = range.split_once('-') {
            let lo: u32 = lo.parse().map_err(|_| bad_value(lo))?;
            let hi: u32 = hi.parse().map_err(|_| bad_value(hi))?;
            (lo, hi)
        } else {
            let v: u32 = range.parse().map_err(|_| bad_value(range))?;
            (v, v)
        };

        if lo < min || hi > max || lo > hi {
            return Err(EngineError::invalid_config(format!(
                "cron range {}-{} outside {}..={}",
                lo, hi, min, max
            )));
        }
        let mut v = lo;
        while v <= hi {
            mask |= 1 << v;
            v += step;
        }
    }
    Ok(FieldSet { mask })
}

fn bad_value(s: &str) -> EngineError {
    EngineError::invalid_config(format!("cron value '{}' is not a number", s))
}

/// A parsed 5-field cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpression {
    minutes: FieldSet,
    hours: FieldSet,
    days_of_month: FieldSet,
    months: FieldSet,
    days_of_week: FieldSet,
}

impl CronExpression {
    /// Parse `minute hour day-of-month month day-of-week`.
    pub fn parse(expr: &str) -> EngineResult<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(EngineError::invalid_config(format!(
                "cron expression '{}' needs 5 fields",
                expr
            )));
        }
        let mut days_of_week = parse_field(fields[4], 0, 7)?;
        // 7 is an alias for Sunday.
        if days_of_week.contains(7) {
            days_of_week.mask |= 1;
        }
        Ok(CronExpression {
            minutes: parse_field(fields[0], 0, 59)?,
            hours: parse_field(fields[1], 0, 23)?,
            days_of_month: parse_field(fields[2], 1, 31)?,
            months: parse_field(fields[3], 1, 12)?,
            days_of_week,
        })
    }

    /// Whether the expression matches the given instant's minute.
    pub fn matches(&self, t: &DateTime<Utc>) -> bool {
        self.minutes.contains(t.minute())
            && self.hours.contains(t.hour())
            && self.days_of_month.contains(t.day())
            && self.months.contains(t.month())
            && self
                .days_of_week
                .contains(t.weekday().num_days_from_sunday())
    }

    /// Whether the expression matches the current minute.
    pub fn matches_now(&self) -> bool {
        self.matches(&Utc::now())
    }
}

// ============================================================================
// Ticker
// ============================================================================

/// Background thread invoking a callback once per period.
///
/// The callback is responsible for its own cron matching and for returning
/// quickly when it cannot take its locks.
pub struct CronTicker {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CronTicker {
    /// Spawn the ticker. `period` is 60 seconds in production; tests pass
    /// something shorter.
    pub fn start(
        name: &str,
        period: Duration,
        callback: impl Fn() + Send + 'static,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = Arc::clone(&shutdown);
        let thread_name = format!("vireo-cron-{}", name);
        let handle = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                debug!(target: "vireo::recommend", "cron ticker started");
                // Poll the shutdown flag in small slices so stop() never
                // waits a full period.
                let slice = Duration::from_millis(20).min(period);
                loop {
                    callback();
                    let mut slept = Duration::ZERO;
                    while slept < period {
                        if shutdown_clone.load(Ordering::Acquire) {
                            return;
                        }
                        std::thread::sleep(slice);
                        slept += slice;
                    }
                }
            })
            .expect("failed to spawn cron ticker thread");

        CronTicker {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Stop the ticker and join its thread.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CronTicker {
    fn drop(&mut self) {
        self.stop();
    }
}
