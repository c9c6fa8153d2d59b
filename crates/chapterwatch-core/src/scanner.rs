//! Batch update detection over tracked series.
//!
//! Each eligible entry runs in its own task: template probe first, then a
//! full fetch plus extraction. Per-entry failures never abort the batch, and
//! state changes are applied to the caller's slice only after every task has
//! finished.

use chrono::Utc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::ScanConfig;
use crate::error::AppError;
use crate::models::{FetchOutcome, TrackedSeries};
use crate::orchestrator::FetchOrchestrator;
use crate::prober::Prober;
use crate::traits::{ChapterExtractor, HostListStore, HttpTransport, RenderFallback, SeriesStore};

/// Events emitted by the scanner for monitoring/logging.
#[derive(Debug, Clone)]
pub enum ScanEvent<'a> {
    Started {
        entries: usize,
    },
    EntrySkipped {
        title: &'a str,
    },
    EntryInvalid {
        title: &'a str,
        error: &'a str,
    },
    ProbeHit {
        title: &'a str,
        next: u32,
    },
    Advanced {
        title: &'a str,
        found: f64,
        chapter: u32,
        bumped: bool,
    },
    NoChange {
        title: &'a str,
        found: Option<f64>,
    },
    EntryFailed {
        title: &'a str,
        error: &'a str,
    },
    EntryTimedOut {
        title: &'a str,
    },
    EntryCancelled {
        title: &'a str,
    },
    Finished {
        advanced: usize,
        failed: usize,
    },
}

/// Trait for receiving scan events (decoupled logging).
pub trait ScanReporter: Send + Sync {
    fn report(&self, event: ScanEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingScanReporter;

impl ScanReporter for TracingScanReporter {
    fn report(&self, event: ScanEvent<'_>) {
        match event {
            ScanEvent::Started { entries } => {
                tracing::info!(entries, "Scan started");
            }
            ScanEvent::EntrySkipped { title } => {
                tracing::debug!(%title, "Unread advance pending, skipped");
            }
            ScanEvent::EntryInvalid { title, error } => {
                tracing::warn!(%title, %error, "Entry invalid, not fetched");
            }
            ScanEvent::ProbeHit { title, next } => {
                tracing::info!(%title, next, "Next chapter exists");
            }
            ScanEvent::Advanced {
                title,
                found,
                chapter,
                bumped,
            } => {
                tracing::info!(%title, found, chapter, bumped, "New chapter detected");
            }
            ScanEvent::NoChange { title, found } => {
                tracing::debug!(%title, ?found, "No new chapter");
            }
            ScanEvent::EntryFailed { title, error } => {
                tracing::warn!(%title, %error, "Entry check failed");
            }
            ScanEvent::EntryTimedOut { title } => {
                tracing::warn!(%title, "Entry check timed out");
            }
            ScanEvent::EntryCancelled { title } => {
                tracing::info!(%title, "Entry check cancelled");
            }
            ScanEvent::Finished { advanced, failed } => {
                tracing::info!(advanced, failed, "Scan finished");
            }
        }
    }
}

/// What happened to one entry.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryOutcome {
    /// Already flagged; not checked.
    Skipped,
    /// Failed validation; never reached the network.
    Invalid(String),
    /// The template probe found the next chapter.
    ProbeHit { next: u32 },
    /// Extraction found a higher chapter.
    Advanced { found: f64, bumped: bool },
    NoChange { found: Option<f64> },
    Failed(String),
    TimedOut,
    Cancelled,
}

impl EntryOutcome {
    pub fn is_advance(&self) -> bool {
        matches!(
            self,
            EntryOutcome::ProbeHit { .. } | EntryOutcome::Advanced { .. }
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            EntryOutcome::Invalid(_) | EntryOutcome::Failed(_) | EntryOutcome::TimedOut
        )
    }

    fn was_checked(&self) -> bool {
        !matches!(
            self,
            EntryOutcome::Skipped | EntryOutcome::Invalid(_) | EntryOutcome::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntryReport {
    pub title: String,
    pub url: String,
    pub outcome: EntryOutcome,
}

/// Per-entry outcomes of one scan, in input order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanReport {
    pub entries: Vec<EntryReport>,
}

impl ScanReport {
    pub fn advanced(&self) -> impl Iterator<Item = &EntryReport> {
        self.entries.iter().filter(|e| e.outcome.is_advance())
    }

    pub fn failed(&self) -> impl Iterator<Item = &EntryReport> {
        self.entries.iter().filter(|e| e.outcome.is_failure())
    }
}

/// Largest distance from `current + 1` still treated as that chapter.
const BUMP_EPSILON: f64 = 1e-4;

/// The chapter to store when `found` is the one right after `current`.
///
/// Anything above `current` raises the advance flag; only `current + 1`
/// itself moves the stored chapter. Half chapters such as 6.5 do not.
pub fn bump_target(current: u32, found: f64) -> Option<u32> {
    let next = current.checked_add(1)?;
    ((found - f64::from(next)).abs() < BUMP_EPSILON).then_some(next)
}

/// Checks tracked series for new chapters.
#[derive(Debug, Clone)]
pub struct UpdateScanner<T, R, S, X> {
    orchestrator: FetchOrchestrator<T, R, S>,
    prober: Prober<T>,
    extractor: X,
    config: ScanConfig,
}

impl<T, R, S, X> UpdateScanner<T, R, S, X>
where
    T: HttpTransport + 'static,
    R: RenderFallback + 'static,
    S: HostListStore + 'static,
    X: ChapterExtractor + 'static,
{
    /// The prober shares the orchestrator's transport and throttle.
    pub fn new(orchestrator: FetchOrchestrator<T, R, S>, extractor: X, config: ScanConfig) -> Self {
        let prober = Prober::new(
            orchestrator.transport().clone(),
            orchestrator.throttle().clone(),
            orchestrator.config().request_timeout,
        );
        Self {
            orchestrator,
            prober,
            extractor,
            config,
        }
    }

    pub fn orchestrator(&self) -> &FetchOrchestrator<T, R, S> {
        &self.orchestrator
    }

    pub fn prober(&self) -> &Prober<T> {
        &self.prober
    }

    /// Load the series list, scan it, and write it back.
    pub async fn run_once<SS, RP>(
        &self,
        store: &SS,
        cancel: &CancellationToken,
        reporter: &RP,
    ) -> Result<ScanReport, AppError>
    where
        SS: SeriesStore,
        RP: ScanReporter,
    {
        let mut series = store.load_series().await?;
        let report = self.scan(&mut series, cancel, reporter).await;
        store.save_series(&series).await?;
        Ok(report)
    }

    /// Scan every entry concurrently and apply the results to `series`.
    pub async fn scan<RP: ScanReporter>(
        &self,
        series: &mut [TrackedSeries],
        cancel: &CancellationToken,
        reporter: &RP,
    ) -> ScanReport {
        reporter.report(ScanEvent::Started {
            entries: series.len(),
        });

        let mut outcomes: Vec<EntryOutcome> = vec![EntryOutcome::Skipped; series.len()];
        let mut tasks = JoinSet::new();

        for (index, entry) in series.iter().enumerate() {
            if entry.has_new_chapter {
                continue;
            }
            outcomes[index] = EntryOutcome::Failed("entry task aborted".into());

            let scanner = self.clone();
            let entry = entry.clone();
            let cancel = cancel.child_token();
            let entry_timeout = self.config.entry_timeout;

            tasks.spawn(async move {
                let outcome = tokio::select! {
                    biased;
                    () = cancel.cancelled() => EntryOutcome::Cancelled,
                    result = tokio::time::timeout(entry_timeout, scanner.check_entry(&entry)) => {
                        result.unwrap_or(EntryOutcome::TimedOut)
                    }
                };
                (index, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => outcomes[index] = outcome,
                Err(e) => tracing::error!(error = %e, "Entry task panicked"),
            }
        }

        let now = Utc::now();
        let mut report = ScanReport::default();
        for (entry, outcome) in series.iter_mut().zip(outcomes) {
            apply_outcome(entry, &outcome);
            if outcome.was_checked() {
                entry.last_checked_at = Some(now);
            }
            report_entry(reporter, entry, &outcome);
            report.entries.push(EntryReport {
                title: entry.title.clone(),
                url: entry.url.clone(),
                outcome,
            });
        }

        reporter.report(ScanEvent::Finished {
            advanced: report.advanced().count(),
            failed: report.failed().count(),
        });
        report
    }

    /// Run the pipeline for one entry without touching shared state.
    pub async fn check_entry(&self, entry: &TrackedSeries) -> EntryOutcome {
        let validated = match entry.validate() {
            Ok(v) => v,
            Err(e) => return EntryOutcome::Invalid(e.to_string()),
        };

        if self.config.probe
            && let Some(template) = &validated.template
        {
            let next = entry.chapter.saturating_add(1);
            match self.prober.probe_chapter(template, f64::from(next)).await {
                Ok(result) if result.exists() => return EntryOutcome::ProbeHit { next },
                Ok(_) => {
                    tracing::debug!(title = %entry.title, next, "Probe missed, falling back to extraction");
                }
                Err(e) => {
                    tracing::debug!(title = %entry.title, error = %e, "Probe failed, falling back to extraction");
                }
            }
        }

        let html = match self.orchestrator.fetch(&validated.url).await {
            FetchOutcome::Html { html, .. } => html,
            FetchOutcome::Timeout => return EntryOutcome::TimedOut,
            failure => return EntryOutcome::Failed(failure.to_string()),
        };

        let candidate = self.extractor.extract(
            &html,
            Some(&validated.url),
            validated.selector.as_deref(),
            validated.regex.as_ref(),
        );

        match candidate {
            Some(c) if c.value > f64::from(entry.chapter) => EntryOutcome::Advanced {
                found: c.value,
                bumped: bump_target(entry.chapter, c.value).is_some(),
            },
            Some(c) => EntryOutcome::NoChange {
                found: Some(c.value),
            },
            None => EntryOutcome::NoChange { found: None },
        }
    }
}

fn apply_outcome(entry: &mut TrackedSeries, outcome: &EntryOutcome) {
    match outcome {
        EntryOutcome::ProbeHit { .. } => entry.has_new_chapter = true,
        EntryOutcome::Advanced { found, .. } => {
            entry.has_new_chapter = true;
            if let Some(chapter) = bump_target(entry.chapter, *found) {
                entry.chapter = chapter;
            }
        }
        _ => {}
    }
}

fn report_entry<RP: ScanReporter>(reporter: &RP, entry: &TrackedSeries, outcome: &EntryOutcome) {
    let title = entry.title.as_str();
    let event = match outcome {
        EntryOutcome::Skipped => ScanEvent::EntrySkipped { title },
        EntryOutcome::Invalid(error) => ScanEvent::EntryInvalid { title, error },
        EntryOutcome::ProbeHit { next } => ScanEvent::ProbeHit { title, next: *next },
        EntryOutcome::Advanced { found, bumped } => ScanEvent::Advanced {
            title,
            found: *found,
            chapter: entry.chapter,
            bumped: *bumped,
        },
        EntryOutcome::NoChange { found } => ScanEvent::NoChange {
            title,
            found: *found,
        },
        EntryOutcome::Failed(error) => ScanEvent::EntryFailed { title, error },
        EntryOutcome::TimedOut => ScanEvent::EntryTimedOut { title },
        EntryOutcome::Cancelled => ScanEvent::EntryCancelled { title },
    };
    reporter.report(event);
}
