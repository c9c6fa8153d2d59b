pub mod challenge;
pub mod config;
pub mod error;
pub mod grammar;
pub mod host_strategy;
pub mod models;
pub mod orchestrator;
pub mod prober;
pub mod scanner;
pub mod template;
pub mod testutil;
pub mod throttle;
pub mod traits;
pub mod util;

pub use challenge::{ChallengeSignal, Classification, classify};
pub use config::{FetchConfig, ScanConfig};
pub use error::AppError;
pub use grammar::{ParsedNumber, RuleKind, parse_chapter_number, parse_chapter_number_strict};
pub use host_strategy::HostStrategyStore;
pub use models::{
    CandidateOrigin, ChapterCandidate, FetchOutcome, FetchTier, HostStrategy, TrackedSeries,
    ValidatedSeries,
};
pub use orchestrator::FetchOrchestrator;
pub use prober::{ProbeResult, Prober};
pub use scanner::{
    EntryOutcome, EntryReport, ScanEvent, ScanReport, ScanReporter, TracingScanReporter,
    UpdateScanner,
};
pub use template::ChapterTemplate;
pub use throttle::{HostThrottle, ThrottleConfig};
pub use traits::{
    ChapterExtractor, CookieRecord, HostListStore, HttpMethod, HttpRequest, HttpResponse,
    HttpTransport, NoRenderer, NullHostList, RenderFallback, SeriesStore,
};
pub use util::{normalize_host, normalize_url};
