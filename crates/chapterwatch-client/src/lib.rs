#[cfg(feature = "browser")]
pub mod browser;
pub mod extract;
pub mod metadata;
pub mod transport;

#[cfg(feature = "browser")]
pub use browser::{BrowserRenderer, BrowserSettings};
pub use extract::{ScraperChapterExtractor, is_same_series_chapter_link, resolve_chapter_link};
pub use metadata::{MetadataExtractor, MetadataHit};
pub use transport::ReqwestTransport;
