pub mod config;
pub mod database;
pub mod host_repository;
pub mod series_repository;

pub use config::StoreConfig;
pub use database::Database;
pub use host_repository::HostRepository;
pub use series_repository::SeriesRepository;
