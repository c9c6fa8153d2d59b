mod common;
mod database_tests;
mod host_tests;
mod series_tests;
