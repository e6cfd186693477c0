pub mod api;
pub mod app;
pub mod config;
pub mod db;
pub mod fetch_error;
pub mod fetcher;
pub mod pipeline;
pub mod rate_limit;
pub mod scheduler;
pub mod services;
