use std::env;
use std::fs;

use chrono::TimeDelta;

use crate::scheduler::{ActiveWindow, ScheduleError, SchedulePolicy};

/// IBGE codes harvested when no list is configured: São Paulo,
/// Florianópolis, Curitiba and Rio de Janeiro.
pub const DEFAULT_CITY_CODES: [&str; 4] = ["3550308", "4205407", "4106902", "3304557"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    Missing(#[from] env::VarError),
    #[error("Failed to read city code file {path}: {source}")]
    CityCodeFile {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid schedule configuration: {0}")]
    Schedule(#[from] ScheduleError),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,
    pub forecast_base_url: String,
    pub city_codes: Vec<String>,
    pub window_start_hour: u32,
    pub window_end_hour: u32,
    pub hourly_interval_minutes: i64,
    pub tick_seconds: i64,
    pub safety_margin_seconds: i64,
    pub fetch_concurrency: usize,
    pub default_city: String,
    pub daily_request_limit: u32,
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

/// Split a `;`-separated code list, ignoring blanks and surrounding whitespace.
pub fn parse_city_codes(raw: &str) -> Vec<String> {
    raw.split(';')
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Config {
            database_url: env::var("DATABASE_URL")?,
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: parse_or("SERVER_PORT", 8080),
            forecast_base_url: env::var("FORECAST_BASE_URL")
                .unwrap_or_else(|_| "https://previsao.inmet.gov.br".to_string()),
            city_codes: Self::city_codes_from_env()?,
            window_start_hour: parse_or("WINDOW_START_HOUR", 7),
            window_end_hour: parse_or("WINDOW_END_HOUR", 20),
            hourly_interval_minutes: parse_or("HOURLY_INTERVAL_MINUTES", 60),
            tick_seconds: parse_or("TICK_SECONDS", 1),
            safety_margin_seconds: parse_or("SAFETY_MARGIN_SECONDS", 180),
            fetch_concurrency: parse_or("FETCH_CONCURRENCY", 4),
            default_city: env::var("DEFAULT_CITY").unwrap_or_else(|_| "Florianópolis".to_string()),
            daily_request_limit: parse_or("DAILY_REQUEST_LIMIT", 200),
        })
    }

    /// `CITY_CODES` wins over `CITY_CODES_FILE`; both fall back to the
    /// built-in capitals when unset or empty.
    fn city_codes_from_env() -> Result<Vec<String>, ConfigError> {
        let codes = if let Ok(inline) = env::var("CITY_CODES") {
            parse_city_codes(&inline)
        } else if let Ok(path) = env::var("CITY_CODES_FILE") {
            let contents = fs::read_to_string(&path)
                .map_err(|source| ConfigError::CityCodeFile { path, source })?;
            parse_city_codes(&contents)
        } else {
            Vec::new()
        };

        if codes.is_empty() {
            Ok(DEFAULT_CITY_CODES.iter().map(|code| code.to_string()).collect())
        } else {
            Ok(codes)
        }
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    pub fn schedule_policy(&self) -> Result<SchedulePolicy, ConfigError> {
        let window = ActiveWindow::new(self.window_start_hour, self.window_end_hour)?;
        let hourly_interval = TimeDelta::try_minutes(self.hourly_interval_minutes)
            .ok_or(ScheduleError::OutOfRange("hourly interval"))?;
        let tick = TimeDelta::try_seconds(self.tick_seconds)
            .ok_or(ScheduleError::OutOfRange("tick"))?;
        let safety_margin = TimeDelta::try_seconds(self.safety_margin_seconds)
            .ok_or(ScheduleError::OutOfRange("safety margin"))?;

        Ok(SchedulePolicy::new(window, hourly_interval, tick, safety_margin)?)
    }
}
