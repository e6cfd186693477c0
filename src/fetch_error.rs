#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Forecast page returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("Failed to parse HTML data")]
    ParseError,
    #[error("Forecast section '{section}' is missing {field}")]
    MissingField {
        section: String,
        field: &'static str,
    },
}
