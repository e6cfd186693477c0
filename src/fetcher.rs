use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument, warn};

use crate::fetch_error::FetchError;

// Headline blocks (today and tomorrow) share one four-column grid of values
// and one wind list; each block owns a fixed stride of cells in them.
const HEADLINE_SECTIONS: usize = 2;
const GRID_STRIDE: usize = 6;
const HEADLINE_WIND_OFFSET: usize = 3;

const LOCATION_HEADLINE: &str =
    r#"section[class="grid grid-template-columns-2 no-border align-left"] > div > font > b"#;
const CONDITION_HEADLINE: &str =
    r#"div[class="grid grid-template-columns-2-minmax no-border"] font"#;
const GRID_VALUES: &str = r#"section[class="grid grid-template-columns-4"] > div > font"#;
const WIND_HEADLINE: &str =
    r#"div.item section[class="grid grid-template-columns-2 no-border"] > div.item > font"#;
const ROW_BLOCK: &str = r#"div[class^="row-"]"#;
const LOCATION_ROW: &str =
    r#"section[class="grid grid-template-columns-1 no-border align-left"] > div > font > b"#;
const CONDITION_ROW: &str =
    r#"section[class="grid grid-template-columns-2-minmax no-border align-left"] > div > font"#;
const WIND_ROW: &str = r#"section[class="grid grid-template-columns-2"] > div > font"#;

/// One unparsed forecast section for a single location and day, exactly as
/// extracted from the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawObservation {
    pub location_and_date: String,
    pub condition: String,
    pub temp_min: String,
    pub temp_max: String,
    pub humidity_min: String,
    pub humidity_max: String,
    pub wind: String,
}

#[derive(Clone)]
pub struct ForecastFetcher {
    client: reqwest::Client,
    base_url: String,
}

fn selector(css: &str) -> Result<Selector, FetchError> {
    Selector::parse(css).map_err(|e| {
        error!("Invalid selector '{}': {}", css, e);
        FetchError::ParseError
    })
}

fn texts(scope: ElementRef<'_>, selector: &Selector) -> Vec<String> {
    scope
        .select(selector)
        .map(|element| element.text().collect::<String>().trim().to_string())
        .collect()
}

fn pick(
    values: &[String],
    index: usize,
    section: &str,
    field: &'static str,
) -> Result<String, FetchError> {
    values
        .get(index)
        .filter(|value| !value.is_empty())
        .cloned()
        .ok_or_else(|| FetchError::MissingField {
            section: section.to_string(),
            field,
        })
}

impl ForecastFetcher {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    pub fn page_url(&self, city_code: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), city_code)
    }

    #[instrument(skip(self), fields(city_code = %city_code))]
    pub async fn fetch_observations(&self, city_code: &str) -> Result<Vec<RawObservation>, FetchError> {
        let url = self.page_url(city_code);

        let html = (|| self.fetch_page(&url))
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(Duration::from_secs(1))
                    .with_max_delay(Duration::from_secs(10))
                    .with_max_times(3),
            )
            .when(|e| match e {
                FetchError::Request(_) => true,
                FetchError::Status(status) => status.is_server_error(),
                _ => false,
            })
            .notify(|e, delay| {
                warn!("Fetching {} failed ({}), retrying in {:?}", url, e, delay);
            })
            .await?;

        self.parse_html(&html)
    }

    async fn fetch_page(&self, url: &str) -> Result<String, FetchError> {
        debug!("Sending HTTP request to {}", url);
        let response = self.client.get(url).send().await?;
        let status = response.status();
        debug!("Received HTTP response with status: {}", status);

        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let html = response.text().await?;
        debug!("Retrieved HTML content, size: {} bytes", html.len());
        Ok(html)
    }

    /// Extract every forecast section from a rendered page. Sections missing
    /// part of their structure are skipped; a page with no sections at all is
    /// a parse error.
    #[instrument(skip(self, html), fields(html_size = html.len()))]
    pub fn parse_html(&self, html: &str) -> Result<Vec<RawObservation>, FetchError> {
        let document = Html::parse_document(html);
        let root = document.root_element();

        let mut sections = Vec::new();
        let mut skipped = 0;

        let location_headline = selector(LOCATION_HEADLINE)?;
        let grid_values = selector(GRID_VALUES)?;
        let wind_headline = selector(WIND_HEADLINE)?;
        let headline_locations = texts(root, &location_headline);
        let headline_grid = texts(root, &grid_values);
        let headline_wind = texts(root, &wind_headline);

        for index in 0..HEADLINE_SECTIONS.min(headline_locations.len()) {
            let block = format!("row-{}", index + 1);
            let condition_scope = selector(&format!("section#{}", block))?;
            let conditions = selector(CONDITION_HEADLINE)?;
            let condition_texts: Vec<String> = root
                .select(&condition_scope)
                .flat_map(|scope| texts(scope, &conditions))
                .collect();

            let offset = index * GRID_STRIDE;
            let observation = (|| {
                Ok::<_, FetchError>(RawObservation {
                    location_and_date: pick(&headline_locations, index, &block, "location")?,
                    condition: pick(&condition_texts, 1, &block, "condition")?,
                    temp_min: pick(&headline_grid, offset, &block, "minimum temperature")?,
                    temp_max: pick(&headline_grid, offset + 2, &block, "maximum temperature")?,
                    humidity_min: pick(&headline_grid, offset + 5, &block, "minimum humidity")?,
                    humidity_max: pick(&headline_grid, offset + 4, &block, "maximum humidity")?,
                    wind: pick(&headline_wind, offset + HEADLINE_WIND_OFFSET, &block, "wind")?,
                })
            })();

            match observation {
                Ok(observation) => sections.push(observation),
                Err(e) => {
                    warn!("Skipping forecast section: {}", e);
                    skipped += 1;
                }
            }
        }

        let row_block = selector(ROW_BLOCK)?;
        let location_row = selector(LOCATION_ROW)?;
        let condition_row = selector(CONDITION_ROW)?;
        let wind_row = selector(WIND_ROW)?;

        for row in document.select(&row_block) {
            let block = row.value().attr("class").unwrap_or("row").to_string();
            let grid = texts(row, &grid_values);

            let observation = (|| {
                Ok::<_, FetchError>(RawObservation {
                    location_and_date: pick(&texts(row, &location_row), 0, &block, "location")?,
                    condition: pick(&texts(row, &condition_row), 0, &block, "condition")?,
                    temp_min: pick(&grid, 0, &block, "minimum temperature")?,
                    temp_max: pick(&grid, 2, &block, "maximum temperature")?,
                    humidity_min: pick(&grid, 5, &block, "minimum humidity")?,
                    humidity_max: pick(&grid, 4, &block, "maximum humidity")?,
                    wind: pick(&texts(row, &wind_row), 1, &block, "wind")?,
                })
            })();

            match observation {
                Ok(observation) => sections.push(observation),
                Err(e) => {
                    warn!("Skipping forecast section: {}", e);
                    skipped += 1;
                }
            }
        }

        if sections.is_empty() && skipped == 0 {
            error!("No forecast sections found in HTML");
            debug!(
                "HTML preview (first 500 chars): {}",
                html.chars().take(500).collect::<String>()
            );
            return Err(FetchError::ParseError);
        }

        if skipped > 0 {
            warn!("Skipped {} incomplete forecast sections", skipped);
        }
        debug!("Extracted {} forecast sections", sections.len());

        Ok(sections)
    }
}
