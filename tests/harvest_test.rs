// End-to-end harvest runs against a mocked forecast site
// Uses mockito for HTTP mocking

use std::sync::Mutex;

use weather_harvest_service::db::{DbError, SnapshotStore, WeatherRecord};
use weather_harvest_service::fetcher::ForecastFetcher;
use weather_harvest_service::pipeline::SnapshotCommitter;
use weather_harvest_service::services::HarvestService;

#[derive(Default)]
struct MemoryStore {
    records: Mutex<Vec<WeatherRecord>>,
    commits: Mutex<usize>,
}

impl SnapshotStore for MemoryStore {
    async fn clear_all(&self) -> Result<u64, DbError> {
        *self.commits.lock().unwrap() += 1;
        let mut records = self.records.lock().unwrap();
        let cleared = records.len() as u64;
        records.clear();
        Ok(cleared)
    }

    async fn insert_many(&self, records: &[WeatherRecord]) -> Result<usize, DbError> {
        self.records.lock().unwrap().extend_from_slice(records);
        Ok(records.len())
    }
}

fn forecast_row(location: &str, condition: &str, temps: (&str, &str), humidity: (&str, &str), wind: &str) -> String {
    format!(
        r#"<div class="row-1">
            <section class="grid grid-template-columns-1 no-border align-left">
              <div><font><b>{location}</b></font></div>
            </section>
            <section class="grid grid-template-columns-2-minmax no-border align-left">
              <div><font>{condition}</font></div>
            </section>
            <section class="grid grid-template-columns-4">
              <div><font>{}</font></div><div><font>min</font></div>
              <div><font>{}</font></div><div><font>max</font></div>
              <div><font>{}</font></div><div><font>{}</font></div>
            </section>
            <section class="grid grid-template-columns-2">
              <div><font>Vento</font></div><div><font>{wind}</font></div>
            </section>
          </div>"#,
        temps.0, temps.1, humidity.1, humidity.0,
    )
}

fn forecast_page(rows: &[String]) -> String {
    format!("<html><body>{}</body></html>", rows.concat())
}

/// Mock forecast site: two good cities, one maintenance page without any
/// forecast, and a code the site does not know.
async fn start_forecast_server() -> mockito::ServerGuard {
    let mut server = mockito::Server::new_async().await;

    server
        .mock("GET", "/4205407")
        .with_status(200)
        .with_header("content-type", "text/html; charset=utf-8")
        .with_body(forecast_page(&[
            forecast_row("Florianópolis,SC-15-03", "Ensolarado:", ("18°C", "24°C"), ("60%", "80%"), "10km/h"),
            forecast_row("Florianópolis,SC-16-03", "Chuvoso:", ("19°C", "26°C"), ("70%", "90%"), "15km/h"),
        ]))
        .create_async()
        .await;

    server
        .mock("GET", "/4106902")
        .with_status(200)
        .with_header("content-type", "text/html; charset=utf-8")
        .with_body(forecast_page(&[
            forecast_row("Curitiba,PR-15-03", "Nublado:", ("12°C", "19°C"), ("65%", "85%"), "8km/h"),
            forecast_row("Curitiba", "Nublado:", ("12°C", "19°C"), ("65%", "85%"), "8km/h"),
        ]))
        .create_async()
        .await;

    server
        .mock("GET", "/0000000")
        .with_status(200)
        .with_body("<html><body><p>Manutenção</p></body></html>")
        .create_async()
        .await;

    // 4xx is not retried, so failing cities stay fast
    server
        .mock("GET", "/9999999")
        .with_status(404)
        .create_async()
        .await;

    server
}

fn harvest(base_url: &str, codes: &[&str], store: MemoryStore) -> HarvestService<MemoryStore> {
    HarvestService::new(
        ForecastFetcher::new(base_url.to_string()),
        SnapshotCommitter::new(store),
        codes.iter().map(|code| code.to_string()).collect(),
        2,
    )
}

#[tokio::test]
async fn test_run_once_commits_normalized_records() {
    let server = start_forecast_server().await;
    let base_url = server.url();
    let service = harvest(&base_url, &["4205407", "4106902"], MemoryStore::default());

    let report = service.run_once().await.expect("harvest should commit");

    assert_eq!(report.cities_fetched, 2);
    assert_eq!(report.cities_failed, 0);
    assert_eq!(report.records_staged, 3);
    assert_eq!(report.sections_dropped, 1);
    assert_eq!(report.records_committed, Some(3));

    let (fetched, report_again) = service.collect().await;
    assert_eq!(report_again.records_staged, 3);
    let records = fetched.into_records();
    assert_eq!(
        records[0],
        WeatherRecord {
            city: "Florianópolis".to_string(),
            date: "15-03".to_string(),
            condition: "Ensolarado".to_string(),
            temperature: "21°C".to_string(),
            humidity: "70%".to_string(),
            wind: "10km/h".to_string(),
        }
    );
    // City order follows the configured code order
    let cities: Vec<&str> = records.iter().map(|r| r.city.as_str()).collect();
    assert_eq!(cities, vec!["Florianópolis", "Florianópolis", "Curitiba"]);
}

#[tokio::test]
async fn test_failing_city_does_not_block_others() {
    let server = start_forecast_server().await;
    let base_url = server.url();
    let service = harvest(
        &base_url,
        &["9999999", "4205407", "0000000"],
        MemoryStore::default(),
    );

    let report = service.run_once().await.unwrap();

    assert_eq!(report.cities_fetched, 1);
    assert_eq!(report.cities_failed, 2);
    assert_eq!(report.records_committed, Some(2));
}

#[tokio::test]
async fn test_empty_harvest_keeps_previous_snapshot() {
    let server = start_forecast_server().await;
    let base_url = server.url();
    let previous = WeatherRecord {
        city: "Curitiba".to_string(),
        date: "14-03".to_string(),
        condition: "Nublado".to_string(),
        temperature: "15°C".to_string(),
        humidity: "75%".to_string(),
        wind: "8km/h".to_string(),
    };
    let store = MemoryStore::default();
    store.records.lock().unwrap().push(previous.clone());
    let committer = SnapshotCommitter::new(store);
    let service = HarvestService::new(
        ForecastFetcher::new(base_url),
        committer.clone(),
        vec!["9999999".to_string(), "0000000".to_string()],
        2,
    );

    let report = service.run_once().await.unwrap();

    assert_eq!(report.cities_failed, 2);
    assert_eq!(report.records_committed, None);
    assert_eq!(*committer.store().records.lock().unwrap(), vec![previous]);
    assert_eq!(*committer.store().commits.lock().unwrap(), 0);
}

#[tokio::test]
async fn test_second_run_replaces_first() {
    let server = start_forecast_server().await;
    let base_url = server.url();
    let committer = SnapshotCommitter::new(MemoryStore::default());
    let florianopolis = HarvestService::new(
        ForecastFetcher::new(base_url.clone()),
        committer.clone(),
        vec!["4205407".to_string()],
        1,
    );
    let curitiba = HarvestService::new(
        ForecastFetcher::new(base_url),
        committer.clone(),
        vec!["4106902".to_string()],
        1,
    );

    florianopolis.run_once().await.unwrap();
    curitiba.run_once().await.unwrap();

    let stored = committer.store().records.lock().unwrap().clone();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].city, "Curitiba");
    assert_eq!(*committer.store().commits.lock().unwrap(), 2);
}
