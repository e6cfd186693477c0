use sqlx::PgPool;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::api::{create_router, AppState};
use crate::config::Config;
use crate::db::{SnapshotRepository, UserRepository};
use crate::fetcher::ForecastFetcher;
use crate::pipeline::SnapshotCommitter;
use crate::rate_limit::DailyRateLimiter;
use crate::scheduler::{LocalClock, Orchestrator, TaskLauncher};
use crate::services::{AuthService, HarvestService, WeatherService};

/// Application with all spawned background tasks and server
pub struct Application {
    pub server_handle: JoinHandle<Result<(), std::io::Error>>,
    pub orchestrator_handle: JoinHandle<()>,
}

impl Application {
    /// Build and initialize the application
    ///
    /// This creates all services, repositories and the fetcher, and spawns:
    /// - HTTP API server (Axum)
    /// - Harvest orchestrator (daily outside the active window, hourly inside)
    pub async fn build(config: Config, pool: PgPool) -> Result<Self, Box<dyn std::error::Error>> {
        info!("Initializing application components");

        let policy = config.schedule_policy()?;

        // Create repositories
        let snapshot_repo = SnapshotRepository::new(pool.clone());
        let user_repo = UserRepository::new(pool.clone());

        // Create services
        let harvest_service = HarvestService::new(
            ForecastFetcher::new(config.forecast_base_url.clone()),
            SnapshotCommitter::new(snapshot_repo.clone()),
            config.city_codes.clone(),
            config.fetch_concurrency,
        );
        let weather_service = WeatherService::new(snapshot_repo, config.default_city.clone());
        let auth_service = AuthService::new(user_repo);

        info!(
            "Harvesting {} city pages from {}",
            harvest_service.city_codes().len(),
            config.forecast_base_url
        );

        // Orchestrator: launches one detached harvest task per fired job
        let orchestrator_handle = {
            let launcher = TaskLauncher::new("weather-harvest", move || {
                let harvest_service = harvest_service.clone();
                async move {
                    if let Err(e) = harvest_service.run_once().await {
                        error!("Harvest run failed: {}", e);
                    }
                }
            });
            let orchestrator = Orchestrator::new(policy, launcher, LocalClock);

            tokio::spawn(orchestrator.run())
        };

        // Create API router
        let app_state = AppState {
            weather_service,
            auth_service,
            rate_limiter: DailyRateLimiter::new(config.daily_request_limit),
        };
        let app = create_router(app_state).layer(TraceLayer::new_for_http());

        // Spawn server
        let addr = config.server_addr();
        info!("Starting HTTP server on {}", addr);

        let server_handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            axum::serve(listener, app).await
        });

        info!("Application initialized successfully");

        Ok(Self {
            server_handle,
            orchestrator_handle,
        })
    }

    /// Run until the server stops (which runs indefinitely unless error)
    pub async fn run_until_stopped(self) -> Result<(), Box<dyn std::error::Error>> {
        self.server_handle.await??;
        Ok(())
    }
}
