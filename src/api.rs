use axum::{
    extract::{Path, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::db::WeatherRecord;
use crate::rate_limit::{DailyRateLimiter, RateDecision};
use crate::services::{AuthError, AuthService, Registration, WeatherService};

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Clone)]
pub struct AppState {
    pub weather_service: WeatherService,
    pub auth_service: AuthService,
    pub rate_limiter: DailyRateLimiter,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Serialize)]
pub struct RegistrationForm {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct ApiKeyResponse {
    #[serde(rename = "x-api-key")]
    pub api_key: String,
}

pub fn create_router(state: AppState) -> Router {
    let weather_routes = Router::new()
        .route("/weather", get(get_default_forecast))
        .route("/weather/city/{city}", get(get_city_forecast))
        .route("/weather/city/{city}/week", get(get_city_week))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    let api_routes = Router::new()
        .route("/health", get(health))
        .route("/register/form", get(registration_form))
        .route("/register", post(register))
        .route("/login", get(login))
        .merge(weather_routes)
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}

fn message(status: StatusCode, text: impl Into<String>) -> Response {
    (status, Json(MessageResponse { message: text.into() })).into_response()
}

/// Reject requests without a known API key, then count them against the
/// key's daily quota.
async fn require_api_key(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(api_key) = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
    else {
        debug!("Request without API key");
        return message(StatusCode::UNAUTHORIZED, "API key was not included");
    };

    match state.auth_service.authenticate_key(&api_key).await {
        Ok(Some(_user)) => {}
        Ok(None) => {
            warn!("Rejected unknown API key");
            return message(StatusCode::UNAUTHORIZED, "API key is invalid");
        }
        Err(e) => {
            error!("Failed to validate API key: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    if state.rate_limiter.check(&api_key, Utc::now().date_naive()) == RateDecision::Exceeded {
        warn!("Daily request limit reached for API key");
        return message(
            StatusCode::TOO_MANY_REQUESTS,
            format!("Limit of {} requests per day exceeded", state.rate_limiter.limit()),
        );
    }

    next.run(request).await
}

#[instrument(skip(_state))]
async fn health(State(_state): State<AppState>) -> impl IntoResponse {
    debug!("Health check requested");
    let response = HealthResponse {
        status: "healthy".to_string(),
    };
    (StatusCode::OK, Json(response))
}

async fn registration_form() -> Json<RegistrationForm> {
    Json(RegistrationForm {
        name: "Your name".to_string(),
        email: "Your email".to_string(),
        password: "Your password".to_string(),
    })
}

#[instrument(skip(state, registration))]
async fn register(
    State(state): State<AppState>,
    Json(registration): Json<Registration>,
) -> Response {
    match state.auth_service.register(registration).await {
        Ok(user) => {
            info!("Registered user {}", user.name);
            message(StatusCode::CREATED, "Registration completed")
        }
        Err(AuthError::MissingField) => {
            message(StatusCode::BAD_REQUEST, AuthError::MissingField.to_string())
        }
        Err(AuthError::AlreadyRegistered) => message(
            StatusCode::BAD_REQUEST,
            "Name or email already registered, choose another",
        ),
        Err(e) => {
            error!("Registration failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Decode `Authorization: Basic base64(name:password)`
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (name, password) = decoded.split_once(':')?;
    if name.is_empty() || password.is_empty() {
        return None;
    }
    Some((name.to_string(), password.to_string()))
}

fn login_required() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, r#"Basic realm="Login required""#)],
        "Invalid login",
    )
        .into_response()
}

#[instrument(skip(state, headers))]
async fn login(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some((name, password)) = basic_credentials(&headers) else {
        return login_required();
    };

    match state.auth_service.login(&name, &password).await {
        Ok(api_key) => (StatusCode::OK, Json(ApiKeyResponse { api_key })).into_response(),
        Err(AuthError::InvalidCredentials) => {
            warn!("Failed login for {}", name);
            login_required()
        }
        Err(e) => {
            error!("Login failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[instrument(skip(state))]
async fn get_default_forecast(
    State(state): State<AppState>,
) -> Result<Json<WeatherRecord>, StatusCode> {
    let city = state.weather_service.default_city().to_string();
    debug!("Fetching forecast for default city {}", city);

    let record = state
        .weather_service
        .get_default_forecast()
        .await
        .map_err(|e| {
            error!("Failed to fetch forecast for {}: {}", city, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or_else(|| {
            warn!("No forecast held for {}", city);
            StatusCode::NOT_FOUND
        })?;

    Ok(Json(record))
}

#[instrument(skip(state), fields(city = %city))]
async fn get_city_forecast(
    State(state): State<AppState>,
    Path(city): Path<String>,
) -> Result<Json<WeatherRecord>, StatusCode> {
    debug!("Fetching forecast for {}", city);

    let record = state
        .weather_service
        .get_city_forecast(&city)
        .await
        .map_err(|e| {
            error!("Failed to fetch forecast for {}: {}", city, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or_else(|| {
            warn!("No forecast held for {}", city);
            StatusCode::NOT_FOUND
        })?;

    info!("Retrieved forecast for {} on {}", record.city, record.date);
    Ok(Json(record))
}

#[instrument(skip(state), fields(city = %city))]
async fn get_city_week(
    State(state): State<AppState>,
    Path(city): Path<String>,
) -> Result<Json<Vec<WeatherRecord>>, StatusCode> {
    debug!("Fetching forecast week for {}", city);

    let records = state
        .weather_service
        .get_city_week(&city)
        .await
        .map_err(|e| {
            error!("Failed to fetch forecast week for {}: {}", city, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    if records.is_empty() {
        warn!("No forecast held for {}", city);
        return Err(StatusCode::NOT_FOUND);
    }

    info!("Retrieved {} forecast days for {}", records.len(), city);
    Ok(Json(records))
}
