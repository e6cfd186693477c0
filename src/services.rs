pub mod auth_service;
pub mod harvest_service;
pub mod weather_service;

pub use auth_service::{AuthError, AuthService, Registration};
pub use harvest_service::{HarvestReport, HarvestService};
pub use weather_service::WeatherService;
