pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod startup;

pub use api::{router, AppState};
pub use config::ServiceConfig;
pub use error::{ApiError, ApiResult};
pub use startup::App;
