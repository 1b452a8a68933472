//! Configuration: application settings, model profiles, platform cookies
//! and the engine settings derived from them.

mod app;
mod credentials;
mod engine;
mod models;

pub use app::AppConfig;
pub use credentials::SourceCredentials;
pub use engine::EngineConfig;
pub use models::{ModelCatalog, ModelProfile};
