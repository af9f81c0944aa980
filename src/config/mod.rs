pub mod settings;

pub use settings::*;

use config::{Config, Environment, File};

use crate::error::AppError;

/// Layered load: compiled defaults, then `config.toml` if present, then
/// `BOT_`-prefixed environment variables, following the precedence the
/// teacher's runtime config used (file over defaults, env over file).
pub fn load_settings(config_path: &str) -> Result<Settings, AppError> {
    let _ = dotenvy::dotenv();

    let builder = Config::builder()
        .add_source(Config::try_from(&Settings::default()).map_err(|e| AppError::Config(e.to_string()))?)
        .add_source(File::with_name(config_path).required(false))
        .add_source(Environment::with_prefix("BOT").separator("__"));

    let settings: Settings = builder
        .build()
        .map_err(|e| AppError::Config(e.to_string()))?
        .try_deserialize()
        .map_err(|e| AppError::Config(e.to_string()))?;

    settings
        .validate()
        .map_err(|errors| AppError::Config(errors.join("; ")))?;

    Ok(settings)
}
