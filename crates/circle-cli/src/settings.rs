use std::path::Path;

use circle_engine::LifecycleSettings;
use config::{Config, ConfigError, Environment, File};

/// Load lifecycle settings.
///
/// Sources, later ones overriding earlier ones:
///
/// 1. built-in defaults
/// 2. `circles.toml` in the working directory, if present, or the file given
///    with `--config` (which must exist)
/// 3. `CIRCLES_*` environment variables, e.g. `CIRCLES_EDIT_LOCK_HOURS=24`
pub fn load(path: Option<&Path>) -> Result<LifecycleSettings, ConfigError> {
    let file = match path {
        Some(path) => File::from(path).required(true),
        None => File::with_name("circles").required(false),
    };

    let settings = Config::builder()
        .add_source(file)
        .add_source(Environment::with_prefix("CIRCLES").try_parsing(true))
        .build()?;

    settings.try_deserialize()
}
