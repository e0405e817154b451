pub mod run;
pub mod serve;
pub mod status;

use aurademo_browser::ChromeBackend;
use aurademo_core::{Config, Paths};
use std::sync::Arc;

/// Config file, then environment, then validation. Any failure is fatal.
pub fn load_config(paths: &Paths) -> anyhow::Result<Config> {
    let mut config = Config::load_or_default(paths)?;
    config.apply_env();
    config.validate()?;
    Ok(config)
}

/// A browser backend with its own profile directory.
pub fn browser_backend(config: &Config, paths: &Paths, profile_key: &str) -> Arc<ChromeBackend> {
    Arc::new(ChromeBackend::new(
        config.browser.clone(),
        paths.browser_profile_dir(profile_key),
    ))
}
