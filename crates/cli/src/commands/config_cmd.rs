//! `coact config`: show the effective configuration.

use anyhow::Context;
use coact_config::AppConfig;

pub fn show() -> anyhow::Result<()> {
    let config = AppConfig::load().context("Failed to load config")?;
    let mut shown = config.clone();
    if shown.api_key.is_some() {
        shown.api_key = Some("[REDACTED]".into());
    }

    println!("{}", shown.to_toml()?);
    if config.categories.is_empty() {
        println!("# categories: built-in catalog (see `coact catalog`)");
    }
    println!("# model in effect: {}", config.effective_model());
    Ok(())
}

pub fn path() {
    println!("{}", AppConfig::config_path().display());
}
