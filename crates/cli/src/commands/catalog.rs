//! `coact catalog`: print the guidance the agent receives.

use anyhow::Context;
use coact_agent::advisor;
use coact_config::AppConfig;

pub fn run() -> anyhow::Result<()> {
    let config = AppConfig::load().context("Failed to load config")?;
    let registry = config.category_registry()?;
    let tools = coact_tools::default_registry();

    println!(
        "{}",
        advisor::build_system_prompt(&registry, &tools, &config.engine.done_category)
    );
    Ok(())
}
