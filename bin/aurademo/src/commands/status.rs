use aurademo_browser::launcher::find_browser_binary;
use aurademo_browser::BrowserEngine;
use aurademo_core::{Config, InMemoryProductRegistry, Paths};

pub async fn run() -> anyhow::Result<()> {
    let paths = Paths::new();

    println!("aurademo status");
    println!("===============");
    println!();

    let config_path = paths.config_file();
    let config_exists = config_path.exists();
    println!(
        "Config:    {} {}",
        config_path.display(),
        if config_exists { "✓" } else { "✗ (not found, using defaults)" }
    );

    let mut config = if config_exists {
        Config::load(&config_path)?
    } else {
        Config::default()
    };
    config.apply_env();

    println!();
    println!("Realtime:");
    let realtime = &config.realtime;
    println!("  endpoint    {}", or_missing(&realtime.endpoint));
    println!("  deployment  {}", or_missing(&realtime.deployment));
    println!("  api version {}", realtime.api_version);
    println!(
        "  api key     {}",
        if realtime.api_key.trim().is_empty() { "✗ not set" } else { "✓ set" }
    );

    println!();
    println!("Browser:");
    let engine = BrowserEngine::from_str(&config.browser.engine);
    let binary = config
        .browser
        .executable
        .clone()
        .or_else(|| find_browser_binary(engine));
    println!("  engine      {}", engine.name());
    match binary {
        Some(path) => println!("  binary      {} ✓", path),
        None => println!("  binary      ✗ not found"),
    }
    println!(
        "  mode        {}",
        if config.browser.headed { "headed" } else { "headless" }
    );
    if !config.browser.allowed_domains.is_empty() {
        println!("  allow-list  {}", config.browser.allowed_domains.join(", "));
    }

    println!();
    println!("Capture interval: {} ms", config.capture.interval_ms);
    println!("Gateway:          {}:{}", config.gateway.host, config.gateway.port);
    let registry = InMemoryProductRegistry::new(config.products.clone());
    if registry.is_empty() {
        println!("Products:         none (generic instructions)");
    } else {
        println!("Products:         {}", registry.len());
    }

    println!();
    match config.validate() {
        Ok(()) => println!("Ready."),
        Err(e) => println!("⚠ {}", e),
    }

    Ok(())
}

fn or_missing(value: &str) -> &str {
    if value.trim().is_empty() {
        "✗ not set"
    } else {
        value
    }
}
