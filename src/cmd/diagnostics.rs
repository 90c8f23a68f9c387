//! Diagnostics command — dumps resolved configuration and connectivity
//! for support purposes, in the same `println!`-driven report shape as
//! `src/main.rs`'s `Commands::Info` arm. Skips the host/OS/GPU inventory
//! that arm prints (`sysinfo`, `nvml-wrapper`), since this daemon's
//! interesting state is its Docker/cloud connectivity and fleet, not the
//! host it happens to run on.

use anyhow::{Context, Result};
use bollard::Docker;

use plz_controller::config::Configuration;

pub async fn run(config_path: &str) -> Result<()> {
    println!("plz controller diagnostics");
    println!("==========================\n");

    let config = Configuration::load(config_path).context("failed to load configuration")?;

    println!("Configuration:");
    println!("  api:       {}:{} (ssl={})", config.api.host, config.api.port, config.api.ssl.enabled);
    println!("  images:    provider={:?} repository={}", config.images.provider, config.images.repository);
    println!("  instances: provider={:?}", config.instances.provider);
    println!("  results:   {}", config.results.directory.display());
    println!("  db:        {}", config.db.url);

    println!("\nDocker connectivity:");
    match Docker::connect_with_http(&config.images.docker_host, 10, bollard::API_DEFAULT_VERSION) {
        Ok(docker) => match docker.version().await {
            Ok(version) => {
                println!("  connected to {}", config.images.docker_host);
                println!("  version: {}", version.version.unwrap_or_default());
                println!("  api version: {}", version.api_version.unwrap_or_default());
            }
            Err(e) => println!("  connected but version check failed: {}", e),
        },
        Err(e) => println!("  could not connect to {}: {}", config.images.docker_host, e),
    }

    println!("\nDiagnostics complete.");
    Ok(())
}
