//! CLI command implementations

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::Context;
use clap::Subcommand;
use mediarelay_core::config::RelayConfig;
use mediarelay_core::simulation::{
    InMemoryClient, LibraryResolver, MediaLibrary, SIMULATED_CHAT_ID, SimulatedFaults,
};
use mediarelay_core::{MediaClient, MediaRelay, MetadataResolver};
use mediarelay_web::run_server;

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Serve a simulated media library over HTTP
    Serve {
        /// Host to bind to (defaults to the configured bind address)
        #[arg(long)]
        host: Option<IpAddr>,
        /// Port to bind to (defaults to the configured bind address)
        #[arg(short, long)]
        port: Option<u16>,
        /// Number of backend client handles to balance over
        #[arg(short, long, default_value = "2")]
        workers: usize,
        /// Number of simulated files
        #[arg(long)]
        files: Option<usize>,
        /// Size of each simulated file in bytes
        #[arg(long)]
        file_size: Option<usize>,
        /// Seed for the simulated file contents
        #[arg(long)]
        seed: Option<u64>,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns the error of the command that failed
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Serve {
            host,
            port,
            workers,
            files,
            file_size,
            seed,
        } => {
            let mut config = RelayConfig::from_env();
            apply_overrides(&mut config, host, port, files, file_size, seed);
            serve(config, workers).await
        }
    }
}

fn apply_overrides(
    config: &mut RelayConfig,
    host: Option<IpAddr>,
    port: Option<u16>,
    files: Option<usize>,
    file_size: Option<usize>,
    seed: Option<u64>,
) {
    let bind = config.server.bind_address;
    config.server.bind_address = SocketAddr::new(
        host.unwrap_or_else(|| bind.ip()),
        port.unwrap_or_else(|| bind.port()),
    );

    if let Some(files) = files {
        config.simulation.file_count = files;
    }
    if let Some(file_size) = file_size {
        config.simulation.file_size = file_size;
    }
    if seed.is_some() {
        config.simulation.deterministic_seed = seed;
    }
}

/// Start the relay server against a generated library
///
/// # Errors
/// - Invalid configuration, zero workers, or the server failing to bind
pub async fn serve(config: RelayConfig, workers: usize) -> anyhow::Result<()> {
    anyhow::ensure!(workers > 0, "at least one worker is required");

    let library = Arc::new(MediaLibrary::generate(&config.simulation));
    let faults = SimulatedFaults {
        fetch_latency: config.simulation.fetch_latency,
        ..Default::default()
    };

    let clients: Vec<Arc<dyn MediaClient>> = (0..workers)
        .map(|_| {
            Arc::new(
                InMemoryClient::new(Arc::clone(&library), config.simulation.home_dc)
                    .with_faults(faults.clone()),
            ) as Arc<dyn MediaClient>
        })
        .collect();
    let resolver: Arc<dyn MetadataResolver> = Arc::new(LibraryResolver::new(Arc::clone(&library)));

    let relay = Arc::new(
        MediaRelay::new(clients, resolver, &config).context("failed to start media relay")?,
    );

    let base = format!("http://{}", config.server.bind_address);
    println!("Media relay starting...");
    println!("Workers: {workers}");
    println!("Chunk size: {} bytes", relay.chunk_size());
    println!("Workloads: {base}/api/workloads");
    for file in library.files() {
        let name = file.descriptor.file_name.as_deref().unwrap_or("file");
        println!(
            "  {base}/dl/{SIMULATED_CHAT_ID}/{}/{name} ({} bytes, {})",
            file.message_id, file.descriptor.file_size, file.descriptor.dc_id
        );
    }
    println!();
    println!("Press Ctrl+C to stop the server");

    run_server(relay, &config.server)
        .await
        .context("media relay server failed")?;

    tracing::info!("Media relay stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_replace_only_given_values() {
        let mut config = RelayConfig::default();
        let default_port = config.server.bind_address.port();

        apply_overrides(
            &mut config,
            Some(IpAddr::from([0, 0, 0, 0])),
            None,
            Some(3),
            None,
            Some(7),
        );

        assert_eq!(
            config.server.bind_address,
            SocketAddr::from(([0, 0, 0, 0], default_port))
        );
        assert_eq!(config.simulation.file_count, 3);
        assert_eq!(
            config.simulation.file_size,
            RelayConfig::default().simulation.file_size
        );
        assert_eq!(config.simulation.deterministic_seed, Some(7));
    }

    #[test]
    fn test_seed_from_environment_survives_without_flag() {
        let mut config = RelayConfig::default();
        config.simulation.deterministic_seed = Some(99);

        apply_overrides(&mut config, None, Some(9000), None, None, None);

        assert_eq!(config.simulation.deterministic_seed, Some(99));
        assert_eq!(config.server.bind_address.port(), 9000);
    }

    #[tokio::test]
    async fn test_serve_rejects_zero_workers() {
        let error = serve(RelayConfig::for_testing(), 0).await.unwrap_err();
        assert!(error.to_string().contains("worker"));
    }
}
