//! Main daemon command — starts the controller server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use aws_sdk_ec2::Client as Ec2Client;
use aws_sdk_ecr::Client as EcrClient;
use axum_server::tls_rustls::RustlsConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use plz_controller::config::{Configuration, ImagesProvider, InstancesProvider};
use plz_controller::db::{DbStorage, RedisDbStorage};
use plz_controller::http::{self, Controller};
use plz_controller::instance::DockerLocalInstance;
use plz_controller::provider::{CloudProvider, InstanceProvider, LocalProvider};
use plz_controller::registry::{EcrRegistry, ImageRegistry, LocalRegistry};
use plz_controller::results::{LocalResultsStorage, ResultsStorage};
use plz_controller::runtime::ContainerRuntime;
use plz_controller::volumes::VolumeBuilder;

/// Run the controller daemon.
pub async fn run(config_path: &str) -> Result<()> {
    info!("loading configuration from {}", config_path);
    let config = Arc::new(Configuration::load(config_path).context("failed to load configuration")?);

    info!("api: {}:{}", config.api.host, config.api.port);
    info!("images provider: {:?}", config.images.provider);
    info!("instances provider: {:?}", config.instances.provider);

    let db: Arc<dyn DbStorage> = Arc::new(RedisDbStorage::connect(&config.db.url).await.context("failed to connect to redis")?);

    let runtime = Arc::new(ContainerRuntime::new(&config.images.docker_host).context("failed to connect to docker")?);
    let docker_client = runtime.client().clone();
    let volumes = Arc::new(VolumeBuilder::new(docker_client.clone()));

    let aws_config = match &config.instances.region {
        Some(region) => {
            aws_config::defaults(aws_config::BehaviorVersion::latest())
                .region(aws_sdk_ec2::config::Region::new(region.clone()))
                .load()
                .await
        }
        None => aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await,
    };

    let registry: Arc<dyn ImageRegistry> = match config.images.provider {
        ImagesProvider::Local => Arc::new(LocalRegistry::new(docker_client.clone(), config.images.repository.clone())),
        ImagesProvider::AwsEcr => {
            let ecr_registry_uri = config
                .images
                .ecr_registry
                .clone()
                .context("images.ecr_registry is required when images.provider = \"aws-ecr\"")?;
            let ecr_client = EcrClient::new(&aws_config);
            Arc::new(EcrRegistry::new(
                docker_client.clone(),
                ecr_client,
                ecr_registry_uri,
                config.images.repository.clone(),
                config.images.ecr_login_validity_minutes,
            ))
        }
    };

    let provider: Arc<dyn InstanceProvider> = match config.instances.provider {
        InstancesProvider::Localhost => {
            let instance = Arc::new(DockerLocalInstance::new(
                "localhost".to_string(),
                runtime.clone(),
                registry.clone(),
                volumes.clone(),
            ));
            Arc::new(LocalProvider::new(instance))
        }
        InstancesProvider::AwsEc2 => {
            let ec2_client = Ec2Client::new(&aws_config);
            Arc::new(CloudProvider::new(ec2_client, config.instances.clone(), registry.clone(), volumes.clone()))
        }
    };

    let results: Arc<dyn ResultsStorage> = Arc::new(LocalResultsStorage::new(config.results.directory.clone(), db.clone()));

    let controller = Arc::new(Controller::new(db, provider, registry, results, config.clone()));
    let app = http::build_router(controller.clone());

    let shutdown_token = CancellationToken::new();

    let tidy_controller = controller.clone();
    let tidy_token = shutdown_token.clone();
    let tidy_interval_seconds = config.system.tidy_interval_seconds;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(tidy_interval_seconds));
        interval.tick().await; // skip the immediate first tick

        loop {
            tokio::select! {
                _ = tidy_token.cancelled() => {
                    debug!("periodic tidy task stopped");
                    return;
                }
                _ = interval.tick() => {
                    debug!("running periodic fleet tidy-up");
                    tidy_controller.provider.tidy_up().await;
                }
            }
        }
    });
    info!("started periodic tidy-up every {}s", tidy_interval_seconds);

    let bind_addr: SocketAddr =
        format!("{}:{}", config.api.host, config.api.port).parse().context("invalid api.host/api.port")?;

    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();
    let shutdown_token_clone = shutdown_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            warn!("failed to install ctrl-c handler");
            return;
        }
        warn!("received shutdown signal, stopping");
        shutdown_token_clone.cancel();
        shutdown_handle.graceful_shutdown(Some(Duration::from_secs(10)));
    });

    if config.api.ssl.enabled {
        info!("starting https server on {}", bind_addr);
        let tls_config = RustlsConfig::from_pem_file(&config.api.ssl.cert, &config.api.ssl.key)
            .await
            .context("failed to load tls configuration")?;
        axum_server::bind_rustls(bind_addr, tls_config).handle(handle).serve(app.into_make_service()).await?;
    } else {
        info!("starting http server on {}", bind_addr);
        axum_server::bind(bind_addr).handle(handle).serve(app.into_make_service()).await?;
    }

    info!("controller stopped");
    Ok(())
}
