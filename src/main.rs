//! cloudflared-connector - ensure the shared cloudflared connector exists

use clap::Parser;
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cloudflared_connector::config::{
    ConnectorConfig, IMAGE_ENV, IMAGE_PULL_POLICY_ENV, REPLICA_COUNT_ENV,
};
use cloudflared_connector::credentials::{CloudflareTunnelClient, DEFAULT_CLOUDFLARE_API_BASE};
use cloudflared_connector::provisioner::{provision, KubeObjectStore, ProvisionOutcome};
use cloudflared_connector::retry::{retry_with_backoff, RetryConfig};
use cloudflared_connector::{trust_pool, workload};

/// Placeholder printed instead of a tunnel token in dry-run output
const REDACTED_TOKEN: &str = "<redacted>";

/// Provision the controlled cloudflared connector Deployment
#[derive(Parser, Debug)]
#[command(name = "cloudflared-connector", version, about, long_about = None)]
struct Cli {
    /// Namespace the connector runs in
    #[arg(
        long,
        env = "CLOUDFLARED_NAMESPACE",
        value_parser = clap::builder::NonEmptyStringValueParser::new()
    )]
    namespace: String,

    /// ConfigMap holding a CA bundle to trust
    #[arg(long, env = "CAPOOL_CONFIG_MAP")]
    capool_config_map: Option<String>,

    /// Secret holding a CA bundle to trust
    #[arg(long, env = "CAPOOL_SECRET")]
    capool_secret: Option<String>,

    /// Key of the CA bundle inside the ConfigMap or Secret
    #[arg(long, env = "CAPOOL_KEY")]
    capool_key: Option<String>,

    /// Path the CA bundle is mounted at
    #[arg(long, env = "CAPOOL_MOUNT_PATH")]
    capool_mount_path: Option<String>,

    /// Cloudflare API token with tunnel read access
    #[arg(long, env = "CLOUDFLARE_API_TOKEN", hide_env_values = true)]
    cloudflare_api_token: Option<String>,

    /// Cloudflare account ID owning the tunnel
    #[arg(long, env = "CLOUDFLARE_ACCOUNT_ID")]
    cloudflare_account_id: Option<String>,

    /// Cloudflare tunnel ID
    #[arg(long, env = "CLOUDFLARE_TUNNEL_ID")]
    cloudflare_tunnel_id: Option<String>,

    /// Cloudflare API base URL
    #[arg(long, default_value = DEFAULT_CLOUDFLARE_API_BASE)]
    cloudflare_api_base: String,

    /// cloudflared container image
    #[arg(long, env = IMAGE_ENV)]
    image: Option<String>,

    /// cloudflared image pull policy
    #[arg(long, env = IMAGE_PULL_POLICY_ENV)]
    image_pull_policy: Option<String>,

    /// Number of connector replicas
    #[arg(long, env = REPLICA_COUNT_ENV)]
    replica_count: Option<String>,

    /// Maximum provisioning attempts (0 = retry forever)
    #[arg(long, default_value = "5")]
    max_attempts: u32,

    /// Print the connector Deployment instead of creating it
    #[arg(long)]
    dry_run: bool,
}

impl Cli {
    fn connector_config(&self) -> ConnectorConfig {
        ConnectorConfig {
            image: self.image.clone(),
            image_pull_policy: self.image_pull_policy.clone(),
            replica_count: self.replica_count.clone(),
        }
    }

    fn tunnel_client(&self) -> anyhow::Result<CloudflareTunnelClient> {
        let required = |value: &Option<String>, flag: &str| {
            value
                .clone()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| anyhow::anyhow!("--{flag} is required"))
        };
        Ok(CloudflareTunnelClient::new(
            required(&self.cloudflare_api_token, "cloudflare-api-token")?,
            required(&self.cloudflare_account_id, "cloudflare-account-id")?,
            required(&self.cloudflare_tunnel_id, "cloudflare-tunnel-id")?,
        )
        .with_api_base(&self.cloudflare_api_base))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        eprintln!("failed to install TLS crypto provider: {:?}", e);
        std::process::exit(1);
    }

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let trust_pool = trust_pool::resolve(
        cli.capool_config_map.as_deref(),
        cli.capool_secret.as_deref(),
        cli.capool_key.as_deref(),
        cli.capool_mount_path.as_deref(),
    )?;
    let config = cli.connector_config();

    if cli.dry_run {
        let resolved = config.resolve()?;
        let trust_volume = trust_pool.as_ref().map(|pool| pool.trust_volume());
        let deployment = workload::connector_deployment(
            REDACTED_TOKEN,
            &cli.namespace,
            &resolved,
            trust_volume.as_ref(),
        );
        let yaml = serde_yaml::to_string(&deployment)
            .map_err(|e| anyhow::anyhow!("Failed to serialize Deployment: {}", e))?;
        println!("{yaml}");
        return Ok(());
    }

    let credentials = cli.tunnel_client()?;
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;
    let store = KubeObjectStore::new(client);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, cancelling provisioning");
            shutdown.cancel();
        }
    });

    let outcome = retry_with_backoff(
        &RetryConfig::with_max_attempts(cli.max_attempts),
        &cancel,
        "provision connector",
        || {
            provision(
                &cancel,
                &store,
                &credentials,
                &cli.namespace,
                trust_pool.as_ref(),
                &config,
            )
        },
    )
    .await?;

    match outcome {
        ProvisionOutcome::Created => {
            tracing::info!(namespace = %cli.namespace, "connector deployment created")
        }
        ProvisionOutcome::AlreadyPresent => {
            tracing::info!(namespace = %cli.namespace, "connector deployment already present")
        }
    }

    Ok(())
}
