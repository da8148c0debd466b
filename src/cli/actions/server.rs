use crate::{
    api,
    auth::{AuthConfig, AuthGate, Deployment, IdentityProvider, OidcConfig, OidcProvider},
    cli::telemetry,
    cluster::{ClusterCoordinator, Discovery, GossipConfig, KubernetesQuery, Transport},
    permission::PermissionEvaluator,
    session::{SessionConfig, SessionStore},
    store::{DurableStore, MemoryStore, PgStore},
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use sqlx::postgres::PgPoolOptions;
use std::{net::IpAddr, sync::Arc, time::Duration};
use tokio::{sync::watch, time::timeout};
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<String>,
    pub deployment: Deployment,
    pub developer_email: String,
    pub oidc: OidcArgs,
    pub session: SessionConfig,
    pub expired_retention_days: u32,
    pub transport: Transport,
    pub gossip_port: u16,
    pub gossip_broadcast: Option<IpAddr>,
    pub discovery: DiscoveryArgs,
}

#[derive(Debug)]
pub struct OidcArgs {
    pub client_id: String,
    pub client_secret: SecretString,
    pub hosted_domain: Option<String>,
    pub issuers: Vec<String>,
    pub jwks_url: Url,
    pub token_url: Url,
    pub redirect_url: Option<Url>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryArgs {
    Manual {
        peers: Vec<String>,
    },
    Kubernetes {
        namespace: String,
        label_selector: String,
        grace: Duration,
    },
}

impl DiscoveryArgs {
    fn into_discovery(self) -> Result<Discovery> {
        match self {
            Self::Manual { peers } => Ok(Discovery::Static(peers)),
            Self::Kubernetes {
                namespace,
                label_selector,
                grace,
            } => Ok(Discovery::Platform {
                query: Arc::new(
                    KubernetesQuery::in_cluster(label_selector)
                        .context("kubernetes discovery is not available")?,
                ),
                namespace,
                grace,
            }),
        }
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the store, the gossip sockets or the HTTP listener
/// cannot be set up.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let store = connect_store(args.dsn.as_deref()).await?;

    let gossip = GossipConfig::new(args.gossip_port).with_broadcast(args.gossip_broadcast);
    debug!(transport = ?args.transport, port = gossip.port(), "starting gossip");
    let (cluster, feed) = ClusterCoordinator::new(gossip)
        .await
        .context("failed to create gossip socket")?;
    let socket = cluster
        .bind_listener()
        .await
        .with_context(|| format!("failed to bind gossip port {}", args.gossip_port))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let listener = tokio::spawn(cluster.clone().listen(socket, shutdown_rx));

    let sessions = Arc::new(SessionStore::new(store.clone(), cluster.clone(), args.session));
    let follower = sessions.clone().follow(feed);
    if let Err(err) = sessions.warm().await {
        warn!(error = %err, "failed to warm session cache, reads go to the store");
    }

    let discovery = args.discovery.into_discovery()?;
    let deadline = discovery.deadline();
    match timeout(deadline, cluster.discover_peers(discovery)).await {
        Ok(Ok(peers)) => info!(peers = peers.len(), state = ?cluster.state(), "peer discovery finished"),
        Ok(Err(_)) => warn!("peer discovery ended without a result"),
        Err(_) => warn!(?deadline, "peer discovery still running, continuing startup"),
    }

    if args.oidc.redirect_url.is_none() && !args.deployment.is_local() {
        warn!("no OIDC redirect URL configured, /auth/callback cannot open sessions");
    }
    let provider: Arc<dyn IdentityProvider> = Arc::new(
        OidcProvider::new(
            OidcConfig::new(
                args.oidc.client_id.clone(),
                args.oidc.client_secret,
                args.oidc.jwks_url,
                args.oidc.token_url,
            )
            .with_issuers(args.oidc.issuers)
            .with_redirect_url(args.oidc.redirect_url),
        )
        .context("failed to build identity provider client")?,
    );

    let auth = AuthConfig::new(args.deployment, args.oidc.client_id)
        .with_developer_email(args.developer_email)
        .with_hosted_domain(args.oidc.hosted_domain);
    let gate = Arc::new(AuthGate::new(
        auth,
        provider,
        sessions,
        PermissionEvaluator::new(store.clone()),
    ));

    let served = api::serve(
        args.port,
        api::router(gate, store),
        api::shutdown_signal(),
    )
    .await;

    let _ = shutdown_tx.send(true);
    if let Err(err) = listener.await {
        warn!(error = %err, "gossip listener task failed");
    }
    follower.abort();
    telemetry::shutdown_tracer();

    served
}

async fn connect_store(dsn: Option<&str>) -> Result<Arc<dyn DurableStore>> {
    let Some(dsn) = dsn else {
        warn!("no DSN configured, sessions, groups and bans are kept in memory only");
        return Ok(Arc::new(MemoryStore::new()));
    };

    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn)
        .await
        .context("Failed to connect to database")?;
    Ok(Arc::new(PgStore::new(pool)))
}

fn log_startup_args(args: &Args) {
    let discovery = match &args.discovery {
        DiscoveryArgs::Manual { peers } => format!("manual ({} peers)", peers.len()),
        DiscoveryArgs::Kubernetes {
            namespace,
            label_selector,
            grace,
        } => format!("kubernetes ({namespace}, {label_selector}, grace {}s)", grace.as_secs()),
    };
    let deployment = match &args.deployment {
        Deployment::Local => "local".to_string(),
        Deployment::Remote(name) => name.clone(),
    };
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        (
            "dsn",
            args.dsn
                .as_deref()
                .map_or_else(|| "none (in-memory)".to_string(), redact_dsn),
        ),
        ("deployment", deployment),
        ("oidc_client_id", args.oidc.client_id.clone()),
        (
            "oidc_redirect_url",
            args.oidc
                .redirect_url
                .as_ref()
                .map_or_else(|| "n/a".to_string(), ToString::to_string),
        ),
        (
            "oidc_hosted_domain",
            args.oidc
                .hosted_domain
                .clone()
                .unwrap_or_else(|| "n/a".to_string()),
        ),
        (
            "session_max_length",
            format!("{}s", args.session.max_length_seconds()),
        ),
        ("max_sessions", args.session.max_sessions().to_string()),
        (
            "expired_retention_days",
            args.expired_retention_days.to_string(),
        ),
        ("gossip_port", args.gossip_port.to_string()),
        (
            "gossip_broadcast",
            args.gossip_broadcast
                .map_or_else(|| "none".to_string(), |ip| ip.to_string()),
        ),
        ("discovery", discovery),
    ];
    log_entries("Startup configuration", &entries);
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn log_entries(title: &str, entries: &[(&str, String)]) {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "{} {} - {}\n\n{title}:",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn short_commit(hash: &str) -> &str {
    let trimmed = hash.trim();
    trimmed.get(..7).unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dsn_password_is_redacted() {
        assert_eq!(
            redact_dsn("postgres://tiki:hunter2@db:5432/tiki"),
            "postgres://tiki:REDACTED@db:5432/tiki"
        );
        assert_eq!(redact_dsn("postgres://db/tiki"), "postgres://db/tiki");
        assert_eq!(redact_dsn("not a url"), "invalid-dsn");
    }

    #[test]
    fn short_commit_trims() {
        assert_eq!(short_commit("0123456789abcdef"), "0123456");
        assert_eq!(short_commit("abc"), "abc");
    }

    #[test]
    fn manual_discovery_is_static() -> Result<()> {
        let discovery = DiscoveryArgs::Manual {
            peers: vec!["10.0.0.2".to_string()],
        }
        .into_discovery()?;
        assert!(matches!(discovery, Discovery::Static(ref peers) if peers.len() == 1));
        assert_eq!(discovery.deadline(), Duration::from_secs(1));
        Ok(())
    }

    #[tokio::test]
    async fn missing_dsn_uses_memory_store() -> Result<()> {
        let store = connect_store(None).await?;
        store.ping().await?;
        Ok(())
    }
}
