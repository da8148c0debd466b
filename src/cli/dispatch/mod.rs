use crate::{
    auth::Deployment,
    cli::{
        actions::{
            Action,
            server::{Args, DiscoveryArgs, OidcArgs},
        },
        commands::{self, ARG_DSN, ARG_PORT, cluster, identity, session},
    },
    cluster::Transport,
    session::SessionConfig,
};
use anyhow::{Context, Result, anyhow};
use secrecy::SecretString;
use std::{net::IpAddr, time::Duration};
use url::Url;

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    commands::validate(matches).map_err(|e| anyhow!(e))?;

    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches.get_one::<String>(ARG_DSN).cloned();

    let deployment = Deployment::parse(
        matches
            .get_one::<String>(identity::ARG_DEPLOYMENT)
            .map_or("production", String::as_str),
    );
    let developer_email = matches
        .get_one::<String>(identity::ARG_DEVELOPER_EMAIL)
        .cloned()
        .context("missing argument: --developer-email")?;

    let transport: Transport = matches
        .get_one::<String>(cluster::ARG_GOSSIP_PROTOCOL)
        .map_or("udp", String::as_str)
        .parse()
        .context("invalid TIKI_GOSSIP_PROTOCOL")?;

    Ok(Action::Server(Box::new(Args {
        port,
        dsn,
        deployment,
        developer_email,
        oidc: oidc_args(matches)?,
        session: session_config(matches),
        expired_retention_days: matches
            .get_one::<u32>(session::ARG_EXPIRED_RETENTION_DAYS)
            .copied()
            .unwrap_or(7),
        transport,
        gossip_port: matches
            .get_one::<u16>(cluster::ARG_GOSSIP_PORT)
            .copied()
            .unwrap_or(crate::cluster::DEFAULT_GOSSIP_PORT),
        gossip_broadcast: matches.get_one::<IpAddr>(cluster::ARG_GOSSIP_BROADCAST).copied(),
        discovery: discovery_args(matches),
    })))
}

fn oidc_args(matches: &clap::ArgMatches) -> Result<OidcArgs> {
    let url = |arg: &str| {
        matches
            .get_one::<Url>(arg)
            .cloned()
            .with_context(|| format!("missing argument: --{arg}"))
    };

    Ok(OidcArgs {
        client_id: matches
            .get_one::<String>(identity::ARG_OIDC_CLIENT_ID)
            .cloned()
            .unwrap_or_default(),
        client_secret: SecretString::from(
            matches
                .get_one::<String>(identity::ARG_OIDC_CLIENT_SECRET)
                .cloned()
                .unwrap_or_default(),
        ),
        hosted_domain: matches
            .get_one::<String>(identity::ARG_OIDC_HOSTED_DOMAIN)
            .cloned(),
        issuers: matches
            .get_many::<String>(identity::ARG_OIDC_ISSUER)
            .map(|values| values.map(|v| v.trim().to_string()).collect())
            .unwrap_or_default(),
        jwks_url: url(identity::ARG_OIDC_JWKS_URL)?,
        token_url: url(identity::ARG_OIDC_TOKEN_URL)?,
        redirect_url: matches
            .get_one::<Url>(identity::ARG_OIDC_REDIRECT_URL)
            .cloned(),
    })
}

fn session_config(matches: &clap::ArgMatches) -> SessionConfig {
    let mut config = SessionConfig::default();
    if let Some(seconds) = matches.get_one::<i64>(session::ARG_SESSION_MAX_LENGTH) {
        config = config.with_max_length_seconds(*seconds);
    }
    if let Some(max) = matches.get_one::<usize>(session::ARG_MAX_SESSIONS) {
        config = config.with_max_sessions(*max);
    }
    config
}

fn discovery_args(matches: &clap::ArgMatches) -> DiscoveryArgs {
    match matches
        .get_one::<String>(cluster::ARG_DISCOVERY)
        .map(String::as_str)
    {
        Some("kubernetes") => DiscoveryArgs::Kubernetes {
            namespace: matches
                .get_one::<String>(cluster::ARG_NAMESPACE)
                .cloned()
                .unwrap_or_else(|| "default".to_string()),
            label_selector: matches
                .get_one::<String>(cluster::ARG_LABEL_SELECTOR)
                .cloned()
                .unwrap_or_else(|| "app=tiki".to_string()),
            grace: Duration::from_secs(
                matches
                    .get_one::<u64>(cluster::ARG_DISCOVERY_GRACE)
                    .copied()
                    .unwrap_or(10),
            ),
        },
        _ => DiscoveryArgs::Manual {
            peers: matches
                .get_many::<String>(cluster::ARG_PEERS)
                .map(|values| {
                    values
                        .map(|v| v.trim().to_string())
                        .filter(|v| !v.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        },
    }
}
