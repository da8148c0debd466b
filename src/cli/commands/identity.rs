use crate::auth::{DEFAULT_DEVELOPER_EMAIL, oidc};
use clap::{Arg, Command};

pub const ARG_DEPLOYMENT: &str = "deployment";
pub const ARG_DEVELOPER_EMAIL: &str = "developer-email";
pub const ARG_OIDC_CLIENT_ID: &str = "oidc-client-id";
pub const ARG_OIDC_CLIENT_SECRET: &str = "oidc-client-secret";
pub const ARG_OIDC_HOSTED_DOMAIN: &str = "oidc-hosted-domain";
pub const ARG_OIDC_ISSUER: &str = "oidc-issuer";
pub const ARG_OIDC_JWKS_URL: &str = "oidc-jwks-url";
pub const ARG_OIDC_TOKEN_URL: &str = "oidc-token-url";
pub const ARG_OIDC_REDIRECT_URL: &str = "oidc-redirect-url";

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_deployment_args(command);
    with_oidc_args(command)
}

fn with_deployment_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_DEPLOYMENT)
                .long(ARG_DEPLOYMENT)
                .help("Deployment name; `local` skips token validation")
                .env("TIKI_DEPLOYMENT")
                .default_value("production"),
        )
        .arg(
            Arg::new(ARG_DEVELOPER_EMAIL)
                .long(ARG_DEVELOPER_EMAIL)
                .help("Identity stamped on requests in a local deployment")
                .env("TIKI_DEVELOPER_EMAIL")
                .default_value(DEFAULT_DEVELOPER_EMAIL),
        )
}

fn with_oidc_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_OIDC_CLIENT_ID)
                .long(ARG_OIDC_CLIENT_ID)
                .help("OAuth client id, also the expected token audience")
                .env("TIKI_OIDC_CLIENT_ID"),
        )
        .arg(
            Arg::new(ARG_OIDC_CLIENT_SECRET)
                .long(ARG_OIDC_CLIENT_SECRET)
                .help("OAuth client secret used for refresh token exchange")
                .env("TIKI_OIDC_CLIENT_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_OIDC_HOSTED_DOMAIN)
                .long(ARG_OIDC_HOSTED_DOMAIN)
                .help("Expected organisational domain (`hd` claim)")
                .env("TIKI_OIDC_HOSTED_DOMAIN"),
        )
        .arg(
            Arg::new(ARG_OIDC_ISSUER)
                .long(ARG_OIDC_ISSUER)
                .help("Accepted token issuers, comma separated")
                .env("TIKI_OIDC_ISSUER")
                .value_delimiter(',')
                .default_value(oidc::GOOGLE_ISSUERS),
        )
        .arg(
            Arg::new(ARG_OIDC_JWKS_URL)
                .long(ARG_OIDC_JWKS_URL)
                .help("URL of the provider's verification keys")
                .env("TIKI_OIDC_JWKS_URL")
                .default_value(oidc::GOOGLE_JWKS_URL)
                .value_parser(clap::value_parser!(url::Url)),
        )
        .arg(
            Arg::new(ARG_OIDC_TOKEN_URL)
                .long(ARG_OIDC_TOKEN_URL)
                .help("URL of the provider's token endpoint")
                .env("TIKI_OIDC_TOKEN_URL")
                .default_value(oidc::GOOGLE_TOKEN_URL)
                .value_parser(clap::value_parser!(url::Url)),
        )
        .arg(
            Arg::new(ARG_OIDC_REDIRECT_URL)
                .long(ARG_OIDC_REDIRECT_URL)
                .help("Login callback registered with the provider, e.g. https://tiki.example.com/auth/callback")
                .env("TIKI_OIDC_REDIRECT_URL")
                .value_parser(clap::value_parser!(url::Url)),
        )
}
