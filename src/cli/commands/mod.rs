pub mod cluster;
pub mod identity;
pub mod logging;
pub mod session;

use clap::{
    Arg, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

use self::identity::{
    ARG_DEPLOYMENT, ARG_OIDC_CLIENT_ID, ARG_OIDC_CLIENT_SECRET, ARG_OIDC_HOSTED_DOMAIN,
};

pub const ARG_PORT: &str = "port";
pub const ARG_DSN: &str = "dsn";

/// Validate that a remote deployment has what token validation needs.
///
/// # Errors
/// Returns an error string naming the first missing OIDC argument.
pub fn validate(matches: &clap::ArgMatches) -> Result<(), String> {
    let deployment = matches
        .get_one::<String>(ARG_DEPLOYMENT)
        .map_or("production", String::as_str);
    if deployment.eq_ignore_ascii_case("local") {
        return Ok(());
    }

    for arg in [
        ARG_OIDC_CLIENT_ID,
        ARG_OIDC_CLIENT_SECRET,
        ARG_OIDC_HOSTED_DOMAIN,
    ] {
        if !matches.contains_id(arg) {
            return Err(format!(
                "Missing required argument: --{arg} (required unless --{ARG_DEPLOYMENT} local)"
            ));
        }
    }
    Ok(())
}

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("tiki")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("8080")
                .env("TIKI_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_DSN)
                .short('d')
                .long(ARG_DSN)
                .help("Database connection string")
                .long_help(
                    "PostgreSQL connection string. Without it sessions, groups and bans live in memory and are lost on restart.",
                )
                .env("TIKI_DSN")
                .hide_env_values(true),
        );

    let command = identity::with_args(command);
    let command = session::with_args(command);
    let command = cluster::with_args(command);
    logging::with_args(command)
}
