use clap::{Arg, Command};

pub const ARG_SESSION_MAX_LENGTH: &str = "session-max-length";
pub const ARG_MAX_SESSIONS: &str = "max-sessions";
pub const ARG_EXPIRED_RETENTION_DAYS: &str = "expired-retention-days";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SESSION_MAX_LENGTH)
                .long(ARG_SESSION_MAX_LENGTH)
                .help("Maximum session length in seconds, regardless of renewals")
                .env("TIKI_SESSION_MAX_LENGTH")
                .default_value("86400")
                .value_parser(clap::value_parser!(i64).range(0..)),
        )
        .arg(
            Arg::new(ARG_MAX_SESSIONS)
                .long(ARG_MAX_SESSIONS)
                .help("Simultaneous sessions per identity, 0 for no limit")
                .env("TIKI_MAX_SESSIONS")
                .default_value("3")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_EXPIRED_RETENTION_DAYS)
                .long(ARG_EXPIRED_RETENTION_DAYS)
                .help("Days to keep expired sessions (advisory, for external cleanup)")
                .env("TIKI_EXPIRED_RETENTION_DAYS")
                .default_value("7")
                .value_parser(clap::value_parser!(u32)),
        )
}
