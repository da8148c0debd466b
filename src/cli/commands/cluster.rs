use clap::{Arg, Command, builder::PossibleValuesParser};
use std::net::IpAddr;

pub const ARG_DISCOVERY: &str = "discovery";
pub const ARG_PEERS: &str = "peers";
pub const ARG_GOSSIP_PORT: &str = "gossip-port";
pub const ARG_GOSSIP_PROTOCOL: &str = "gossip-protocol";
pub const ARG_GOSSIP_BROADCAST: &str = "gossip-broadcast";
pub const ARG_NAMESPACE: &str = "namespace";
pub const ARG_LABEL_SELECTOR: &str = "label-selector";
pub const ARG_DISCOVERY_GRACE: &str = "discovery-grace";

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_gossip_args(command);
    with_discovery_args(command)
}

fn with_gossip_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_GOSSIP_PORT)
                .long(ARG_GOSSIP_PORT)
                .help("UDP port for cluster gossip")
                .env("TIKI_GOSSIP_PORT")
                .default_value("8671")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            // validated at startup, see `Transport`
            Arg::new(ARG_GOSSIP_PROTOCOL)
                .long(ARG_GOSSIP_PROTOCOL)
                .help("Gossip transport, only `udp` is supported")
                .env("TIKI_GOSSIP_PROTOCOL")
                .default_value("udp"),
        )
        .arg(
            Arg::new(ARG_GOSSIP_BROADCAST)
                .long(ARG_GOSSIP_BROADCAST)
                .help("Optional broadcast address that also receives gossip")
                .env("TIKI_GOSSIP_BROADCAST")
                .value_parser(clap::value_parser!(IpAddr)),
        )
}

fn with_discovery_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_DISCOVERY)
                .long(ARG_DISCOVERY)
                .help("Peer discovery method")
                .env("TIKI_DISCOVERY")
                .default_value("manual")
                .value_parser(PossibleValuesParser::new(["manual", "kubernetes"])),
        )
        .arg(
            Arg::new(ARG_PEERS)
                .long(ARG_PEERS)
                .help("Static peer addresses, comma separated")
                .env("TIKI_PEERS")
                .value_delimiter(','),
        )
        .arg(
            Arg::new(ARG_NAMESPACE)
                .long(ARG_NAMESPACE)
                .help("Namespace queried for peers")
                .env("TIKI_NAMESPACE")
                .default_value("default"),
        )
        .arg(
            Arg::new(ARG_LABEL_SELECTOR)
                .long(ARG_LABEL_SELECTOR)
                .help("Label selector matching the other instances")
                .env("TIKI_LABEL_SELECTOR")
                .default_value("app=tiki"),
        )
        .arg(
            Arg::new(ARG_DISCOVERY_GRACE)
                .long(ARG_DISCOVERY_GRACE)
                .help("Seconds to wait before querying the platform for peers")
                .env("TIKI_DISCOVERY_GRACE")
                .default_value("10")
                .value_parser(clap::value_parser!(u64)),
        )
}
