use std::net::{IpAddr, Ipv4Addr};
use tokio::net::UdpSocket;
use tracing::warn;

/// Address the kernel would route through; no packet leaves the host.
const ROUTE_PROBE: &str = "8.8.8.8:53";

/// Local IP used on outbound traffic, falling back to loopback when the host
/// has no route.
pub async fn outbound_ip() -> IpAddr {
    match probe().await {
        Ok(ip) => ip,
        Err(err) => {
            warn!(error = %err, "could not determine outbound IP, using loopback");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

async fn probe() -> std::io::Result<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.connect(ROUTE_PROBE).await?;
    Ok(socket.local_addr()?.ip())
}

/// Peers must be literal, routable, non-loopback addresses.
#[must_use]
pub fn usable_peer(candidate: &str) -> Option<IpAddr> {
    let ip: IpAddr = candidate.trim().parse().ok()?;
    if ip.is_loopback() || ip.is_unspecified() || ip.is_multicast() {
        None
    } else {
        Some(ip)
    }
}
