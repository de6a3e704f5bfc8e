//! Local address discovery

use std::io;
use std::net::{IpAddr, Ipv4Addr};

use tokio::net::UdpSocket;
use tracing::{debug, warn};

/// Public address used to pick the outbound interface. Nothing is sent to it.
const PROBE_ADDR: &str = "8.8.8.8:80";

/// Address of the interface this machine would use for outbound traffic.
/// Falls back to loopback when there is no route.
pub async fn outbound_ip() -> IpAddr {
    match probe_outbound_ip().await {
        Ok(ip) => {
            debug!("Discovered outbound address {}", ip);
            ip
        }
        Err(e) => {
            warn!("Could not discover outbound address, using loopback: {}", e);
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

async fn probe_outbound_ip() -> io::Result<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.connect(PROBE_ADDR).await?;
    let ip = socket.local_addr()?.ip();
    if ip.is_unspecified() {
        return Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            "no outbound interface",
        ));
    }
    Ok(ip)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_outbound_ip_is_concrete() {
        let ip = outbound_ip().await;
        assert!(!ip.is_unspecified());
    }
}
