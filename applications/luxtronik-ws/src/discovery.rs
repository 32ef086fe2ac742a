//! LAN discovery of the controller by UDP broadcast.

use crate::error::Result;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

pub const DISCOVERY_PORT: u16 = 4444;
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(2);
pub const PLACEHOLDER_HOST: &str = "static.luxtronik.ip.here";

/// "2000;111;1;" followed by three NULs and four spaces.
pub const DISCOVERY_PAYLOAD: [u8; 18] = [
    0x32, 0x30, 0x30, 0x30, 0x3b, 0x31, 0x31, 0x31, 0x3b, 0x31, 0x3b, 0x00, 0x00, 0x00, 0x20,
    0x20, 0x20, 0x20,
];

/// Broadcast once and wait for a controller to answer.
pub async fn discover(timeout: Duration) -> Result<Option<IpAddr>> {
    let own = match local_address().await {
        Ok(ip) => Some(ip),
        Err(e) => {
            debug!(error = %e, "could not determine own address");
            None
        }
    };

    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, DISCOVERY_PORT)).await?;
    socket.set_broadcast(true)?;
    socket
        .send_to(&DISCOVERY_PAYLOAD, (Ipv4Addr::BROADCAST, DISCOVERY_PORT))
        .await?;

    let wait = async {
        let mut buf = [0u8; 512];
        loop {
            let (n, from) = socket.recv_from(&mut buf).await?;
            if is_controller_reply(from, &buf[..n], own) {
                return Ok::<_, std::io::Error>(from.ip());
            }
            debug!(%from, "ignoring discovery datagram");
        }
    };

    match tokio::time::timeout(timeout, wait).await {
        Ok(Ok(ip)) => Ok(Some(ip)),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Ok(None),
    }
}

/// Controller address, or the placeholder when nobody answered.
pub async fn default_host() -> String {
    match discover(DISCOVERY_TIMEOUT).await {
        Ok(Some(ip)) => {
            info!(%ip, "discovered controller");
            ip.to_string()
        }
        Ok(None) => {
            info!("no controller answered discovery broadcast");
            PLACEHOLDER_HOST.to_string()
        }
        Err(e) => {
            warn!(error = %e, "discovery failed");
            PLACEHOLDER_HOST.to_string()
        }
    }
}

/// Our own broadcast loops back on the same port; it is recognised by its
/// source address or by carrying the request payload unchanged.
pub fn is_controller_reply(from: SocketAddr, payload: &[u8], own: Option<IpAddr>) -> bool {
    from.port() == DISCOVERY_PORT && Some(from.ip()) != own && payload != DISCOVERY_PAYLOAD
}

/// Address of the interface holding the default route. No packet is sent.
async fn local_address() -> Result<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.connect(("8.8.8.8", 80)).await?;
    Ok(socket.local_addr()?.ip())
}
