//! Connectionless delivery of wake payloads.

use async_trait::async_trait;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::net::UdpSocket;

use super::packet::MAGIC_PACKET_LEN;

/// Fire-and-forget sender for magic packets.
#[async_trait]
pub trait WakeTransport: Send + Sync {
    /// Send `payload` to `destination` (or the transport's default) on `port`.
    /// Returns the number of bytes handed to the network.
    async fn broadcast(
        &self,
        payload: &[u8; MAGIC_PACKET_LEN],
        port: u16,
        destination: Option<Ipv4Addr>,
    ) -> io::Result<usize>;
}

/// UDP broadcast over a fresh socket per packet.
#[derive(Debug, Clone)]
pub struct UdpBroadcast {
    default_destination: Ipv4Addr,
}

impl UdpBroadcast {
    pub fn new(default_destination: Ipv4Addr) -> Self {
        Self { default_destination }
    }
}

impl Default for UdpBroadcast {
    fn default() -> Self {
        Self::new(Ipv4Addr::BROADCAST)
    }
}

#[async_trait]
impl WakeTransport for UdpBroadcast {
    async fn broadcast(
        &self,
        payload: &[u8; MAGIC_PACKET_LEN],
        port: u16,
        destination: Option<Ipv4Addr>,
    ) -> io::Result<usize> {
        let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))).await?;
        socket.set_broadcast(true)?;

        let dest = SocketAddrV4::new(destination.unwrap_or(self.default_destination), port);
        let sent = socket.send_to(payload, dest).await?;
        tracing::debug!("Magic packet sent ({} bytes) to {}", sent, dest);
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wake::{magic_packet, MacAddress};

    #[tokio::test]
    async fn test_udp_broadcast_delivers_payload() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = receiver.local_addr().unwrap().port();

        let mac = MacAddress::new([0xC0, 0x18, 0x50, 0xAC, 0xE1, 0xA5]);
        let packet = magic_packet(&mac);
        let sent = UdpBroadcast::default()
            .broadcast(&packet, port, Some(Ipv4Addr::LOCALHOST))
            .await
            .unwrap();
        assert_eq!(sent, MAGIC_PACKET_LEN);

        let mut buf = [0u8; 256];
        let (len, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], &packet[..]);
    }
}
