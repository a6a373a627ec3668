//! Transport SSDP sur UDP multicast.
//!
//! Deux sockets :
//!
//! * écoute → bind(0.0.0.0:1900), rejoint le groupe, reçoit NOTIFY et M-SEARCH ;
//! * émission → bind(<ip locale>:0), port éphémère, reçoit les réponses 200 OK.
//!
//! Les réponses unicast aux M-SEARCH ne doivent pas arriver sur le port
//! 1900 : avec deux sockets liés au même port le noyau répartit les
//! datagrammes entre eux et une partie des réponses serait perdue.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use super::{DatagramTransport, ReceivedDatagram, SSDP_MULTICAST_ADDR, SSDP_PORT};
use crate::errors::TransportFailure;

const MAX_DATAGRAM: usize = 8192;
const MULTICAST_TTL: u32 = 4;

pub struct UdpDatagramTransport {
    listener: UdpSocket,
    sender: UdpSocket,
    local_ip: Ipv4Addr,
}

impl UdpDatagramTransport {
    /// Ouvre les deux sockets sur l'interface `local_ip`.
    pub fn bind(local_ip: Ipv4Addr) -> Result<Self, TransportFailure> {
        let listener = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        listener.set_reuse_address(true)?;
        #[cfg(unix)]
        listener.set_reuse_port(true)?;
        listener.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, SSDP_PORT)).into())?;
        let interface = if local_ip.is_loopback() {
            Ipv4Addr::UNSPECIFIED
        } else {
            local_ip
        };
        if let Err(e) = listener.join_multicast_v4(&SSDP_MULTICAST_ADDR, &interface) {
            warn!("SSDP: failed to join {} on {}: {}", SSDP_MULTICAST_ADDR, interface, e);
        }
        listener.set_multicast_loop_v4(true)?;
        listener.set_nonblocking(true)?;

        let sender = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        sender.bind(&SocketAddr::from((interface, 0)).into())?;
        sender.set_multicast_ttl_v4(MULTICAST_TTL)?;
        sender.set_multicast_loop_v4(true)?;
        if !interface.is_unspecified() {
            sender.set_multicast_if_v4(&interface)?;
        }
        sender.set_nonblocking(true)?;

        let listener = UdpSocket::from_std(listener.into())?;
        let sender = UdpSocket::from_std(sender.into())?;
        info!(
            "✅ SSDP transport ready (listen {}:{}, send {:?})",
            SSDP_MULTICAST_ADDR,
            SSDP_PORT,
            sender.local_addr().ok()
        );

        Ok(Self {
            listener,
            sender,
            local_ip,
        })
    }
}

#[async_trait]
impl DatagramTransport for UdpDatagramTransport {
    async fn send(&self, data: &[u8], destination: SocketAddr) -> Result<(), TransportFailure> {
        self.sender.send_to(data, destination).await?;
        debug!("SSDP: sent {} bytes to {}", data.len(), destination);
        Ok(())
    }

    async fn receive(&self) -> Result<ReceivedDatagram, TransportFailure> {
        let mut lbuf = vec![0u8; MAX_DATAGRAM];
        let mut sbuf = vec![0u8; MAX_DATAGRAM];
        let (data, source) = tokio::select! {
            r = self.listener.recv_from(&mut lbuf) => {
                let (n, from) = r?;
                lbuf.truncate(n);
                (lbuf, from)
            }
            r = self.sender.recv_from(&mut sbuf) => {
                let (n, from) = r?;
                sbuf.truncate(n);
                (sbuf, from)
            }
        };
        Ok(ReceivedDatagram {
            data,
            source,
            local: Some(IpAddr::V4(self.local_ip)),
        })
    }
}
