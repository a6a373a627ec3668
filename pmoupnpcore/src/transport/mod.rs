//! Transports pluggables.
//!
//! La pile ne manipule les sockets qu'à travers deux traits :
//! [`DatagramTransport`] pour SSDP et [`StreamClient`] pour les échanges
//! HTTP (SOAP, GENA, descripteurs). Les implémentations par défaut sont
//! [`UdpDatagramTransport`] et [`HttpStreamClient`] ; le module [`memory`]
//! fournit des doublures en mémoire.

mod http;
pub mod memory;
mod udp;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use async_trait::async_trait;
use url::Url;

use crate::errors::TransportFailure;
use crate::message::UpnpMessage;

pub use http::HttpStreamClient;
pub use udp::UdpDatagramTransport;

pub const SSDP_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
pub const SSDP_PORT: u16 = 1900;

pub fn ssdp_multicast_target() -> SocketAddr {
    SocketAddr::from((SSDP_MULTICAST_ADDR, SSDP_PORT))
}

/// Datagramme brut reçu ; son analyse revient au moteur SSDP.
#[derive(Debug, Clone)]
pub struct ReceivedDatagram {
    pub data: Vec<u8>,
    pub source: SocketAddr,
    /// Adresse locale de réception, si connue.
    pub local: Option<IpAddr>,
}

#[async_trait]
pub trait DatagramTransport: Send + Sync {
    async fn send(&self, data: &[u8], destination: SocketAddr) -> Result<(), TransportFailure>;

    async fn receive(&self) -> Result<ReceivedDatagram, TransportFailure>;
}

#[async_trait]
pub trait StreamClient: Send + Sync {
    /// Envoie `request` à `url` et attend la réponse complète.
    ///
    /// Un statut d'erreur HTTP n'est pas un échec de transport : la réponse
    /// est retournée telle quelle et classée par l'appelant.
    async fn send(&self, request: UpnpMessage, url: &Url) -> Result<UpnpMessage, TransportFailure>;
}
