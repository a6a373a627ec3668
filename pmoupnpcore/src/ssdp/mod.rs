//! # Moteur de découverte SSDP
//!
//! Annonce les devices locaux, répond aux recherches, suit les devices
//! distants et mène les recherches actives.
//!
//! ## Fonctionnalités
//!
//! - ✅ `NOTIFY ssdp:alive` : ajout ou rafraîchissement dans le registre,
//!   récupération asynchrone de la description d'un device inconnu
//! - ✅ `NOTIFY ssdp:byebye` : retrait du device distant
//! - ✅ `M-SEARCH` : réponses unicast différées d'un délai aléatoire dans `[0, MX]`
//! - ✅ `200 OK` : sémantique d'alive, plus remise aux recherches ouvertes
//! - ✅ Ré-annonce périodique, byebye au retrait
//! - ✅ Un datagramme mal formé est journalisé puis ignoré

mod matching;
mod messages;

use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::descriptor::DescriptorRetriever;
use crate::errors::{RegistrationError, TransportFailure};
use crate::message::{
    MAX_MX, Method, NotificationSubtype, NotificationTarget, Operation, ServerInfo, UpnpMessage, Usn,
    read_datagram, write_datagram,
};
use crate::model::{Device, RemoteDeviceIdentity, Udn};
use crate::namespace::Namespace;
use crate::registry::{Registry, RemoteSighting, RemovedDevice, advertisement_interval};
use crate::transport::{DatagramTransport, ReceivedDatagram, ssdp_multicast_target};

pub use matching::{advertisements, match_search_target, search_accepts};

/// Durée de validité supposée d'une annonce sans `CACHE-CONTROL`.
pub const DEFAULT_MAX_AGE: u32 = 1800;

const RECEIVE_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Réponse à une recherche active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub target: NotificationTarget,
    pub usn: Usn,
    pub location: Url,
    pub max_age: u32,
    pub server: Option<ServerInfo>,
    pub source: SocketAddr,
}

/// Flux des réponses d'une recherche ; se termine à l'échéance de MX.
#[derive(Debug)]
pub struct SearchHandle {
    receiver: mpsc::UnboundedReceiver<SearchResult>,
}

impl SearchHandle {
    pub async fn next(&mut self) -> Option<SearchResult> {
        self.receiver.recv().await
    }

    /// Attend la fin de la fenêtre et retourne toutes les réponses reçues.
    pub async fn collect(mut self) -> Vec<SearchResult> {
        let mut out = Vec::new();
        while let Some(result) = self.receiver.recv().await {
            out.push(result);
        }
        out
    }
}

/// Paramètres du moteur, dérivés de la configuration.
#[derive(Debug, Clone)]
pub struct SsdpSettings {
    /// URL de base des ressources HTTP locales (`LOCATION`).
    pub base_url: Url,
    pub namespace: Namespace,
    pub server: ServerInfo,
    pub exact_type_match: bool,
}

pub struct SsdpEngine {
    registry: Arc<Registry>,
    transport: Arc<dyn DatagramTransport>,
    retriever: Arc<dyn DescriptorRetriever>,
    settings: SsdpSettings,
    receive_loop: Mutex<Option<AbortHandle>>,
}

impl std::fmt::Debug for SsdpEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SsdpEngine")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl SsdpEngine {
    pub fn new(
        registry: Arc<Registry>,
        transport: Arc<dyn DatagramTransport>,
        retriever: Arc<dyn DescriptorRetriever>,
        settings: SsdpSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            transport,
            retriever,
            settings,
            receive_loop: Mutex::new(None),
        })
    }

    /// URL du descripteur d'un device local.
    pub fn location(&self, device: &Device) -> Url {
        let ns = &self.settings.namespace;
        ns.url(&self.settings.base_url, &ns.device_descriptor_path(&device.udn))
    }

    // ----------------------------------------------------------------
    // Réception
    // ----------------------------------------------------------------

    /// Lance la boucle de réception ; un appel répété remplace la tâche.
    pub fn spawn_receive_loop(self: &Arc<Self>) {
        let engine: Weak<Self> = Arc::downgrade(self);
        let transport = self.transport.clone();
        let task = tokio::spawn(async move {
            loop {
                match transport.receive().await {
                    Ok(datagram) => {
                        let Some(engine) = engine.upgrade() else {
                            break;
                        };
                        engine.handle_datagram(datagram);
                    }
                    Err(e) => {
                        warn!("❌ SSDP read error: {}", e);
                        sleep(RECEIVE_RETRY_DELAY).await;
                    }
                }
            }
        });
        if let Some(previous) = self.receive_loop.lock().replace(task.abort_handle()) {
            previous.abort();
        }
    }

    pub fn stop(&self) {
        if let Some(handle) = self.receive_loop.lock().take() {
            handle.abort();
        }
    }

    /// Traite un datagramme reçu. Ne bloque jamais : les réponses et les
    /// récupérations de description sont confiées à des tâches.
    pub fn handle_datagram(self: &Arc<Self>, datagram: ReceivedDatagram) {
        let msg = match read_datagram(&datagram.data) {
            Ok(msg) => msg,
            Err(e) => {
                debug!("Dropping malformed datagram from {}: {}", datagram.source, e);
                return;
            }
        };

        match &msg.operation {
            Operation::Request {
                method: Method::Notify,
                ..
            } => self.on_notify(&msg, &datagram),
            Operation::Request {
                method: Method::MSearch,
                ..
            } => self.on_search(&msg, datagram.source),
            Operation::Response { status: 200, .. } => self.on_search_response(&msg, &datagram),
            other => trace!("Ignoring SSDP message from {}: {:?}", datagram.source, other),
        }
    }

    fn identity(msg: &UpnpMessage, datagram: &ReceivedDatagram) -> Option<(Usn, RemoteDeviceIdentity)> {
        let Some(usn) = msg.headers.usn() else {
            trace!("SSDP message from {} has no USN, ignoring", datagram.source);
            return None;
        };
        let Some(location) = msg.headers.location() else {
            trace!("SSDP message from {} has no LOCATION, ignoring", datagram.source);
            return None;
        };
        let identity = RemoteDeviceIdentity {
            udn: usn.udn.clone(),
            max_age: msg.headers.max_age().copied().unwrap_or(DEFAULT_MAX_AGE),
            location: location.clone(),
            discovered_on: datagram.local,
        };
        Some((usn.clone(), identity))
    }

    fn on_notify(self: &Arc<Self>, msg: &UpnpMessage, datagram: &ReceivedDatagram) {
        match msg.headers.nts() {
            Some(NotificationSubtype::Alive) => {
                if let Some((_, identity)) = Self::identity(msg, datagram) {
                    self.sighting(identity);
                }
            }
            Some(NotificationSubtype::ByeBye) => {
                let Some(usn) = msg.headers.usn() else {
                    trace!("byebye from {} without USN", datagram.source);
                    return;
                };
                if self.registry.remote_identity(&usn.udn).is_some() {
                    debug!("👋 byebye from {}", usn);
                    self.registry.remove_device(&usn.udn);
                }
            }
            other => trace!("Unhandled NTS {:?} from {}", other, datagram.source),
        }
    }

    fn sighting(self: &Arc<Self>, identity: RemoteDeviceIdentity) {
        if self.registry.add_remote_device(identity.clone()) == RemoteSighting::New {
            self.spawn_retrieval(identity);
        }
    }

    fn spawn_retrieval(self: &Arc<Self>, identity: RemoteDeviceIdentity) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            match engine.retriever.retrieve(&identity).await {
                Ok(device) => {
                    engine.registry.set_remote_description(&identity.udn, device);
                }
                Err(e) => {
                    warn!(
                        "❌ Failed to describe {} at {}: {}",
                        identity.udn, identity.location, e
                    );
                    engine.registry.retrieval_failed(&identity.udn);
                }
            }
        });
    }

    fn on_search(&self, msg: &UpnpMessage, source: SocketAddr) {
        if msg.headers.man().map(String::as_str) != Some("ssdp:discover") {
            trace!("M-SEARCH from {} without MAN ssdp:discover, ignoring", source);
            return;
        }
        let Some(st) = msg.headers.st() else {
            trace!("M-SEARCH from {} missing ST header, ignoring", source);
            return;
        };
        let mx = msg.headers.mx().copied().unwrap_or(1);
        debug!("M-SEARCH received from {} with ST={} MX={}", source, st, mx);

        let mut responses = Vec::new();
        for device in self.registry.local_devices() {
            let location = self.location(&device);
            for (target, usn) in match_search_target(&device, st, self.settings.exact_type_match) {
                responses.push(messages::search_response(
                    &target,
                    &usn,
                    &location,
                    device.max_age(),
                    &self.settings.server,
                ));
            }
        }

        let max_delay = u64::from(mx) * 1000;
        let mut rng = rand::rng();
        for response in responses {
            let delay = Duration::from_millis(rng.random_range(0..=max_delay));
            let transport = self.transport.clone();
            tokio::spawn(async move {
                sleep(delay).await;
                let usn = response.headers.usn().map(ToString::to_string).unwrap_or_default();
                match transport.send(&write_datagram(&response), source).await {
                    Ok(_) => info!("✅ M-SEARCH response sent to {} (USN={})", source, usn),
                    Err(e) => warn!("❌ Failed to send M-SEARCH response to {}: {}", source, e),
                }
            });
        }
    }

    fn on_search_response(self: &Arc<Self>, msg: &UpnpMessage, datagram: &ReceivedDatagram) {
        let Some(target) = msg.headers.st() else {
            trace!("M-SEARCH response from {} missing ST header, ignoring", datagram.source);
            return;
        };
        let Some((usn, identity)) = Self::identity(msg, datagram) else {
            return;
        };
        let result = SearchResult {
            target: target.clone(),
            usn,
            location: identity.location.clone(),
            max_age: identity.max_age,
            server: msg.headers.server().cloned(),
            source: datagram.source,
        };
        self.sighting(identity);
        let delivered = self.registry.deliver_search_result(&result, Instant::now());
        trace!("Search response {} delivered to {} search(es)", result.usn, delivered);
    }

    // ----------------------------------------------------------------
    // Annonces
    // ----------------------------------------------------------------

    /// Enregistre un device local, l'annonce et programme ses ré-annonces.
    pub fn publish(self: &Arc<Self>, device: Device) -> Result<Arc<Device>, RegistrationError> {
        let device = self.registry.add_local_device(device)?;
        let interval = advertisement_interval(device.max_age());
        let engine = Arc::downgrade(self);
        let advertised = device.clone();
        let task = tokio::spawn(async move {
            let mut periodic = false;
            loop {
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                if engine.registry.local_device(&advertised.udn).is_none() {
                    break;
                }
                engine.announce(&advertised, periodic).await;
                drop(engine);
                periodic = true;
                sleep(interval).await;
            }
        });
        self.registry
            .register_local_advertisement(&device.udn, task.abort_handle());
        Ok(device)
    }

    /// Retire un device local puis envoie ses byebye.
    pub async fn withdraw(&self, udn: &Udn) -> Option<Arc<Device>> {
        self.registry.local_device(udn)?;
        match self.registry.remove_device(udn)? {
            RemovedDevice::Local(device) => {
                self.send_byebye(&device).await;
                Some(device)
            }
            RemovedDevice::Remote { .. } => None,
        }
    }

    pub async fn announce(&self, device: &Device, periodic: bool) {
        let location = self.location(device);
        let target = ssdp_multicast_target();
        for (nt, usn) in advertisements(device) {
            let msg = messages::alive(&nt, &usn, &location, device.max_age(), &self.settings.server);
            match self.transport.send(&write_datagram(&msg), target).await {
                Ok(_) if periodic => debug!("✅ NOTIFY alive (periodic): {} (NT={})", usn, nt),
                Ok(_) => info!("✅ NOTIFY alive: {} (NT={})", usn, nt),
                Err(e) => warn!("❌ Failed to send NOTIFY alive for {}: {}", usn, e),
            }
        }
    }

    pub async fn send_byebye(&self, device: &Device) {
        let target = ssdp_multicast_target();
        for (nt, usn) in advertisements(device) {
            let msg = messages::byebye(&nt, &usn);
            match self.transport.send(&write_datagram(&msg), target).await {
                Ok(_) => info!("👋 NOTIFY byebye: {} (NT={})", usn, nt),
                Err(e) => warn!("❌ Failed to send NOTIFY byebye for {}: {}", usn, e),
            }
        }
    }

    // ----------------------------------------------------------------
    // Recherche active
    // ----------------------------------------------------------------

    /// Envoie un `M-SEARCH` multicast et retourne immédiatement.
    ///
    /// Les réponses arrivées dans les `mx` secondes suivantes sont remises au
    /// [`SearchHandle`] ; les plus tardives ne mettent à jour que le registre.
    pub async fn search(&self, target: NotificationTarget, mx: u32) -> Result<SearchHandle, TransportFailure> {
        let mx = mx.clamp(1, MAX_MX);
        let window = Duration::from_secs(u64::from(mx));
        let (sink, receiver) = mpsc::unbounded_channel();
        let id = self.registry.add_search(target.clone(), Instant::now() + window, sink);

        let registry = self.registry.clone();
        tokio::spawn(async move {
            sleep(window).await;
            registry.remove_search(id);
        });

        let msg = messages::search(&target, mx, &self.settings.server);
        if let Err(e) = self.transport.send(&write_datagram(&msg), ssdp_multicast_target()).await {
            warn!("❌ Failed to send M-SEARCH: {}", e);
            self.registry.remove_search(id);
            return Err(e);
        }
        info!("📤 M-SEARCH sent (ST={}, MX={})", target, mx);
        Ok(SearchHandle { receiver })
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::errors::DescriptorError;
    use crate::model::{DeviceDetails, DeviceType};
    use crate::transport::memory::MemoryDatagramTransport;

    struct NoDescription;

    #[async_trait]
    impl DescriptorRetriever for NoDescription {
        async fn retrieve(&self, _identity: &RemoteDeviceIdentity) -> Result<Device, DescriptorError> {
            Err(DescriptorError::Invalid("unreachable".to_string()))
        }
    }

    fn engine(transport: Arc<MemoryDatagramTransport>) -> Arc<SsdpEngine> {
        SsdpEngine::new(
            Arc::new(Registry::new()),
            transport,
            Arc::new(NoDescription),
            SsdpSettings {
                base_url: Url::parse("http://10.0.0.2:8080/").unwrap(),
                namespace: Namespace::default(),
                server: ServerInfo::new("Linux", "6.1", "PMOMusic", "0.1"),
                exact_type_match: false,
            },
        )
    }

    fn local_device() -> Device {
        Device::builder(
            Udn::new("local-1").unwrap(),
            DeviceType::new("schemas-upnp-org", "MediaRenderer", 1),
            DeviceDetails::new("Salon", "PMOMusic", "Renderer"),
        )
        .build_local(1800)
        .unwrap()
    }

    fn datagram(text: &str) -> ReceivedDatagram {
        ReceivedDatagram {
            data: text.as_bytes().to_vec(),
            source: "192.168.1.50:1900".parse().unwrap(),
            local: None,
        }
    }

    #[tokio::test]
    async fn test_malformed_datagram_is_dropped() {
        let engine = engine(Arc::new(MemoryDatagramTransport::new()));
        engine.handle_datagram(datagram("garbage"));
        engine.handle_datagram(datagram(
            "NOTIFY * HTTP/1.1\r\nHOST: 239.255.255.250:1900\r\nCACHE-CONTROL: max-age=100\r\n\
             LOCATION: http://192.168.1.50/d.xml\r\nNT: upnp:rootdevice\r\nNTS: ssdp:alive\r\n\
             USN: uuid:remote-1::upnp:rootdevice\r\n\r\n",
        ));
        assert!(engine.registry.remote_identity(&Udn::new("remote-1").unwrap()).is_some());
    }

    #[tokio::test]
    async fn test_byebye_never_removes_local_device() {
        let engine = engine(Arc::new(MemoryDatagramTransport::new()));
        engine.registry.add_local_device(local_device()).unwrap();
        engine.handle_datagram(datagram(
            "NOTIFY * HTTP/1.1\r\nHOST: 239.255.255.250:1900\r\nNT: upnp:rootdevice\r\n\
             NTS: ssdp:byebye\r\nUSN: uuid:local-1::upnp:rootdevice\r\n\r\n",
        ));
        assert_eq!(engine.registry.local_devices().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_response_is_delayed_within_mx() {
        let transport = Arc::new(MemoryDatagramTransport::new());
        let engine = engine(transport.clone());
        engine.registry.add_local_device(local_device()).unwrap();

        engine.handle_datagram(datagram(
            "M-SEARCH * HTTP/1.1\r\nHOST: 239.255.255.250:1900\r\nMAN: \"ssdp:discover\"\r\n\
             MX: 2\r\nST: upnp:rootdevice\r\n\r\n",
        ));
        assert!(transport.sent().is_empty());

        sleep(Duration::from_millis(2001)).await;
        let sent = transport.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].destination, "192.168.1.50:1900".parse().unwrap());
        let text = String::from_utf8(sent[0].data.clone()).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("LOCATION: http://10.0.0.2:8080/upnp/dev/local-1/desc.xml\r\n"));
    }

    #[tokio::test]
    async fn test_publish_then_withdraw() {
        let transport = Arc::new(MemoryDatagramTransport::new());
        let engine = engine(transport.clone());
        engine.publish(local_device()).unwrap();
        sleep(Duration::from_millis(20)).await;

        let alive = transport.take_sent();
        // rootdevice + uuid + type
        assert_eq!(alive.len(), 3);
        assert!(alive.iter().all(|d| d.destination == ssdp_multicast_target()));

        let removed = engine.withdraw(&Udn::new("local-1").unwrap()).await;
        assert!(removed.is_some());
        let byebye = transport.take_sent();
        assert_eq!(byebye.len(), 3);
        assert!(
            byebye
                .iter()
                .all(|d| String::from_utf8_lossy(&d.data).contains("NTS: ssdp:byebye"))
        );
        assert!(engine.registry.local_devices().is_empty());
    }
}
