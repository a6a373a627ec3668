//! # Pile UPnP
//!
//! [`UpnpStack`] assemble le registre, SSDP, le contrôle SOAP et GENA autour
//! d'une configuration et de deux transports.
//!
//! ## Fonctionnalités
//!
//! - ✅ Publication et retrait de devices locaux (annonces SSDP)
//! - ✅ Recherche active et découverte passive des devices distants
//! - ✅ Invocation d'actions distantes avec délai d'attente
//! - ✅ Abonnements aux évènements distants
//! - ✅ Traitement des requêtes HTTP entrantes : descripteurs, contrôle,
//!   `SUBSCRIBE`/`UNSUBSCRIBE`, `NOTIFY` sur nos callbacks
//!
//! ## Exemple
//!
//! ```rust,no_run
//! use pmoupnpcore::UpnpConfig;
//! use pmoupnpcore::stack::UpnpStack;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = UpnpConfig::load(None, std::env::vars())?;
//! let stack = UpnpStack::bind(config)?;
//! stack.startup();
//! // ...
//! stack.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::config::UpnpConfig;
use crate::descriptor::{DescriptorBinder, HttpDescriptorRetriever, XmlDescriptorBinder, serve_descriptor};
use crate::errors::{ControlError, EventingError, RegistrationError, TransportFailure};
use crate::gena::{EventPublisher, EventSubscriber, RemoteSubscription, SubscriptionCallback};
use crate::message::{HeaderValue, Method, NotificationTarget, UpnpMessage};
use crate::model::{ArgumentValues, Device, Service, Udn};
use crate::namespace::{Namespace, Resource};
use crate::registry::Registry;
use crate::soap::{ActionInvocation, ControlPoint, serve_control};
use crate::ssdp::{SearchHandle, SsdpEngine, SsdpSettings};
use crate::transport::{DatagramTransport, HttpStreamClient, StreamClient, UdpDatagramTransport};

pub struct UpnpStack {
    config: UpnpConfig,
    registry: Arc<Registry>,
    namespace: Namespace,
    binder: Arc<dyn DescriptorBinder>,
    ssdp: Arc<SsdpEngine>,
    control: ControlPoint,
    publisher: EventPublisher,
    subscriber: Arc<EventSubscriber>,
}

impl std::fmt::Debug for UpnpStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpnpStack")
            .field("namespace", &self.namespace)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl UpnpStack {
    /// Construit la pile sans rien lancer ; voir [`UpnpStack::startup`].
    pub fn new(
        config: UpnpConfig,
        datagram: Arc<dyn DatagramTransport>,
        stream: Arc<dyn StreamClient>,
    ) -> Result<Self> {
        let base_url = config.base_url()?;
        let namespace = Namespace::new(&config.server.path_prefix);
        let server = config.server_info();
        let registry = Arc::new(Registry::new());
        let binder: Arc<dyn DescriptorBinder> = Arc::new(XmlDescriptorBinder);

        let retriever = Arc::new(HttpDescriptorRetriever::new(
            stream.clone(),
            binder.clone(),
            server.clone(),
        ));
        let ssdp = SsdpEngine::new(
            registry.clone(),
            datagram,
            retriever,
            SsdpSettings {
                base_url: base_url.clone(),
                namespace: namespace.clone(),
                server: server.clone(),
                exact_type_match: config.ssdp.exact_device_type_match,
            },
        );
        let control = ControlPoint::new(stream.clone(), server.clone());
        let publisher = EventPublisher::new(registry.clone(), stream.clone(), config.gena.clone(), server.clone());
        let subscriber = EventSubscriber::new(
            registry.clone(),
            stream,
            config.gena.clone(),
            server,
            base_url,
            namespace.clone(),
        );

        Ok(Self {
            config,
            registry,
            namespace,
            binder,
            ssdp,
            control,
            publisher,
            subscriber,
        })
    }

    /// Pile sur les transports réseau par défaut (UDP multicast, reqwest).
    pub fn bind(config: UpnpConfig) -> Result<Self> {
        let local = match config.local_ip() {
            IpAddr::V4(ip) => ip,
            IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
        };
        let datagram = Arc::new(UdpDatagramTransport::bind(local)?);
        let stream = Arc::new(HttpStreamClient::new(config.control_timeout())?);
        Self::new(config, datagram, stream)
    }

    pub fn config(&self) -> &UpnpConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn ssdp(&self) -> &Arc<SsdpEngine> {
        &self.ssdp
    }

    /// Lance la maintenance du registre et la réception SSDP.
    pub fn startup(&self) {
        self.registry.start_maintenance(self.config.maintenance_interval());
        self.ssdp.spawn_receive_loop();
        info!("🚀 UPnP stack started ({})", self.config.server_info());
    }

    pub fn publish_device(&self, device: Device) -> Result<Arc<Device>, RegistrationError> {
        self.ssdp.publish(device)
    }

    pub async fn withdraw_device(&self, udn: &Udn) -> Option<Arc<Device>> {
        self.ssdp.withdraw(udn).await
    }

    /// `M-SEARCH` ; `mx` vaut `ssdp.search_mx` par défaut.
    pub async fn search(&self, target: NotificationTarget, mx: Option<u32>) -> Result<SearchHandle, TransportFailure> {
        self.ssdp
            .search(target, mx.unwrap_or(self.config.ssdp.search_mx))
            .await
    }

    /// Invoque une action distante, borné par `control.timeout_secs`.
    pub async fn execute(&self, invocation: ActionInvocation) -> Result<ArgumentValues, ControlError> {
        let action = invocation.action().name.clone();
        match tokio::time::timeout(self.config.control_timeout(), self.control.execute(invocation)).await {
            Ok(result) => result,
            Err(_) => Err(ControlError::Transport(TransportFailure(format!(
                "{} timed out after {:?}",
                action,
                self.config.control_timeout()
            )))),
        }
    }

    pub async fn subscribe(
        &self,
        service: &Service,
        handler: Arc<dyn SubscriptionCallback>,
    ) -> Result<Arc<RemoteSubscription>, EventingError> {
        self.subscriber.subscribe(service, handler).await
    }

    pub async fn renew(&self, subscription: &Arc<RemoteSubscription>) -> Result<(), EventingError> {
        self.subscriber.renew(subscription).await
    }

    pub async fn unsubscribe(&self, subscription: &Arc<RemoteSubscription>) -> Result<(), EventingError> {
        self.subscriber.unsubscribe(subscription).await
    }

    /// Répond à une requête HTTP entrante.
    ///
    /// `None` si le chemin n'appartient pas à l'espace de noms, ou désigne
    /// un descripteur non enregistré.
    pub async fn handle_stream_request(&self, request: &UpnpMessage) -> Option<UpnpMessage> {
        let method = request.method()?;
        let path = request.target()?.split('?').next().unwrap_or_default();
        let resource = self.namespace.resolve(path)?;
        debug!("{} {} -> {:?}", method, path, resource);

        let mut response = match (method, resource) {
            (Method::Get, resource @ (Resource::DeviceDescriptor(_) | Resource::ServiceDescriptor { .. })) => {
                serve_descriptor(&self.registry, self.binder.as_ref(), &self.namespace, &resource)?
            }
            (Method::Post, Resource::Control { udn, service_id }) => {
                match self.registry.local_service(&udn, &service_id) {
                    Some(service) => serve_control(&service, request).await,
                    None => UpnpMessage::response(404),
                }
            }
            (Method::Subscribe, Resource::EventSubscription { udn, service_id }) => {
                self.publisher.handle_subscribe(&udn, &service_id, request)
            }
            (Method::Unsubscribe, Resource::EventSubscription { .. }) => self.publisher.handle_unsubscribe(request),
            (Method::Notify, Resource::Callback(token)) => self.subscriber.handle_notify(&token, request),
            (method, resource) => {
                warn!("Unsupported {} on {:?}", method, resource);
                UpnpMessage::response(405)
            }
        };
        response
            .headers
            .set(HeaderValue::Server(self.config.server_info()));
        Some(response)
    }

    /// Met fin à nos abonnements, retire les devices locaux (byebye) puis
    /// arrête la réception SSDP.
    pub async fn shutdown(&self) {
        if let Ok(json) = self.registry.snapshot().to_json() {
            debug!("Registry before shutdown: {}", json);
        }
        for subscription in self.registry.remote_subscriptions() {
            if let Err(e) = self.subscriber.unsubscribe(&subscription).await {
                warn!("❌ Failed to unsubscribe {}: {}", subscription.token(), e);
            }
        }
        for device in self.registry.shutdown() {
            self.ssdp.send_byebye(&device).await;
        }
        self.ssdp.stop();
        info!("🛑 UPnP stack stopped");
    }
}
