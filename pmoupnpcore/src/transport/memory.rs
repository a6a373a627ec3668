//! Transports en mémoire, pour les tests et les simulations.
//!
//! [`MemoryDatagramTransport`] enregistre les datagrammes émis et reçoit ce
//! qu'on lui injecte ; [`MemoryStreamClient`] route chaque requête vers un
//! gestionnaire asynchrone, typiquement une autre instance de la pile.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use url::Url;

use super::{DatagramTransport, ReceivedDatagram, StreamClient};
use crate::errors::TransportFailure;
use crate::message::UpnpMessage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentDatagram {
    pub data: Vec<u8>,
    pub destination: SocketAddr,
}

pub struct MemoryDatagramTransport {
    sent: Mutex<Vec<SentDatagram>>,
    incoming_tx: mpsc::UnboundedSender<ReceivedDatagram>,
    incoming_rx: AsyncMutex<mpsc::UnboundedReceiver<ReceivedDatagram>>,
}

impl Default for MemoryDatagramTransport {
    fn default() -> Self {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        Self {
            sent: Mutex::new(Vec::new()),
            incoming_tx,
            incoming_rx: AsyncMutex::new(incoming_rx),
        }
    }
}

impl MemoryDatagramTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fait apparaître `data` comme reçu depuis `source`.
    pub fn inject(&self, data: &[u8], source: SocketAddr) {
        let _ = self.incoming_tx.send(ReceivedDatagram {
            data: data.to_vec(),
            source,
            local: None,
        });
    }

    pub fn sent(&self) -> Vec<SentDatagram> {
        self.sent.lock().clone()
    }

    /// Vide et retourne les datagrammes émis.
    pub fn take_sent(&self) -> Vec<SentDatagram> {
        std::mem::take(&mut *self.sent.lock())
    }
}

#[async_trait]
impl DatagramTransport for MemoryDatagramTransport {
    async fn send(&self, data: &[u8], destination: SocketAddr) -> Result<(), TransportFailure> {
        self.sent.lock().push(SentDatagram {
            data: data.to_vec(),
            destination,
        });
        Ok(())
    }

    async fn receive(&self) -> Result<ReceivedDatagram, TransportFailure> {
        self.incoming_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| TransportFailure("memory transport closed".to_string()))
    }
}

pub type StreamFuture = Pin<Box<dyn Future<Output = Result<UpnpMessage, TransportFailure>> + Send>>;
type StreamHandler = Arc<dyn Fn(UpnpMessage, Url) -> StreamFuture + Send + Sync>;

/// Client de flux qui passe chaque requête à une fonction.
#[derive(Clone)]
pub struct MemoryStreamClient {
    handler: Arc<Mutex<Option<StreamHandler>>>,
    requests: Arc<Mutex<Vec<(UpnpMessage, Url)>>>,
}

impl Default for MemoryStreamClient {
    fn default() -> Self {
        Self {
            handler: Arc::new(Mutex::new(None)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl MemoryStreamClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installe (ou remplace) le gestionnaire des requêtes.
    pub fn set_handler<F, Fut>(&self, handler: F)
    where
        F: Fn(UpnpMessage, Url) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<UpnpMessage, TransportFailure>> + Send + 'static,
    {
        let handler: StreamHandler = Arc::new(move |msg, url| Box::pin(handler(msg, url)));
        *self.handler.lock() = Some(handler);
    }

    /// Requêtes reçues, dans l'ordre d'émission.
    pub fn requests(&self) -> Vec<(UpnpMessage, Url)> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl StreamClient for MemoryStreamClient {
    async fn send(&self, request: UpnpMessage, url: &Url) -> Result<UpnpMessage, TransportFailure> {
        self.requests.lock().push((request.clone(), url.clone()));
        let handler = self.handler.lock().clone();
        match handler {
            Some(handler) => handler(request, url.clone()).await,
            None => Err(TransportFailure(format!("no route to {}", url))),
        }
    }
}
