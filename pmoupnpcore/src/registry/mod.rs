//! # Registre UPnP
//!
//! Le registre est la source de vérité de la pile : devices locaux et
//! distants, abonnements GENA (dans les deux rôles), recherches en cours et
//! tâches de ré-annonce.
//!
//! ## Fonctionnalités
//!
//! - ✅ Un device distant déjà connu est rafraîchi, jamais dupliqué
//! - ✅ Un UDN local en double est refusé ([`RegistrationError`])
//! - ✅ Balayage périodique des devices expirés (`now > last_seen + max_age`)
//! - ✅ Suppression idempotente
//! - ✅ Une seule section critique ; les listeners sont appelés après sa libération
//!
//! [`RegistrationError`]: crate::errors::RegistrationError

mod snapshot;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::errors::RegistrationError;
use crate::gena::{EndReason, LocalSubscription, RemoteSubscription};
use crate::message::NotificationTarget;
use crate::model::{Device, RemoteDeviceIdentity, Service, ServiceId, Udn};
use crate::ssdp::SearchResult;

pub use snapshot::{DeviceInfo, RegistrySnapshot, RemoteDeviceInfo, ServiceInfo};

/// Changement observable du registre.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    LocalDeviceAdded(Arc<Device>),
    LocalDeviceRemoved(Arc<Device>),
    /// Première annonce d'un device inconnu ; la description est en cours.
    RemoteDeviceDiscovered(Udn),
    /// Description d'un device distant récupérée.
    RemoteDeviceAdded(Arc<Device>),
    RemoteDeviceRemoved { udn: Udn, expired: bool },
}

pub trait RegistryListener: Send + Sync {
    fn on_event(&self, event: &RegistryEvent);
}

/// Effet d'une annonce distante sur le registre.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteSighting {
    /// Device inconnu : une récupération de la description doit être lancée.
    New,
    /// Device connu et décrit : échéance prolongée.
    Refreshed,
    /// Device connu, description en cours : échéance prolongée.
    Pending,
    /// L'UDN appartient à un device local (notre propre annonce).
    Ignored,
}

#[derive(Debug, Clone)]
pub enum RemovedDevice {
    Local(Arc<Device>),
    Remote { udn: Udn, device: Option<Arc<Device>> },
}

/// Intervalle de ré-annonce, strictement inférieur à la moitié de `max_age`.
pub fn advertisement_interval(max_age: u32) -> Duration {
    let half = max_age / 2;
    Duration::from_secs(u64::from(half.saturating_sub(1).max(1)))
}

struct RemoteEntry {
    identity: RemoteDeviceIdentity,
    device: Option<Arc<Device>>,
    deadline: Instant,
}

struct SearchEntry {
    target: NotificationTarget,
    deadline: Instant,
    sink: mpsc::UnboundedSender<SearchResult>,
}

#[derive(Default)]
struct RegistryState {
    local: HashMap<Udn, Arc<Device>>,
    remote: HashMap<Udn, RemoteEntry>,
    /// UDN de tout device (racine ou embarqué) vers l'UDN de sa racine.
    roots: HashMap<Udn, Udn>,
    advertisements: HashMap<Udn, AbortHandle>,
    local_subscriptions: HashMap<String, Arc<LocalSubscription>>,
    remote_subscriptions: HashMap<String, Arc<RemoteSubscription>>,
    /// Abonnements sortants dont la réponse SUBSCRIBE n'est pas encore arrivée,
    /// indexés par le jeton de leur URL de callback.
    pending_subscriptions: HashMap<String, Arc<RemoteSubscription>>,
    searches: HashMap<u64, SearchEntry>,
}

impl RegistryState {
    fn root_of(&self, udn: &Udn) -> Udn {
        self.roots.get(udn).cloned().unwrap_or_else(|| udn.clone())
    }

    fn unindex(&mut self, device: &Device) {
        for udn in device.all_udns() {
            self.roots.remove(&udn);
        }
    }

    fn index(&mut self, device: &Device) {
        for udn in device.all_udns() {
            self.roots.insert(udn, device.udn.clone());
        }
    }
}

/// Registre partagé ; toutes les mutations passent par un unique verrou.
pub struct Registry {
    state: Mutex<RegistryState>,
    listeners: Mutex<Vec<Arc<dyn RegistryListener>>>,
    maintenance: Mutex<Option<AbortHandle>>,
    next_search: AtomicU64,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Registry")
            .field("local", &state.local.len())
            .field("remote", &state.remote.len())
            .field("local_subscriptions", &state.local_subscriptions.len())
            .field("remote_subscriptions", &state.remote_subscriptions.len())
            .finish()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            listeners: Mutex::new(Vec::new()),
            maintenance: Mutex::new(None),
            next_search: AtomicU64::new(1),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn RegistryListener>) {
        self.listeners.lock().push(listener);
    }

    fn notify(&self, events: Vec<RegistryEvent>) {
        if events.is_empty() {
            return;
        }
        let listeners: Vec<_> = self.listeners.lock().clone();
        for event in &events {
            for listener in &listeners {
                listener.on_event(event);
            }
        }
    }

    // ----------------------------------------------------------------
    // Devices locaux
    // ----------------------------------------------------------------

    /// Enregistre un device local et tous ses devices embarqués.
    pub fn add_local_device(&self, device: Device) -> Result<Arc<Device>, RegistrationError> {
        let device = Arc::new(device);
        {
            let mut state = self.state.lock();
            if let Some(dup) = device
                .all_udns()
                .into_iter()
                .find(|u| state.roots.contains_key(u) || state.remote.contains_key(u))
            {
                return Err(RegistrationError::DuplicateUdn(dup.to_string()));
            }
            state.index(&device);
            state.local.insert(device.udn.clone(), device.clone());
        }
        info!("✅ Local device {} registered ({})", device.udn, device.details.friendly_name);
        self.notify(vec![RegistryEvent::LocalDeviceAdded(device.clone())]);
        Ok(device)
    }

    /// Device local racine contenant `udn`.
    pub fn local_device(&self, udn: &Udn) -> Option<Arc<Device>> {
        let state = self.state.lock();
        state.local.get(&state.root_of(udn)).cloned()
    }

    pub fn local_devices(&self) -> Vec<Arc<Device>> {
        self.state.lock().local.values().cloned().collect()
    }

    /// Service `service_id` du device local `udn` (racine ou embarqué).
    pub fn local_service(&self, udn: &Udn, service_id: &ServiceId) -> Option<Service> {
        let root = self.local_device(udn)?;
        root.find_device(udn)?.find_service(service_id).cloned()
    }

    pub fn register_local_advertisement(&self, udn: &Udn, handle: AbortHandle) {
        if let Some(previous) = self.state.lock().advertisements.insert(udn.clone(), handle) {
            previous.abort();
        }
    }

    pub fn unregister_local_advertisement(&self, udn: &Udn) {
        if let Some(handle) = self.state.lock().advertisements.remove(udn) {
            debug!("Stopping advertisement of {}", udn);
            handle.abort();
        }
    }

    // ----------------------------------------------------------------
    // Devices distants
    // ----------------------------------------------------------------

    /// Enregistre ou rafraîchit un device distant annoncé.
    pub fn add_remote_device(&self, identity: RemoteDeviceIdentity) -> RemoteSighting {
        let deadline = Instant::now() + Duration::from_secs(u64::from(identity.max_age));
        let sighting = {
            let mut state = self.state.lock();
            let root = state.root_of(&identity.udn);
            if state.local.contains_key(&root) {
                return RemoteSighting::Ignored;
            }
            match state.remote.get_mut(&root) {
                Some(entry) => {
                    entry.deadline = deadline;
                    entry.identity.max_age = identity.max_age;
                    if entry.device.is_some() {
                        RemoteSighting::Refreshed
                    } else {
                        RemoteSighting::Pending
                    }
                }
                None => {
                    state.remote.insert(
                        root,
                        RemoteEntry {
                            identity: identity.clone(),
                            device: None,
                            deadline,
                        },
                    );
                    RemoteSighting::New
                }
            }
        };

        trace!("Remote device {}: {:?}", identity.udn, sighting);
        if sighting == RemoteSighting::New {
            info!("🔎 New remote device {} at {}", identity.udn, identity.location);
            self.notify(vec![RegistryEvent::RemoteDeviceDiscovered(identity.udn)]);
        }
        sighting
    }

    /// Attache la description récupérée à l'entrée créée par l'annonce de
    /// `sighted` (racine ou device embarqué annoncé séparément).
    ///
    /// Retourne `false` si le device a disparu entre-temps (byebye, expiration).
    pub fn set_remote_description(&self, sighted: &Udn, device: Device) -> bool {
        let device = Arc::new(device);
        {
            let mut state = self.state.lock();
            let Some(mut entry) = state.remote.remove(sighted) else {
                debug!("Dropping description of vanished device {}", sighted);
                return false;
            };
            // Les autres devices de l'arbre annoncés séparément fusionnent dans la racine
            for udn in device.all_udns() {
                if let Some(other) = state.remote.remove(&udn) {
                    entry.deadline = entry.deadline.max(other.deadline);
                }
            }
            entry.identity.udn = device.udn.clone();
            entry.device = Some(device.clone());
            state.index(&device);
            state.remote.insert(device.udn.clone(), entry);
        }
        info!(
            "✅ Remote device {} described ({})",
            device.udn, device.details.friendly_name
        );
        self.notify(vec![RegistryEvent::RemoteDeviceAdded(device)]);
        true
    }

    /// Oublie un device dont la description n'a pas pu être obtenue ; la
    /// prochaine annonce relancera la récupération.
    pub fn retrieval_failed(&self, udn: &Udn) {
        let mut state = self.state.lock();
        if state.remote.get(udn).is_some_and(|e| e.device.is_none()) {
            state.remote.remove(udn);
        }
    }

    pub fn remote_device(&self, udn: &Udn) -> Option<Arc<Device>> {
        let state = self.state.lock();
        state.remote.get(&state.root_of(udn)).and_then(|e| e.device.clone())
    }

    pub fn remote_devices(&self) -> Vec<Arc<Device>> {
        self.state
            .lock()
            .remote
            .values()
            .filter_map(|e| e.device.clone())
            .collect()
    }

    pub fn remote_identity(&self, udn: &Udn) -> Option<RemoteDeviceIdentity> {
        let state = self.state.lock();
        state.remote.get(&state.root_of(udn)).map(|e| e.identity.clone())
    }

    // ----------------------------------------------------------------
    // Suppression et expiration
    // ----------------------------------------------------------------

    /// Supprime immédiatement le device racine contenant `udn`.
    ///
    /// Idempotent : un UDN absent ne fait rien. Les abonnements liés aux
    /// services du device prennent fin avec `DEVICE_SHUTDOWN`.
    pub fn remove_device(&self, udn: &Udn) -> Option<RemovedDevice> {
        let (removed, local_subs, remote_subs) = {
            let mut state = self.state.lock();
            let root = state.root_of(udn);
            Self::remove_locked(&mut state, &root)?
        };
        self.finish_removal(&removed, local_subs, remote_subs, false);
        Some(removed)
    }

    #[allow(clippy::type_complexity)]
    fn remove_locked(
        state: &mut RegistryState,
        root: &Udn,
    ) -> Option<(RemovedDevice, Vec<Arc<LocalSubscription>>, Vec<Arc<RemoteSubscription>>)> {
        if let Some(device) = state.local.remove(root) {
            state.unindex(&device);
            if let Some(handle) = state.advertisements.remove(root) {
                handle.abort();
            }
            let udns = device.all_udns();
            let subs: Vec<_> = state
                .local_subscriptions
                .values()
                .filter(|s| udns.contains(s.device_udn()))
                .cloned()
                .collect();
            for sub in &subs {
                state.local_subscriptions.remove(sub.sid());
            }
            return Some((RemovedDevice::Local(device), subs, Vec::new()));
        }

        let entry = state.remote.remove(root)?;
        let udns = match &entry.device {
            Some(device) => {
                state.unindex(device);
                device.all_udns()
            }
            None => vec![root.clone()],
        };
        let subs: Vec<_> = state
            .remote_subscriptions
            .values()
            .chain(state.pending_subscriptions.values())
            .filter(|s| udns.contains(s.device_udn()))
            .cloned()
            .collect();
        state.remote_subscriptions.retain(|_, s| !udns.contains(s.device_udn()));
        state.pending_subscriptions.retain(|_, s| !udns.contains(s.device_udn()));
        Some((
            RemovedDevice::Remote {
                udn: root.clone(),
                device: entry.device,
            },
            Vec::new(),
            subs,
        ))
    }

    fn finish_removal(
        &self,
        removed: &RemovedDevice,
        local_subs: Vec<Arc<LocalSubscription>>,
        remote_subs: Vec<Arc<RemoteSubscription>>,
        expired: bool,
    ) {
        for sub in local_subs {
            sub.end(EndReason::DeviceShutdown);
        }
        for sub in remote_subs {
            sub.end(EndReason::DeviceShutdown, None);
        }
        let event = match removed {
            RemovedDevice::Local(device) => {
                info!("Local device {} removed", device.udn);
                RegistryEvent::LocalDeviceRemoved(device.clone())
            }
            RemovedDevice::Remote { udn, .. } => {
                info!("Remote device {} removed{}", udn, if expired { " (expired)" } else { "" });
                RegistryEvent::RemoteDeviceRemoved {
                    udn: udn.clone(),
                    expired,
                }
            }
        };
        self.notify(vec![event]);
    }

    /// Retire les devices distants expirés, les abonnements servis échus et
    /// les recherches terminées. Retourne le nombre de devices retirés.
    pub fn sweep(&self, now: Instant) -> usize {
        let (removed, expired_subs) = {
            let mut state = self.state.lock();

            let expired: Vec<Udn> = state
                .remote
                .iter()
                .filter(|(_, e)| now > e.deadline)
                .map(|(udn, _)| udn.clone())
                .collect();
            let mut removed = Vec::new();
            for udn in &expired {
                removed.extend(Self::remove_locked(&mut state, udn));
            }

            let expired_subs: Vec<_> = state
                .local_subscriptions
                .values()
                .filter(|s| s.is_expired(now))
                .cloned()
                .collect();
            for sub in &expired_subs {
                state.local_subscriptions.remove(sub.sid());
            }

            state.searches.retain(|_, s| now < s.deadline);
            (removed, expired_subs)
        };

        for sub in expired_subs {
            debug!("Subscription {} expired", sub.sid());
            sub.end(EndReason::NoSubscriber);
        }
        let count = removed.len();
        for (device, local_subs, remote_subs) in removed {
            self.finish_removal(&device, local_subs, remote_subs, true);
        }
        count
    }

    /// Lance le balayage périodique ; un appel répété remplace la tâche.
    pub fn start_maintenance(self: &Arc<Self>, interval: Duration) {
        let registry = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                registry.sweep(Instant::now());
            }
        });
        if let Some(previous) = self.maintenance.lock().replace(task.abort_handle()) {
            previous.abort();
        }
    }

    pub fn stop_maintenance(&self) {
        if let Some(handle) = self.maintenance.lock().take() {
            handle.abort();
        }
    }

    /// Arrête la maintenance et retire tous les devices locaux, retournés
    /// pour l'envoi des byebye.
    pub fn shutdown(&self) -> Vec<Arc<Device>> {
        self.stop_maintenance();
        let removed: Vec<_> = {
            let mut state = self.state.lock();
            let roots: Vec<Udn> = state.local.keys().cloned().collect();
            let mut removed = Vec::new();
            for udn in &roots {
                removed.extend(Self::remove_locked(&mut state, udn));
            }
            state.searches.clear();
            removed
        };

        let mut devices = Vec::new();
        for (device, local_subs, remote_subs) in removed {
            self.finish_removal(&device, local_subs, remote_subs, false);
            if let RemovedDevice::Local(d) = device {
                devices.push(d);
            }
        }
        devices
    }

    // ----------------------------------------------------------------
    // Abonnements
    // ----------------------------------------------------------------

    pub fn add_local_subscription(&self, subscription: Arc<LocalSubscription>) {
        self.state
            .lock()
            .local_subscriptions
            .insert(subscription.sid().to_string(), subscription);
    }

    pub fn local_subscription(&self, sid: &str) -> Option<Arc<LocalSubscription>> {
        self.state.lock().local_subscriptions.get(sid).cloned()
    }

    pub fn remove_local_subscription(&self, sid: &str) -> Option<Arc<LocalSubscription>> {
        self.state.lock().local_subscriptions.remove(sid)
    }

    pub fn add_pending_subscription(&self, token: &str, subscription: Arc<RemoteSubscription>) {
        self.state
            .lock()
            .pending_subscriptions
            .insert(token.to_string(), subscription);
    }

    pub fn pending_subscription(&self, token: &str) -> Option<Arc<RemoteSubscription>> {
        self.state.lock().pending_subscriptions.get(token).cloned()
    }

    /// Passe un abonnement sortant de « en attente » à « établi ».
    pub fn establish_remote_subscription(&self, token: &str, sid: &str) -> Option<Arc<RemoteSubscription>> {
        let mut state = self.state.lock();
        let sub = state.pending_subscriptions.remove(token)?;
        state.remote_subscriptions.insert(sid.to_string(), sub.clone());
        Some(sub)
    }

    pub fn remove_pending_subscription(&self, token: &str) -> Option<Arc<RemoteSubscription>> {
        self.state.lock().pending_subscriptions.remove(token)
    }

    pub fn remote_subscription(&self, sid: &str) -> Option<Arc<RemoteSubscription>> {
        self.state.lock().remote_subscriptions.get(sid).cloned()
    }

    pub fn remove_remote_subscription(&self, sid: &str) -> Option<Arc<RemoteSubscription>> {
        self.state.lock().remote_subscriptions.remove(sid)
    }

    pub fn remote_subscriptions(&self) -> Vec<Arc<RemoteSubscription>> {
        self.state.lock().remote_subscriptions.values().cloned().collect()
    }

    // ----------------------------------------------------------------
    // Recherches actives
    // ----------------------------------------------------------------

    pub fn add_search(
        &self,
        target: NotificationTarget,
        deadline: Instant,
        sink: mpsc::UnboundedSender<SearchResult>,
    ) -> u64 {
        let id = self.next_search.fetch_add(1, Ordering::Relaxed);
        self.state.lock().searches.insert(
            id,
            SearchEntry {
                target,
                deadline,
                sink,
            },
        );
        id
    }

    /// Ferme la recherche : son canal de résultats se termine.
    pub fn remove_search(&self, id: u64) {
        self.state.lock().searches.remove(&id);
    }

    /// Transmet une réponse aux recherches ouvertes dont la cible correspond.
    pub fn deliver_search_result(&self, result: &SearchResult, now: Instant) -> usize {
        let state = self.state.lock();
        let mut delivered = 0;
        for search in state.searches.values() {
            if now >= search.deadline || !crate::ssdp::search_accepts(&search.target, &result.target) {
                continue;
            }
            if search.sink.send(result.clone()).is_ok() {
                delivered += 1;
            } else {
                warn!("Search result sink closed before its window elapsed");
            }
        }
        delivered
    }

    // ----------------------------------------------------------------
    // Introspection
    // ----------------------------------------------------------------

    pub fn snapshot(&self) -> RegistrySnapshot {
        let now = Instant::now();
        let state = self.state.lock();
        let mut local_subscriptions: Vec<String> = state.local_subscriptions.keys().cloned().collect();
        local_subscriptions.sort();
        let mut remote_subscriptions: Vec<String> = state.remote_subscriptions.keys().cloned().collect();
        remote_subscriptions.sort();
        RegistrySnapshot {
            local_devices: state.local.values().map(|d| DeviceInfo::from_device(d)).collect(),
            remote_devices: state
                .remote
                .values()
                .map(|e| RemoteDeviceInfo {
                    udn: e.identity.udn.to_string(),
                    location: e.identity.location.to_string(),
                    max_age: e.identity.max_age,
                    expires_in: e.deadline.saturating_duration_since(now).as_secs(),
                    device: e.device.as_deref().map(DeviceInfo::from_device),
                })
                .collect(),
            local_subscriptions,
            remote_subscriptions,
            pending_searches: state.searches.len(),
        }
    }
}
