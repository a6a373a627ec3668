//! Rôle éditeur : abonnements reçus sur nos services locaux.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use url::Url;
use uuid::Uuid;

use super::moderation::Moderator;
use super::propertyset::write_property_set;
use super::subscription::{EndReason, SubscriptionLifecycle, SubscriptionState};
use crate::config::GenaConfig;
use crate::message::{
    HeaderValue, Method, NotificationSubtype, NotificationTarget, ServerInfo, SubscriptionTimeout, UpnpMessage,
    request_target,
};
use crate::model::{ServiceId, ServiceManager, StateChangeListener, StateVariable, Udn};
use crate::registry::Registry;
use crate::transport::StreamClient;
use crate::variable_types::StateValue;

/// Un évènement prêt à partir : sa clé est attribuée à la mise en file.
#[derive(Debug)]
struct Notification {
    key: u32,
    values: Vec<(String, StateValue)>,
}

struct PublisherState {
    lifecycle: SubscriptionLifecycle,
    granted: SubscriptionTimeout,
    deadline: Option<Instant>,
    next_key: u32,
    moderator: Moderator,
    listener: Option<u64>,
}

/// Abonnement d'un point de contrôle distant à l'un de nos services.
///
/// Les NOTIFY d'un abonnement partent d'une unique tâche qui vide une file :
/// jamais deux envois simultanés, clés toujours croissantes.
pub struct LocalSubscription {
    sid: String,
    device_udn: Udn,
    service_id: ServiceId,
    callbacks: Vec<Url>,
    variables: Vec<StateVariable>,
    manager: Arc<ServiceManager>,
    queue: mpsc::UnboundedSender<Notification>,
    worker: AbortHandle,
    runtime: Handle,
    state: Mutex<PublisherState>,
}

impl std::fmt::Debug for LocalSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSubscription")
            .field("sid", &self.sid)
            .field("device_udn", &self.device_udn)
            .field("service_id", &self.service_id)
            .field("state", &self.state.lock().lifecycle.state())
            .finish()
    }
}

struct ChangeForwarder(Weak<LocalSubscription>);

impl StateChangeListener for ChangeForwarder {
    fn on_state_change(&self, changes: &[(String, StateValue)]) {
        if let Some(sub) = self.0.upgrade() {
            sub.on_changes(changes);
        }
    }
}

/// Clé suivante ; 0 n'est utilisée que par l'évènement initial.
fn advance(key: u32) -> u32 {
    if key == u32::MAX { 1 } else { key + 1 }
}

fn deadline_for(granted: SubscriptionTimeout, now: Instant) -> Option<Instant> {
    match granted {
        SubscriptionTimeout::Seconds(n) => Some(now + Duration::from_secs(n as u64)),
        SubscriptionTimeout::Infinite => None,
    }
}

/// Durée accordée : la demande bornée à `[min, max]`, `infinite` valant `max`.
pub fn grant_duration(requested: Option<SubscriptionTimeout>, config: &GenaConfig) -> SubscriptionTimeout {
    let secs = match requested {
        Some(SubscriptionTimeout::Seconds(n)) => n,
        Some(SubscriptionTimeout::Infinite) => config.max_subscription_secs,
        None => config.default_subscription_secs,
    };
    SubscriptionTimeout::Seconds(secs.clamp(config.min_subscription_secs, config.max_subscription_secs))
}

impl LocalSubscription {
    /// Crée l'abonnement, branche son écoute sur `manager` et met en file
    /// l'évènement initial (clé 0, toutes les variables évènementielles).
    ///
    /// Doit être appelé depuis un runtime tokio.
    pub fn start(
        device_udn: Udn,
        service_id: ServiceId,
        callbacks: Vec<Url>,
        granted: SubscriptionTimeout,
        manager: Arc<ServiceManager>,
        variables: Vec<StateVariable>,
        client: Arc<dyn StreamClient>,
    ) -> Arc<Self> {
        let sid = format!("uuid:{}", Uuid::new_v4());
        let (queue, receiver) = mpsc::unbounded_channel();
        let runtime = Handle::current();
        let worker = runtime
            .spawn(deliver(sid.clone(), callbacks.clone(), receiver, client))
            .abort_handle();

        let now = Instant::now();
        let subscription = Arc::new(Self {
            sid,
            device_udn,
            service_id,
            callbacks,
            variables,
            manager: manager.clone(),
            queue,
            worker,
            runtime,
            state: Mutex::new(PublisherState {
                lifecycle: SubscriptionLifecycle::default(),
                granted,
                deadline: deadline_for(granted, now),
                next_key: 0,
                moderator: Moderator::default(),
                listener: None,
            }),
        });

        // L'écoute est branchée avant la lecture des valeurs initiales : un
        // changement concurrent attend ce verrou et part après la clé 0.
        {
            let mut state = subscription.state.lock();
            state.listener = Some(manager.add_listener(Arc::new(ChangeForwarder(Arc::downgrade(&subscription)))));
            let initial = manager.evented_values();
            state.moderator = Moderator::new(&initial, now);
            subscription.enqueue(&mut state, initial);
        }
        info!(
            "📬 Subscription {} to {} of {} ({})",
            subscription.sid, subscription.service_id, subscription.device_udn, granted
        );
        subscription
    }

    pub fn sid(&self) -> &str {
        &self.sid
    }

    pub fn device_udn(&self) -> &Udn {
        &self.device_udn
    }

    pub fn service_id(&self) -> &ServiceId {
        &self.service_id
    }

    pub fn callbacks(&self) -> &[Url] {
        &self.callbacks
    }

    pub fn granted(&self) -> SubscriptionTimeout {
        self.state.lock().granted
    }

    pub fn state(&self) -> SubscriptionState {
        self.state.lock().lifecycle.state()
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.state.lock().deadline.is_some_and(|d| now > d)
    }

    /// Prolonge l'abonnement ; `false` s'il a déjà pris fin.
    pub fn renew(&self, granted: SubscriptionTimeout) -> bool {
        let mut state = self.state.lock();
        if state.lifecycle.state().is_terminal() {
            return false;
        }
        state.granted = granted;
        state.deadline = deadline_for(granted, Instant::now());
        debug!("🔄 Subscription {} renewed ({})", self.sid, granted);
        true
    }

    /// Fin de l'abonnement : plus aucun NOTIFY ne part, en file ou retenu.
    pub fn end(&self, reason: EndReason) {
        let listener = {
            let mut state = self.state.lock();
            if !state.lifecycle.transition(SubscriptionState::Ended(reason)) {
                return;
            }
            state.listener.take()
        };
        if let Some(id) = listener {
            self.manager.remove_listener(id);
        }
        self.worker.abort();
        info!("📪 Subscription {} ended: {}", self.sid, reason);
    }

    fn enqueue(&self, state: &mut PublisherState, values: Vec<(String, StateValue)>) {
        let key = state.next_key;
        state.next_key = advance(key);
        if self.queue.send(Notification { key, values }).is_err() {
            warn!("❌ Delivery queue of {} is closed", self.sid);
        }
    }

    fn on_changes(self: &Arc<Self>, changes: &[(String, StateValue)]) {
        let mut state = self.state.lock();
        if state.lifecycle.state().is_terminal() {
            return;
        }
        let moderated = state.moderator.filter(changes, &self.variables, Instant::now());
        if !moderated.send.is_empty() {
            self.enqueue(&mut state, moderated.send);
        }
        if let Some(at) = moderated.flush_at {
            self.schedule_flush(&mut state, at);
        }
    }

    fn schedule_flush(self: &Arc<Self>, state: &mut PublisherState, at: Instant) {
        let generation = state.lifecycle.next_generation();
        let weak = Arc::downgrade(self);
        let handle = self
            .runtime
            .spawn(async move {
                tokio::time::sleep_until(at).await;
                if let Some(sub) = weak.upgrade() {
                    sub.flush(generation);
                }
            })
            .abort_handle();
        state.lifecycle.attach_timer(generation, handle);
    }

    fn flush(self: &Arc<Self>, generation: u64) {
        let mut state = self.state.lock();
        if !state.lifecycle.is_current(generation) {
            trace!("Stale moderation timer for {}", self.sid);
            return;
        }
        let moderated = state.moderator.flush(&self.variables, Instant::now());
        if !moderated.send.is_empty() {
            self.enqueue(&mut state, moderated.send);
        }
        if let Some(at) = moderated.flush_at {
            self.schedule_flush(&mut state, at);
        }
    }
}

async fn deliver(
    sid: String,
    callbacks: Vec<Url>,
    mut receiver: mpsc::UnboundedReceiver<Notification>,
    client: Arc<dyn StreamClient>,
) {
    while let Some(notification) = receiver.recv().await {
        let body = write_property_set(&notification.values);
        let mut delivered = false;
        for url in &callbacks {
            let request = UpnpMessage::request(Method::Notify, &request_target(url))
                .with_xml_body(body.clone())
                .with_header(HeaderValue::Nt(NotificationTarget::Event))
                .with_header(HeaderValue::Nts(NotificationSubtype::PropChange))
                .with_header(HeaderValue::Sid(sid.clone()))
                .with_header(HeaderValue::Seq(notification.key));
            match client.send(request, url).await {
                Ok(resp) if resp.is_success() => {
                    debug!(
                        "✅ NOTIFY {} SEQ={} ({} variable(s)) to {}",
                        sid,
                        notification.key,
                        notification.values.len(),
                        url
                    );
                    delivered = true;
                    break;
                }
                Ok(resp) => warn!("❌ NOTIFY {} to {} rejected: {:?}", sid, url, resp.status()),
                Err(e) => warn!("❌ Failed to send NOTIFY {} to {}: {}", sid, url, e),
            }
        }
        if !delivered {
            warn!("❌ NOTIFY {} SEQ={} not delivered", sid, notification.key);
        }
    }
}

/// Traite les `SUBSCRIBE` / `UNSUBSCRIBE` reçus sur nos chemins d'évènements.
pub struct EventPublisher {
    registry: Arc<Registry>,
    client: Arc<dyn StreamClient>,
    config: GenaConfig,
    server: ServerInfo,
}

impl EventPublisher {
    pub fn new(registry: Arc<Registry>, client: Arc<dyn StreamClient>, config: GenaConfig, server: ServerInfo) -> Self {
        Self {
            registry,
            client,
            config,
            server,
        }
    }

    fn accepted(&self, sid: &str, granted: SubscriptionTimeout) -> UpnpMessage {
        UpnpMessage::response(200)
            .with_header(HeaderValue::Sid(sid.to_string()))
            .with_header(HeaderValue::Timeout(granted))
            .with_header(HeaderValue::Server(self.server.clone()))
    }

    /// Nouvel abonnement (`CALLBACK` + `NT`) ou renouvellement (`SID` seul).
    pub fn handle_subscribe(&self, udn: &Udn, service_id: &ServiceId, request: &UpnpMessage) -> UpnpMessage {
        let headers = &request.headers;
        let granted = grant_duration(headers.timeout().copied(), &self.config);

        if let Some(sid) = headers.sid() {
            if headers.callback().is_some() || headers.nt().is_some() {
                return UpnpMessage::response(400);
            }
            return match self.registry.local_subscription(sid) {
                Some(sub) if sub.device_udn() == udn && sub.service_id() == service_id && sub.renew(granted) => {
                    self.accepted(sid, granted)
                }
                _ => {
                    debug!("Renewal for unknown subscription {}", sid);
                    UpnpMessage::response(412)
                }
            };
        }

        let callbacks = match (headers.nt(), headers.callback()) {
            (Some(NotificationTarget::Event), Some(urls)) if !urls.is_empty() => urls.clone(),
            _ => {
                debug!("SUBSCRIBE without CALLBACK or NT: upnp:event");
                return UpnpMessage::response(412);
            }
        };

        let Some(service) = self.registry.local_service(udn, service_id) else {
            return UpnpMessage::response(404);
        };
        let Some(local) = service.local_parts() else {
            return UpnpMessage::response(404);
        };

        let subscription = LocalSubscription::start(
            udn.clone(),
            service_id.clone(),
            callbacks,
            granted,
            local.manager.clone(),
            service.state_variables().to_vec(),
            self.client.clone(),
        );
        self.registry.add_local_subscription(subscription.clone());
        self.accepted(subscription.sid(), granted)
    }

    pub fn handle_unsubscribe(&self, request: &UpnpMessage) -> UpnpMessage {
        let headers = &request.headers;
        let Some(sid) = headers.sid() else {
            return UpnpMessage::response(412);
        };
        if headers.callback().is_some() || headers.nt().is_some() {
            return UpnpMessage::response(400);
        }
        match self.registry.remove_local_subscription(sid) {
            Some(sub) => {
                sub.end(EndReason::UnsubscribeComplete);
                UpnpMessage::response(200)
            }
            None => UpnpMessage::response(412),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TransportFailure;
    use crate::gena::read_property_set;
    use crate::transport::memory::MemoryStreamClient;
    use crate::variable_types::StateVarType;

    fn config() -> GenaConfig {
        GenaConfig {
            min_subscription_secs: 60,
            max_subscription_secs: 3600,
            default_subscription_secs: 1800,
            renewal_margin_secs: 60,
        }
    }

    #[test]
    fn test_grant_is_clamped() {
        let c = config();
        assert_eq!(grant_duration(Some(SubscriptionTimeout::Seconds(5)), &c), SubscriptionTimeout::Seconds(60));
        assert_eq!(grant_duration(Some(SubscriptionTimeout::Seconds(900)), &c), SubscriptionTimeout::Seconds(900));
        assert_eq!(grant_duration(Some(SubscriptionTimeout::Infinite), &c), SubscriptionTimeout::Seconds(3600));
        assert_eq!(grant_duration(None, &c), SubscriptionTimeout::Seconds(1800));
    }

    #[test]
    fn test_event_key_wraps_to_one() {
        assert_eq!(advance(0), 1);
        assert_eq!(advance(41), 42);
        assert_eq!(advance(u32::MAX), 1);
    }

    /// Dernière valeur de `Volume` reçue par `sid`, d'après la plus grande clé.
    fn last_volume(client: &MemoryStreamClient, sid: &str, variables: &[StateVariable]) -> Option<StateValue> {
        client
            .requests()
            .into_iter()
            .filter(|(m, _)| m.headers.sid().map(String::as_str) == Some(sid))
            .filter_map(|(m, _)| {
                let key = *m.headers.seq()?;
                let values = read_property_set(m.body_text()?, variables).ok()?;
                let volume = values.into_iter().find(|(n, _)| n == "Volume")?.1;
                Some((key, volume))
            })
            .max_by_key(|(key, _)| *key)
            .map(|(_, volume)| volume)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_change_during_start_reaches_subscriber() {
        let variables = vec![
            StateVariable::builder("Volume", StateVarType::UI2)
                .default_value("0")
                .build()
                .unwrap(),
        ];
        let manager = Arc::new(ServiceManager::new(&variables));
        let client = MemoryStreamClient::new();
        client.set_handler(|_, _| async { Ok::<_, TransportFailure>(UpnpMessage::response(200)) });

        let writer = {
            let manager = manager.clone();
            tokio::task::spawn_blocking(move || {
                for volume in 1..=400u16 {
                    manager.set_value("Volume", StateValue::UI2(volume)).unwrap();
                }
            })
        };
        let mut subscriptions = Vec::new();
        for _ in 0..20 {
            subscriptions.push(LocalSubscription::start(
                Udn::new("renderer-1").unwrap(),
                ServiceId::new("upnp-org", "RenderingControl"),
                vec![Url::parse("http://10.0.0.2:8081/upnp/cb/t").unwrap()],
                SubscriptionTimeout::Seconds(1800),
                manager.clone(),
                variables.clone(),
                Arc::new(client.clone()),
            ));
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();

        for subscription in &subscriptions {
            let mut delivered = None;
            for _ in 0..200 {
                delivered = last_volume(&client, subscription.sid(), &variables);
                if delivered == Some(StateValue::UI2(400)) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            assert_eq!(delivered, Some(StateValue::UI2(400)), "{}", subscription.sid());
        }
    }
}
