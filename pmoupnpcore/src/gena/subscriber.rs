//! Rôle abonné : nos abonnements aux services distants.
//!
//! Un abonnement est d'abord enregistré sous un jeton (celui de son URL de
//! callback), puis sous son SID dès la réponse au `SUBSCRIBE`. Un NOTIFY
//! arrivé entre les deux est mis de côté et rejoué à l'établissement.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};
use url::Url;
use uuid::Uuid;

use super::propertyset::read_property_set;
use super::subscription::{EndReason, SubscriptionLifecycle, SubscriptionState};
use crate::config::GenaConfig;
use crate::errors::{EventingError, SubscriptionFailure, SubscriptionFailureReason};
use crate::message::{
    HeaderValue, Method, NotificationSubtype, NotificationTarget, ServerInfo, SubscriptionTimeout, UpnpMessage,
    request_target,
};
use crate::model::{Service, StateVariable, Udn};
use crate::namespace::Namespace;
use crate::registry::Registry;
use crate::transport::StreamClient;
use crate::variable_types::StateValue;

/// Reçoit les évènements d'un abonnement. Toutes les méthodes sont optionnelles.
pub trait SubscriptionCallback: Send + Sync {
    fn established(&self, _sid: &str, _granted: SubscriptionTimeout) {}

    fn event_received(&self, _key: u32, _values: &[(String, StateValue)]) {}

    /// `missed` évènements manquent avant celui qui va être reçu.
    fn events_missed(&self, _missed: u32) {}

    fn ended(&self, _reason: EndReason, _failure: Option<&SubscriptionFailure>) {}
}

/// Verdict sur une clé d'évènement reçue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCheck {
    Accept { missed: u32 },
    Reject,
}

/// Compare `key` à la dernière clé acceptée.
///
/// Un abonnement neuf accepte toute clé. Ensuite seule une clé plus grande
/// est acceptée, sauf le passage de `u32::MAX` à 1.
pub fn check_event_key(last: Option<u32>, key: u32) -> KeyCheck {
    let Some(last) = last else {
        return KeyCheck::Accept { missed: 0 };
    };
    if last == u32::MAX && key == 1 {
        return KeyCheck::Accept { missed: 0 };
    }
    if key > last {
        KeyCheck::Accept {
            missed: key - last - 1,
        }
    } else {
        KeyCheck::Reject
    }
}

/// Délai avant renouvellement : `granted - min(margin, granted / 2)`, au
/// moins une seconde.
pub fn renewal_delay(granted: SubscriptionTimeout, margin_secs: u32) -> Option<Duration> {
    match granted {
        SubscriptionTimeout::Seconds(secs) => {
            let margin = margin_secs.min(secs / 2);
            Some(Duration::from_secs((secs - margin).max(1) as u64))
        }
        SubscriptionTimeout::Infinite => None,
    }
}

/// Nombre maximal de NOTIFY gardés en attendant le SID.
pub const EARLY_EVENT_CAPACITY: usize = 32;

type EarlyEvent = (String, u32, Vec<(String, StateValue)>);

/// NOTIFY reçus avant la réponse au `SUBSCRIBE` ; au-delà de la capacité,
/// le plus ancien est abandonné.
#[derive(Debug, Default)]
struct EarlyEvents(VecDeque<EarlyEvent>);

impl EarlyEvents {
    fn push(&mut self, event: EarlyEvent) {
        if self.0.len() == EARLY_EVENT_CAPACITY {
            if let Some((_, key, _)) = self.0.pop_front() {
                warn!("⚠️ Early NOTIFY buffer full, dropping SEQ={}", key);
            }
        }
        self.0.push_back(event);
    }

    fn drain(&mut self) -> VecDeque<EarlyEvent> {
        std::mem::take(&mut self.0)
    }
}

struct SubscriberState {
    lifecycle: SubscriptionLifecycle,
    sid: Option<String>,
    granted: Option<SubscriptionTimeout>,
    last_key: Option<u32>,
    early: EarlyEvents,
}

pub struct RemoteSubscription {
    token: String,
    device_udn: Udn,
    service: Service,
    callback_url: Url,
    handler: Arc<dyn SubscriptionCallback>,
    state: Mutex<SubscriberState>,
}

impl std::fmt::Debug for RemoteSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RemoteSubscription")
            .field("token", &self.token)
            .field("sid", &state.sid)
            .field("device_udn", &self.device_udn)
            .field("state", &state.lifecycle.state())
            .finish()
    }
}

impl RemoteSubscription {
    fn new(
        token: String,
        device_udn: Udn,
        service: Service,
        callback_url: Url,
        handler: Arc<dyn SubscriptionCallback>,
    ) -> Self {
        Self {
            token,
            device_udn,
            service,
            callback_url,
            handler,
            state: Mutex::new(SubscriberState {
                lifecycle: SubscriptionLifecycle::default(),
                sid: None,
                granted: None,
                last_key: None,
                early: EarlyEvents::default(),
            }),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn device_udn(&self) -> &Udn {
        &self.device_udn
    }

    pub fn service(&self) -> &Service {
        &self.service
    }

    pub fn callback_url(&self) -> &Url {
        &self.callback_url
    }

    pub fn sid(&self) -> Option<String> {
        self.state.lock().sid.clone()
    }

    pub fn granted(&self) -> Option<SubscriptionTimeout> {
        self.state.lock().granted
    }

    pub fn state(&self) -> SubscriptionState {
        self.state.lock().lifecycle.state()
    }

    fn variables(&self) -> &[StateVariable] {
        self.service.state_variables()
    }

    /// Fin de l'abonnement, notifiée une seule fois au callback.
    pub fn end(&self, reason: EndReason, failure: Option<SubscriptionFailure>) {
        if !self.state.lock().lifecycle.transition(SubscriptionState::Ended(reason)) {
            return;
        }
        match &failure {
            Some(f) => warn!("❌ Subscription {} ended: {}", self.token, f),
            None => info!("📪 Subscription {} ended: {}", self.token, reason),
        }
        let failure = failure.or_else(|| {
            reason
                .failure_reason()
                .map(|r| SubscriptionFailure::new(r, format!("subscription ended: {}", reason)))
        });
        self.handler.ended(reason, failure.as_ref());
    }

    /// Applique la règle des clés puis transmet au callback.
    pub fn accept_event(&self, sid: &str, key: u32, values: Vec<(String, StateValue)>) -> bool {
        let verdict = {
            let mut state = self.state.lock();
            if state.lifecycle.state().is_terminal() {
                return false;
            }
            let Some(current) = state.sid.as_deref() else {
                trace!("Buffering early NOTIFY SEQ={} for {}", key, self.token);
                state.early.push((sid.to_string(), key, values));
                return true;
            };
            if current != sid {
                return false;
            }
            let verdict = check_event_key(state.last_key, key);
            if verdict != KeyCheck::Reject {
                state.last_key = Some(key);
            }
            verdict
        };

        match verdict {
            KeyCheck::Reject => {
                warn!("❌ NOTIFY {} SEQ={} is a regression, dropped", sid, key);
                false
            }
            KeyCheck::Accept { missed } => {
                if missed > 0 {
                    warn!("⚠️ {} event(s) missed on {}", missed, sid);
                    self.handler.events_missed(missed);
                }
                self.handler.event_received(key, &values);
                true
            }
        }
    }

    fn established(self: &Arc<Self>, sid: &str, granted: SubscriptionTimeout, subscriber: &Arc<EventSubscriber>) {
        let early = {
            let mut state = self.state.lock();
            if state.lifecycle.state().is_terminal() {
                return;
            }
            state.sid = Some(sid.to_string());
            state.granted = Some(granted);
            state.last_key = None;
            state.early.drain()
        };
        info!("📬 Subscribed to {} of {}: {} ({})", self.service.service_id, self.device_udn, sid, granted);
        self.handler.established(sid, granted);
        for (early_sid, key, values) in early {
            self.accept_event(&early_sid, key, values);
        }
        self.schedule_renewal(granted, subscriber);
    }

    fn schedule_renewal(self: &Arc<Self>, granted: SubscriptionTimeout, subscriber: &Arc<EventSubscriber>) {
        let Some(delay) = renewal_delay(granted, subscriber.config.renewal_margin_secs) else {
            return;
        };
        let mut state = self.state.lock();
        let generation = state.lifecycle.next_generation();
        let weak_sub = Arc::downgrade(self);
        let weak_subscriber: Weak<EventSubscriber> = Arc::downgrade(subscriber);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let (Some(sub), Some(subscriber)) = (weak_sub.upgrade(), weak_subscriber.upgrade()) else {
                return;
            };
            if sub.begin_renewal(Some(generation)) {
                // Échec déjà enregistré sur l'abonnement.
                let _ = subscriber.send_renewal(&sub).await;
            }
        })
        .abort_handle();
        state.lifecycle.attach_timer(generation, handle);
    }

    /// Passe en `Renewing` si la minuterie `generation` est toujours la courante.
    fn begin_renewal(&self, generation: Option<u64>) -> bool {
        let mut state = self.state.lock();
        if generation.is_some_and(|g| !state.lifecycle.is_current(g)) {
            trace!("Stale renewal timer for {}", self.token);
            return false;
        }
        if state.lifecycle.state() != SubscriptionState::Established {
            return false;
        }
        if generation.is_some() {
            state.lifecycle.disarm();
        } else {
            state.lifecycle.cancel_timer();
        }
        state.lifecycle.transition(SubscriptionState::Renewing)
    }

    fn renewed(self: &Arc<Self>, granted: SubscriptionTimeout, subscriber: &Arc<EventSubscriber>) {
        {
            let mut state = self.state.lock();
            if !state.lifecycle.transition(SubscriptionState::Established) {
                return;
            }
            state.granted = Some(granted);
        }
        debug!("🔄 Subscription {} renewed ({})", self.token, granted);
        self.schedule_renewal(granted, subscriber);
    }
}

/// Émet `SUBSCRIBE` / `UNSUBSCRIBE` et reçoit les `NOTIFY` de nos abonnements.
pub struct EventSubscriber {
    registry: Arc<Registry>,
    client: Arc<dyn StreamClient>,
    config: GenaConfig,
    user_agent: ServerInfo,
    base_url: Url,
    namespace: Namespace,
}

impl EventSubscriber {
    pub fn new(
        registry: Arc<Registry>,
        client: Arc<dyn StreamClient>,
        config: GenaConfig,
        user_agent: ServerInfo,
        base_url: Url,
        namespace: Namespace,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            client,
            config,
            user_agent,
            base_url,
            namespace,
        })
    }

    fn rejected(message: impl Into<String>) -> EventingError {
        EventingError::Subscription(SubscriptionFailure::new(SubscriptionFailureReason::Rejected, message))
    }

    /// Abonne `handler` aux évènements de `service` (service distant).
    pub async fn subscribe(
        self: &Arc<Self>,
        service: &Service,
        handler: Arc<dyn SubscriptionCallback>,
    ) -> Result<Arc<RemoteSubscription>, EventingError> {
        let (Some(urls), Some(udn)) = (service.remote_urls(), service.device.clone()) else {
            return Err(Self::rejected(format!("{} is not a remote service", service.service_id)));
        };
        let event_url = urls.event_subscription.clone();

        let token = Uuid::new_v4().simple().to_string();
        let callback_url = self
            .namespace
            .url(&self.base_url, &self.namespace.callback_path(&token));
        let subscription = Arc::new(RemoteSubscription::new(
            token.clone(),
            udn,
            service.clone(),
            callback_url.clone(),
            handler,
        ));
        self.registry.add_pending_subscription(&token, subscription.clone());

        let request = UpnpMessage::request(Method::Subscribe, &request_target(&event_url))
            .with_header(HeaderValue::Callback(vec![callback_url]))
            .with_header(HeaderValue::Nt(NotificationTarget::Event))
            .with_header(HeaderValue::Timeout(SubscriptionTimeout::Seconds(
                self.config.default_subscription_secs,
            )))
            .with_header(HeaderValue::UserAgent(self.user_agent.clone()));
        debug!("📤 SUBSCRIBE {} ({})", event_url, service.service_id);

        let response = match self.client.send(request, &event_url).await {
            Ok(response) => response,
            Err(e) => {
                self.registry.remove_pending_subscription(&token);
                return Err(e.into());
            }
        };

        let sid = match (response.is_success(), response.headers.sid()) {
            (true, Some(sid)) => sid.clone(),
            (true, None) => {
                self.registry.remove_pending_subscription(&token);
                return Err(Self::rejected("SUBSCRIBE response without SID"));
            }
            (false, _) => {
                self.registry.remove_pending_subscription(&token);
                return Err(Self::rejected(format!(
                    "SUBSCRIBE refused with status {:?}",
                    response.status()
                )));
            }
        };
        let granted = response
            .headers
            .timeout()
            .copied()
            .unwrap_or(SubscriptionTimeout::Seconds(self.config.default_subscription_secs));

        if self.registry.establish_remote_subscription(&token, &sid).is_none() {
            return Err(EventingError::Subscription(SubscriptionFailure::new(
                SubscriptionFailureReason::DeviceShutdown,
                "device removed during SUBSCRIBE",
            )));
        }
        subscription.established(&sid, granted, self);
        Ok(subscription)
    }

    /// Renouvelle immédiatement `subscription` ; une seule tentative.
    pub async fn renew(self: &Arc<Self>, subscription: &Arc<RemoteSubscription>) -> Result<(), EventingError> {
        if !subscription.begin_renewal(None) {
            return Err(EventingError::Subscription(SubscriptionFailure::new(
                SubscriptionFailureReason::NotFound,
                "subscription is not established",
            )));
        }
        self.send_renewal(subscription).await
    }

    async fn send_renewal(self: &Arc<Self>, subscription: &Arc<RemoteSubscription>) -> Result<(), EventingError> {
        let Some(sid) = subscription.sid() else {
            return Err(Self::rejected("subscription has no SID"));
        };
        let Some(urls) = subscription.service.remote_urls() else {
            return Err(Self::rejected("not a remote service"));
        };
        let url = urls.event_subscription.clone();
        let requested = subscription
            .granted()
            .unwrap_or(SubscriptionTimeout::Seconds(self.config.default_subscription_secs));
        let request = UpnpMessage::request(Method::Subscribe, &request_target(&url))
            .with_header(HeaderValue::Sid(sid.clone()))
            .with_header(HeaderValue::Timeout(requested))
            .with_header(HeaderValue::UserAgent(self.user_agent.clone()));
        debug!("📤 SUBSCRIBE renewal {}", sid);

        let failure = match self.client.send(request, &url).await {
            Ok(resp) if resp.is_success() => {
                let granted = resp.headers.timeout().copied().unwrap_or(requested);
                subscription.renewed(granted, self);
                return Ok(());
            }
            Ok(resp) if resp.status() == Some(412) => {
                SubscriptionFailure::new(SubscriptionFailureReason::NoSubscriber, "publisher lost the subscription")
            }
            Ok(resp) => SubscriptionFailure::new(
                SubscriptionFailureReason::Rejected,
                format!("renewal refused with status {:?}", resp.status()),
            ),
            Err(e) => SubscriptionFailure::new(SubscriptionFailureReason::NoSubscriber, e.to_string()),
        };

        self.registry.remove_remote_subscription(&sid);
        subscription.end(EndReason::NoSubscriber, Some(failure.clone()));
        Err(failure.into())
    }

    /// Met fin à l'abonnement localement, puis prévient l'éditeur.
    pub async fn unsubscribe(&self, subscription: &Arc<RemoteSubscription>) -> Result<(), EventingError> {
        let sid = subscription.sid();
        if let Some(sid) = &sid {
            self.registry.remove_remote_subscription(sid);
        }
        self.registry.remove_pending_subscription(subscription.token());
        subscription.end(EndReason::UnsubscribeComplete, None);

        let (Some(sid), Some(urls)) = (sid, subscription.service.remote_urls()) else {
            return Ok(());
        };
        let url = urls.event_subscription.clone();
        let request = UpnpMessage::request(Method::Unsubscribe, &request_target(&url))
            .with_header(HeaderValue::Sid(sid.clone()))
            .with_header(HeaderValue::UserAgent(self.user_agent.clone()));
        debug!("📤 UNSUBSCRIBE {}", sid);
        let response = self.client.send(request, &url).await?;
        if !response.is_success() {
            debug!("UNSUBSCRIBE {} answered {:?}", sid, response.status());
        }
        Ok(())
    }

    /// Traite un `NOTIFY` reçu sur le callback `token`.
    ///
    /// 400 si `NT`/`NTS`/`SEQ` sont absents ou invalides, 412 si le SID ne
    /// correspond à aucun abonnement.
    pub fn handle_notify(&self, token: &str, request: &UpnpMessage) -> UpnpMessage {
        let headers = &request.headers;
        let (Some(NotificationTarget::Event), Some(NotificationSubtype::PropChange), Some(key)) =
            (headers.nt(), headers.nts(), headers.seq().copied())
        else {
            debug!("NOTIFY on {} with bad NT/NTS/SEQ", token);
            return UpnpMessage::response(400);
        };
        let Some(sid) = headers.sid() else {
            return UpnpMessage::response(412);
        };

        let subscription = self
            .registry
            .remote_subscription(sid)
            .filter(|s| s.token() == token)
            .or_else(|| self.registry.pending_subscription(token));
        let Some(subscription) = subscription else {
            debug!("NOTIFY for unknown subscription {}", sid);
            return UpnpMessage::response(412);
        };

        let values = match read_property_set(request.body_text().unwrap_or_default(), subscription.variables()) {
            Ok(values) => values,
            Err(e) => {
                warn!("❌ Unreadable NOTIFY body from {}: {}", sid, e);
                return UpnpMessage::response(400);
            }
        };

        if subscription.accept_event(sid, key, values) || subscription.state().is_active() {
            UpnpMessage::response(200)
        } else {
            UpnpMessage::response(412)
        }
    }
}
