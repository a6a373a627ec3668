mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{BRIGHTNESS_RATE, Network, eventually, local_manager, publish_and_discover, rendering_control_id};
use parking_lot::Mutex;
use pmoupnpcore::errors::{SubscriptionFailure, TransportFailure};
use pmoupnpcore::gena::{EndReason, SubscriptionCallback, SubscriptionState, write_property_set};
use pmoupnpcore::message::{
    HeaderValue, Method, NotificationSubtype, NotificationTarget, SubscriptionTimeout, UpnpMessage,
};
use pmoupnpcore::model::Udn;
use pmoupnpcore::soap::ActionInvocation;
use pmoupnpcore::variable_types::StateValue;
use url::Url;

#[derive(Default)]
struct Recorder {
    established: Mutex<Option<SubscriptionTimeout>>,
    events: Mutex<Vec<(u32, Vec<(String, StateValue)>)>>,
    ended: Mutex<Option<EndReason>>,
}

impl Recorder {
    fn event(&self, key: u32) -> Option<Vec<(String, StateValue)>> {
        self.events
            .lock()
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, values)| values.clone())
    }
}

impl SubscriptionCallback for Recorder {
    fn established(&self, _sid: &str, granted: SubscriptionTimeout) {
        *self.established.lock() = Some(granted);
    }

    fn event_received(&self, key: u32, values: &[(String, StateValue)]) {
        self.events.lock().push((key, values.to_vec()));
    }

    fn ended(&self, reason: EndReason, _failure: Option<&SubscriptionFailure>) {
        *self.ended.lock() = Some(reason);
    }
}

fn value<'a>(values: &'a [(String, StateValue)], name: &str) -> Option<&'a StateValue> {
    values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
}

#[tokio::test]
async fn test_initial_event_then_changes() {
    let net = Network::new();
    let device = net.node("10.0.0.1", 8080);
    let cp = net.node("10.0.0.2", 8081);
    let remote = publish_and_discover(&device, &cp, "renderer-1").await;
    let service = remote.find_service(&rendering_control_id()).unwrap();

    let recorder = Arc::new(Recorder::default());
    let subscription = cp.stack.subscribe(service, recorder.clone()).await.unwrap();
    assert_eq!(subscription.state(), SubscriptionState::Established);
    assert_eq!(*recorder.established.lock(), Some(SubscriptionTimeout::Seconds(1800)));
    let sid = subscription.sid().unwrap();
    assert!(sid.starts_with("uuid:"));

    let initial = eventually(|| recorder.event(0)).await;
    assert_eq!(value(&initial, "Volume"), Some(&StateValue::UI2(10)));
    assert_eq!(value(&initial, "Mute"), Some(&StateValue::Boolean(false)));

    let set = ActionInvocation::builder(service, "SetVolume")
        .unwrap()
        .argument("DesiredVolume", StateValue::UI2(42))
        .build()
        .unwrap();
    cp.stack.execute(set).await.unwrap();

    let change = eventually(|| recorder.event(1)).await;
    assert_eq!(change, vec![("Volume".to_string(), StateValue::UI2(42))]);

    assert_eq!(device.stack.registry().snapshot().local_subscriptions, vec![sid.clone()]);
    assert_eq!(cp.stack.registry().snapshot().remote_subscriptions, vec![sid]);
}

#[tokio::test]
async fn test_unsubscribe_ends_both_sides() {
    let net = Network::new();
    let device = net.node("10.0.0.1", 8080);
    let cp = net.node("10.0.0.2", 8081);
    let remote = publish_and_discover(&device, &cp, "renderer-1").await;
    let service = remote.find_service(&rendering_control_id()).unwrap();

    let recorder = Arc::new(Recorder::default());
    let subscription = cp.stack.subscribe(service, recorder.clone()).await.unwrap();
    eventually(|| recorder.event(0)).await;

    cp.stack.unsubscribe(&subscription).await.unwrap();
    assert_eq!(*recorder.ended.lock(), Some(EndReason::UnsubscribeComplete));
    assert_eq!(
        subscription.state(),
        SubscriptionState::Ended(EndReason::UnsubscribeComplete)
    );
    assert!(cp.stack.registry().snapshot().remote_subscriptions.is_empty());
    eventually(|| {
        device
            .stack
            .registry()
            .snapshot()
            .local_subscriptions
            .is_empty()
            .then_some(())
    })
    .await;
}

#[tokio::test]
async fn test_renewal_keeps_subscription() {
    let net = Network::new();
    let device = net.node("10.0.0.1", 8080);
    let cp = net.node("10.0.0.2", 8081);
    let remote = publish_and_discover(&device, &cp, "renderer-1").await;
    let service = remote.find_service(&rendering_control_id()).unwrap();

    let recorder = Arc::new(Recorder::default());
    let subscription = cp.stack.subscribe(service, recorder.clone()).await.unwrap();
    let sid = subscription.sid().unwrap();

    cp.stack.renew(&subscription).await.unwrap();
    assert_eq!(subscription.state(), SubscriptionState::Established);
    assert_eq!(subscription.sid(), Some(sid.clone()));
    assert!(recorder.ended.lock().is_none());
    assert!(device.stack.registry().local_subscription(&sid).is_some());
}

#[tokio::test]
async fn test_renewal_of_forgotten_subscription_fails() {
    let net = Network::new();
    let device = net.node("10.0.0.1", 8080);
    let cp = net.node("10.0.0.2", 8081);
    let remote = publish_and_discover(&device, &cp, "renderer-1").await;
    let service = remote.find_service(&rendering_control_id()).unwrap();

    let recorder = Arc::new(Recorder::default());
    let subscription = cp.stack.subscribe(service, recorder.clone()).await.unwrap();
    let sid = subscription.sid().unwrap();
    device
        .stack
        .registry()
        .remove_local_subscription(&sid)
        .unwrap()
        .end(EndReason::NotFound);

    assert!(cp.stack.renew(&subscription).await.is_err());
    assert_eq!(*recorder.ended.lock(), Some(EndReason::NoSubscriber));
    assert!(cp.stack.registry().remote_subscription(&sid).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_subscription_renews_before_expiry() {
    let net = Network::new();
    let device = net.node("10.0.0.1", 8080);
    let cp = net.node("10.0.0.2", 8081);
    let remote = publish_and_discover(&device, &cp, "renderer-1").await;
    let service = remote.find_service(&rendering_control_id()).unwrap();

    let recorder = Arc::new(Recorder::default());
    let subscription = cp.stack.subscribe(service, recorder.clone()).await.unwrap();
    let sid = subscription.sid().unwrap();

    tokio::time::sleep(std::time::Duration::from_secs(1750)).await;

    let renewals = cp
        .client
        .requests()
        .into_iter()
        .filter(|(m, _)| {
            m.method() == Some(pmoupnpcore::message::Method::Subscribe) && m.headers.sid() == Some(&sid)
        })
        .count();
    assert_eq!(renewals, 1);
    assert_eq!(subscription.state(), SubscriptionState::Established);
    assert!(recorder.ended.lock().is_none());
    let local = device.stack.registry().local_subscription(&sid).unwrap();
    assert!(!local.is_expired(tokio::time::Instant::now()));
}

#[tokio::test(start_paused = true)]
async fn test_moderated_variables_on_the_wire() {
    let net = Network::new();
    let device = net.node("10.0.0.1", 8080);
    let cp = net.node("10.0.0.2", 8081);
    let remote = publish_and_discover(&device, &cp, "renderer-1").await;
    let service = remote.find_service(&rendering_control_id()).unwrap();

    let recorder = Arc::new(Recorder::default());
    let subscription = cp.stack.subscribe(service, recorder.clone()).await.unwrap();
    let sid = subscription.sid().unwrap();
    let initial = eventually(|| recorder.event(0)).await;
    assert_eq!(value(&initial, "Brightness"), Some(&StateValue::UI2(50)));

    // Trop tôt après l'évènement initial : retenu, seule la dernière valeur part.
    let manager = local_manager(&device, "renderer-1");
    manager.set_value("Brightness", StateValue::UI2(60)).unwrap();
    manager.set_value("Brightness", StateValue::UI2(70)).unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(recorder.event(1).is_none());

    tokio::time::sleep(BRIGHTNESS_RATE).await;
    let flushed = eventually(|| recorder.event(1)).await;
    assert_eq!(flushed, vec![("Brightness".to_string(), StateValue::UI2(70))]);

    // Variation sous le delta : aucun NOTIFY.
    manager.set_value("Balance", StateValue::I2(3)).unwrap();
    manager.set_value("Balance", StateValue::I2(9)).unwrap();
    let balance = eventually(|| recorder.event(2)).await;
    assert_eq!(balance, vec![("Balance".to_string(), StateValue::I2(9))]);

    let notifies: Vec<u32> = device
        .client
        .requests()
        .into_iter()
        .filter(|(m, _)| m.method() == Some(Method::Notify) && m.headers.sid() == Some(&sid))
        .filter_map(|(m, _)| m.headers.seq().copied())
        .collect();
    assert_eq!(notifies, vec![0, 1, 2]);
    assert_eq!(recorder.events.lock().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_notify_before_subscribe_response_is_replayed() {
    let net = Network::new();
    let device = net.node("10.0.0.1", 8080);
    let cp = net.node("10.0.0.2", 8081);
    let remote = publish_and_discover(&device, &cp, "renderer-1").await;
    let service = remote.find_service(&rendering_control_id()).unwrap();

    // L'éditeur envoie son premier NOTIFY avant de répondre au SUBSCRIBE.
    let stack = cp.stack.clone();
    cp.client.set_handler(move |msg: UpnpMessage, _url: Url| {
        let stack = stack.clone();
        async move {
            if msg.method() != Some(Method::Subscribe) {
                return Ok::<_, TransportFailure>(UpnpMessage::response(404));
            }
            let callback = msg
                .headers
                .callback()
                .and_then(|urls| urls.first().cloned())
                .ok_or_else(|| TransportFailure("SUBSCRIBE without CALLBACK".to_string()))?;
            let notify = UpnpMessage::request(Method::Notify, callback.path())
                .with_xml_body(write_property_set(&[("Volume".to_string(), StateValue::UI2(55))]))
                .with_header(HeaderValue::Nt(NotificationTarget::Event))
                .with_header(HeaderValue::Nts(NotificationSubtype::PropChange))
                .with_header(HeaderValue::Sid("uuid:early".to_string()))
                .with_header(HeaderValue::Seq(0));
            let answer = stack.handle_stream_request(&notify).await;
            assert_eq!(answer.and_then(|a| a.status()), Some(200));

            Ok::<_, TransportFailure>(UpnpMessage::response(200)
                .with_header(HeaderValue::Sid("uuid:early".to_string()))
                .with_header(HeaderValue::Timeout(SubscriptionTimeout::Seconds(1800))))
        }
    });

    let recorder = Arc::new(Recorder::default());
    let subscription = cp.stack.subscribe(service, recorder.clone()).await.unwrap();
    assert_eq!(subscription.sid().as_deref(), Some("uuid:early"));
    assert_eq!(subscription.state(), SubscriptionState::Established);
    assert_eq!(
        recorder.event(0),
        Some(vec![("Volume".to_string(), StateValue::UI2(55))])
    );
    assert!(cp.stack.registry().remote_subscription("uuid:early").is_some());
}

#[tokio::test(start_paused = true)]
async fn test_device_removal_ends_subscriptions() {
    let net = Network::new();
    let device = net.node("10.0.0.1", 8080);
    let cp = net.node("10.0.0.2", 8081);
    let remote = publish_and_discover(&device, &cp, "renderer-1").await;
    let service = remote.find_service(&rendering_control_id()).unwrap();
    let udn = Udn::new("renderer-1").unwrap();

    let recorder = Arc::new(Recorder::default());
    let subscription = cp.stack.subscribe(service, recorder.clone()).await.unwrap();
    let sid = subscription.sid().unwrap();
    eventually(|| recorder.event(0)).await;
    let local = device.stack.registry().local_subscription(&sid).unwrap();

    assert!(device.stack.registry().remove_device(&udn).is_some());
    assert_eq!(local.state(), SubscriptionState::Ended(EndReason::DeviceShutdown));
    assert!(device.stack.registry().local_subscription(&sid).is_none());

    assert!(cp.stack.registry().remove_device(&udn).is_some());
    assert_eq!(*recorder.ended.lock(), Some(EndReason::DeviceShutdown));
    assert_eq!(
        subscription.state(),
        SubscriptionState::Ended(EndReason::DeviceShutdown)
    );
    assert!(cp.stack.registry().remote_subscription(&sid).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_unrenewed_subscription_expires_on_sweep() {
    let net = Network::new();
    let device = net.node("10.0.0.1", 8080);
    let cp = net.node("10.0.0.2", 8081);
    let remote = publish_and_discover(&device, &cp, "renderer-1").await;
    let service = remote.find_service(&rendering_control_id()).unwrap();
    let event_url = service.remote_urls().unwrap().event_subscription.clone();
    device.stack.startup();

    let subscribe = UpnpMessage::request(Method::Subscribe, event_url.path())
        .with_header(HeaderValue::Callback(vec![Url::parse("http://10.0.0.9:9000/cb").unwrap()]))
        .with_header(HeaderValue::Nt(NotificationTarget::Event))
        .with_header(HeaderValue::Timeout(SubscriptionTimeout::Seconds(300)));
    let response = device.stack.handle_stream_request(&subscribe).await.unwrap();
    assert_eq!(response.status(), Some(200));
    assert_eq!(response.headers.timeout(), Some(&SubscriptionTimeout::Seconds(300)));
    let sid = response.headers.sid().unwrap().clone();
    let local = device.stack.registry().local_subscription(&sid).unwrap();

    tokio::time::sleep(Duration::from_secs(295)).await;
    assert!(!local.state().is_terminal());
    assert!(device.stack.registry().local_subscription(&sid).is_some());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(local.state(), SubscriptionState::Ended(EndReason::NoSubscriber));
    assert!(device.stack.registry().local_subscription(&sid).is_none());
}
