//! Outils partagés des tests d'intégration : un « réseau » en mémoire où
//! chaque pile est joignable par son adresse IP.
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use url::Url;

use pmoupnpcore::errors::{ActionInvocationFailure, TransportFailure};
use pmoupnpcore::message::UpnpMessage;
use pmoupnpcore::model::{
    Action, ActionArgument, ArgumentValues, Device, DeviceDetails, DeviceType, LocalServiceBuilder,
    ServiceCapabilities, ServiceId, ServiceManager, ServiceType, StateVariable, Udn,
};
use pmoupnpcore::transport::memory::{MemoryDatagramTransport, MemoryStreamClient};
use pmoupnpcore::variable_types::{StateValue, StateVarType};
use pmoupnpcore::{UpnpConfig, UpnpStack};

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn config(ip: &str, port: u16) -> UpnpConfig {
    UpnpConfig::load(
        None,
        vec![
            ("PMOUPNP_CONFIG__NETWORK__LOCAL_ADDRESS".to_string(), ip.to_string()),
            ("PMOUPNP_CONFIG__NETWORK__HTTP_PORT".to_string(), port.to_string()),
        ],
    )
    .unwrap()
}

pub struct Node {
    pub stack: Arc<UpnpStack>,
    pub datagrams: Arc<MemoryDatagramTransport>,
    pub client: MemoryStreamClient,
    pub ip: String,
}

impl Node {
    pub fn ssdp_address(&self) -> SocketAddr {
        format!("{}:1900", self.ip).parse().unwrap()
    }
}

/// Route chaque requête HTTP vers la pile dont l'IP est l'hôte de l'URL.
#[derive(Default, Clone)]
pub struct Network {
    stacks: Arc<Mutex<HashMap<String, Arc<UpnpStack>>>>,
}

impl Network {
    pub fn new() -> Self {
        init_tracing();
        Self::default()
    }

    pub fn node(&self, ip: &str, port: u16) -> Node {
        let datagrams = Arc::new(MemoryDatagramTransport::new());
        let client = MemoryStreamClient::new();
        let stacks = self.stacks.clone();
        client.set_handler(move |msg: UpnpMessage, url: Url| {
            let stacks = stacks.clone();
            async move {
                let host = url.host_str().unwrap_or_default().to_string();
                let stack = stacks
                    .lock()
                    .get(&host)
                    .cloned()
                    .ok_or_else(|| TransportFailure(format!("no route to {}", url)))?;
                Ok::<_, TransportFailure>(stack
                    .handle_stream_request(&msg)
                    .await
                    .unwrap_or_else(|| UpnpMessage::response(404)))
            }
        });

        let stack = Arc::new(
            UpnpStack::new(config(ip, port), datagrams.clone(), Arc::new(client.clone())).unwrap(),
        );
        self.stacks.lock().insert(ip.to_string(), stack.clone());
        Node {
            stack,
            datagrams,
            client,
            ip: ip.to_string(),
        }
    }
}

/// Transmet les datagrammes émis par `from` à `to`.
pub fn relay(from: &Node, to: &Node) {
    for sent in from.datagrams.take_sent() {
        to.datagrams.inject(&sent.data, from.ssdp_address());
    }
}

/// Attend que `check` réussisse, en laissant tourner les tâches.
pub async fn eventually<T>(mut check: impl FnMut() -> Option<T>) -> T {
    for _ in 0..200 {
        if let Some(v) = check() {
            return v;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

/// RenderingControl minimal : volume et mute, plus deux variables modérées
/// (luminosité limitée à un NOTIFY toutes les 2 s, balance au delta 5).
pub struct Renderer;

pub const TOO_LOUD: u16 = 701;

pub const BRIGHTNESS_RATE: Duration = Duration::from_secs(2);

#[async_trait]
impl ServiceCapabilities for Renderer {
    fn list_actions(&self) -> Vec<Action> {
        vec![
            Action::new("SetVolume").with_argument(ActionArgument::input("DesiredVolume", "Volume")),
            Action::new("GetVolume").with_argument(ActionArgument::output("CurrentVolume", "Volume")),
            Action::new("SetMute").with_argument(ActionArgument::input("DesiredMute", "Mute")),
        ]
    }

    fn list_state_variables(&self) -> Vec<StateVariable> {
        vec![
            StateVariable::builder("Volume", StateVarType::UI2)
                .default_value("10")
                .build()
                .unwrap(),
            StateVariable::builder("Mute", StateVarType::Boolean)
                .default_value("0")
                .build()
                .unwrap(),
            StateVariable::builder("Brightness", StateVarType::UI2)
                .default_value("50")
                .maximum_rate(BRIGHTNESS_RATE)
                .build()
                .unwrap(),
            StateVariable::builder("Balance", StateVarType::I2)
                .default_value("0")
                .minimum_delta(5.0)
                .build()
                .unwrap(),
        ]
    }

    async fn invoke(
        &self,
        action: &str,
        args: ArgumentValues,
        manager: &ServiceManager,
    ) -> Result<ArgumentValues, ActionInvocationFailure> {
        let set = |name: &str, value: StateValue| {
            manager
                .set_value(name, value)
                .map_err(|e| ActionInvocationFailure::recoverable(600, e.to_string()))
        };
        match action {
            "SetVolume" => {
                let (_, volume) = &args[0];
                if *volume == StateValue::UI2(666) {
                    return Err(ActionInvocationFailure::recoverable(TOO_LOUD, "Too loud"));
                }
                set("Volume", volume.clone())?;
                Ok(vec![])
            }
            "SetMute" => {
                set("Mute", args[0].1.clone())?;
                Ok(vec![])
            }
            "GetVolume" => Ok(vec![(
                "CurrentVolume".to_string(),
                manager.value("Volume").unwrap_or(StateValue::UI2(0)),
            )]),
            other => Err(ActionInvocationFailure::recoverable(401, other.to_string())),
        }
    }
}

pub fn rendering_control_id() -> ServiceId {
    ServiceId::new("upnp-org", "RenderingControl")
}

pub fn renderer(id: &str) -> Device {
    let service = LocalServiceBuilder::new(
        ServiceType::new("schemas-upnp-org", "RenderingControl", 1),
        rendering_control_id(),
        Arc::new(Renderer),
    )
    .build()
    .unwrap();

    Device::builder(
        Udn::new(id).unwrap(),
        DeviceType::new("schemas-upnp-org", "MediaRenderer", 1),
        DeviceDetails::new("Salon", "PMOMusic", "Renderer"),
    )
    .service(service)
    .build_local(1800)
    .unwrap()
}

/// Gestionnaire d'état du RenderingControl publié par `node`.
pub fn local_manager(node: &Node, id: &str) -> Arc<ServiceManager> {
    node.stack
        .registry()
        .local_service(&Udn::new(id).unwrap(), &rendering_control_id())
        .unwrap()
        .local_parts()
        .unwrap()
        .manager
        .clone()
}

/// Publie `renderer(id)` sur `device`, puis laisse `control_point` le découvrir.
pub async fn publish_and_discover(device: &Node, control_point: &Node, id: &str) -> Arc<Device> {
    device.stack.publish_device(renderer(id)).unwrap();
    control_point.stack.startup();
    let udn = Udn::new(id).unwrap();
    eventually(|| {
        relay(device, control_point);
        control_point.stack.registry().remote_device(&udn)
    })
    .await
}
