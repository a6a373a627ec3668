//! # Modèle UPnP
//!
//! Devices, services, actions, variables d'état et icônes, locaux ou distants.
//! Les objets sont assemblés par des constructeurs dont `build()` valide
//! avant de figer la valeur : aucun objet partiellement construit ne sort du
//! module.

mod action;
mod device;
mod local_service;
mod service;
mod state_variable;
mod types;

pub use action::{Action, ActionArgument, ArgumentDirection, QUERY_STATE_VARIABLE};
pub use device::{Device, DeviceBuilder, DeviceDetails, DeviceKind, Icon, IconBuilder, RemoteDeviceIdentity};
pub use local_service::{ArgumentValues, LocalServiceBuilder, ServiceCapabilities, ServiceManager, StateChangeListener};
pub use service::{LocalService, RemoteServiceUrls, Service, ServiceKind};
pub use state_variable::{AllowedValueRange, EventModeration, StateVariable, StateVariableBuilder};
pub use types::{DeviceType, ServiceId, ServiceType, Udn};
