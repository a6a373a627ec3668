//! # pmoupnpcore - Pile protocolaire UPnP
//!
//! Cœur UPnP Device Architecture 1.0 : découverte SSDP, description,
//! contrôle SOAP et évènements GENA, côté device comme côté point de
//! contrôle.
//!
//! ## Fonctionnalités
//!
//! - ✅ Codec des messages HTTPU/HTTP et table des en-têtes typés
//! - ✅ Registre des devices locaux et distants, expiration et maintenance
//! - ✅ SSDP : annonces, byebye, recherche active, réponses aux `M-SEARCH`
//! - ✅ Descripteurs de devices et SCPD, en écriture et en lecture
//! - ✅ Contrôle SOAP : invocation distante et exécution locale
//! - ✅ GENA : abonnements, NOTIFY modérés et ordonnés, renouvellements
//! - ✅ Transports pluggables (UDP/reqwest par défaut, doublures en mémoire)
//!
//! ## Architecture
//!
//! ```text
//! UpnpStack
//!   ├── Registry ◀── maintenance
//!   ├── SsdpEngine ── DatagramTransport
//!   ├── ControlPoint / serve_control ── StreamClient
//!   └── EventPublisher / EventSubscriber ── StreamClient
//! ```

pub mod config;
pub mod descriptor;
pub mod errors;
pub mod gena;
pub mod message;
pub mod model;
pub mod namespace;
pub mod registry;
#[cfg(feature = "server")]
pub mod server;
pub mod soap;
pub mod ssdp;
pub mod stack;
pub mod transport;
pub mod variable_types;

pub use config::UpnpConfig;
pub use errors::{
    ActionInvocationFailure, ControlError, EventingError, RegistrationError, SubscriptionFailure, TransportFailure,
};
pub use stack::UpnpStack;
