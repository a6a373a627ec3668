//! # GENA - Évènements UPnP
//!
//! ## Fonctionnalités
//!
//! - ✅ Machine à états commune aux deux rôles ([`SubscriptionState`])
//! - ✅ Éditeur : `SUBSCRIBE`/`UNSUBSCRIBE` reçus, NOTIFY sérialisés par abonnement
//! - ✅ Modération par delta minimal et par débit maximal
//! - ✅ Abonné : renouvellement anticipé, contrôle des clés d'évènement
//! - ✅ Corps `e:propertyset` en écriture et en lecture

mod moderation;
mod propertyset;
mod publisher;
mod subscriber;
mod subscription;

pub use moderation::{Moderated, Moderator};
pub use propertyset::{EVENT_NAMESPACE, read_property_set, write_property_set};
pub use publisher::{EventPublisher, LocalSubscription, grant_duration};
pub use subscriber::{
    EventSubscriber, KeyCheck, RemoteSubscription, SubscriptionCallback, check_event_key, renewal_delay,
};
pub use subscription::{EndReason, SubscriptionLifecycle, SubscriptionState};
