//! Disposition des URLs des ressources locales.
//!
//! ```text
//! <prefix>/dev/<udn>/desc.xml
//! <prefix>/dev/<udn>/svc/<ns>/<id>/desc.xml
//! <prefix>/dev/<udn>/svc/<ns>/<id>/control
//! <prefix>/dev/<udn>/svc/<ns>/<id>/event
//! <prefix>/cb/<token>
//! ```

use url::Url;

use crate::model::{ServiceId, Udn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    DeviceDescriptor(Udn),
    ServiceDescriptor { udn: Udn, service_id: ServiceId },
    Control { udn: Udn, service_id: ServiceId },
    EventSubscription { udn: Udn, service_id: ServiceId },
    /// Callback d'un de nos abonnements sortants.
    Callback(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    prefix: String,
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new("/upnp")
    }
}

impl Namespace {
    pub fn new(prefix: &str) -> Self {
        let trimmed = prefix.trim_end_matches('/');
        let prefix = if trimmed.is_empty() || trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{}", trimmed)
        };
        Self { prefix }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn device_path(&self, udn: &Udn) -> String {
        format!("{}/dev/{}", self.prefix, udn.identifier())
    }

    fn service_path(&self, udn: &Udn, service_id: &ServiceId) -> String {
        format!(
            "{}/svc/{}/{}",
            self.device_path(udn),
            service_id.namespace,
            service_id.id
        )
    }

    pub fn device_descriptor_path(&self, udn: &Udn) -> String {
        format!("{}/desc.xml", self.device_path(udn))
    }

    pub fn service_descriptor_path(&self, udn: &Udn, service_id: &ServiceId) -> String {
        format!("{}/desc.xml", self.service_path(udn, service_id))
    }

    pub fn control_path(&self, udn: &Udn, service_id: &ServiceId) -> String {
        format!("{}/control", self.service_path(udn, service_id))
    }

    pub fn event_subscription_path(&self, udn: &Udn, service_id: &ServiceId) -> String {
        format!("{}/event", self.service_path(udn, service_id))
    }

    pub fn callback_path(&self, token: &str) -> String {
        format!("{}/cb/{}", self.prefix, token)
    }

    /// Rend `path` absolu par rapport à `base`.
    pub fn url(&self, base: &Url, path: &str) -> Url {
        let mut url = base.clone();
        url.set_path(path);
        url.set_query(None);
        url
    }

    /// Identifie la ressource désignée par un chemin de requête.
    pub fn resolve(&self, path: &str) -> Option<Resource> {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let rest = path.strip_prefix(self.prefix.as_str())?;
        let segments: Vec<&str> = rest.trim_start_matches('/').split('/').collect();
        match segments.as_slice() {
            ["cb", token] if !token.is_empty() => Some(Resource::Callback(token.to_string())),
            ["dev", udn, "desc.xml"] => Udn::new(*udn).ok().map(Resource::DeviceDescriptor),
            ["dev", udn, "svc", ns, id, leaf] => {
                let udn = Udn::new(*udn).ok()?;
                if ns.is_empty() || id.is_empty() {
                    return None;
                }
                let service_id = ServiceId::new(ns, id);
                match *leaf {
                    "desc.xml" => Some(Resource::ServiceDescriptor { udn, service_id }),
                    "control" => Some(Resource::Control { udn, service_id }),
                    "event" => Some(Resource::EventSubscription { udn, service_id }),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}
