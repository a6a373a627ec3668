//! # Descripteurs UPnP
//!
//! Passage entre les objets du modèle et les documents XML UDA 1.0 :
//! description de device (`<root>`) et description de service (`<scpd>`).
//!
//! ## Fonctionnalités
//!
//! - ✅ [`DescriptorBinder`] : écriture et lecture des documents
//! - ✅ [`XmlDescriptorBinder`] : implémentation par défaut avec `xmltree`
//! - ✅ [`DescriptorRetriever`] : récupération asynchrone d'un device distant
//! - ✅ [`serve_descriptor`] : réponse aux `GET` sur les chemins de descripteurs
//!
//! Un descripteur demandé pour un device ou un service non enregistré ne
//! produit aucune réponse (`None`), jamais une erreur.

mod retrieval;
mod xml;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::errors::DescriptorError;
use crate::message::UpnpMessage;
use crate::model::{
    Action, DeviceDetails, DeviceType, Icon, RemoteDeviceIdentity, RemoteServiceUrls, ServiceId,
    ServiceType, StateVariable, Udn,
};
use crate::model::{Device, Service};
use crate::namespace::{Namespace, Resource};
use crate::registry::Registry;

pub use retrieval::HttpDescriptorRetriever;
pub use xml::XmlDescriptorBinder;

pub const DEVICE_NAMESPACE: &str = "urn:schemas-upnp-org:device-1-0";
pub const SERVICE_NAMESPACE: &str = "urn:schemas-upnp-org:service-1-0";

/// Référence à un service telle que lue dans une description de device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceReference {
    pub service_type: ServiceType,
    pub service_id: ServiceId,
    pub urls: RemoteServiceUrls,
}

/// Arbre d'une description de device distant, avant lecture des SCPD.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDescription {
    pub udn: Udn,
    pub device_type: DeviceType,
    pub details: DeviceDetails,
    pub icons: Vec<Icon>,
    pub services: Vec<ServiceReference>,
    pub embedded: Vec<DeviceDescription>,
}

impl DeviceDescription {
    /// Cette description puis celles des devices embarqués.
    pub fn all(&self) -> Vec<&DeviceDescription> {
        let mut out = vec![self];
        for child in &self.embedded {
            out.extend(child.all());
        }
        out
    }
}

/// Contenu d'un SCPD.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceDescription {
    pub actions: Vec<Action>,
    pub state_variables: Vec<StateVariable>,
}

/// Conversion objet ↔ document XML.
pub trait DescriptorBinder: Send + Sync {
    /// Description de l'arbre `device`, URLs de services relatives à `namespace`.
    fn write_device(&self, device: &Device, namespace: &Namespace) -> Result<String, DescriptorError>;

    /// SCPD de `service` ; l'action `QueryStateVariable` implicite n'y figure pas.
    fn write_service(&self, service: &Service) -> Result<String, DescriptorError>;

    /// Lit une description de device, les URLs relatives étant résolues
    /// contre `URLBase` ou à défaut `location`.
    fn read_device(&self, xml: &str, location: &url::Url) -> Result<DeviceDescription, DescriptorError>;

    fn read_service(&self, xml: &str) -> Result<ServiceDescription, DescriptorError>;
}

/// Obtient la description complète d'un device distant annoncé.
#[async_trait]
pub trait DescriptorRetriever: Send + Sync {
    /// Le device retourné est la racine de l'arbre décrit, dont l'UDN peut
    /// différer de celui de l'annonce (device embarqué annoncé seul).
    async fn retrieve(&self, identity: &RemoteDeviceIdentity) -> Result<Device, DescriptorError>;
}

/// Répond à un `GET` sur un chemin de descripteur local.
///
/// Retourne `None` si la ressource n'est pas un descripteur ou si le device
/// ou le service n'est pas enregistré.
pub fn serve_descriptor(
    registry: &Registry,
    binder: &dyn DescriptorBinder,
    namespace: &Namespace,
    resource: &Resource,
) -> Option<UpnpMessage> {
    let written = match resource {
        Resource::DeviceDescriptor(udn) => {
            let root = registry.local_device(udn)?;
            binder.write_device(&root, namespace)
        }
        Resource::ServiceDescriptor { udn, service_id } => {
            let service = registry.local_service(udn, service_id)?;
            binder.write_service(&service)
        }
        _ => return None,
    };

    match written {
        Ok(xml) => {
            debug!("📄 Serving descriptor {:?}", resource);
            Some(UpnpMessage::response(200).with_xml_body(xml))
        }
        Err(e) => {
            error!("❌ Failed to write descriptor {:?}: {}", resource, e);
            Some(UpnpMessage::response(500))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DeviceDetails;

    #[test]
    fn test_unregistered_descriptor_yields_nothing() {
        let registry = Registry::new();
        let binder = XmlDescriptorBinder;
        let ns = Namespace::default();
        let udn = Udn::new("nobody").unwrap();

        assert!(serve_descriptor(&registry, &binder, &ns, &Resource::DeviceDescriptor(udn.clone())).is_none());
        assert!(
            serve_descriptor(
                &registry,
                &binder,
                &ns,
                &Resource::ServiceDescriptor {
                    udn,
                    service_id: ServiceId::new("upnp-org", "AVTransport"),
                },
            )
            .is_none()
        );
    }

    #[test]
    fn test_registered_device_descriptor_is_xml() {
        let registry = Registry::new();
        let device = Device::builder(
            Udn::new("served").unwrap(),
            DeviceType::new("schemas-upnp-org", "MediaRenderer", 1),
            DeviceDetails::new("Salon", "PMOMusic", "Renderer"),
        )
        .build_local(1800)
        .unwrap();
        registry.add_local_device(device).unwrap();

        let resp = serve_descriptor(
            &registry,
            &XmlDescriptorBinder,
            &Namespace::default(),
            &Resource::DeviceDescriptor(Udn::new("served").unwrap()),
        )
        .unwrap();
        assert_eq!(resp.status(), Some(200));
        assert!(resp.headers.content_type().unwrap().is_xml());
        assert!(resp.body_text().unwrap().contains("<UDN>uuid:served</UDN>"));
    }
}
