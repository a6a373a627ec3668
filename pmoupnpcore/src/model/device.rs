//! Devices UPnP : arbre de devices embarqués, services et icônes.

use std::collections::HashSet;
use std::net::IpAddr;

use url::Url;

use crate::errors::ValidationError;
use crate::model::{DeviceType, Service, ServiceId, ServiceType, Udn};

/// Informations lisibles d'un device (`friendlyName`, `manufacturer`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceDetails {
    pub friendly_name: String,
    pub manufacturer: String,
    pub manufacturer_url: Option<String>,
    pub model_name: String,
    pub model_description: Option<String>,
    pub model_number: Option<String>,
    pub model_url: Option<String>,
    pub serial_number: Option<String>,
    pub upc: Option<String>,
    pub presentation_url: Option<String>,
}

impl DeviceDetails {
    pub fn new(friendly_name: &str, manufacturer: &str, model_name: &str) -> Self {
        Self {
            friendly_name: friendly_name.to_string(),
            manufacturer: manufacturer.to_string(),
            model_name: model_name.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Icon {
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    /// URI telle que publiée, éventuellement relative à l'URL de base.
    pub uri: String,
}

impl Icon {
    pub fn builder() -> IconBuilder {
        IconBuilder::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct IconBuilder {
    mime_type: Option<String>,
    width: u32,
    height: u32,
    depth: u32,
    uri: Option<String>,
}

impl IconBuilder {
    pub fn mime_type(mut self, mime_type: &str) -> Self {
        self.mime_type = Some(mime_type.to_string());
        self
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    pub fn uri(mut self, uri: &str) -> Self {
        self.uri = Some(uri.to_string());
        self
    }

    pub fn build(self) -> Result<Icon, ValidationError> {
        let mime_type = self.mime_type.ok_or(ValidationError::MissingField("icon mimetype"))?;
        if !mime_type.contains('/') {
            return Err(ValidationError::invalid("icon mimetype", mime_type));
        }
        if self.width == 0 || self.height == 0 {
            return Err(ValidationError::invalid("icon size", "width and height must be positive"));
        }
        if self.depth == 0 {
            return Err(ValidationError::invalid("icon depth", "must be positive"));
        }
        let uri = self.uri.filter(|u| !u.trim().is_empty()).ok_or(ValidationError::MissingField("icon url"))?;
        Ok(Icon {
            mime_type,
            width: self.width,
            height: self.height,
            depth: self.depth,
            uri,
        })
    }
}

/// Identité d'un device distant, telle qu'annoncée par SSDP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDeviceIdentity {
    pub udn: Udn,
    /// Durée de validité annoncée (`CACHE-CONTROL: max-age`), en secondes.
    pub max_age: u32,
    /// URL du descripteur, sert d'URL de base.
    pub location: Url,
    /// Adresse locale sur laquelle l'annonce a été reçue.
    pub discovered_on: Option<IpAddr>,
}

#[derive(Debug, Clone)]
pub enum DeviceKind {
    Local { max_age: u32 },
    Remote(RemoteDeviceIdentity),
}

#[derive(Debug, Clone)]
pub struct Device {
    pub udn: Udn,
    pub device_type: DeviceType,
    pub details: DeviceDetails,
    pub icons: Vec<Icon>,
    pub services: Vec<Service>,
    pub embedded: Vec<Device>,
    /// UDN du device parent, `None` pour un device racine.
    pub parent: Option<Udn>,
    pub kind: DeviceKind,
}

impl Device {
    pub fn builder(udn: Udn, device_type: DeviceType, details: DeviceDetails) -> DeviceBuilder {
        DeviceBuilder {
            udn,
            device_type,
            details,
            icons: Vec::new(),
            services: Vec::new(),
            embedded: Vec::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_local(&self) -> bool {
        matches!(self.kind, DeviceKind::Local { .. })
    }

    pub fn max_age(&self) -> u32 {
        match &self.kind {
            DeviceKind::Local { max_age } => *max_age,
            DeviceKind::Remote(identity) => identity.max_age,
        }
    }

    pub fn remote_identity(&self) -> Option<&RemoteDeviceIdentity> {
        match &self.kind {
            DeviceKind::Remote(identity) => Some(identity),
            DeviceKind::Local { .. } => None,
        }
    }

    /// Ce device puis ses devices embarqués, en profondeur d'abord.
    pub fn all_devices(&self) -> Vec<&Device> {
        let mut out = vec![self];
        for child in &self.embedded {
            out.extend(child.all_devices());
        }
        out
    }

    pub fn all_services(&self) -> Vec<&Service> {
        self.all_devices()
            .into_iter()
            .flat_map(|d| d.services.iter())
            .collect()
    }

    pub fn all_udns(&self) -> Vec<Udn> {
        self.all_devices().into_iter().map(|d| d.udn.clone()).collect()
    }

    pub fn find_device(&self, udn: &Udn) -> Option<&Device> {
        self.all_devices().into_iter().find(|d| d.udn == *udn)
    }

    pub fn find_service(&self, service_id: &ServiceId) -> Option<&Service> {
        self.services.iter().find(|s| s.service_id == *service_id)
    }

    pub fn find_services_by_type(&self, service_type: &ServiceType) -> Vec<&Service> {
        self.all_services()
            .into_iter()
            .filter(|s| s.service_type.satisfies(service_type, false))
            .collect()
    }

    /// Propage parent, genre et back-références de service dans l'arbre.
    fn seal(&mut self, parent: Option<Udn>, kind: &DeviceKind) {
        self.parent = parent;
        self.kind = kind.clone();
        for service in &mut self.services {
            service.device = Some(self.udn.clone());
        }
        let udn = self.udn.clone();
        for child in &mut self.embedded {
            child.seal(Some(udn.clone()), kind);
        }
    }
}

/// Constructeur d'un arbre de devices ; `build_local`/`build_remote` valident.
#[derive(Debug, Clone)]
pub struct DeviceBuilder {
    udn: Udn,
    device_type: DeviceType,
    details: DeviceDetails,
    icons: Vec<Icon>,
    services: Vec<Service>,
    embedded: Vec<Device>,
}

impl DeviceBuilder {
    pub fn icon(mut self, icon: Icon) -> Self {
        self.icons.push(icon);
        self
    }

    pub fn service(mut self, service: Service) -> Self {
        self.services.push(service);
        self
    }

    pub fn embedded(mut self, device: Device) -> Self {
        self.embedded.push(device);
        self
    }

    pub fn build_local(self, max_age: u32) -> Result<Device, ValidationError> {
        if max_age == 0 {
            return Err(ValidationError::invalid("max-age", "must be positive"));
        }
        if self.services.iter().any(|s| !s.is_local()) {
            return Err(ValidationError::invalid("service", "local device with remote service"));
        }
        self.build(DeviceKind::Local { max_age })
    }

    pub fn build_remote(self, identity: RemoteDeviceIdentity) -> Result<Device, ValidationError> {
        if identity.udn != self.udn {
            return Err(ValidationError::invalid(
                "udn",
                format!("descriptor UDN {} differs from advertised {}", self.udn, identity.udn),
            ));
        }
        self.build(DeviceKind::Remote(identity))
    }

    /// Construit sans contrôler la cohérence avec l'identité annoncée ;
    /// utilisé pour les devices embarqués d'un descripteur distant.
    pub(crate) fn build(self, kind: DeviceKind) -> Result<Device, ValidationError> {
        if self.details.friendly_name.trim().is_empty() {
            return Err(ValidationError::MissingField("friendlyName"));
        }
        let mut device = Device {
            udn: self.udn,
            device_type: self.device_type,
            details: self.details,
            icons: self.icons,
            services: self.services,
            embedded: self.embedded,
            parent: None,
            kind: kind.clone(),
        };

        let mut udns = HashSet::new();
        for d in device.all_devices() {
            if !udns.insert(d.udn.clone()) {
                return Err(ValidationError::invalid("udn", format!("duplicate embedded UDN {}", d.udn)));
            }
            let mut ids = HashSet::new();
            for s in &d.services {
                if !ids.insert(&s.service_id) {
                    return Err(ValidationError::invalid(
                        "serviceId",
                        format!("duplicate {} in {}", s.service_id, d.udn),
                    ));
                }
            }
        }

        device.seal(None, &kind);
        Ok(device)
    }
}
