//! Identifiants UPnP : UDN, types de device et de service, identifiants de service.

use std::fmt;
use std::str::FromStr;

use crate::errors::ValidationError;

/// Unique Device Name, écrit `uuid:<identifiant>` sur le réseau.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Udn(String);

impl Udn {
    /// Crée un UDN à partir de l'identifiant, sans le préfixe `uuid:`.
    pub fn new(identifier: impl Into<String>) -> Result<Self, ValidationError> {
        let identifier = identifier.into();
        if identifier.is_empty() || identifier.contains(char::is_whitespace) || identifier.contains("::") {
            return Err(ValidationError::invalid("udn", format!("{:?}", identifier)));
        }
        Ok(Self(identifier))
    }

    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn identifier(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Udn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "uuid:{}", self.0)
    }
}

impl FromStr for Udn {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.get(..5) {
            Some(prefix) if prefix.eq_ignore_ascii_case("uuid:") => Udn::new(&s[5..]),
            _ => Err(ValidationError::invalid("udn", format!("missing uuid: prefix in {:?}", s))),
        }
    }
}

/// Découpe `urn:<domaine>:<kind>:<nom>:<version>`.
fn parse_type_urn<'a>(s: &'a str, kind: &str) -> Option<(&'a str, &'a str, u32)> {
    let rest = s.strip_prefix("urn:")?;
    let mut parts = rest.rsplitn(2, ':');
    let version = parts.next()?.parse::<u32>().ok()?;
    let rest = parts.next()?;
    let (namespace, tail) = rest.split_once(':')?;
    let name = tail.strip_prefix(kind)?.strip_prefix(':')?;
    if namespace.is_empty() || name.is_empty() || name.contains(':') {
        return None;
    }
    Some((namespace, name, version))
}

macro_rules! upnp_type {
    ($(#[$doc:meta])* $name:ident, $kind:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub struct $name {
            pub namespace: String,
            pub name: String,
            pub version: u32,
        }

        impl $name {
            pub fn new(namespace: &str, name: &str, version: u32) -> Self {
                Self {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    version,
                }
            }

            /// Vrai si `self` satisfait une cible de recherche `requested`.
            ///
            /// Domaine et nom doivent être égaux ; la version doit être
            /// supérieure ou égale, ou égale si `exact` est demandé.
            pub fn satisfies(&self, requested: &$name, exact: bool) -> bool {
                self.namespace == requested.namespace
                    && self.name == requested.name
                    && if exact {
                        self.version == requested.version
                    } else {
                        self.version >= requested.version
                    }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "urn:{}:{}:{}:{}", self.namespace, $kind, self.name, self.version)
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_type_urn(s.trim(), $kind)
                    .map(|(ns, name, version)| $name::new(ns, name, version))
                    .ok_or_else(|| ValidationError::invalid($kind, format!("{:?}", s)))
            }
        }
    };
}

upnp_type!(
    /// Type de device, ex. `urn:schemas-upnp-org:device:MediaRenderer:1`.
    DeviceType,
    "device"
);

upnp_type!(
    /// Type de service, ex. `urn:schemas-upnp-org:service:AVTransport:1`.
    ServiceType,
    "service"
);

/// Identifiant de service, ex. `urn:upnp-org:serviceId:AVTransport`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceId {
    pub namespace: String,
    pub id: String,
}

impl ServiceId {
    pub fn new(namespace: &str, id: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            id: id.to_string(),
        }
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "urn:{}:serviceId:{}", self.namespace, self.id)
    }
}

impl FromStr for ServiceId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::invalid("serviceId", format!("{:?}", s));
        let rest = s.trim().strip_prefix("urn:").ok_or_else(invalid)?;
        let (namespace, tail) = rest.split_once(':').ok_or_else(invalid)?;
        let id = tail.strip_prefix("serviceId:").ok_or_else(invalid)?;
        if namespace.is_empty() || id.is_empty() {
            return Err(invalid());
        }
        Ok(ServiceId::new(namespace, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_udn_parse() {
        let udn: Udn = "uuid:1234-abcd".parse().unwrap();
        assert_eq!(udn.identifier(), "1234-abcd");
        assert_eq!(udn.to_string(), "uuid:1234-abcd");
        assert!("1234".parse::<Udn>().is_err());
        assert!("uuid:".parse::<Udn>().is_err());
    }

    #[test]
    fn test_device_type_versions() {
        let t: DeviceType = "urn:schemas-upnp-org:device:MediaRenderer:2".parse().unwrap();
        assert_eq!(t.namespace, "schemas-upnp-org");
        assert_eq!(t.name, "MediaRenderer");
        assert_eq!(t.version, 2);

        let v1 = DeviceType::new("schemas-upnp-org", "MediaRenderer", 1);
        assert!(t.satisfies(&v1, false));
        assert!(!t.satisfies(&v1, true));
        assert!(!v1.satisfies(&t, false));
    }

    #[test]
    fn test_service_type_rejects_device_urn() {
        assert!("urn:schemas-upnp-org:device:MediaRenderer:1".parse::<ServiceType>().is_err());
        let s: ServiceType = "urn:schemas-upnp-org:service:AVTransport:1".parse().unwrap();
        assert_eq!(s.to_string(), "urn:schemas-upnp-org:service:AVTransport:1");
    }

    #[test]
    fn test_service_id() {
        let id: ServiceId = "urn:upnp-org:serviceId:AVTransport".parse().unwrap();
        assert_eq!(id.namespace, "upnp-org");
        assert_eq!(id.id, "AVTransport");
        assert_eq!(id.to_string(), "urn:upnp-org:serviceId:AVTransport");
    }
}
