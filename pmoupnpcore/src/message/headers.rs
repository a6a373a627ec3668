//! Multimap ordonnée des en-têtes d'un message.

use tracing::debug;
use url::Url;

use super::header::{
    ContentType, HeaderType, HeaderValue, NotificationSubtype, NotificationTarget, ServerInfo,
    SoapActionHeader, SubscriptionTimeout, Usn,
};
use crate::errors::InvalidHeaderError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderEntry {
    Typed(HeaderValue),
    /// En-tête inconnu, conservé tel quel.
    Raw { name: String, value: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpnpHeaders {
    entries: Vec<HeaderEntry>,
    invalid: Vec<InvalidHeaderError>,
}

macro_rules! typed_getter {
    ($name:ident, $variant:ident, $ty:ty) => {
        pub fn $name(&self) -> Option<&$ty> {
            self.typed().find_map(|v| match v {
                HeaderValue::$variant(x) => Some(x),
                _ => None,
            })
        }
    };
}

impl UpnpHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Analyse un bloc d'en-têtes, en repliant les lignes de continuation.
    ///
    /// Une ligne commençant par un espace ou une tabulation prolonge la
    /// valeur de l'en-tête précédent, jointe par un espace. Les valeurs
    /// invalides sont écartées et consignées dans [`UpnpHeaders::invalid`].
    pub fn parse_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        let mut raw: Vec<(String, String)> = Vec::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            if line.starts_with([' ', '\t']) {
                match raw.last_mut() {
                    Some((_, value)) => {
                        let cont = line.trim();
                        if !cont.is_empty() {
                            if !value.is_empty() {
                                value.push(' ');
                            }
                            value.push_str(cont);
                        }
                    }
                    None => debug!("Ignoring continuation line without header: {:?}", line),
                }
                continue;
            }
            match line.split_once(':') {
                Some((name, value)) if !name.trim().is_empty() => {
                    raw.push((name.trim().to_string(), value.trim().to_string()));
                }
                _ => debug!("Ignoring malformed header line: {:?}", line),
            }
        }

        let mut headers = UpnpHeaders::new();
        for (name, value) in raw {
            match HeaderType::by_name(&name) {
                Some(t) => match t.parse(&value) {
                    Ok(v) => headers.entries.push(HeaderEntry::Typed(v)),
                    Err(e) => {
                        debug!("Dropping invalid header: {}", e);
                        headers.invalid.push(e);
                    }
                },
                None => headers.entries.push(HeaderEntry::Raw { name, value }),
            }
        }
        headers
    }

    pub fn add(&mut self, value: HeaderValue) {
        self.entries.push(HeaderEntry::Typed(value));
    }

    /// Remplace toutes les occurrences du même type.
    pub fn set(&mut self, value: HeaderValue) {
        let t = value.header_type();
        self.remove(t);
        self.add(value);
    }

    pub fn add_raw(&mut self, name: &str, value: &str) {
        self.entries.push(HeaderEntry::Raw {
            name: name.to_string(),
            value: value.to_string(),
        });
    }

    pub fn remove(&mut self, t: HeaderType) {
        self.entries
            .retain(|e| !matches!(e, HeaderEntry::Typed(v) if v.header_type() == t));
    }

    pub fn contains(&self, t: HeaderType) -> bool {
        self.get(t).is_some()
    }

    pub fn get(&self, t: HeaderType) -> Option<&HeaderValue> {
        self.typed().find(|v| v.header_type() == t)
    }

    pub fn get_all(&self, t: HeaderType) -> impl Iterator<Item = &HeaderValue> {
        self.typed().filter(move |v| v.header_type() == t)
    }

    pub fn raw(&self, name: &str) -> Option<&str> {
        self.entries.iter().find_map(|e| match e {
            HeaderEntry::Raw { name: n, value } if n.eq_ignore_ascii_case(name) => Some(value.as_str()),
            _ => None,
        })
    }

    pub fn entries(&self) -> &[HeaderEntry] {
        &self.entries
    }

    /// Erreurs des en-têtes écartés lors de l'analyse.
    pub fn invalid(&self) -> &[InvalidHeaderError] {
        &self.invalid
    }

    pub fn invalid_for(&self, t: HeaderType) -> Option<&InvalidHeaderError> {
        self.invalid.iter().find(|e| e.header == t.wire_name())
    }

    fn typed(&self) -> impl Iterator<Item = &HeaderValue> {
        self.entries.iter().filter_map(|e| match e {
            HeaderEntry::Typed(v) => Some(v),
            HeaderEntry::Raw { .. } => None,
        })
    }

    typed_getter!(max_age, MaxAge, u32);
    typed_getter!(location, Location, Url);
    typed_getter!(nt, Nt, NotificationTarget);
    typed_getter!(nts, Nts, NotificationSubtype);
    typed_getter!(usn, Usn, Usn);
    typed_getter!(server, Server, ServerInfo);
    typed_getter!(st, St, NotificationTarget);
    typed_getter!(man, Man, String);
    typed_getter!(mx, Mx, u32);
    typed_getter!(content_type, ContentType, ContentType);
    typed_getter!(content_length, ContentLength, usize);
    typed_getter!(soap_action, SoapAction, SoapActionHeader);
    typed_getter!(callback, Callback, Vec<Url>);
    typed_getter!(sid, Sid, String);
    typed_getter!(timeout, Timeout, SubscriptionTimeout);
    typed_getter!(seq, Seq, u32);

    pub fn has_ext(&self) -> bool {
        self.contains(HeaderType::Ext)
    }

    /// Paires (nom, valeur) sérialisées, noms canoniques pour les en-têtes typés.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|e| match e {
                HeaderEntry::Typed(v) => (v.header_type().wire_name().to_string(), v.serialize()),
                HeaderEntry::Raw { name, value } => (name.clone(), value.clone()),
            })
            .collect()
    }

    pub fn to_lines(&self) -> Vec<String> {
        self.to_pairs()
            .into_iter()
            .map(|(name, value)| {
                if value.is_empty() {
                    format!("{}:", name)
                } else {
                    format!("{}: {}", name, value)
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_folded_line_is_joined() {
        let headers = UpnpHeaders::parse_lines([
            "SERVER: foo/1 UPnP/1.0",
            " bar/2",
            "EXT:",
            "X-Vendor: kept",
        ]);
        let server = headers.server().unwrap();
        assert_eq!(server.os_name, "foo");
        assert_eq!(server.product_name, "bar");
        assert_eq!(server.product_version, "2");
        assert!(headers.has_ext());
        assert_eq!(headers.raw("x-vendor"), Some("kept"));
    }

    #[test]
    fn test_invalid_header_is_dropped_not_fatal() {
        let headers = UpnpHeaders::parse_lines(["MX: soon", "ST: ssdp:all"]);
        assert!(headers.mx().is_none());
        assert_eq!(headers.st(), Some(&NotificationTarget::All));
        assert_eq!(headers.invalid().len(), 1);
        assert!(headers.invalid_for(HeaderType::Mx).is_some());
    }

    #[test]
    fn test_set_replaces() {
        let mut headers = UpnpHeaders::new();
        headers.add(HeaderValue::Mx(1));
        headers.add(HeaderValue::Mx(2));
        assert_eq!(headers.get_all(HeaderType::Mx).count(), 2);
        headers.set(HeaderValue::Mx(3));
        assert_eq!(headers.mx(), Some(&3));
        assert_eq!(headers.get_all(HeaderType::Mx).count(), 1);
    }
}
