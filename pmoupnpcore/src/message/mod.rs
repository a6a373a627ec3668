//! # Module message - modèle et codec des messages UPnP
//!
//! Un [`UpnpMessage`] est une opération (requête : méthode + cible ; ou
//! réponse : code de statut), une multimap ordonnée d'en-têtes typés et un
//! corps optionnel.
//!
//! ## Fonctionnalités
//!
//! - ✅ Énumération fermée des en-têtes, table d'analyse indexée par type
//! - ✅ Repliement des lignes de continuation
//! - ✅ En-têtes invalides écartés individuellement ([`InvalidHeaderError`])
//! - ✅ Cadrage datagramme (terminé par CRLFCRLF) et flux (`CONTENT-LENGTH`)
//!
//! [`InvalidHeaderError`]: crate::errors::InvalidHeaderError

mod codec;
mod header;
mod headers;

use std::fmt;
use std::str::FromStr;

use url::Url;

pub(crate) use codec::decode_body;
pub use codec::{read_datagram, read_stream, write_datagram, write_stream};
pub use header::{
    CONTROL_NAMESPACE, ContentType, HEADER_TABLE, HeaderType, HeaderValue, MAX_MX, NotificationSubtype,
    NotificationTarget, ServerInfo, SoapActionHeader, SubscriptionTimeout, UNKNOWN_TOKEN, Usn,
};
pub use headers::{HeaderEntry, UpnpHeaders};

/// Cible d'une requête vers `url` : chemin, suivi de `?requête` si présente.
pub fn request_target(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Notify,
    MSearch,
    Subscribe,
    Unsubscribe,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Notify => "NOTIFY",
            Method::MSearch => "M-SEARCH",
            Method::Subscribe => "SUBSCRIBE",
            Method::Unsubscribe => "UNSUBSCRIBE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "NOTIFY" => Ok(Method::Notify),
            "M-SEARCH" => Ok(Method::MSearch),
            "SUBSCRIBE" => Ok(Method::Subscribe),
            "UNSUBSCRIBE" => Ok(Method::Unsubscribe),
            _ => Err(format!("unsupported method {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Request { method: Method, target: String },
    Response { status: u16, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Text(String),
    Bytes(Vec<u8>),
}

impl Body {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Body::Text(s) => s.as_bytes(),
            Body::Bytes(b) => b,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Body::Text(s) => Some(s),
            Body::Bytes(b) => std::str::from_utf8(b).ok(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpnpMessage {
    pub operation: Operation,
    pub headers: UpnpHeaders,
    pub body: Option<Body>,
}

pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        412 => "Precondition Failed",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        _ => "",
    }
}

impl UpnpMessage {
    pub fn request(method: Method, target: &str) -> Self {
        Self {
            operation: Operation::Request {
                method,
                target: target.to_string(),
            },
            headers: UpnpHeaders::new(),
            body: None,
        }
    }

    pub fn response(status: u16) -> Self {
        Self {
            operation: Operation::Response {
                status,
                reason: reason_phrase(status).to_string(),
            },
            headers: UpnpHeaders::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, value: HeaderValue) -> Self {
        self.headers.add(value);
        self
    }

    /// Corps XML UTF-8, avec l'en-tête `CONTENT-TYPE` correspondant.
    pub fn with_xml_body(mut self, xml: String) -> Self {
        self.headers
            .set(HeaderValue::ContentType(ContentType::text_xml_utf8()));
        self.body = Some(Body::Text(xml));
        self
    }

    pub fn method(&self) -> Option<Method> {
        match &self.operation {
            Operation::Request { method, .. } => Some(*method),
            Operation::Response { .. } => None,
        }
    }

    pub fn target(&self) -> Option<&str> {
        match &self.operation {
            Operation::Request { target, .. } => Some(target),
            Operation::Response { .. } => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match &self.operation {
            Operation::Response { status, .. } => Some(*status),
            Operation::Request { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status(), Some(s) if (200..300).contains(&s))
    }

    pub fn has_body(&self) -> bool {
        self.body.as_ref().is_some_and(|b| !b.is_empty())
    }

    pub fn body_text(&self) -> Option<&str> {
        self.body.as_ref().and_then(Body::as_text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_target_keeps_query() {
        let plain = Url::parse("http://10.0.0.2:8081/upnp/cb/abc").unwrap();
        assert_eq!(request_target(&plain), "/upnp/cb/abc");

        let with_query = Url::parse("http://10.0.0.2:49152/event?sid=7&x=1").unwrap();
        assert_eq!(request_target(&with_query), "/event?sid=7&x=1");

        let request = UpnpMessage::request(Method::Notify, &request_target(&with_query));
        assert_eq!(request.target(), Some("/event?sid=7&x=1"));
    }
}
