//! En-têtes UPnP typés.
//!
//! Chaque [`HeaderType`] possède exactement un nom canonique et une fonction
//! d'analyse, regroupés dans la table [`HEADER_TABLE`]. La sérialisation est
//! portée par [`HeaderValue::serialize`]. Ajouter un en-tête revient à
//! étendre l'énumération et la table.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, Utc};
use url::Url;

use crate::errors::InvalidHeaderError;
use crate::model::{DeviceType, ServiceType, Udn};

/// Valeur MX maximale acceptée ; au-delà la valeur est ramenée à 120.
pub const MAX_MX: u32 = 120;

/// Type SOAP magique de l'action `QueryStateVariable`.
pub const CONTROL_NAMESPACE: &str = "urn:schemas-upnp-org:control-1-0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderType {
    Host,
    MaxAge,
    Location,
    Nt,
    Nts,
    Usn,
    Ext,
    Server,
    UserAgent,
    St,
    Man,
    Mx,
    Date,
    ContentType,
    ContentLength,
    SoapAction,
    Callback,
    Sid,
    Timeout,
    Seq,
}

type ParseFn = fn(&str) -> Result<HeaderValue, String>;

/// Table (type, nom canonique, analyse), dans l'ordre d'émission conseillé.
pub static HEADER_TABLE: &[(HeaderType, &str, ParseFn)] = &[
    (HeaderType::Host, "HOST", parse_host),
    (HeaderType::MaxAge, "CACHE-CONTROL", parse_max_age),
    (HeaderType::Location, "LOCATION", parse_location),
    (HeaderType::Nt, "NT", parse_nt),
    (HeaderType::Nts, "NTS", parse_nts),
    (HeaderType::Usn, "USN", parse_usn),
    (HeaderType::Ext, "EXT", parse_ext),
    (HeaderType::Server, "SERVER", parse_server),
    (HeaderType::UserAgent, "USER-AGENT", parse_user_agent),
    (HeaderType::St, "ST", parse_st),
    (HeaderType::Man, "MAN", parse_man),
    (HeaderType::Mx, "MX", parse_mx),
    (HeaderType::Date, "DATE", parse_date),
    (HeaderType::ContentType, "CONTENT-TYPE", parse_content_type),
    (HeaderType::ContentLength, "CONTENT-LENGTH", parse_content_length),
    (HeaderType::SoapAction, "SOAPACTION", parse_soap_action),
    (HeaderType::Callback, "CALLBACK", parse_callback),
    (HeaderType::Sid, "SID", parse_sid),
    (HeaderType::Timeout, "TIMEOUT", parse_timeout),
    (HeaderType::Seq, "SEQ", parse_seq),
];

impl HeaderType {
    /// Recherche insensible à la casse d'un nom d'en-tête.
    pub fn by_name(name: &str) -> Option<HeaderType> {
        HEADER_TABLE
            .iter()
            .find(|(_, wire, _)| wire.eq_ignore_ascii_case(name.trim()))
            .map(|(t, _, _)| *t)
    }

    pub fn wire_name(&self) -> &'static str {
        self.entry().1
    }

    fn entry(&self) -> &'static (HeaderType, &'static str, ParseFn) {
        HEADER_TABLE
            .iter()
            .find(|(t, _, _)| t == self)
            .unwrap_or_else(|| unreachable!("every header type has a table entry"))
    }

    pub fn parse(&self, raw: &str) -> Result<HeaderValue, InvalidHeaderError> {
        (self.entry().2)(raw.trim()).map_err(|reason| InvalidHeaderError::new(self.wire_name(), raw, reason))
    }
}

/// Cible de notification ou de recherche (`NT` / `ST`, suffixe d'`USN`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NotificationTarget {
    All,
    RootDevice,
    Udn(Udn),
    DeviceType(DeviceType),
    ServiceType(ServiceType),
    /// `upnp:event`, notification GENA.
    Event,
}

impl fmt::Display for NotificationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationTarget::All => f.write_str("ssdp:all"),
            NotificationTarget::RootDevice => f.write_str("upnp:rootdevice"),
            NotificationTarget::Udn(udn) => write!(f, "{}", udn),
            NotificationTarget::DeviceType(t) => write!(f, "{}", t),
            NotificationTarget::ServiceType(t) => write!(f, "{}", t),
            NotificationTarget::Event => f.write_str("upnp:event"),
        }
    }
}

impl FromStr for NotificationTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "ssdp:all" => Ok(NotificationTarget::All),
            "upnp:rootdevice" => Ok(NotificationTarget::RootDevice),
            "upnp:event" => Ok(NotificationTarget::Event),
            _ if s.starts_with("uuid:") => s
                .parse::<Udn>()
                .map(NotificationTarget::Udn)
                .map_err(|e| e.to_string()),
            _ if s.contains(":device:") => s
                .parse::<DeviceType>()
                .map(NotificationTarget::DeviceType)
                .map_err(|e| e.to_string()),
            _ if s.contains(":service:") => s
                .parse::<ServiceType>()
                .map(NotificationTarget::ServiceType)
                .map_err(|e| e.to_string()),
            _ => Err(format!("unknown notification target {:?}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationSubtype {
    Alive,
    ByeBye,
    Update,
    Discover,
    PropChange,
}

impl NotificationSubtype {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationSubtype::Alive => "ssdp:alive",
            NotificationSubtype::ByeBye => "ssdp:byebye",
            NotificationSubtype::Update => "ssdp:update",
            NotificationSubtype::Discover => "ssdp:discover",
            NotificationSubtype::PropChange => "upnp:propchange",
        }
    }
}

/// Unique Service Name : `uuid:<id>` ou `uuid:<id>::<cible>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Usn {
    pub udn: Udn,
    pub target: Option<NotificationTarget>,
}

impl fmt::Display for Usn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(target) => write!(f, "{}::{}", self.udn, target),
            None => write!(f, "{}", self.udn),
        }
    }
}

/// Jetons `OS/version UPnP/x.y produit/version` des en-têtes SERVER et USER-AGENT.
///
/// L'analyse est tolérante : les segments manquants valent `UNKNOWN`, un
/// jeton UPnP absent vaut 1.0, et un produit à plusieurs segments garde le
/// nom du premier et regroupe le reste dans la version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerInfo {
    pub os_name: String,
    pub os_version: String,
    pub major_version: u8,
    pub minor_version: u8,
    pub product_name: String,
    pub product_version: String,
}

pub const UNKNOWN_TOKEN: &str = "UNKNOWN";

impl ServerInfo {
    pub fn new(os_name: &str, os_version: &str, product_name: &str, product_version: &str) -> Self {
        Self {
            os_name: os_name.to_string(),
            os_version: os_version.to_string(),
            major_version: 1,
            minor_version: 0,
            product_name: product_name.to_string(),
            product_version: product_version.to_string(),
        }
    }

    fn split_token(token: &str) -> (String, String) {
        let token = token.trim();
        if token.is_empty() {
            return (UNKNOWN_TOKEN.to_string(), UNKNOWN_TOKEN.to_string());
        }
        match token.split_once('/') {
            Some((name, version)) => {
                let name = if name.trim().is_empty() { UNKNOWN_TOKEN } else { name.trim() };
                let version = if version.trim().is_empty() { UNKNOWN_TOKEN } else { version.trim() };
                (name.to_string(), version.to_string())
            }
            None => (token.to_string(), UNKNOWN_TOKEN.to_string()),
        }
    }

    fn parse_upnp_token(token: &str) -> Option<(u8, u8)> {
        let version = token.get(..5).filter(|p| p.eq_ignore_ascii_case("upnp/")).map(|_| &token[5..])?;
        let (major, minor) = version.split_once('.').unwrap_or((version, "0"));
        Some((major.parse().ok()?, minor.parse().unwrap_or(0)))
    }

    pub fn parse_lenient(s: &str) -> ServerInfo {
        let words: Vec<&str> = s.split_whitespace().collect();
        let upnp = words
            .iter()
            .enumerate()
            .find_map(|(i, w)| Self::parse_upnp_token(w).map(|v| (i, v)));

        let ((major, minor), os_token, product_token) = match upnp {
            Some((i, version)) => (version, words[..i].join(" "), words[i + 1..].join(" ")),
            None => match words.split_first() {
                Some((first, rest)) if !rest.is_empty() => ((1, 0), first.to_string(), rest.join(" ")),
                Some((first, _)) => ((1, 0), String::new(), first.to_string()),
                None => ((1, 0), String::new(), String::new()),
            },
        };

        let (os_name, os_version) = Self::split_token(&os_token);
        let (product_name, product_version) = Self::split_token(&product_token);
        ServerInfo {
            os_name,
            os_version,
            major_version: major,
            minor_version: minor,
            product_name,
            product_version,
        }
    }
}

impl fmt::Display for ServerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} UPnP/{}.{} {}/{}",
            self.os_name,
            self.os_version,
            self.major_version,
            self.minor_version,
            self.product_name,
            self.product_version
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentType {
    pub mime: String,
    pub charset: Option<String>,
}

impl ContentType {
    pub fn text_xml_utf8() -> Self {
        Self {
            mime: "text/xml".to_string(),
            charset: Some("utf-8".to_string()),
        }
    }

    pub fn is_xml(&self) -> bool {
        self.mime == "text/xml" || self.mime == "application/xml"
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.charset {
            Some(cs) => write!(f, "{}; charset=\"{}\"", self.mime, cs),
            None => f.write_str(&self.mime),
        }
    }
}

/// Valeur de `SOAPACTION` : `"<type>#<action>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SoapActionHeader {
    pub service_type: String,
    pub action: String,
}

impl SoapActionHeader {
    pub fn is_query_state_variable(&self) -> bool {
        self.service_type == CONTROL_NAMESPACE && self.action == crate::model::QUERY_STATE_VARIABLE
    }
}

impl fmt::Display for SoapActionHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}#{}\"", self.service_type, self.action)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionTimeout {
    Seconds(u32),
    Infinite,
}

impl fmt::Display for SubscriptionTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionTimeout::Seconds(n) => write!(f, "Second-{}", n),
            SubscriptionTimeout::Infinite => f.write_str("Second-infinite"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Host { host: String, port: Option<u16> },
    MaxAge(u32),
    Location(Url),
    Nt(NotificationTarget),
    Nts(NotificationSubtype),
    Usn(Usn),
    Ext,
    Server(ServerInfo),
    UserAgent(ServerInfo),
    St(NotificationTarget),
    Man(String),
    Mx(u32),
    Date(DateTime<FixedOffset>),
    ContentType(ContentType),
    ContentLength(usize),
    SoapAction(SoapActionHeader),
    Callback(Vec<Url>),
    Sid(String),
    Timeout(SubscriptionTimeout),
    Seq(u32),
}

impl HeaderValue {
    pub fn header_type(&self) -> HeaderType {
        match self {
            HeaderValue::Host { .. } => HeaderType::Host,
            HeaderValue::MaxAge(_) => HeaderType::MaxAge,
            HeaderValue::Location(_) => HeaderType::Location,
            HeaderValue::Nt(_) => HeaderType::Nt,
            HeaderValue::Nts(_) => HeaderType::Nts,
            HeaderValue::Usn(_) => HeaderType::Usn,
            HeaderValue::Ext => HeaderType::Ext,
            HeaderValue::Server(_) => HeaderType::Server,
            HeaderValue::UserAgent(_) => HeaderType::UserAgent,
            HeaderValue::St(_) => HeaderType::St,
            HeaderValue::Man(_) => HeaderType::Man,
            HeaderValue::Mx(_) => HeaderType::Mx,
            HeaderValue::Date(_) => HeaderType::Date,
            HeaderValue::ContentType(_) => HeaderType::ContentType,
            HeaderValue::ContentLength(_) => HeaderType::ContentLength,
            HeaderValue::SoapAction(_) => HeaderType::SoapAction,
            HeaderValue::Callback(_) => HeaderType::Callback,
            HeaderValue::Sid(_) => HeaderType::Sid,
            HeaderValue::Timeout(_) => HeaderType::Timeout,
            HeaderValue::Seq(_) => HeaderType::Seq,
        }
    }

    /// Forme filaire de la valeur, sans le nom d'en-tête.
    pub fn serialize(&self) -> String {
        match self {
            HeaderValue::Host { host, port: Some(p) } => format!("{}:{}", host, p),
            HeaderValue::Host { host, port: None } => host.clone(),
            HeaderValue::MaxAge(n) => format!("max-age={}", n),
            HeaderValue::Location(url) => url.to_string(),
            HeaderValue::Nt(t) | HeaderValue::St(t) => t.to_string(),
            HeaderValue::Nts(nts) => nts.as_str().to_string(),
            HeaderValue::Usn(usn) => usn.to_string(),
            HeaderValue::Ext => String::new(),
            HeaderValue::Server(info) | HeaderValue::UserAgent(info) => info.to_string(),
            HeaderValue::Man(man) => format!("\"{}\"", man),
            HeaderValue::Mx(n) => n.to_string(),
            HeaderValue::Date(date) => date.with_timezone(&Utc).format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
            HeaderValue::ContentType(ct) => ct.to_string(),
            HeaderValue::ContentLength(n) => n.to_string(),
            HeaderValue::SoapAction(sa) => sa.to_string(),
            HeaderValue::Callback(urls) => urls.iter().map(|u| format!("<{}>", u)).collect(),
            HeaderValue::Sid(sid) => sid.clone(),
            HeaderValue::Timeout(t) => t.to_string(),
            HeaderValue::Seq(n) => n.to_string(),
        }
    }
}

fn parse_host(s: &str) -> Result<HeaderValue, String> {
    if s.is_empty() {
        return Err("empty host".to_string());
    }
    // Adresse IPv6 entre crochets, suivie éventuellement du port
    let (host, port) = match s.rfind(':') {
        Some(i) if !s[i..].contains(']') => {
            let port = s[i + 1..].parse::<u16>().map_err(|e| format!("bad port: {}", e))?;
            (&s[..i], Some(port))
        }
        _ => (s, None),
    };
    if host.is_empty() {
        return Err("empty host".to_string());
    }
    Ok(HeaderValue::Host {
        host: host.to_string(),
        port,
    })
}

fn parse_max_age(s: &str) -> Result<HeaderValue, String> {
    for directive in s.split(',') {
        if let Some((key, value)) = directive.split_once('=') {
            if key.trim().eq_ignore_ascii_case("max-age") {
                return value
                    .trim()
                    .trim_matches('"')
                    .parse::<u32>()
                    .map(HeaderValue::MaxAge)
                    .map_err(|e| format!("bad max-age: {}", e));
            }
        }
    }
    Err("no max-age directive".to_string())
}

fn parse_location(s: &str) -> Result<HeaderValue, String> {
    Url::parse(s).map(HeaderValue::Location).map_err(|e| e.to_string())
}

fn parse_nt(s: &str) -> Result<HeaderValue, String> {
    s.parse::<NotificationTarget>().map(HeaderValue::Nt)
}

fn parse_st(s: &str) -> Result<HeaderValue, String> {
    match s.parse::<NotificationTarget>()? {
        NotificationTarget::Event => Err("upnp:event is not a search target".to_string()),
        target => Ok(HeaderValue::St(target)),
    }
}

fn parse_nts(s: &str) -> Result<HeaderValue, String> {
    let nts = match s {
        "ssdp:alive" => NotificationSubtype::Alive,
        "ssdp:byebye" => NotificationSubtype::ByeBye,
        "ssdp:update" => NotificationSubtype::Update,
        "ssdp:discover" => NotificationSubtype::Discover,
        "upnp:propchange" => NotificationSubtype::PropChange,
        _ => return Err(format!("unknown subtype {:?}", s)),
    };
    Ok(HeaderValue::Nts(nts))
}

fn parse_usn(s: &str) -> Result<HeaderValue, String> {
    let (udn, target) = match s.split_once("::") {
        Some((udn, target)) => (udn, Some(target.parse::<NotificationTarget>()?)),
        None => (s, None),
    };
    if matches!(target, Some(NotificationTarget::All | NotificationTarget::Event | NotificationTarget::Udn(_))) {
        return Err(format!("invalid USN suffix in {:?}", s));
    }
    let udn = udn.parse::<Udn>().map_err(|e| e.to_string())?;
    Ok(HeaderValue::Usn(Usn { udn, target }))
}

fn parse_ext(_s: &str) -> Result<HeaderValue, String> {
    Ok(HeaderValue::Ext)
}

fn parse_server(s: &str) -> Result<HeaderValue, String> {
    Ok(HeaderValue::Server(ServerInfo::parse_lenient(s)))
}

fn parse_user_agent(s: &str) -> Result<HeaderValue, String> {
    Ok(HeaderValue::UserAgent(ServerInfo::parse_lenient(s)))
}

fn parse_man(s: &str) -> Result<HeaderValue, String> {
    // MAN: "ssdp:discover"; ns=01 : seule la partie entre guillemets compte
    let value = s.split(';').next().unwrap_or_default().trim().trim_matches('"');
    if value.is_empty() {
        return Err("empty MAN".to_string());
    }
    Ok(HeaderValue::Man(value.to_string()))
}

fn parse_mx(s: &str) -> Result<HeaderValue, String> {
    let mx = s.parse::<u32>().map_err(|e| format!("bad MX: {}", e))?;
    Ok(HeaderValue::Mx(mx.min(MAX_MX)))
}

fn parse_date(s: &str) -> Result<HeaderValue, String> {
    DateTime::parse_from_rfc2822(s)
        .or_else(|_| DateTime::parse_from_rfc2822(&s.replace(" GMT", " +0000")))
        .map(HeaderValue::Date)
        .map_err(|e| e.to_string())
}

fn parse_content_type(s: &str) -> Result<HeaderValue, String> {
    let mut parts = s.split(';');
    let mime = parts.next().unwrap_or_default().trim().to_lowercase();
    if !mime.contains('/') {
        return Err(format!("bad media type {:?}", mime));
    }
    let charset = parts.find_map(|p| {
        let (key, value) = p.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"').to_lowercase())
    });
    Ok(HeaderValue::ContentType(ContentType { mime, charset }))
}

fn parse_content_length(s: &str) -> Result<HeaderValue, String> {
    s.parse::<usize>()
        .map(HeaderValue::ContentLength)
        .map_err(|e| format!("bad length: {}", e))
}

fn parse_soap_action(s: &str) -> Result<HeaderValue, String> {
    let value = s.trim_matches('"');
    let (service_type, action) = value
        .rsplit_once('#')
        .ok_or_else(|| format!("missing '#' in {:?}", s))?;
    if service_type.is_empty() || action.is_empty() {
        return Err(format!("incomplete SOAP action {:?}", s));
    }
    Ok(HeaderValue::SoapAction(SoapActionHeader {
        service_type: service_type.to_string(),
        action: action.to_string(),
    }))
}

fn parse_callback(s: &str) -> Result<HeaderValue, String> {
    let mut urls = Vec::new();
    let mut rest = s;
    while let Some(start) = rest.find('<') {
        let end = rest[start..]
            .find('>')
            .ok_or_else(|| "unterminated callback URL".to_string())?;
        let url = Url::parse(rest[start + 1..start + end].trim()).map_err(|e| e.to_string())?;
        if url.scheme() == "http" {
            urls.push(url);
        }
        rest = &rest[start + end + 1..];
    }
    if urls.is_empty() {
        return Err("no http callback URL".to_string());
    }
    Ok(HeaderValue::Callback(urls))
}

fn parse_sid(s: &str) -> Result<HeaderValue, String> {
    if !s.starts_with("uuid:") || s.len() == 5 {
        return Err(format!("SID must be uuid:..., got {:?}", s));
    }
    Ok(HeaderValue::Sid(s.to_string()))
}

fn parse_timeout(s: &str) -> Result<HeaderValue, String> {
    let value = s
        .get(..7)
        .filter(|p| p.eq_ignore_ascii_case("second-"))
        .map(|_| &s[7..])
        .ok_or_else(|| format!("expected Second-n, got {:?}", s))?;
    if value.eq_ignore_ascii_case("infinite") {
        return Ok(HeaderValue::Timeout(SubscriptionTimeout::Infinite));
    }
    value
        .parse::<u32>()
        .map(|n| HeaderValue::Timeout(SubscriptionTimeout::Seconds(n)))
        .map_err(|e| format!("bad timeout: {}", e))
}

fn parse_seq(s: &str) -> Result<HeaderValue, String> {
    s.parse::<u32>()
        .map(HeaderValue::Seq)
        .map_err(|e| format!("bad SEQ: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(t: HeaderType, raw: &str) {
        let first = t.parse(raw).unwrap();
        let again = t.parse(&first.serialize()).unwrap();
        assert_eq!(first, again, "round trip of {:?} {:?}", t, raw);
    }

    #[test]
    fn test_roundtrip_stability() {
        roundtrip(HeaderType::Host, "239.255.255.250:1900");
        roundtrip(HeaderType::MaxAge, "no-cache, max-age = 1800");
        roundtrip(HeaderType::Location, "http://192.168.1.2:8080/upnp/dev/x/desc.xml");
        roundtrip(HeaderType::Nt, "urn:schemas-upnp-org:service:AVTransport:1");
        roundtrip(HeaderType::Nts, "ssdp:byebye");
        roundtrip(HeaderType::Usn, "uuid:abc::urn:schemas-upnp-org:device:MediaRenderer:1");
        roundtrip(HeaderType::Usn, "uuid:abc");
        roundtrip(HeaderType::Ext, "");
        roundtrip(HeaderType::Server, "Linux/6.1 UPnP/1.0 PMOMusic/0.1");
        roundtrip(HeaderType::Server, "weird");
        roundtrip(HeaderType::St, "ssdp:all");
        roundtrip(HeaderType::Man, "\"ssdp:discover\"");
        roundtrip(HeaderType::Mx, "3");
        roundtrip(HeaderType::Date, "Tue, 15 Nov 1994 08:12:31 GMT");
        roundtrip(HeaderType::ContentType, "text/xml;charset=utf-8");
        roundtrip(HeaderType::ContentLength, "42");
        roundtrip(HeaderType::SoapAction, "\"urn:schemas-upnp-org:service:AVTransport:1#Play\"");
        roundtrip(HeaderType::Callback, "<http://10.0.0.1:4000/cb/1><http://10.0.0.2/cb>");
        roundtrip(HeaderType::Sid, "uuid:1234");
        roundtrip(HeaderType::Timeout, "Second-1800");
        roundtrip(HeaderType::Timeout, "second-infinite");
        roundtrip(HeaderType::Seq, "0");
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert_eq!(HeaderType::by_name("cache-control"), Some(HeaderType::MaxAge));
        assert_eq!(HeaderType::by_name("SoapAction"), Some(HeaderType::SoapAction));
        assert_eq!(HeaderType::by_name("X-Custom"), None);
    }

    #[test]
    fn test_mx_is_clamped() {
        assert_eq!(HeaderType::Mx.parse("500").unwrap(), HeaderValue::Mx(MAX_MX));
        assert!(HeaderType::Mx.parse("-1").is_err());
    }

    #[test]
    fn test_server_quirks() {
        let info = ServerInfo::parse_lenient("foo/1 UPnP/1.0 bar/2");
        assert_eq!(info, ServerInfo::new("foo", "1", "bar", "2"));

        let info = ServerInfo::parse_lenient("UPnP/1.1 bar/2 baz/3");
        assert_eq!(info.os_name, UNKNOWN_TOKEN);
        assert_eq!(info.minor_version, 1);
        assert_eq!(info.product_name, "bar");
        assert_eq!(info.product_version, "2 baz/3");

        let info = ServerInfo::parse_lenient("Linux/2.6 product/7");
        assert_eq!((info.major_version, info.minor_version), (1, 0));
        assert_eq!(info.os_name, "Linux");
        assert_eq!(info.product_name, "product");
    }

    #[test]
    fn test_st_targets() {
        assert_eq!(HeaderType::St.parse("ssdp:all").unwrap(), HeaderValue::St(NotificationTarget::All));
        assert!(HeaderType::St.parse("ssdp:everything").is_err());
        assert!(HeaderType::St.parse("upnp:event").is_err());
        match HeaderType::St.parse("urn:schemas-upnp-org:device:MediaServer:1").unwrap() {
            HeaderValue::St(NotificationTarget::DeviceType(t)) => assert_eq!(t.name, "MediaServer"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_callback_keeps_only_http() {
        let v = HeaderType::Callback.parse("<mailto:x@y><http://h/cb>").unwrap();
        assert_eq!(v.serialize(), "<http://h/cb>");
        assert!(HeaderType::Callback.parse("http://h/cb").is_err());
    }
}
