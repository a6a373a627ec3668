//! Lecture et écriture des messages sur le fil.
//!
//! Un datagramme ne porte que la ligne de départ et les en-têtes, terminés
//! par une ligne vide. Un message de flux ajoute un corps délimité par
//! `CONTENT-LENGTH`.

use super::{Body, HeaderType, HeaderValue, Method, Operation, UpnpHeaders, UpnpMessage};
use crate::errors::MessageParseError;

const CRLF: &str = "\r\n";

fn split_head(bytes: &[u8]) -> (&[u8], &[u8]) {
    if let Some(i) = bytes.windows(4).position(|w| w == b"\r\n\r\n") {
        return (&bytes[..i], &bytes[i + 4..]);
    }
    if let Some(i) = bytes.windows(2).position(|w| w == b"\n\n") {
        return (&bytes[..i], &bytes[i + 2..]);
    }
    (bytes, &[])
}

fn parse_start_line(line: &str) -> Result<Operation, MessageParseError> {
    let bad = || MessageParseError::StartLine(line.to_string());
    let mut parts = line.trim().splitn(3, ' ');
    let first = parts.next().ok_or_else(bad)?;
    let second = parts.next().ok_or_else(bad)?;
    let third = parts.next().unwrap_or_default();

    if first.to_ascii_uppercase().starts_with("HTTP/") {
        let status = second.parse::<u16>().map_err(|_| bad())?;
        return Ok(Operation::Response {
            status,
            reason: third.trim().to_string(),
        });
    }

    if !third.to_ascii_uppercase().starts_with("HTTP/") {
        return Err(bad());
    }
    let method = first.parse::<Method>().map_err(|_| bad())?;
    Ok(Operation::Request {
        method,
        target: second.to_string(),
    })
}

fn parse_head(head: &[u8]) -> Result<(Operation, UpnpHeaders), MessageParseError> {
    let text = std::str::from_utf8(head).map_err(|_| MessageParseError::Encoding)?;
    let mut lines = text.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));
    let start = lines
        .by_ref()
        .find(|l| !l.trim().is_empty())
        .ok_or(MessageParseError::Empty)?;
    let operation = parse_start_line(start)?;
    let headers = UpnpHeaders::parse_lines(lines);
    Ok((operation, headers))
}

fn write_head(msg: &UpnpMessage, headers: &UpnpHeaders) -> String {
    let mut out = match &msg.operation {
        Operation::Request { method, target } => format!("{} {} HTTP/1.1{}", method, target, CRLF),
        Operation::Response { status, reason } => format!("HTTP/1.1 {} {}{}", status, reason, CRLF),
    };
    for line in headers.to_lines() {
        out.push_str(&line);
        out.push_str(CRLF);
    }
    out.push_str(CRLF);
    out
}

/// Lit un datagramme SSDP. Un éventuel corps est ignoré.
pub fn read_datagram(bytes: &[u8]) -> Result<UpnpMessage, MessageParseError> {
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(MessageParseError::Empty);
    }
    let (head, _) = split_head(bytes);
    let (operation, headers) = parse_head(head)?;
    Ok(UpnpMessage {
        operation,
        headers,
        body: None,
    })
}

/// Sérialise un datagramme ; la sortie se termine toujours par CRLFCRLF.
pub fn write_datagram(msg: &UpnpMessage) -> Vec<u8> {
    write_head(msg, &msg.headers).into_bytes()
}

/// Lit un message de flux complet (requête ou réponse HTTP).
///
/// `CONTENT-LENGTH` et, en présence d'un corps, `CONTENT-TYPE` sont
/// structurellement requis : une valeur invalide rend le message entier
/// illisible.
pub fn read_stream(bytes: &[u8]) -> Result<UpnpMessage, MessageParseError> {
    if bytes.is_empty() {
        return Err(MessageParseError::Empty);
    }
    let (head, rest) = split_head(bytes);
    let (operation, headers) = parse_head(head)?;

    if let Some(e) = headers.invalid_for(HeaderType::ContentLength) {
        return Err(MessageParseError::RequiredHeader(e.clone()));
    }
    let body_bytes = match headers.content_length() {
        Some(&n) if rest.len() < n => {
            return Err(MessageParseError::Truncated {
                expected: n,
                actual: rest.len(),
            });
        }
        Some(&n) => &rest[..n],
        None => rest,
    };

    let body = decode_body(&headers, body_bytes)?;
    Ok(UpnpMessage {
        operation,
        headers,
        body,
    })
}

/// Construit le corps typé d'un message à partir de ses octets.
pub(crate) fn decode_body(headers: &UpnpHeaders, bytes: &[u8]) -> Result<Option<Body>, MessageParseError> {
    if bytes.is_empty() {
        return Ok(None);
    }
    if let Some(e) = headers.invalid_for(HeaderType::ContentType) {
        return Err(MessageParseError::RequiredHeader(e.clone()));
    }
    let textual = match headers.content_type() {
        Some(ct) => ct.mime.starts_with("text/") || ct.is_xml(),
        None => true,
    };
    if !textual {
        return Ok(Some(Body::Bytes(bytes.to_vec())));
    }
    match std::str::from_utf8(bytes) {
        Ok(s) => Ok(Some(Body::Text(s.to_string()))),
        Err(_) if headers.content_type().is_some() => Err(MessageParseError::Encoding),
        Err(_) => Ok(Some(Body::Bytes(bytes.to_vec()))),
    }
}

/// Sérialise un message de flux, `CONTENT-LENGTH` recalculé depuis le corps.
pub fn write_stream(msg: &UpnpMessage) -> Vec<u8> {
    let mut headers = msg.headers.clone();
    let body = msg.body.as_ref().map(Body::as_bytes).unwrap_or_default();
    headers.set(HeaderValue::ContentLength(body.len()));
    let mut out = write_head(msg, &headers).into_bytes();
    out.extend_from_slice(body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{NotificationSubtype, NotificationTarget};

    const ALIVE: &str = "NOTIFY * HTTP/1.1\r\n\
        HOST: 239.255.255.250:1900\r\n\
        CACHE-CONTROL: max-age=2000\r\n\
        LOCATION: http://localhost:0/some/path/123/desc.xml\r\n\
        X-CLING-IFACE-MAC: 00:17:ab:e9:65:a0\r\n\
        NT: upnp:rootdevice\r\n\
        NTS: ssdp:alive\r\n\
        EXT:\r\n\
        SERVER: foo/1 UPnP/1.0\r\n bar/2\r\n\
        USN: uuid:MY-DEVICE-123::upnp:rootdevice\r\n\r\n";

    #[test]
    fn test_read_folded_notify() {
        let msg = read_datagram(ALIVE.as_bytes()).unwrap();
        assert_eq!(msg.method(), Some(Method::Notify));
        assert_eq!(msg.headers.max_age(), Some(&2000));
        assert_eq!(msg.headers.nt(), Some(&NotificationTarget::RootDevice));
        assert_eq!(msg.headers.nts(), Some(&NotificationSubtype::Alive));
        assert_eq!(msg.headers.usn().unwrap().udn.identifier(), "MY-DEVICE-123");
        assert!(msg.headers.has_ext());

        let server = msg.headers.server().unwrap();
        assert_eq!(server.os_name, "foo");
        assert_eq!(server.os_version, "1");
        assert_eq!(server.major_version, 1);
        assert_eq!(server.minor_version, 0);
        assert_eq!(server.product_name, "bar");
        assert_eq!(server.product_version, "2");

        assert_eq!(msg.headers.raw("X-CLING-IFACE-MAC"), Some("00:17:ab:e9:65:a0"));
    }

    #[test]
    fn test_datagram_roundtrip() {
        let msg = read_datagram(ALIVE.as_bytes()).unwrap();
        let bytes = write_datagram(&msg);
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.ends_with("\r\n\r\n"));
        assert!(text.contains("\r\nEXT:\r\n"));

        let again = read_datagram(&bytes).unwrap();
        assert_eq!(again, msg);
    }

    #[test]
    fn test_bad_start_line() {
        assert!(matches!(
            read_datagram(b"HELLO\r\n\r\n"),
            Err(MessageParseError::StartLine(_))
        ));
        assert!(matches!(
            read_datagram(b"FETCH * HTTP/1.1\r\n\r\n"),
            Err(MessageParseError::StartLine(_))
        ));
        assert!(matches!(read_datagram(b"\r\n"), Err(MessageParseError::Empty)));
    }

    #[test]
    fn test_stream_content_length_is_required_when_invalid() {
        let raw = b"HTTP/1.1 200 OK\r\nCONTENT-LENGTH: lots\r\n\r\nbody";
        assert!(matches!(read_stream(raw), Err(MessageParseError::RequiredHeader(_))));

        let raw = b"HTTP/1.1 200 OK\r\nCONTENT-TYPE: nonsense\r\nCONTENT-LENGTH: 4\r\n\r\nbody";
        assert!(matches!(read_stream(raw), Err(MessageParseError::RequiredHeader(_))));

        // Type invalide mais pas de corps : le message reste utilisable
        let raw = b"HTTP/1.1 200 OK\r\nCONTENT-TYPE: nonsense\r\nCONTENT-LENGTH: 0\r\n\r\n";
        assert!(read_stream(raw).is_ok());
    }

    #[test]
    fn test_stream_roundtrip() {
        let msg = UpnpMessage::request(Method::Post, "/upnp/control")
            .with_xml_body("<a>é</a>".to_string());
        let bytes = write_stream(&msg);
        let back = read_stream(&bytes).unwrap();
        assert_eq!(back.body_text(), Some("<a>é</a>"));
        assert_eq!(back.headers.content_length(), Some(&"<a>é</a>".len()));
    }

    #[test]
    fn test_truncated_body() {
        let raw = b"HTTP/1.1 200 OK\r\nCONTENT-LENGTH: 10\r\n\r\nabc";
        assert!(matches!(read_stream(raw), Err(MessageParseError::Truncated { .. })));
    }
}
