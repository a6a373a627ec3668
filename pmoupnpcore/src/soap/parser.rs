//! Parser de messages SOAP

use thiserror::Error;
use tracing::trace;
use xmltree::Element;

use super::envelope::{SoapBody, SoapEnvelope, SoapHeader};

/// Action SOAP extraite d'un corps de requête
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapAction {
    /// Nom de l'action (ex: "Play", "GetVolume")
    pub name: String,

    /// Namespace de l'action, si déclaré
    pub namespace: Option<String>,

    /// Arguments dans l'ordre du document
    pub args: Vec<(String, String)>,
}

impl SoapAction {
    pub fn arg(&self, name: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Erreurs de parsing SOAP
#[derive(Debug, Error)]
pub enum SoapParseError {
    #[error("XML parse error: {0}")]
    XmlError(#[from] xmltree::ParseError),

    #[error("Missing SOAP envelope")]
    MissingEnvelope,

    #[error("Missing SOAP body")]
    MissingBody,

    #[error("No action found in SOAP body")]
    NoAction,
}

/// Parse une enveloppe SOAP
pub fn parse_soap_envelope(xml: &[u8]) -> Result<SoapEnvelope, SoapParseError> {
    let root = Element::parse(xml)?;

    if root.name != "Envelope" {
        return Err(SoapParseError::MissingEnvelope);
    }

    let header = root.get_child("Header").map(|h| SoapHeader { content: h.clone() });
    let body = root
        .get_child("Body")
        .ok_or(SoapParseError::MissingBody)?;

    Ok(SoapEnvelope {
        header,
        body: SoapBody {
            content: body.clone(),
        },
    })
}

/// Premier élément du corps, interprété comme action ou réponse d'action.
pub fn extract_action_from_body(body: &SoapBody) -> Result<SoapAction, SoapParseError> {
    let elem = body.first_element().ok_or(SoapParseError::NoAction)?;

    let args = elem
        .children
        .iter()
        .filter_map(|n| n.as_element())
        .map(|child| {
            let value = child.get_text().map(|t| t.into_owned()).unwrap_or_default();
            (child.name.clone(), value)
        })
        .collect::<Vec<_>>();

    trace!("SOAP element {} with {} argument(s)", elem.name, args.len());

    Ok(SoapAction {
        name: elem.name.clone(),
        namespace: elem.namespace.clone(),
        args,
    })
}

/// Parse directement une action SOAP depuis le XML
pub fn parse_soap_action(xml: &[u8]) -> Result<SoapAction, SoapParseError> {
    let envelope = parse_soap_envelope(xml)?;
    extract_action_from_body(&envelope.body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_soap_action() {
        let xml = r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">
  <s:Body>
    <u:Play xmlns:u="urn:schemas-upnp-org:service:AVTransport:1">
      <InstanceID>0</InstanceID>
      <Speed>1</Speed>
    </u:Play>
  </s:Body>
</s:Envelope>"#;

        let action = parse_soap_action(xml.as_bytes()).unwrap();
        assert_eq!(action.name, "Play");
        assert_eq!(
            action.namespace.as_deref(),
            Some("urn:schemas-upnp-org:service:AVTransport:1")
        );
        assert_eq!(
            action.args,
            vec![
                ("InstanceID".to_string(), "0".to_string()),
                ("Speed".to_string(), "1".to_string()),
            ]
        );
    }

    #[test]
    fn test_empty_argument_is_empty_string() {
        let xml = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body>
<u:SetAVTransportURI xmlns:u="urn:schemas-upnp-org:service:AVTransport:1"><CurrentURIMetaData></CurrentURIMetaData></u:SetAVTransportURI>
</s:Body></s:Envelope>"#;
        let action = parse_soap_action(xml.as_bytes()).unwrap();
        assert_eq!(action.arg("CurrentURIMetaData"), Some(""));
    }

    #[test]
    fn test_rejects_non_envelope() {
        assert!(matches!(
            parse_soap_action(b"<root/>"),
            Err(SoapParseError::MissingEnvelope)
        ));
        assert!(matches!(
            parse_soap_action(b"<s:Envelope xmlns:s=\"http://schemas.xmlsoap.org/soap/envelope/\"/>"),
            Err(SoapParseError::MissingBody)
        ));
    }
}
