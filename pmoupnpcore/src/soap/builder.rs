//! Construction de messages SOAP

use xmltree::{Element, XMLNode};

use super::envelope::write_envelope;

fn action_element(tag: String, service_urn: &str, values: &[(String, String)]) -> Element {
    let mut elem = Element::new(&tag);
    elem.attributes
        .insert("xmlns:u".to_string(), service_urn.to_string());

    for (name, value) in values {
        let mut child = Element::new(name);
        child.children.push(XMLNode::Text(value.clone()));
        elem.children.push(XMLNode::Element(child));
    }
    elem
}

/// Construit une requête SOAP `<u:{action}>` ; les arguments gardent l'ordre donné.
pub fn build_soap_request(
    service_urn: &str,
    action: &str,
    args: &[(String, String)],
) -> Result<String, xmltree::Error> {
    write_envelope(action_element(format!("u:{}", action), service_urn, args))
}

/// Construit une réponse SOAP `<u:{action}Response>`.
///
/// # Exemple
///
/// ```ignore
/// let xml = build_soap_response(
///     "urn:schemas-upnp-org:service:AVTransport:1",
///     "GetTransportInfo",
///     &[("CurrentTransportState".to_string(), "PLAYING".to_string())],
/// )?;
/// ```
pub fn build_soap_response(
    service_urn: &str,
    action: &str,
    values: &[(String, String)],
) -> Result<String, xmltree::Error> {
    write_envelope(action_element(
        format!("u:{}Response", action),
        service_urn,
        values,
    ))
}
