//! Gestion des SOAP Faults UPnP

use xmltree::{Element, XMLNode};

use super::envelope::write_envelope;
use crate::errors::ActionInvocationFailure;
use crate::message::CONTROL_NAMESPACE;

/// SOAP Fault
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapFault {
    /// Code de fault SOAP (`s:Client`, `s:Server`)
    pub fault_code: String,

    /// Description du fault
    pub fault_string: String,

    /// Détail UPnP optionnel
    pub upnp_error: Option<UpnpError>,
}

/// Erreur UPnP spécifique portée par `<detail><UPnPError>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpnpError {
    pub error_code: u16,
    pub error_description: String,
}

impl SoapFault {
    /// Fault UDA standard : `s:Client` / `UPnPError` avec le détail UPnP.
    pub fn upnp(code: u16, description: impl Into<String>) -> Self {
        Self {
            fault_code: "s:Client".to_string(),
            fault_string: "UPnPError".to_string(),
            upnp_error: Some(UpnpError {
                error_code: code,
                error_description: description.into(),
            }),
        }
    }

    /// Échec récupérable correspondant ; sans détail UPnP le code est 501.
    pub fn to_failure(&self) -> ActionInvocationFailure {
        match &self.upnp_error {
            Some(e) => ActionInvocationFailure::recoverable(e.error_code, e.error_description.clone()),
            None => ActionInvocationFailure::recoverable(super::error_codes::ACTION_FAILED, self.fault_string.clone()),
        }
    }

    /// Lit un élément `<Fault>` (noms locaux, préfixes ignorés).
    pub fn from_element(fault: &Element) -> Self {
        let text = |parent: &Element, name: &str| -> Option<String> {
            parent
                .get_child(name)
                .and_then(|e| e.get_text())
                .map(|t| t.trim().to_string())
        };

        let upnp_error = fault
            .get_child("detail")
            .and_then(|d| d.get_child("UPnPError"))
            .and_then(|e| {
                let code = text(e, "errorCode")?.parse::<u16>().ok()?;
                Some(UpnpError {
                    error_code: code,
                    error_description: text(e, "errorDescription").unwrap_or_default(),
                })
            });

        Self {
            fault_code: text(fault, "faultcode").unwrap_or_default(),
            fault_string: text(fault, "faultstring").unwrap_or_default(),
            upnp_error,
        }
    }
}

impl From<&ActionInvocationFailure> for SoapFault {
    fn from(failure: &ActionInvocationFailure) -> Self {
        SoapFault::upnp(failure.code, failure.description.clone())
    }
}

fn text_element(name: &str, text: &str) -> Element {
    let mut elem = Element::new(name);
    elem.children.push(XMLNode::Text(text.to_string()));
    elem
}

/// Construit l'enveloppe complète d'un SOAP fault.
///
/// # Exemple
///
/// ```ignore
/// let xml = build_soap_fault(&SoapFault::upnp(401, "Invalid Action"))?;
/// ```
pub fn build_soap_fault(fault: &SoapFault) -> Result<String, xmltree::Error> {
    let mut elem = Element::new("s:Fault");
    elem.children
        .push(XMLNode::Element(text_element("faultcode", &fault.fault_code)));
    elem.children
        .push(XMLNode::Element(text_element("faultstring", &fault.fault_string)));

    if let Some(upnp) = &fault.upnp_error {
        let mut upnp_error = Element::new("UPnPError");
        upnp_error
            .attributes
            .insert("xmlns".to_string(), CONTROL_NAMESPACE.to_string());
        upnp_error
            .children
            .push(XMLNode::Element(text_element("errorCode", &upnp.error_code.to_string())));
        upnp_error.children.push(XMLNode::Element(text_element(
            "errorDescription",
            &upnp.error_description,
        )));

        let mut detail = Element::new("detail");
        detail.children.push(XMLNode::Element(upnp_error));
        elem.children.push(XMLNode::Element(detail));
    }

    write_envelope(elem)
}
