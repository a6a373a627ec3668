//! # Module SOAP - Contrôle des services UPnP
//!
//! Ce module gère les messages SOAP (Simple Object Access Protocol) utilisés
//! par UPnP pour l'invocation d'actions sur les services.
//!
//! ## Fonctionnalités
//!
//! - ✅ Parsing d'enveloppes SOAP, arguments dans l'ordre du document
//! - ✅ Construction de requêtes et de réponses
//! - ✅ SOAP faults UPnP (écriture et lecture du détail `UPnPError`)
//! - ✅ [`ControlPoint`] : invocation d'actions distantes
//! - ✅ [`serve_control`] : exécution des requêtes reçues par un service local
//! - ✅ `QueryStateVariable` via l'en-tête `SOAPACTION` de contrôle
//!
//! ## Format d'une requête SOAP UPnP
//!
//! ```xml
//! <?xml version="1.0"?>
//! <s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"
//!             s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">
//!   <s:Body>
//!     <u:ActionName xmlns:u="urn:schemas-upnp-org:service:serviceType:v">
//!       <argumentName>value</argumentName>
//!     </u:ActionName>
//!   </s:Body>
//! </s:Envelope>
//! ```

mod builder;
pub mod control;
mod envelope;
mod fault;
mod parser;
mod serve;

pub use builder::{build_soap_request, build_soap_response};
pub use control::{ActionInvocation, ActionInvocationBuilder, ControlPoint, build_action_request, classify_response};
pub use envelope::{SOAP_ENCODING_STYLE, SOAP_ENVELOPE_NS, SoapBody, SoapEnvelope, SoapHeader};
pub use fault::{SoapFault, UpnpError, build_soap_fault};
pub use parser::{SoapAction, SoapParseError, extract_action_from_body, parse_soap_action, parse_soap_envelope};
pub use serve::serve_control;

/// Codes d'erreur UPnP standards
pub mod error_codes {
    pub const INVALID_ACTION: u16 = 401;
    pub const INVALID_ARGS: u16 = 402;
    pub const INVALID_VAR: u16 = 404;
    pub const ACTION_FAILED: u16 = 501;
    pub const ARGUMENT_VALUE_INVALID: u16 = 600;
    pub const ARGUMENT_VALUE_OUT_OF_RANGE: u16 = 601;
    pub const OPTIONAL_ACTION_NOT_IMPLEMENTED: u16 = 602;
    pub const OUT_OF_MEMORY: u16 = 603;
    pub const HUMAN_INTERVENTION_REQUIRED: u16 = 604;
    pub const STRING_ARGUMENT_TOO_LONG: u16 = 605;
}
