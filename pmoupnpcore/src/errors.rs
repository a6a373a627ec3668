//! Taxonomie des erreurs de la pile UPnP.
//!
//! Les erreurs d'en-tête sont récupérées localement (l'en-tête fautif est
//! abandonné), les erreurs de message et de transport remontent à l'appelant
//! sous forme de résultats typés.

use std::fmt;

use thiserror::Error;

/// Un en-tête dont la valeur ne respecte pas sa grammaire.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid {header} header value {value:?}: {reason}")]
pub struct InvalidHeaderError {
    pub header: String,
    pub value: String,
    pub reason: String,
}

impl InvalidHeaderError {
    pub fn new(header: impl Into<String>, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Échec fatal : le message entier est rejeté.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageParseError {
    #[error("Empty message")]
    Empty,

    #[error("Invalid start line: {0}")]
    StartLine(String),

    #[error("Required header rejected: {0}")]
    RequiredHeader(InvalidHeaderError),

    #[error("Missing required header {0}")]
    MissingHeader(&'static str),

    #[error("Body is not valid UTF-8")]
    Encoding,

    #[error("Truncated body: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
}

/// Échec d'une invocation d'action.
///
/// `recoverable` vaut `true` pour un SOAP fault bien formé (le pair a répondu
/// avec un code applicatif), `false` pour une réponse sans corps ou illisible.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Action failed ({code}): {description}")]
pub struct ActionInvocationFailure {
    pub recoverable: bool,
    pub code: u16,
    pub description: String,
}

impl ActionInvocationFailure {
    pub fn recoverable(code: u16, description: impl Into<String>) -> Self {
        Self {
            recoverable: true,
            code,
            description: description.into(),
        }
    }

    pub fn fatal(code: u16, description: impl Into<String>) -> Self {
        Self {
            recoverable: false,
            code,
            description: description.into(),
        }
    }
}

/// Connectivité ou délai d'attente. Jamais récupérable à ce niveau.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Transport failure: {0}")]
pub struct TransportFailure(pub String);

impl From<std::io::Error> for TransportFailure {
    fn from(e: std::io::Error) -> Self {
        TransportFailure(e.to_string())
    }
}

impl From<reqwest::Error> for TransportFailure {
    fn from(e: reqwest::Error) -> Self {
        TransportFailure(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionFailureReason {
    Rejected,
    NoSubscriber,
    NotFound,
    DeviceShutdown,
}

impl fmt::Display for SubscriptionFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubscriptionFailureReason::Rejected => "REJECTED",
            SubscriptionFailureReason::NoSubscriber => "NO_SUBSCRIBER",
            SubscriptionFailureReason::NotFound => "NOT_FOUND",
            SubscriptionFailureReason::DeviceShutdown => "DEVICE_SHUTDOWN",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Subscription failed ({reason}): {message}")]
pub struct SubscriptionFailure {
    pub reason: SubscriptionFailureReason,
    pub message: String,
}

impl SubscriptionFailure {
    pub fn new(reason: SubscriptionFailureReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("Device {0} is already registered")]
    DuplicateUdn(String),
}

/// Erreur de construction d'un objet du modèle (builders).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid {field}: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Argument {argument} references unknown state variable {variable}")]
    UnknownRelatedVariable { argument: String, variable: String },
}

impl ValidationError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum DescriptorError {
    #[error("XML parse error: {0}")]
    Parse(#[from] xmltree::ParseError),

    #[error("XML write error: {0}")]
    Write(#[from] xmltree::Error),

    #[error("Missing element <{0}>")]
    Missing(&'static str),

    #[error("Invalid descriptor: {0}")]
    Invalid(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Transport(#[from] TransportFailure),
}

/// Résultat d'une invocation distante.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error(transparent)]
    Action(#[from] ActionInvocationFailure),

    #[error(transparent)]
    Transport(#[from] TransportFailure),
}

/// Échec d'une opération d'abonnement côté abonné.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventingError {
    #[error(transparent)]
    Subscription(#[from] SubscriptionFailure),

    #[error(transparent)]
    Transport(#[from] TransportFailure),
}

/// Corps `e:propertyset` illisible.
#[derive(Error, Debug)]
pub enum PropertySetError {
    #[error("XML parse error: {0}")]
    Xml(#[from] xmltree::ParseError),

    #[error("Root element is <{0}>, expected <propertyset>")]
    NotAPropertySet(String),

    #[error("Invalid value for {variable}: {source}")]
    Value {
        variable: String,
        source: crate::variable_types::StateValueError,
    },
}
