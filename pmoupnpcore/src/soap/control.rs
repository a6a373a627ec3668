//! Côté point de contrôle : invocation d'actions sur des services distants.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use super::error_codes;
use super::fault::SoapFault;
use super::{build_soap_request, parse_soap_envelope};
use crate::errors::{ActionInvocationFailure, ControlError, TransportFailure};
use crate::message::{
    CONTROL_NAMESPACE, HeaderValue, Method, ServerInfo, SoapActionHeader, UpnpMessage, request_target,
};
use crate::model::{Action, ArgumentValues, Service};
use crate::transport::StreamClient;
use crate::variable_types::{StateValue, StateVarType};

/// Action prête à être envoyée : arguments IN validés et ordonnés.
#[derive(Debug, Clone)]
pub struct ActionInvocation {
    service: Service,
    action: Action,
    inputs: ArgumentValues,
}

impl ActionInvocation {
    /// Commence une invocation de `action` ; 401 si le service ne la déclare pas.
    pub fn builder(service: &Service, action: &str) -> Result<ActionInvocationBuilder, ActionInvocationFailure> {
        let action = service.action(action).cloned().ok_or_else(|| {
            ActionInvocationFailure::fatal(
                error_codes::INVALID_ACTION,
                format!("{} has no action {}", service.service_id, action),
            )
        })?;
        Ok(ActionInvocationBuilder {
            service: service.clone(),
            action,
            values: HashMap::new(),
        })
    }

    /// `QueryStateVariable(varName)`, disponible sur tout service.
    pub fn query_state_variable(service: &Service, variable: &str) -> Self {
        Self {
            service: service.clone(),
            action: Action::query_state_variable(),
            inputs: vec![("varName".to_string(), StateValue::String(variable.to_string()))],
        }
    }

    pub fn service(&self) -> &Service {
        &self.service
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn inputs(&self) -> &ArgumentValues {
        &self.inputs
    }
}

#[derive(Debug)]
pub struct ActionInvocationBuilder {
    service: Service,
    action: Action,
    values: HashMap<String, StateValue>,
}

impl ActionInvocationBuilder {
    /// Une valeur `String` est convertie vers le type de l'argument à `build()`.
    pub fn argument(mut self, name: &str, value: StateValue) -> Self {
        self.values.insert(name.to_string(), value);
        self
    }

    /// Vérifie chaque argument IN ; 402 si l'un manque, est inconnu ou mal typé.
    pub fn build(mut self) -> Result<ActionInvocation, ActionInvocationFailure> {
        let mut inputs = Vec::new();
        for arg in self.action.input_arguments() {
            let datatype = arg.datatype();
            let value = self.values.remove(&arg.name).ok_or_else(|| {
                ActionInvocationFailure::fatal(
                    error_codes::INVALID_ARGS,
                    format!("missing argument {}", arg.name),
                )
            })?;
            let value = match value {
                StateValue::String(s) if datatype != StateVarType::String => StateValue::from_string(&s, &datatype)
                    .map_err(|e| {
                        ActionInvocationFailure::fatal(error_codes::INVALID_ARGS, format!("{}: {}", arg.name, e))
                    })?,
                other => other,
            };
            if value.value_type() != datatype {
                return Err(ActionInvocationFailure::fatal(
                    error_codes::INVALID_ARGS,
                    format!("{} expects {}, got {}", arg.name, datatype, value.value_type()),
                ));
            }
            inputs.push((arg.name.clone(), value));
        }

        if let Some(extra) = self.values.keys().next() {
            return Err(ActionInvocationFailure::fatal(
                error_codes::INVALID_ARGS,
                format!("{} has no input argument {}", self.action.name, extra),
            ));
        }

        Ok(ActionInvocation {
            service: self.service,
            action: self.action,
            inputs,
        })
    }
}

/// Requête `POST` vers `target` (chemin de l'URL de contrôle).
///
/// `QueryStateVariable` utilise l'espace de noms de contrôle à la place du
/// type de service, dans `SOAPACTION` comme dans le corps.
pub fn build_action_request(
    invocation: &ActionInvocation,
    target: &str,
) -> Result<UpnpMessage, ActionInvocationFailure> {
    let namespace = if invocation.action.is_query_state_variable() {
        CONTROL_NAMESPACE.to_string()
    } else {
        invocation.service.service_type.to_string()
    };
    let args: Vec<(String, String)> = invocation
        .inputs
        .iter()
        .map(|(name, value)| (name.clone(), value.to_string()))
        .collect();

    let body = build_soap_request(&namespace, &invocation.action.name, &args).map_err(|e| {
        ActionInvocationFailure::fatal(error_codes::ACTION_FAILED, format!("cannot write request: {}", e))
    })?;

    Ok(UpnpMessage::request(Method::Post, target)
        .with_xml_body(body)
        .with_header(HeaderValue::SoapAction(SoapActionHeader {
            service_type: namespace,
            action: invocation.action.name.clone(),
        })))
}

/// Classe la réponse à une invocation.
///
/// - statut d'erreur sans corps, ou corps illisible : échec fatal ;
/// - SOAP fault : échec récupérable portant le code applicatif ;
/// - succès : arguments OUT/RETURN dans l'ordre déclaré, 600 si l'un
///   manque ou ne se convertit pas.
pub fn classify_response(
    invocation: &ActionInvocation,
    response: &UpnpMessage,
) -> Result<ArgumentValues, ActionInvocationFailure> {
    let status = response.status().unwrap_or(0);
    let body = response.body_text().filter(|b| !b.trim().is_empty());

    let body = match body {
        Some(body) if response.is_success() || status >= 500 => body,
        _ if response.is_success() => {
            return Err(ActionInvocationFailure::fatal(
                error_codes::ACTION_FAILED,
                "empty response body",
            ));
        }
        _ => {
            return Err(ActionInvocationFailure::fatal(
                error_codes::ACTION_FAILED,
                format!("HTTP {}", status),
            ));
        }
    };

    let envelope = parse_soap_envelope(body.as_bytes()).map_err(|e| {
        ActionInvocationFailure::fatal(error_codes::ACTION_FAILED, format!("malformed SOAP response: {}", e))
    })?;
    let element = envelope.body.first_element().ok_or_else(|| {
        ActionInvocationFailure::fatal(error_codes::ACTION_FAILED, "empty SOAP body")
    })?;

    if element.name == "Fault" {
        return Err(SoapFault::from_element(element).to_failure());
    }
    if !response.is_success() {
        return Err(ActionInvocationFailure::fatal(
            error_codes::ACTION_FAILED,
            format!("HTTP {} without SOAP fault", status),
        ));
    }

    let expected = format!("{}Response", invocation.action.name);
    if element.name != expected {
        return Err(ActionInvocationFailure::fatal(
            error_codes::ACTION_FAILED,
            format!("expected <{}>, got <{}>", expected, element.name),
        ));
    }

    let mut outputs = Vec::new();
    for arg in invocation.action.output_arguments() {
        let raw = element
            .get_child(arg.name.as_str())
            .map(|c| c.get_text().map(|t| t.into_owned()).unwrap_or_default())
            .ok_or_else(|| {
                ActionInvocationFailure::fatal(
                    error_codes::ARGUMENT_VALUE_INVALID,
                    format!("missing output argument {}", arg.name),
                )
            })?;
        let value = StateValue::from_wire(&raw, &arg.datatype()).map_err(|e| {
            ActionInvocationFailure::fatal(
                error_codes::ARGUMENT_VALUE_INVALID,
                format!("{}: {}", arg.name, e),
            )
        })?;
        outputs.push((arg.name.clone(), value));
    }
    Ok(outputs)
}

/// Exécute des invocations via un [`StreamClient`].
pub struct ControlPoint {
    client: Arc<dyn StreamClient>,
    user_agent: ServerInfo,
}

impl ControlPoint {
    pub fn new(client: Arc<dyn StreamClient>, user_agent: ServerInfo) -> Self {
        Self { client, user_agent }
    }

    /// Envoie l'invocation sur une tâche dédiée et attend son résultat.
    pub async fn execute(&self, invocation: ActionInvocation) -> Result<ArgumentValues, ControlError> {
        let client = self.client.clone();
        let user_agent = self.user_agent.clone();
        tokio::spawn(async move { Self::exchange(client, user_agent, invocation).await })
            .await
            .map_err(|e| ControlError::Transport(TransportFailure(format!("control task failed: {}", e))))?
    }

    async fn exchange(
        client: Arc<dyn StreamClient>,
        user_agent: ServerInfo,
        invocation: ActionInvocation,
    ) -> Result<ArgumentValues, ControlError> {
        let url = invocation
            .service
            .remote_urls()
            .map(|u| u.control.clone())
            .ok_or_else(|| {
                ActionInvocationFailure::fatal(
                    error_codes::ACTION_FAILED,
                    format!("{} has no control URL", invocation.service.service_id),
                )
            })?;

        let request =
            build_action_request(&invocation, &request_target(&url))?.with_header(HeaderValue::UserAgent(user_agent));
        debug!("🎛️ Invoking {} on {}", invocation.action.name, url);
        let response = client.send(request, &url).await?;

        classify_response(&invocation, &response).map_err(|failure| {
            warn!("❌ {} failed: {}", invocation.action.name, failure);
            ControlError::Action(failure)
        })
    }
}
