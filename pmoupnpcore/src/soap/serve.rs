//! Côté device : exécution des requêtes de contrôle reçues.

use tracing::{debug, error, warn};

use super::error_codes;
use super::fault::{SoapFault, build_soap_fault};
use super::{SoapAction, build_soap_response, parse_soap_action};
use crate::errors::ActionInvocationFailure;
use crate::message::{CONTROL_NAMESPACE, HeaderValue, UpnpMessage};
use crate::model::{ArgumentValues, LocalService, Service};
use crate::variable_types::StateValue;

fn fault_response(failure: &ActionInvocationFailure) -> UpnpMessage {
    match build_soap_fault(&SoapFault::from(failure)) {
        Ok(xml) => UpnpMessage::response(500).with_xml_body(xml),
        Err(e) => {
            error!("❌ Failed to write SOAP fault: {}", e);
            UpnpMessage::response(500)
        }
    }
}

fn success_response(namespace: &str, action: &str, values: &[(String, String)]) -> UpnpMessage {
    match build_soap_response(namespace, action, values) {
        Ok(xml) => UpnpMessage::response(200)
            .with_xml_body(xml)
            .with_header(HeaderValue::Ext),
        Err(e) => {
            error!("❌ Failed to write SOAP response for {}: {}", action, e);
            UpnpMessage::response(500)
        }
    }
}

fn query_state_variable(local: &LocalService, call: &SoapAction) -> UpnpMessage {
    let Some(name) = call.arg("varName") else {
        return fault_response(&ActionInvocationFailure::recoverable(
            error_codes::INVALID_ARGS,
            "missing varName",
        ));
    };
    match local.manager.value(name) {
        Some(value) => success_response(
            CONTROL_NAMESPACE,
            crate::model::QUERY_STATE_VARIABLE,
            &[("return".to_string(), value.to_string())],
        ),
        None => fault_response(&ActionInvocationFailure::recoverable(
            error_codes::INVALID_VAR,
            format!("no state variable {}", name),
        )),
    }
}

/// Exécute une requête `POST` de contrôle sur un service local.
///
/// Toute erreur produit un SOAP fault (statut 500) : 401 pour une action
/// inconnue, 402 pour un argument IN absent ou inconvertible, sinon le code
/// retourné par l'implémentation.
pub async fn serve_control(service: &Service, request: &UpnpMessage) -> UpnpMessage {
    let Some(local) = service.local_parts() else {
        return fault_response(&ActionInvocationFailure::fatal(
            error_codes::ACTION_FAILED,
            "not a local service",
        ));
    };

    let call = match request.body_text().map(|b| parse_soap_action(b.as_bytes())) {
        Some(Ok(call)) => call,
        Some(Err(e)) => {
            warn!("❌ Malformed control request for {}: {}", service.service_id, e);
            return fault_response(&ActionInvocationFailure::recoverable(
                error_codes::INVALID_ACTION,
                "Invalid Action",
            ));
        }
        None => {
            return fault_response(&ActionInvocationFailure::recoverable(
                error_codes::INVALID_ACTION,
                "missing SOAP body",
            ));
        }
    };

    let magic = request
        .headers
        .soap_action()
        .is_some_and(|h| h.is_query_state_variable());
    if magic || call.name == crate::model::QUERY_STATE_VARIABLE {
        return query_state_variable(local, &call);
    }

    let Some(action) = service.action(&call.name) else {
        return fault_response(&ActionInvocationFailure::recoverable(
            error_codes::INVALID_ACTION,
            format!("Invalid Action {}", call.name),
        ));
    };

    let mut args: ArgumentValues = Vec::new();
    for arg in action.input_arguments() {
        let Some(raw) = call.arg(&arg.name) else {
            return fault_response(&ActionInvocationFailure::recoverable(
                error_codes::INVALID_ARGS,
                format!("missing argument {}", arg.name),
            ));
        };
        match StateValue::from_wire(raw, &arg.datatype()) {
            Ok(value) => args.push((arg.name.clone(), value)),
            Err(e) => {
                return fault_response(&ActionInvocationFailure::recoverable(
                    error_codes::INVALID_ARGS,
                    format!("{}: {}", arg.name, e),
                ));
            }
        }
    }

    debug!("🎛️ {} on {}", action.name, service.service_id);
    let outputs = match local
        .capabilities
        .invoke(&action.name, args, &local.manager)
        .await
    {
        Ok(outputs) => outputs,
        Err(failure) => {
            warn!("❌ {} failed: {}", action.name, failure);
            return fault_response(&failure);
        }
    };

    let mut values = Vec::new();
    for arg in action.output_arguments() {
        match outputs.iter().find(|(n, _)| *n == arg.name) {
            Some((_, value)) => values.push((arg.name.clone(), value.to_string())),
            None => {
                error!("❌ {} did not return {}", action.name, arg.name);
                return fault_response(&ActionInvocationFailure::fatal(
                    error_codes::ACTION_FAILED,
                    format!("missing output argument {}", arg.name),
                ));
            }
        }
    }
    success_response(&service.service_type.to_string(), &action.name, &values)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::message::{Method, SoapActionHeader};
    use crate::model::{Action, ActionArgument, ServiceCapabilities, ServiceId, ServiceManager, ServiceType, StateVariable};
    use crate::soap::{build_soap_request, control::classify_response, ActionInvocation};
    use crate::variable_types::StateVarType;

    struct Volume;

    #[async_trait]
    impl ServiceCapabilities for Volume {
        fn list_actions(&self) -> Vec<Action> {
            vec![
                Action::new("SetVolume")
                    .with_argument(ActionArgument::input("DesiredVolume", "Volume")),
                Action::new("GetVolume").with_argument(ActionArgument::output("CurrentVolume", "Volume")),
            ]
        }

        fn list_state_variables(&self) -> Vec<StateVariable> {
            vec![
                StateVariable::builder("Volume", StateVarType::UI2)
                    .default_value("10")
                    .build()
                    .unwrap(),
            ]
        }

        async fn invoke(
            &self,
            action: &str,
            args: ArgumentValues,
            manager: &ServiceManager,
        ) -> Result<ArgumentValues, ActionInvocationFailure> {
            match action {
                "SetVolume" => {
                    let (_, value) = &args[0];
                    if *value == StateValue::UI2(666) {
                        return Err(ActionInvocationFailure::recoverable(701, "Too loud"));
                    }
                    manager
                        .set_value("Volume", value.clone())
                        .map_err(|e| ActionInvocationFailure::recoverable(600, e.to_string()))?;
                    Ok(vec![])
                }
                _ => Ok(vec![(
                    "CurrentVolume".to_string(),
                    manager.value("Volume").unwrap_or(StateValue::UI2(0)),
                )]),
            }
        }
    }

    fn service() -> Service {
        Service::local(
            ServiceType::new("schemas-upnp-org", "RenderingControl", 1),
            ServiceId::new("upnp-org", "RenderingControl"),
            Arc::new(Volume),
        )
        .unwrap()
    }

    fn post(action: &str, args: &[(&str, &str)]) -> UpnpMessage {
        let args: Vec<(String, String)> = args.iter().map(|(n, v)| (n.to_string(), v.to_string())).collect();
        let body = build_soap_request("urn:schemas-upnp-org:service:RenderingControl:1", action, &args).unwrap();
        UpnpMessage::request(Method::Post, "/ctl").with_xml_body(body)
    }

    fn fault_code(response: &UpnpMessage) -> u16 {
        let invocation = ActionInvocation::query_state_variable(&service(), "Volume");
        classify_response(&invocation, response).unwrap_err().code
    }

    #[tokio::test]
    async fn test_set_then_query() {
        let service = service();
        let resp = serve_control(&service, &post("SetVolume", &[("DesiredVolume", "33")])).await;
        assert_eq!(resp.status(), Some(200));
        assert!(resp.body_text().unwrap().contains("SetVolumeResponse"));

        let resp = serve_control(&service, &post("GetVolume", &[])).await;
        assert!(resp.body_text().unwrap().contains("<CurrentVolume>33</CurrentVolume>"));
    }

    #[tokio::test]
    async fn test_fault_codes() {
        let service = service();
        let resp = serve_control(&service, &post("Explode", &[])).await;
        assert_eq!(resp.status(), Some(500));
        assert_eq!(fault_code(&resp), 401);

        let resp = serve_control(&service, &post("SetVolume", &[])).await;
        assert_eq!(fault_code(&resp), 402);

        let resp = serve_control(&service, &post("SetVolume", &[("DesiredVolume", "abc")])).await;
        assert_eq!(fault_code(&resp), 402);

        let resp = serve_control(&service, &post("SetVolume", &[("DesiredVolume", "666")])).await;
        assert_eq!(fault_code(&resp), 701);
    }

    #[tokio::test]
    async fn test_query_state_variable_with_magic_header() {
        let service = service();
        let body = build_soap_request(
            CONTROL_NAMESPACE,
            "QueryStateVariable",
            &[("varName".to_string(), "Volume".to_string())],
        )
        .unwrap();
        let request = UpnpMessage::request(Method::Post, "/ctl")
            .with_xml_body(body)
            .with_header(HeaderValue::SoapAction(SoapActionHeader {
                service_type: CONTROL_NAMESPACE.to_string(),
                action: "QueryStateVariable".to_string(),
            }));
        let resp = serve_control(&service, &request).await;
        assert_eq!(resp.status(), Some(200));
        assert!(resp.body_text().unwrap().contains("<return>10</return>"));
    }
}
