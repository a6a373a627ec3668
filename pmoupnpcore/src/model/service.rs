//! Services UPnP, locaux ou distants.

use std::collections::HashSet;
use std::sync::Arc;

use url::Url;

use crate::errors::ValidationError;
use crate::model::{Action, ServiceCapabilities, ServiceId, ServiceManager, ServiceType, StateVariable, Udn};

/// URLs d'un service distant, résolues contre l'URL de base du device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteServiceUrls {
    pub descriptor: Url,
    pub control: Url,
    pub event_subscription: Url,
}

#[derive(Clone)]
pub struct LocalService {
    pub capabilities: Arc<dyn ServiceCapabilities>,
    pub manager: Arc<ServiceManager>,
}

impl std::fmt::Debug for LocalService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalService")
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub enum ServiceKind {
    Local(LocalService),
    Remote(RemoteServiceUrls),
}

#[derive(Debug, Clone)]
pub struct Service {
    pub service_type: ServiceType,
    pub service_id: ServiceId,
    /// Device propriétaire, renseigné lors de la construction du device.
    pub device: Option<Udn>,
    actions: Vec<Action>,
    state_variables: Vec<StateVariable>,
    pub kind: ServiceKind,
}

fn check_unique<'a>(what: &str, names: impl Iterator<Item = &'a str>) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(ValidationError::invalid(what, format!("duplicate name {}", name)));
        }
    }
    Ok(())
}

fn resolve(
    actions: Vec<Action>,
    state_variables: &[StateVariable],
) -> Result<Vec<Action>, ValidationError> {
    check_unique("stateVariable", state_variables.iter().map(|v| v.name.as_str()))?;
    check_unique("action", actions.iter().map(|a| a.name.as_str()))?;
    actions
        .into_iter()
        .map(|a| a.resolve(state_variables))
        .collect()
}

impl Service {
    /// Construit un service local depuis ses capacités.
    ///
    /// Les types des arguments sont résolus, et l'action `QueryStateVariable`
    /// est ajoutée si l'implémentation ne la déclare pas.
    pub fn local(
        service_type: ServiceType,
        service_id: ServiceId,
        capabilities: Arc<dyn ServiceCapabilities>,
    ) -> Result<Self, ValidationError> {
        let state_variables = capabilities.list_state_variables();
        let mut actions = resolve(capabilities.list_actions(), &state_variables)?;
        if !actions.iter().any(Action::is_query_state_variable) {
            actions.push(Action::query_state_variable());
        }
        let manager = Arc::new(ServiceManager::new(&state_variables));
        Ok(Self {
            service_type,
            service_id,
            device: None,
            actions,
            state_variables,
            kind: ServiceKind::Local(LocalService {
                capabilities,
                manager,
            }),
        })
    }

    pub fn remote(
        service_type: ServiceType,
        service_id: ServiceId,
        urls: RemoteServiceUrls,
        actions: Vec<Action>,
        state_variables: Vec<StateVariable>,
    ) -> Result<Self, ValidationError> {
        let actions = resolve(actions, &state_variables)?;
        Ok(Self {
            service_type,
            service_id,
            device: None,
            actions,
            state_variables,
            kind: ServiceKind::Remote(urls),
        })
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn action(&self, name: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.name == name)
    }

    pub fn state_variables(&self) -> &[StateVariable] {
        &self.state_variables
    }

    pub fn state_variable(&self, name: &str) -> Option<&StateVariable> {
        self.state_variables.iter().find(|v| v.name == name)
    }

    pub fn is_local(&self) -> bool {
        matches!(self.kind, ServiceKind::Local(_))
    }

    pub fn local_parts(&self) -> Option<&LocalService> {
        match &self.kind {
            ServiceKind::Local(l) => Some(l),
            ServiceKind::Remote(_) => None,
        }
    }

    pub fn remote_urls(&self) -> Option<&RemoteServiceUrls> {
        match &self.kind {
            ServiceKind::Remote(urls) => Some(urls),
            ServiceKind::Local(_) => None,
        }
    }

    pub fn has_evented_variables(&self) -> bool {
        self.state_variables.iter().any(|v| v.send_events)
    }
}
