//! Partie « locale » d'un service : capacités d'exécution et gestionnaire d'état.
//!
//! Le cœur de la pile n'inspecte jamais l'implémentation d'un service. Une
//! implémentation expose ses actions et variables via [`ServiceCapabilities`],
//! et publie ses changements d'état via le [`ServiceManager`] qui lui est
//! passé à chaque invocation.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::errors::{ActionInvocationFailure, ValidationError};
use crate::model::{Action, Service, ServiceId, ServiceType, StateVariable};
use crate::variable_types::{StateValue, StateValueError};

/// Valeurs d'arguments, dans l'ordre déclaré par l'action.
pub type ArgumentValues = Vec<(String, StateValue)>;

/// Contrat fourni par l'implémentation native d'un service local.
#[async_trait]
pub trait ServiceCapabilities: Send + Sync {
    fn list_actions(&self) -> Vec<Action>;

    fn list_state_variables(&self) -> Vec<StateVariable>;

    /// Exécute `action` avec les arguments IN déjà convertis.
    ///
    /// Retourne les arguments OUT/RETURN, ou un échec qui sera sérialisé en
    /// SOAP fault avec son code.
    async fn invoke(
        &self,
        action: &str,
        args: ArgumentValues,
        manager: &ServiceManager,
    ) -> Result<ArgumentValues, ActionInvocationFailure>;
}

/// Reçoit les changements de variables évènementielles d'un service.
pub trait StateChangeListener: Send + Sync {
    fn on_state_change(&self, changes: &[(String, StateValue)]);
}

/// Dernières valeurs connues des variables d'un service local.
///
/// Les listeners sont appelés dans l'ordre des modifications : un
/// `set_values` concurrent attend que le précédent ait fini de notifier.
/// Un listener ne doit donc pas rappeler `set_values`.
pub struct ServiceManager {
    variables: Vec<StateVariable>,
    dispatch: Mutex<()>,
    values: Mutex<HashMap<String, StateValue>>,
    listeners: Mutex<Vec<(u64, Arc<dyn StateChangeListener>)>>,
    next_listener: AtomicU64,
}

impl std::fmt::Debug for ServiceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceManager")
            .field("variables", &self.variables.len())
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}

impl ServiceManager {
    pub fn new(variables: &[StateVariable]) -> Self {
        let values = variables
            .iter()
            .map(|v| (v.name.clone(), v.initial_value()))
            .collect();
        Self {
            variables: variables.to_vec(),
            dispatch: Mutex::new(()),
            values: Mutex::new(values),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    pub fn variable(&self, name: &str) -> Option<&StateVariable> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn value(&self, name: &str) -> Option<StateValue> {
        self.values.lock().get(name).cloned()
    }

    /// Valeurs courantes de toutes les variables évènementielles, dans l'ordre déclaré.
    pub fn evented_values(&self) -> Vec<(String, StateValue)> {
        let values = self.values.lock();
        self.variables
            .iter()
            .filter(|v| v.send_events)
            .filter_map(|v| values.get(&v.name).map(|val| (v.name.clone(), val.clone())))
            .collect()
    }

    /// Modifie une variable ; voir [`ServiceManager::set_values`].
    pub fn set_value(&self, name: &str, value: StateValue) -> Result<(), StateValueError> {
        self.set_values(vec![(name.to_string(), value)])
    }

    /// Modifie plusieurs variables de façon atomique.
    ///
    /// Une valeur `String` destinée à une variable non textuelle est convertie
    /// selon le type de la variable. Les listeners reçoivent les variables
    /// évènementielles dont la valeur a changé, avant qu'une autre
    /// modification puisse être appliquée.
    pub fn set_values(&self, updates: Vec<(String, StateValue)>) -> Result<(), StateValueError> {
        let mut checked = Vec::with_capacity(updates.len());
        for (name, value) in updates {
            let var = self.variable(&name).ok_or_else(|| {
                StateValueError::ValidationError(format!("Unknown state variable {}", name))
            })?;
            let value = match value {
                StateValue::String(s) if var.datatype != crate::variable_types::StateVarType::String => {
                    StateValue::from_string(&s, &var.datatype)?
                }
                other => other,
            };
            var.check(&value)?;
            checked.push((name, value, var.send_events));
        }

        let _dispatch = self.dispatch.lock();
        let mut changes = Vec::new();
        {
            let mut values = self.values.lock();
            for (name, value, evented) in checked {
                let changed = values.get(&name) != Some(&value);
                if changed {
                    trace!("State variable {} = {}", name, value);
                    values.insert(name.clone(), value.clone());
                    if evented {
                        changes.push((name, value));
                    }
                }
            }
        }

        if !changes.is_empty() {
            let listeners: Vec<_> = self.listeners.lock().iter().map(|(_, l)| l.clone()).collect();
            debug!("{} evented change(s) for {} listener(s)", changes.len(), listeners.len());
            for listener in listeners {
                listener.on_state_change(&changes);
            }
        }
        Ok(())
    }

    pub fn add_listener(&self, listener: Arc<dyn StateChangeListener>) -> u64 {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, listener));
        id
    }

    pub fn remove_listener(&self, id: u64) {
        self.listeners.lock().retain(|(l, _)| *l != id);
    }
}

/// Assemble un [`Service`] local validé depuis ses capacités.
pub struct LocalServiceBuilder {
    service_type: ServiceType,
    service_id: ServiceId,
    capabilities: Arc<dyn ServiceCapabilities>,
    initial: Vec<(String, StateValue)>,
}

impl LocalServiceBuilder {
    pub fn new(service_type: ServiceType, service_id: ServiceId, capabilities: Arc<dyn ServiceCapabilities>) -> Self {
        Self {
            service_type,
            service_id,
            capabilities,
            initial: Vec::new(),
        }
    }

    /// Valeur de départ d'une variable, à la place de sa valeur par défaut.
    pub fn initial_value(mut self, name: &str, value: StateValue) -> Self {
        self.initial.push((name.to_string(), value));
        self
    }

    pub fn build(self) -> Result<Service, ValidationError> {
        let service = Service::local(self.service_type, self.service_id, self.capabilities)?;
        if !self.initial.is_empty() {
            if let Some(local) = service.local_parts() {
                local
                    .manager
                    .set_values(self.initial)
                    .map_err(|e| ValidationError::invalid("initial value", e.to_string()))?;
            }
        }
        Ok(service)
    }
}
