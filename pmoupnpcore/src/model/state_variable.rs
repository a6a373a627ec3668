//! Variables d'état UPnP et leur constructeur validant.

use std::time::Duration;

use crate::errors::ValidationError;
use crate::variable_types::{StateValue, StateValueError, StateVarType};

/// Plage numérique autorisée (`allowedValueRange`).
#[derive(Debug, Clone, PartialEq)]
pub struct AllowedValueRange {
    pub minimum: f64,
    pub maximum: f64,
    pub step: Option<f64>,
}

impl AllowedValueRange {
    pub fn new(minimum: f64, maximum: f64) -> Self {
        Self {
            minimum,
            maximum,
            step: None,
        }
    }

    pub fn with_step(mut self, step: f64) -> Self {
        self.step = Some(step);
        self
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.minimum && value <= self.maximum
    }
}

/// Politique de modération des événements d'une variable.
///
/// `maximum_rate` : intervalle minimal entre deux NOTIFY portant la variable.
/// `minimum_delta` : variation numérique minimale pour déclencher un NOTIFY.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventModeration {
    pub maximum_rate: Option<Duration>,
    pub minimum_delta: Option<f64>,
}

impl EventModeration {
    pub fn is_moderated(&self) -> bool {
        self.maximum_rate.is_some() || self.minimum_delta.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateVariable {
    pub name: String,
    pub datatype: StateVarType,
    pub default_value: Option<StateValue>,
    pub allowed_values: Vec<String>,
    pub allowed_range: Option<AllowedValueRange>,
    pub send_events: bool,
    pub moderation: EventModeration,
}

impl StateVariable {
    pub fn builder(name: &str, datatype: StateVarType) -> StateVariableBuilder {
        StateVariableBuilder::new(name, datatype)
    }

    /// Valeur initiale : la valeur par défaut déclarée, sinon celle du type.
    pub fn initial_value(&self) -> StateValue {
        self.default_value
            .clone()
            .unwrap_or_else(|| self.datatype.default_value())
    }

    /// Vérifie qu'une valeur respecte le type, la liste et la plage de la variable.
    pub fn check(&self, value: &StateValue) -> Result<(), StateValueError> {
        if value.value_type() != self.datatype {
            return Err(StateValueError::TypeError(format!(
                "{} expects {}, got {}",
                self.name,
                self.datatype,
                value.value_type()
            )));
        }
        if !self.allowed_values.is_empty() {
            let s = value.to_string();
            if !self.allowed_values.iter().any(|v| *v == s) {
                return Err(StateValueError::ValidationError(format!(
                    "{:?} is not an allowed value of {}",
                    s, self.name
                )));
            }
        }
        if let (Some(range), Some(n)) = (&self.allowed_range, value.as_f64()) {
            if !range.contains(n) {
                return Err(StateValueError::RangeError(format!(
                    "{} outside [{}, {}] for {}",
                    n, range.minimum, range.maximum, self.name
                )));
            }
        }
        Ok(())
    }

    /// Convertit une chaîne reçue puis la vérifie.
    pub fn parse_value(&self, raw: &str) -> Result<StateValue, StateValueError> {
        let value = StateValue::from_wire(raw, &self.datatype)?;
        self.check(&value)?;
        Ok(value)
    }
}

/// Constructeur de [`StateVariable`] ; `build()` valide avant de figer.
#[derive(Debug, Clone)]
pub struct StateVariableBuilder {
    name: String,
    datatype: StateVarType,
    default_value: Option<String>,
    allowed_values: Vec<String>,
    allowed_range: Option<AllowedValueRange>,
    send_events: bool,
    moderation: EventModeration,
}

impl StateVariableBuilder {
    pub fn new(name: &str, datatype: StateVarType) -> Self {
        Self {
            name: name.to_string(),
            datatype,
            default_value: None,
            allowed_values: Vec::new(),
            allowed_range: None,
            send_events: true,
            moderation: EventModeration::default(),
        }
    }

    pub fn default_value(mut self, value: &str) -> Self {
        self.default_value = Some(value.to_string());
        self
    }

    pub fn allowed_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_values = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn allowed_range(mut self, range: AllowedValueRange) -> Self {
        self.allowed_range = Some(range);
        self
    }

    pub fn send_events(mut self, send_events: bool) -> Self {
        self.send_events = send_events;
        self
    }

    pub fn maximum_rate(mut self, interval: Duration) -> Self {
        self.moderation.maximum_rate = Some(interval);
        self
    }

    pub fn minimum_delta(mut self, delta: f64) -> Self {
        self.moderation.minimum_delta = Some(delta);
        self
    }

    pub fn build(self) -> Result<StateVariable, ValidationError> {
        let field = |f: &str| format!("{}.{}", self.name, f);

        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingField("name"));
        }
        if !self.allowed_values.is_empty() && !self.datatype.is_string() {
            return Err(ValidationError::invalid(
                field("allowedValueList"),
                format!("not allowed for datatype {}", self.datatype),
            ));
        }
        if let Some(range) = &self.allowed_range {
            if !self.datatype.is_numeric() {
                return Err(ValidationError::invalid(
                    field("allowedValueRange"),
                    format!("not allowed for datatype {}", self.datatype),
                ));
            }
            if range.minimum > range.maximum {
                return Err(ValidationError::invalid(field("allowedValueRange"), "minimum > maximum"));
            }
            if matches!(range.step, Some(step) if step <= 0.0) {
                return Err(ValidationError::invalid(field("allowedValueRange"), "step must be positive"));
            }
        }
        if self.moderation.minimum_delta.is_some() && !self.datatype.is_numeric() {
            return Err(ValidationError::invalid(
                field("minimumDelta"),
                "only numeric variables can be moderated by delta",
            ));
        }

        let mut variable = StateVariable {
            name: self.name.clone(),
            datatype: self.datatype,
            default_value: None,
            allowed_values: self.allowed_values,
            allowed_range: self.allowed_range,
            send_events: self.send_events,
            moderation: self.moderation,
        };

        if let Some(raw) = &self.default_value {
            let value = variable
                .parse_value(raw)
                .map_err(|e| ValidationError::invalid(field("defaultValue"), e.to_string()))?;
            variable.default_value = Some(value);
        }

        Ok(variable)
    }
}
