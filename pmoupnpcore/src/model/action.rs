//! Actions UPnP et leurs arguments.

use crate::errors::ValidationError;
use crate::model::StateVariable;
use crate::variable_types::StateVarType;

/// Nom de l'action d'introspection implicite de chaque service local.
pub const QUERY_STATE_VARIABLE: &str = "QueryStateVariable";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgumentDirection {
    In,
    Out,
    /// Argument de sortie marqué `<retval/>`.
    Return,
}

impl ArgumentDirection {
    pub fn is_output(&self) -> bool {
        !matches!(self, ArgumentDirection::In)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionArgument {
    pub name: String,
    pub direction: ArgumentDirection,
    pub related_state_variable: String,
    datatype: Option<StateVarType>,
}

impl ActionArgument {
    pub fn new(name: &str, direction: ArgumentDirection, related_state_variable: &str) -> Self {
        Self {
            name: name.to_string(),
            direction,
            related_state_variable: related_state_variable.to_string(),
            datatype: None,
        }
    }

    pub fn input(name: &str, related_state_variable: &str) -> Self {
        Self::new(name, ArgumentDirection::In, related_state_variable)
    }

    pub fn output(name: &str, related_state_variable: &str) -> Self {
        Self::new(name, ArgumentDirection::Out, related_state_variable)
    }

    /// Type résolu depuis la variable liée lors de la construction du service.
    pub fn datatype(&self) -> StateVarType {
        self.datatype.unwrap_or(StateVarType::String)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub name: String,
    pub arguments: Vec<ActionArgument>,
}

impl Action {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            arguments: Vec::new(),
        }
    }

    pub fn with_argument(mut self, argument: ActionArgument) -> Self {
        self.arguments.push(argument);
        self
    }

    pub fn input_arguments(&self) -> impl Iterator<Item = &ActionArgument> {
        self.arguments.iter().filter(|a| !a.direction.is_output())
    }

    pub fn output_arguments(&self) -> impl Iterator<Item = &ActionArgument> {
        self.arguments.iter().filter(|a| a.direction.is_output())
    }

    /// `QueryStateVariable(varName) -> return`, typé en chaîne.
    pub fn query_state_variable() -> Self {
        let mut var_name = ActionArgument::input("varName", "");
        var_name.datatype = Some(StateVarType::String);
        let mut ret = ActionArgument::new("return", ArgumentDirection::Return, "");
        ret.datatype = Some(StateVarType::String);
        Action::new(QUERY_STATE_VARIABLE)
            .with_argument(var_name)
            .with_argument(ret)
    }

    pub fn is_query_state_variable(&self) -> bool {
        self.name == QUERY_STATE_VARIABLE
    }

    /// Résout le type de chaque argument depuis les variables du service.
    pub(crate) fn resolve(mut self, variables: &[StateVariable]) -> Result<Self, ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingField("action name"));
        }
        if self.is_query_state_variable() {
            return Ok(Action::query_state_variable());
        }
        for arg in &mut self.arguments {
            let var = variables
                .iter()
                .find(|v| v.name == arg.related_state_variable)
                .ok_or_else(|| ValidationError::UnknownRelatedVariable {
                    argument: format!("{}.{}", self.name, arg.name),
                    variable: arg.related_state_variable.clone(),
                })?;
            arg.datatype = Some(var.datatype);
        }
        Ok(self)
    }
}
