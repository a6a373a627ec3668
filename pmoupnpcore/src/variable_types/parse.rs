use base64::Engine;
use base64::engine::general_purpose;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::str::FromStr;
use url::Url;
use uuid::Uuid;

use crate::variable_types::{StateValue, StateValueError, StateVarType};

impl FromStr for StateVarType {
    type Err = StateValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ui1" => Ok(StateVarType::UI1),
            "ui2" => Ok(StateVarType::UI2),
            "ui4" => Ok(StateVarType::UI4),
            "i1" => Ok(StateVarType::I1),
            "i2" => Ok(StateVarType::I2),
            "i4" => Ok(StateVarType::I4),
            "int" => Ok(StateVarType::Int),
            "r4" => Ok(StateVarType::R4),
            "r8" => Ok(StateVarType::R8),
            "number" => Ok(StateVarType::Number),
            "fixed.14.4" => Ok(StateVarType::Fixed14_4),
            "char" => Ok(StateVarType::Char),
            "string" => Ok(StateVarType::String),
            "boolean" => Ok(StateVarType::Boolean),
            "bin.base64" => Ok(StateVarType::BinBase64),
            "bin.hex" => Ok(StateVarType::BinHex),
            "date" => Ok(StateVarType::Date),
            "datetime" => Ok(StateVarType::DateTime),
            "datetime.tz" => Ok(StateVarType::DateTimeTZ),
            "time" => Ok(StateVarType::Time),
            "time.tz" => Ok(StateVarType::TimeTZ),
            "uuid" => Ok(StateVarType::UUID),
            "uri" => Ok(StateVarType::URI),
            _ => Err(StateValueError::TypeError(format!("Unknown datatype: {}", s))),
        }
    }
}

fn parse_err<E: std::fmt::Display>(kind: &'static str) -> impl Fn(E) -> StateValueError {
    move |e| StateValueError::ParseError(format!("Failed to parse {}: {}", kind, e))
}

impl StateValue {
    /// Parse une chaîne de caractères en StateValue selon le type spécifié.
    ///
    /// Forme stricte : une chaîne vide n'est acceptée que pour les types texte.
    /// Voir [`StateValue::from_wire`] pour la lecture tolérante des messages.
    ///
    /// # Arguments
    ///
    /// * `s` - La chaîne à parser
    /// * `var_type` - Le type de variable attendu
    ///
    /// # Returns
    ///
    /// `Ok(StateValue)` si le parsing réussit, `Err(StateValueError)` sinon.
    pub fn from_string(s: &str, var_type: &StateVarType) -> Result<Self, StateValueError> {
        match var_type {
            StateVarType::UI1 => s.trim().parse::<u8>().map(StateValue::UI1).map_err(parse_err("UI1")),
            StateVarType::UI2 => s.trim().parse::<u16>().map(StateValue::UI2).map_err(parse_err("UI2")),
            StateVarType::UI4 => s.trim().parse::<u32>().map(StateValue::UI4).map_err(parse_err("UI4")),
            StateVarType::I1 => s.trim().parse::<i8>().map(StateValue::I1).map_err(parse_err("I1")),
            StateVarType::I2 => s.trim().parse::<i16>().map(StateValue::I2).map_err(parse_err("I2")),
            StateVarType::I4 => s.trim().parse::<i32>().map(StateValue::I4).map_err(parse_err("I4")),
            StateVarType::Int => s.trim().parse::<i32>().map(StateValue::Int).map_err(parse_err("Int")),
            StateVarType::R4 => s.trim().parse::<f32>().map(StateValue::R4).map_err(parse_err("R4")),
            StateVarType::R8 => s.trim().parse::<f64>().map(StateValue::R8).map_err(parse_err("R8")),
            StateVarType::Number => s.trim().parse::<f64>().map(StateValue::Number).map_err(parse_err("Number")),
            StateVarType::Fixed14_4 => s
                .trim()
                .parse::<f64>()
                .map(StateValue::Fixed14_4)
                .map_err(parse_err("Fixed14_4")),
            StateVarType::Char => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(StateValue::Char(c)),
                    _ => Err(StateValueError::ParseError(format!(
                        "Char expects exactly one character, got {:?}",
                        s
                    ))),
                }
            }
            StateVarType::String => Ok(StateValue::String(s.to_string())),
            StateVarType::Boolean => match s.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(StateValue::Boolean(true)),
                "false" | "0" | "no" => Ok(StateValue::Boolean(false)),
                _ => Err(StateValueError::ParseError(format!(
                    "Invalid boolean value: {}",
                    s
                ))),
            },
            StateVarType::BinBase64 => general_purpose::STANDARD
                .decode(s.trim())
                .map(StateValue::BinBase64)
                .map_err(parse_err("BinBase64")),
            StateVarType::BinHex => hex::decode(s.trim())
                .map(StateValue::BinHex)
                .map_err(parse_err("BinHex")),
            StateVarType::Date => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map(StateValue::Date)
                .map_err(parse_err("Date")),
            StateVarType::DateTime => NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%dT%H:%M:%S")
                .or_else(|_| NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S"))
                .map(StateValue::DateTime)
                .map_err(parse_err("DateTime")),
            StateVarType::DateTimeTZ => chrono::DateTime::parse_from_rfc3339(s.trim())
                .map(StateValue::DateTimeTZ)
                .map_err(parse_err("DateTimeTZ")),
            StateVarType::Time => NaiveTime::parse_from_str(s.trim(), "%H:%M:%S")
                .map(StateValue::Time)
                .map_err(parse_err("Time")),
            StateVarType::TimeTZ => {
                chrono::DateTime::parse_from_rfc3339(&format!("1970-01-01T{}", s.trim()))
                    .map(StateValue::TimeTZ)
                    .map_err(parse_err("TimeTZ"))
            }
            StateVarType::UUID => Uuid::parse_str(s.trim())
                .map(StateValue::UUID)
                .map_err(parse_err("UUID")),
            StateVarType::URI => Url::parse(s.trim())
                .map(StateValue::URI)
                .map_err(parse_err("URI")),
        }
    }

    /// Lecture tolérante d'une valeur reçue sur le réseau.
    ///
    /// Une chaîne vide est distincte d'une valeur absente : pour `string` elle
    /// reste vide, pour les autres types elle prend la valeur par défaut du
    /// type (un booléen vide se lit `false`).
    pub fn from_wire(s: &str, var_type: &StateVarType) -> Result<Self, StateValueError> {
        if s.is_empty() && *var_type != StateVarType::String {
            return Ok(var_type.default_value());
        }
        Self::from_string(s, var_type)
    }
}
