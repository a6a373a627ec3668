//! # Types de données UPnP
//!
//! Ce module définit les types de données des variables d'état UPnP
//! (`ui1`, `string`, `boolean`, `dateTime.tz`, ...) et les valeurs typées
//! correspondantes.
//!
//! ## Fonctionnalités
//!
//! - ✅ Énumération fermée des 23 types UDA 1.0 ([`StateVarType`])
//! - ✅ Valeurs typées ([`StateValue`]) avec conversion depuis/vers la forme filaire
//! - ✅ Valeur par défaut de chaque type
//! - ✅ Coercition des chaînes vides vers la valeur par défaut du type
//!
//! ## Exemple
//!
//! ```
//! use pmoupnpcore::variable_types::{StateValue, StateVarType};
//!
//! let v = StateValue::from_string("1", &StateVarType::Boolean).unwrap();
//! assert_eq!(v, StateValue::Boolean(true));
//! assert_eq!(v.to_string(), "1");
//!
//! // Une chaîne vide se lit comme la valeur par défaut du type
//! let v = StateValue::from_wire("", &StateVarType::Boolean).unwrap();
//! assert_eq!(v, StateValue::Boolean(false));
//! ```

mod default_value;
mod display;
mod errors;
mod parse;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use url::Url;
use uuid::Uuid;

pub use errors::StateValueError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateVarType {
    UI1,        // Unsigned 8-bit integer
    UI2,        // Unsigned 16-bit integer
    UI4,        // Unsigned 32-bit integer
    I1,         // Signed 8-bit integer
    I2,         // Signed 16-bit integer
    I4,         // Signed 32-bit integer
    Int,        // Synonymous with i4
    R4,         // 32-bit floating point
    R8,         // 64-bit floating point
    Number,     // Synonymous with r8
    Fixed14_4,  // Fixed-point decimal
    Char,       // Single Unicode character
    String,     // Character string
    Boolean,    // Boolean value
    BinBase64,  // Base64-encoded binary
    BinHex,     // Hex-encoded binary
    Date,       // Date (YYYY-MM-DD)
    DateTime,   // DateTime without timezone
    DateTimeTZ, // DateTime with timezone
    Time,       // Time without timezone
    TimeTZ,     // Time with timezone
    UUID,       // Universally unique identifier
    URI,        // Uniform Resource Identifier
}

#[derive(Clone, Debug, PartialEq)]
pub enum StateValue {
    UI1(u8),
    UI2(u16),
    UI4(u32),
    I1(i8),
    I2(i16),
    I4(i32),
    Int(i32),
    R4(f32),
    R8(f64),
    Number(f64),
    Fixed14_4(f64),
    Char(char),
    String(String),
    Boolean(bool),
    BinBase64(Vec<u8>),
    BinHex(Vec<u8>),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    DateTimeTZ(DateTime<FixedOffset>),
    Time(NaiveTime),
    TimeTZ(DateTime<FixedOffset>),
    UUID(Uuid),
    URI(Url),
}

impl StateVarType {
    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_float()
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            StateVarType::UI1
                | StateVarType::UI2
                | StateVarType::UI4
                | StateVarType::I1
                | StateVarType::I2
                | StateVarType::I4
                | StateVarType::Int
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(
            self,
            StateVarType::R4 | StateVarType::R8 | StateVarType::Number | StateVarType::Fixed14_4
        )
    }

    /// Types dont la forme filaire est du texte libre.
    ///
    /// Seuls ces types acceptent une liste de valeurs autorisées.
    pub fn is_string(&self) -> bool {
        matches!(self, StateVarType::String | StateVarType::Char)
    }
}

impl From<&StateValue> for StateVarType {
    fn from(value: &StateValue) -> Self {
        match value {
            StateValue::UI1(_) => StateVarType::UI1,
            StateValue::UI2(_) => StateVarType::UI2,
            StateValue::UI4(_) => StateVarType::UI4,
            StateValue::I1(_) => StateVarType::I1,
            StateValue::I2(_) => StateVarType::I2,
            StateValue::I4(_) => StateVarType::I4,
            StateValue::Int(_) => StateVarType::Int,
            StateValue::R4(_) => StateVarType::R4,
            StateValue::R8(_) => StateVarType::R8,
            StateValue::Number(_) => StateVarType::Number,
            StateValue::Fixed14_4(_) => StateVarType::Fixed14_4,
            StateValue::Char(_) => StateVarType::Char,
            StateValue::String(_) => StateVarType::String,
            StateValue::Boolean(_) => StateVarType::Boolean,
            StateValue::BinBase64(_) => StateVarType::BinBase64,
            StateValue::BinHex(_) => StateVarType::BinHex,
            StateValue::Date(_) => StateVarType::Date,
            StateValue::DateTime(_) => StateVarType::DateTime,
            StateValue::DateTimeTZ(_) => StateVarType::DateTimeTZ,
            StateValue::Time(_) => StateVarType::Time,
            StateValue::TimeTZ(_) => StateVarType::TimeTZ,
            StateValue::UUID(_) => StateVarType::UUID,
            StateValue::URI(_) => StateVarType::URI,
        }
    }
}

impl StateValue {
    pub fn value_type(&self) -> StateVarType {
        StateVarType::from(self)
    }

    /// Valeur numérique en `f64`, utilisée pour les plages et le delta de modération.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StateValue::UI1(v) => Some(*v as f64),
            StateValue::UI2(v) => Some(*v as f64),
            StateValue::UI4(v) => Some(*v as f64),
            StateValue::I1(v) => Some(*v as f64),
            StateValue::I2(v) => Some(*v as f64),
            StateValue::I4(v) | StateValue::Int(v) => Some(*v as f64),
            StateValue::R4(v) => Some(*v as f64),
            StateValue::R8(v) | StateValue::Number(v) | StateValue::Fixed14_4(v) => Some(*v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names_roundtrip() {
        for name in ["ui1", "i4", "fixed.14.4", "boolean", "dateTime.tz", "bin.base64", "uri"] {
            let t: StateVarType = name.parse().unwrap();
            assert_eq!(t.to_string(), name);
        }
    }

    #[test]
    fn test_boolean_wire_forms() {
        assert_eq!(
            StateValue::from_string("yes", &StateVarType::Boolean).unwrap(),
            StateValue::Boolean(true)
        );
        assert_eq!(
            StateValue::from_string("False", &StateVarType::Boolean).unwrap(),
            StateValue::Boolean(false)
        );
        assert!(StateValue::from_string("maybe", &StateVarType::Boolean).is_err());
        assert_eq!(StateValue::Boolean(true).to_string(), "1");
    }

    #[test]
    fn test_empty_string_coercion() {
        assert_eq!(
            StateValue::from_wire("", &StateVarType::Boolean).unwrap(),
            StateValue::Boolean(false)
        );
        assert_eq!(
            StateValue::from_wire("", &StateVarType::UI4).unwrap(),
            StateValue::UI4(0)
        );
        assert_eq!(
            StateValue::from_wire("", &StateVarType::String).unwrap(),
            StateValue::String(String::new())
        );
        // La forme stricte refuse la chaîne vide pour un entier
        assert!(StateValue::from_string("", &StateVarType::UI4).is_err());
    }

    #[test]
    fn test_binary_values() {
        let v = StateValue::from_string("AQID", &StateVarType::BinBase64).unwrap();
        assert_eq!(v, StateValue::BinBase64(vec![1, 2, 3]));
        assert_eq!(v.to_string(), "AQID");

        let v = StateValue::from_string("0a0b", &StateVarType::BinHex).unwrap();
        assert_eq!(v, StateValue::BinHex(vec![10, 11]));
        assert!(StateValue::from_string("zz", &StateVarType::BinHex).is_err());
    }

    #[test]
    fn test_int_keeps_its_variant() {
        let v = StateValue::from_string("-12", &StateVarType::Int).unwrap();
        assert_eq!(v.value_type(), StateVarType::Int);
        assert_eq!(v.as_f64(), Some(-12.0));
    }
}
