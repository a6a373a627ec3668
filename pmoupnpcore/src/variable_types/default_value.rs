use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use url::Url;
use uuid::Uuid;

use crate::variable_types::{StateValue, StateVarType};

impl StateVarType {
    /// Valeur par défaut du type, utilisée aussi pour coercer les chaînes vides.
    pub fn default_value(&self) -> StateValue {
        match self {
            StateVarType::UI1 => StateValue::UI1(0),
            StateVarType::UI2 => StateValue::UI2(0),
            StateVarType::UI4 => StateValue::UI4(0),
            StateVarType::I1 => StateValue::I1(0),
            StateVarType::I2 => StateValue::I2(0),
            StateVarType::I4 => StateValue::I4(0),
            StateVarType::Int => StateValue::Int(0),
            StateVarType::R4 => StateValue::R4(0.0),
            StateVarType::R8 => StateValue::R8(0.0),
            StateVarType::Number => StateValue::Number(0.0),
            StateVarType::Fixed14_4 => StateValue::Fixed14_4(0.0),
            StateVarType::Char => StateValue::Char('\0'),
            StateVarType::String => StateValue::String(String::new()),
            StateVarType::Boolean => StateValue::Boolean(false),
            StateVarType::BinBase64 => StateValue::BinBase64(Vec::new()),
            StateVarType::BinHex => StateValue::BinHex(Vec::new()),
            StateVarType::Date => StateValue::Date(NaiveDate::default()),
            StateVarType::DateTime => StateValue::DateTime(NaiveDateTime::default()),
            StateVarType::DateTimeTZ => StateValue::DateTimeTZ(epoch_utc()),
            StateVarType::Time => StateValue::Time(NaiveTime::default()),
            StateVarType::TimeTZ => StateValue::TimeTZ(epoch_utc()),
            StateVarType::UUID => StateValue::UUID(Uuid::nil()),
            StateVarType::URI => StateValue::URI(localhost()),
        }
    }
}

fn epoch_utc() -> DateTime<FixedOffset> {
    DateTime::<Utc>::UNIX_EPOCH.fixed_offset()
}

fn localhost() -> Url {
    Url::parse("http://localhost/").expect("literal URL")
}
