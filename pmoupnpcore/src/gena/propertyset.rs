//! Corps des NOTIFY GENA : `<e:propertyset>`.
//!
//! Une propriété par variable ; une valeur vide s'écrit comme un élément
//! vide (`<X></X>`), ce qui la distingue d'une variable absente.

use quick_xml::escape::escape;
use xmltree::Element;

use crate::errors::PropertySetError;
use crate::model::StateVariable;
use crate::variable_types::StateValue;

pub const EVENT_NAMESPACE: &str = "urn:schemas-upnp-org:event-1-0";

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="utf-8" standalone="yes"?>"#;

pub fn write_property_set(values: &[(String, StateValue)]) -> String {
    let mut out = String::from(XML_DECLARATION);
    out.push_str(&format!(r#"<e:propertyset xmlns:e="{}">"#, EVENT_NAMESPACE));
    for (name, value) in values {
        let text = value.to_string();
        out.push_str(&format!(
            "<e:property><{name}>{}</{name}></e:property>",
            escape(text.as_str()),
            name = name
        ));
    }
    out.push_str("</e:propertyset>");
    out
}

/// Lit un `propertyset`, en typant chaque valeur d'après `variables`.
///
/// Une variable inconnue est conservée comme chaîne. Un élément vide prend
/// la valeur par défaut de son type (`false` pour un booléen).
pub fn read_property_set(
    xml: &str,
    variables: &[StateVariable],
) -> Result<Vec<(String, StateValue)>, PropertySetError> {
    let root = Element::parse(xml.as_bytes())?;
    if root.name != "propertyset" {
        return Err(PropertySetError::NotAPropertySet(root.name));
    }

    let mut values = Vec::new();
    for property in root
        .children
        .iter()
        .filter_map(|n| n.as_element())
        .filter(|e| e.name == "property")
    {
        for var in property.children.iter().filter_map(|n| n.as_element()) {
            let text = var.get_text().map(|t| t.into_owned()).unwrap_or_default();
            let value = match variables.iter().find(|v| v.name == var.name) {
                Some(def) => StateValue::from_wire(&text, &def.datatype).map_err(|source| {
                    PropertySetError::Value {
                        variable: var.name.clone(),
                        source,
                    }
                })?,
                None => StateValue::String(text),
            };
            values.push((var.name.clone(), value));
        }
    }
    Ok(values)
}
