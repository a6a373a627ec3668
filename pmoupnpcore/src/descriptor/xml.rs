//! Binder XML par défaut, basé sur `xmltree`.

use tracing::debug;
use url::Url;
use xmltree::{Element, EmitterConfig, XMLNode};

use super::{
    DEVICE_NAMESPACE, DescriptorBinder, DeviceDescription, SERVICE_NAMESPACE, ServiceDescription,
    ServiceReference,
};
use crate::errors::DescriptorError;
use crate::model::{
    Action, ActionArgument, AllowedValueRange, ArgumentDirection, Device, DeviceDetails, Icon,
    RemoteServiceUrls, Service, StateVariable,
};
use crate::namespace::Namespace;
use crate::variable_types::StateVarType;

#[derive(Debug, Clone, Copy, Default)]
pub struct XmlDescriptorBinder;

fn text_node(name: &str, value: impl Into<String>) -> XMLNode {
    let mut elem = Element::new(name);
    elem.children.push(XMLNode::Text(value.into()));
    XMLNode::Element(elem)
}

fn spec_version() -> XMLNode {
    let mut spec = Element::new("specVersion");
    spec.children.push(text_node("major", "1"));
    spec.children.push(text_node("minor", "0"));
    XMLNode::Element(spec)
}

fn to_document(elem: &Element) -> Result<String, DescriptorError> {
    let config = EmitterConfig::new().perform_indent(true).indent_string("  ");
    let mut buf = Vec::new();
    elem.write_with_config(&mut buf, config)?;
    String::from_utf8(buf).map_err(|e| DescriptorError::Invalid(e.to_string()))
}

fn children<'a>(elem: &'a Element, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
    elem.children
        .iter()
        .filter_map(|n| n.as_element())
        .filter(move |e| e.name == name)
}

fn child_text(elem: &Element, name: &str) -> Option<String> {
    elem.get_child(name)
        .and_then(|c| c.get_text())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn required_text(elem: &Element, name: &'static str) -> Result<String, DescriptorError> {
    child_text(elem, name).ok_or(DescriptorError::Missing(name))
}

fn resolve(base: &Url, raw: &str) -> Result<Url, DescriptorError> {
    base.join(raw.trim())
        .map_err(|e| DescriptorError::Invalid(format!("bad URL {:?}: {}", raw, e)))
}

// ----------------------------------------------------------------
// Écriture
// ----------------------------------------------------------------

fn service_element(device: &Device, service: &Service, namespace: &Namespace) -> Element {
    let (scpd, control, event) = match service.remote_urls() {
        Some(urls) => (
            urls.descriptor.to_string(),
            urls.control.to_string(),
            urls.event_subscription.to_string(),
        ),
        None => (
            namespace.service_descriptor_path(&device.udn, &service.service_id),
            namespace.control_path(&device.udn, &service.service_id),
            namespace.event_subscription_path(&device.udn, &service.service_id),
        ),
    };

    let mut elem = Element::new("service");
    elem.children.push(text_node("serviceType", service.service_type.to_string()));
    elem.children.push(text_node("serviceId", service.service_id.to_string()));
    elem.children.push(text_node("SCPDURL", scpd));
    elem.children.push(text_node("controlURL", control));
    elem.children.push(text_node("eventSubURL", event));
    elem
}

fn icon_element(icon: &Icon) -> Element {
    let mut elem = Element::new("icon");
    elem.children.push(text_node("mimetype", icon.mime_type.clone()));
    elem.children.push(text_node("width", icon.width.to_string()));
    elem.children.push(text_node("height", icon.height.to_string()));
    elem.children.push(text_node("depth", icon.depth.to_string()));
    elem.children.push(text_node("url", icon.uri.clone()));
    elem
}

fn device_element(device: &Device, namespace: &Namespace) -> Element {
    let d = &device.details;
    let mut elem = Element::new("device");
    elem.children.push(text_node("deviceType", device.device_type.to_string()));
    elem.children.push(text_node("friendlyName", d.friendly_name.clone()));
    elem.children.push(text_node("manufacturer", d.manufacturer.clone()));
    if let Some(v) = &d.manufacturer_url {
        elem.children.push(text_node("manufacturerURL", v.clone()));
    }
    if let Some(v) = &d.model_description {
        elem.children.push(text_node("modelDescription", v.clone()));
    }
    elem.children.push(text_node("modelName", d.model_name.clone()));
    if let Some(v) = &d.model_number {
        elem.children.push(text_node("modelNumber", v.clone()));
    }
    if let Some(v) = &d.model_url {
        elem.children.push(text_node("modelURL", v.clone()));
    }
    if let Some(v) = &d.serial_number {
        elem.children.push(text_node("serialNumber", v.clone()));
    }
    elem.children.push(text_node("UDN", device.udn.to_string()));
    if let Some(v) = &d.upc {
        elem.children.push(text_node("UPC", v.clone()));
    }

    if !device.icons.is_empty() {
        let mut list = Element::new("iconList");
        for icon in &device.icons {
            list.children.push(XMLNode::Element(icon_element(icon)));
        }
        elem.children.push(XMLNode::Element(list));
    }

    if !device.services.is_empty() {
        let mut list = Element::new("serviceList");
        for service in &device.services {
            list.children
                .push(XMLNode::Element(service_element(device, service, namespace)));
        }
        elem.children.push(XMLNode::Element(list));
    }

    if !device.embedded.is_empty() {
        let mut list = Element::new("deviceList");
        for child in &device.embedded {
            list.children.push(XMLNode::Element(device_element(child, namespace)));
        }
        elem.children.push(XMLNode::Element(list));
    }

    if let Some(v) = &d.presentation_url {
        elem.children.push(text_node("presentationURL", v.clone()));
    }
    elem
}

fn action_element(action: &Action) -> Element {
    let mut elem = Element::new("action");
    elem.children.push(text_node("name", action.name.clone()));
    if !action.arguments.is_empty() {
        let mut list = Element::new("argumentList");
        for arg in &action.arguments {
            let mut a = Element::new("argument");
            a.children.push(text_node("name", arg.name.clone()));
            let direction = if arg.direction.is_output() { "out" } else { "in" };
            a.children.push(text_node("direction", direction));
            if arg.direction == ArgumentDirection::Return {
                a.children.push(XMLNode::Element(Element::new("retval")));
            }
            a.children
                .push(text_node("relatedStateVariable", arg.related_state_variable.clone()));
            list.children.push(XMLNode::Element(a));
        }
        elem.children.push(XMLNode::Element(list));
    }
    elem
}

fn state_variable_element(var: &StateVariable) -> Element {
    let mut elem = Element::new("stateVariable");
    elem.attributes.insert(
        "sendEvents".to_string(),
        if var.send_events { "yes" } else { "no" }.to_string(),
    );
    elem.children.push(text_node("name", var.name.clone()));
    elem.children.push(text_node("dataType", var.datatype.to_string()));
    if let Some(default) = &var.default_value {
        elem.children.push(text_node("defaultValue", default.to_string()));
    }
    if !var.allowed_values.is_empty() {
        let mut list = Element::new("allowedValueList");
        for v in &var.allowed_values {
            list.children.push(text_node("allowedValue", v.clone()));
        }
        elem.children.push(XMLNode::Element(list));
    }
    if let Some(range) = &var.allowed_range {
        let mut r = Element::new("allowedValueRange");
        r.children.push(text_node("minimum", range.minimum.to_string()));
        r.children.push(text_node("maximum", range.maximum.to_string()));
        if let Some(step) = range.step {
            r.children.push(text_node("step", step.to_string()));
        }
        elem.children.push(XMLNode::Element(r));
    }
    elem
}

// ----------------------------------------------------------------
// Lecture
// ----------------------------------------------------------------

fn read_icon(elem: &Element) -> Option<Icon> {
    let number = |name| child_text(elem, name).and_then(|v| v.parse::<u32>().ok()).unwrap_or(0);
    let built = Icon::builder()
        .mime_type(&child_text(elem, "mimetype").unwrap_or_default())
        .size(number("width"), number("height"))
        .depth(number("depth"))
        .uri(&child_text(elem, "url").unwrap_or_default())
        .build();
    match built {
        Ok(icon) => Some(icon),
        Err(e) => {
            debug!("Skipping invalid icon: {}", e);
            None
        }
    }
}

fn read_service_reference(elem: &Element, base: &Url) -> Result<ServiceReference, DescriptorError> {
    let service_type = required_text(elem, "serviceType")?.parse()?;
    let service_id = required_text(elem, "serviceId")?.parse()?;
    let urls = RemoteServiceUrls {
        descriptor: resolve(base, &required_text(elem, "SCPDURL")?)?,
        control: resolve(base, &required_text(elem, "controlURL")?)?,
        event_subscription: resolve(base, &child_text(elem, "eventSubURL").unwrap_or_default())?,
    };
    Ok(ServiceReference {
        service_type,
        service_id,
        urls,
    })
}

fn read_device_element(elem: &Element, base: &Url) -> Result<DeviceDescription, DescriptorError> {
    let details = DeviceDetails {
        friendly_name: required_text(elem, "friendlyName")?,
        manufacturer: child_text(elem, "manufacturer").unwrap_or_default(),
        manufacturer_url: child_text(elem, "manufacturerURL"),
        model_name: child_text(elem, "modelName").unwrap_or_default(),
        model_description: child_text(elem, "modelDescription"),
        model_number: child_text(elem, "modelNumber"),
        model_url: child_text(elem, "modelURL"),
        serial_number: child_text(elem, "serialNumber"),
        upc: child_text(elem, "UPC"),
        presentation_url: child_text(elem, "presentationURL"),
    };

    let icons = elem
        .get_child("iconList")
        .map(|list| children(list, "icon").filter_map(read_icon).collect())
        .unwrap_or_default();

    let services = match elem.get_child("serviceList") {
        Some(list) => children(list, "service")
            .map(|s| read_service_reference(s, base))
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };

    let embedded = match elem.get_child("deviceList") {
        Some(list) => children(list, "device")
            .map(|d| read_device_element(d, base))
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };

    Ok(DeviceDescription {
        udn: required_text(elem, "UDN")?.parse()?,
        device_type: required_text(elem, "deviceType")?.parse()?,
        details,
        icons,
        services,
        embedded,
    })
}

fn read_action(elem: &Element) -> Result<Action, DescriptorError> {
    let mut action = Action::new(&required_text(elem, "name")?);
    if let Some(list) = elem.get_child("argumentList") {
        for arg in children(list, "argument") {
            let name = required_text(arg, "name")?;
            let direction = match required_text(arg, "direction")?.to_ascii_lowercase().as_str() {
                "in" => ArgumentDirection::In,
                "out" if arg.get_child("retval").is_some() => ArgumentDirection::Return,
                "out" => ArgumentDirection::Out,
                other => {
                    return Err(DescriptorError::Invalid(format!(
                        "argument {} has direction {:?}",
                        name, other
                    )));
                }
            };
            let related = required_text(arg, "relatedStateVariable")?;
            action = action.with_argument(ActionArgument::new(&name, direction, &related));
        }
    }
    Ok(action)
}

fn read_state_variable(elem: &Element) -> Result<StateVariable, DescriptorError> {
    let name = required_text(elem, "name")?;
    let datatype: StateVarType = required_text(elem, "dataType")?
        .parse()
        .map_err(|e| DescriptorError::Invalid(format!("{}: {}", name, e)))?;
    let send_events = elem
        .attributes
        .get("sendEvents")
        .is_none_or(|v| !v.trim().eq_ignore_ascii_case("no"));

    let mut builder = StateVariable::builder(&name, datatype).send_events(send_events);
    if datatype.is_string() {
        if let Some(list) = elem.get_child("allowedValueList") {
            builder = builder.allowed_values(
                children(list, "allowedValue").filter_map(|v| v.get_text().map(|t| t.trim().to_string())),
            );
        }
    }
    if datatype.is_numeric() {
        if let Some(range) = elem.get_child("allowedValueRange") {
            let number = |n| child_text(range, n).and_then(|v| v.parse::<f64>().ok());
            if let (Some(min), Some(max)) = (number("minimum"), number("maximum")) {
                let mut r = AllowedValueRange::new(min, max);
                if let Some(step) = number("step") {
                    r = r.with_step(step);
                }
                builder = builder.allowed_range(r);
            }
        }
    }

    let Some(default) = child_text(elem, "defaultValue") else {
        return Ok(builder.build()?);
    };
    // Une valeur par défaut incohérente est ignorée plutôt que le service entier
    let fallback = builder.clone();
    builder.default_value(&default).build().or_else(|e| {
        debug!("Ignoring default value of {}: {}", name, e);
        fallback.build()
    }).map_err(DescriptorError::from)
}

impl DescriptorBinder for XmlDescriptorBinder {
    fn write_device(&self, device: &Device, namespace: &Namespace) -> Result<String, DescriptorError> {
        let mut root = Element::new("root");
        root.attributes
            .insert("xmlns".to_string(), DEVICE_NAMESPACE.to_string());
        root.children.push(spec_version());
        root.children
            .push(XMLNode::Element(device_element(device, namespace)));
        to_document(&root)
    }

    fn write_service(&self, service: &Service) -> Result<String, DescriptorError> {
        let mut scpd = Element::new("scpd");
        scpd.attributes
            .insert("xmlns".to_string(), SERVICE_NAMESPACE.to_string());
        scpd.children.push(spec_version());

        let actions: Vec<&Action> = service
            .actions()
            .iter()
            .filter(|a| !a.is_query_state_variable())
            .collect();
        if !actions.is_empty() {
            let mut list = Element::new("actionList");
            for action in actions {
                list.children.push(XMLNode::Element(action_element(action)));
            }
            scpd.children.push(XMLNode::Element(list));
        }

        let mut table = Element::new("serviceStateTable");
        for var in service.state_variables() {
            table.children.push(XMLNode::Element(state_variable_element(var)));
        }
        scpd.children.push(XMLNode::Element(table));
        to_document(&scpd)
    }

    fn read_device(&self, xml: &str, location: &Url) -> Result<DeviceDescription, DescriptorError> {
        let root = Element::parse(xml.as_bytes())?;
        if root.name != "root" {
            return Err(DescriptorError::Invalid(format!("root element is <{}>", root.name)));
        }
        let base = match child_text(&root, "URLBase") {
            Some(raw) => resolve(location, &raw)?,
            None => location.clone(),
        };
        let device = root.get_child("device").ok_or(DescriptorError::Missing("device"))?;
        read_device_element(device, &base)
    }

    fn read_service(&self, xml: &str) -> Result<ServiceDescription, DescriptorError> {
        let root = Element::parse(xml.as_bytes())?;
        if root.name != "scpd" {
            return Err(DescriptorError::Invalid(format!("root element is <{}>", root.name)));
        }
        let actions = match root.get_child("actionList") {
            Some(list) => children(list, "action")
                .map(read_action)
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };
        let state_variables = match root.get_child("serviceStateTable") {
            Some(table) => children(table, "stateVariable")
                .map(read_state_variable)
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };
        Ok(ServiceDescription {
            actions,
            state_variables,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::errors::ActionInvocationFailure;
    use crate::model::{
        ArgumentValues, DeviceType, ServiceCapabilities, ServiceId, ServiceManager, ServiceType, Udn,
    };

    struct Volume;

    #[async_trait]
    impl ServiceCapabilities for Volume {
        fn list_actions(&self) -> Vec<Action> {
            vec![
                Action::new("GetVolume")
                    .with_argument(ActionArgument::input("InstanceID", "A_ARG_TYPE_InstanceID"))
                    .with_argument(ActionArgument::new(
                        "CurrentVolume",
                        ArgumentDirection::Return,
                        "Volume",
                    )),
            ]
        }

        fn list_state_variables(&self) -> Vec<StateVariable> {
            vec![
                StateVariable::builder("Volume", StateVarType::UI2)
                    .default_value("10")
                    .allowed_range(AllowedValueRange::new(0.0, 100.0).with_step(1.0))
                    .build()
                    .unwrap(),
                StateVariable::builder("A_ARG_TYPE_InstanceID", StateVarType::UI4)
                    .send_events(false)
                    .build()
                    .unwrap(),
                StateVariable::builder("Channel", StateVarType::String)
                    .allowed_values(["Master", "LF"])
                    .default_value("Master")
                    .build()
                    .unwrap(),
            ]
        }

        async fn invoke(
            &self,
            _action: &str,
            _args: ArgumentValues,
            _manager: &ServiceManager,
        ) -> Result<ArgumentValues, ActionInvocationFailure> {
            Ok(Vec::new())
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

    #[test]
    fn test_scpd_binds_back() {
        let service = service();
        let xml = XmlDescriptorBinder.write_service(&service).unwrap();
        assert!(!xml.contains("QueryStateVariable"));

        let read = XmlDescriptorBinder.read_service(&xml).unwrap();
        let written: Vec<&Action> = service
            .actions()
            .iter()
            .filter(|a| !a.is_query_state_variable())
            .collect();
        assert_eq!(read.actions.len(), written.len());
        assert_eq!(read.actions[0].name, "GetVolume");
        assert_eq!(read.actions[0].arguments[1].direction, ArgumentDirection::Return);
        assert_eq!(read.state_variables, service.state_variables().to_vec());
    }

    #[test]
    fn test_device_description_resolves_urls() {
        let child = Device::builder(
            Udn::new("child").unwrap(),
            DeviceType::new("schemas-upnp-org", "MediaRenderer", 1),
            DeviceDetails::new("Child", "PMOMusic", "R"),
        )
        .service(service())
        .build_local(1800)
        .unwrap();
        let root = Device::builder(
            Udn::new("root").unwrap(),
            DeviceType::new("schemas-upnp-org", "Basic", 1),
            DeviceDetails::new("Root", "PMOMusic", "B"),
        )
        .icon(
            Icon::builder()
                .mime_type("image/png")
                .size(48, 48)
                .depth(24)
                .uri("/icon.png")
                .build()
                .unwrap(),
        )
        .embedded(child)
        .build_local(1800)
        .unwrap();

        let ns = Namespace::default();
        let xml = XmlDescriptorBinder.write_device(&root, &ns).unwrap();
        let location = Url::parse("http://10.0.0.2:8080/upnp/dev/root/desc.xml").unwrap();
        let desc = XmlDescriptorBinder.read_device(&xml, &location).unwrap();

        assert_eq!(desc.udn, Udn::new("root").unwrap());
        assert_eq!(desc.icons.len(), 1);
        assert_eq!(desc.embedded.len(), 1);
        let svc = &desc.embedded[0].services[0];
        assert_eq!(
            svc.urls.control.as_str(),
            "http://10.0.0.2:8080/upnp/dev/child/svc/upnp-org/RenderingControl/control"
        );
        assert_eq!(desc.all().len(), 2);
    }

    #[test]
    fn test_url_base_overrides_location() {
        let xml = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <URLBase>http://192.168.1.20:49152/</URLBase>
  <device>
    <deviceType>urn:schemas-upnp-org:device:MediaServer:1</deviceType>
    <friendlyName>NAS</friendlyName>
    <UDN>uuid:nas-1</UDN>
    <serviceList>
      <service>
        <serviceType>urn:schemas-upnp-org:service:ContentDirectory:1</serviceType>
        <serviceId>urn:upnp-org:serviceId:ContentDirectory</serviceId>
        <SCPDURL>cd.xml</SCPDURL>
        <controlURL>/ctl/cd</controlURL>
        <eventSubURL>/evt/cd</eventSubURL>
      </service>
    </serviceList>
  </device>
</root>"#;
        let location = Url::parse("http://192.168.1.20:80/desc.xml").unwrap();
        let desc = XmlDescriptorBinder.read_device(xml, &location).unwrap();
        assert_eq!(desc.services[0].urls.descriptor.as_str(), "http://192.168.1.20:49152/cd.xml");
        assert_eq!(desc.details.manufacturer, "");
    }

    #[test]
    fn test_bad_default_value_is_ignored() {
        let xml = r#"<scpd xmlns="urn:schemas-upnp-org:service-1-0">
  <serviceStateTable>
    <stateVariable sendEvents="no">
      <name>Mute</name>
      <dataType>boolean</dataType>
      <defaultValue>maybe</defaultValue>
    </stateVariable>
  </serviceStateTable>
</scpd>"#;
        let desc = XmlDescriptorBinder.read_service(xml).unwrap();
        assert_eq!(desc.state_variables.len(), 1);
        assert!(desc.state_variables[0].default_value.is_none());
        assert!(!desc.state_variables[0].send_events);
    }
}
