//! Récupération HTTP de la description d'un device distant.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};
use url::Url;

use super::{DescriptorBinder, DescriptorRetriever, DeviceDescription, ServiceDescription};
use crate::errors::DescriptorError;
use crate::message::{HeaderValue, Method, ServerInfo, UpnpMessage, request_target};
use crate::model::{Device, DeviceKind, RemoteDeviceIdentity, Service};
use crate::transport::StreamClient;

/// Lit la description du device puis le SCPD de chacun de ses services.
///
/// Un SCPD illisible fait échouer toute la récupération : la prochaine
/// annonce du device la relancera.
pub struct HttpDescriptorRetriever {
    client: Arc<dyn StreamClient>,
    binder: Arc<dyn DescriptorBinder>,
    user_agent: ServerInfo,
}

impl HttpDescriptorRetriever {
    pub fn new(client: Arc<dyn StreamClient>, binder: Arc<dyn DescriptorBinder>, user_agent: ServerInfo) -> Self {
        Self {
            client,
            binder,
            user_agent,
        }
    }

    async fn fetch(&self, url: &Url) -> Result<String, DescriptorError> {
        let request = UpnpMessage::request(Method::Get, &request_target(url))
            .with_header(HeaderValue::UserAgent(self.user_agent.clone()));
        let response = self.client.send(request, url).await?;
        if !response.is_success() {
            return Err(DescriptorError::Invalid(format!(
                "GET {} returned status {:?}",
                url,
                response.status()
            )));
        }
        response
            .body_text()
            .filter(|b| !b.trim().is_empty())
            .map(str::to_string)
            .ok_or_else(|| DescriptorError::Invalid(format!("empty descriptor at {}", url)))
    }

    fn assemble(
        description: &DeviceDescription,
        scpds: &HashMap<Url, ServiceDescription>,
        kind: &DeviceKind,
    ) -> Result<Device, DescriptorError> {
        let mut builder = Device::builder(
            description.udn.clone(),
            description.device_type.clone(),
            description.details.clone(),
        );
        for icon in &description.icons {
            builder = builder.icon(icon.clone());
        }
        for reference in &description.services {
            let scpd = scpds
                .get(&reference.urls.descriptor)
                .ok_or(DescriptorError::Missing("scpd"))?;
            builder = builder.service(Service::remote(
                reference.service_type.clone(),
                reference.service_id.clone(),
                reference.urls.clone(),
                scpd.actions.clone(),
                scpd.state_variables.clone(),
            )?);
        }
        for child in &description.embedded {
            builder = builder.embedded(Self::assemble(child, scpds, kind)?);
        }
        Ok(builder.build(kind.clone())?)
    }
}

#[async_trait]
impl DescriptorRetriever for HttpDescriptorRetriever {
    async fn retrieve(&self, identity: &RemoteDeviceIdentity) -> Result<Device, DescriptorError> {
        debug!("📥 Retrieving descriptor of {} from {}", identity.udn, identity.location);
        let xml = self.fetch(&identity.location).await?;
        let description = self.binder.read_device(&xml, &identity.location)?;

        if description.all().iter().all(|d| d.udn != identity.udn) {
            return Err(DescriptorError::Invalid(format!(
                "descriptor at {} does not describe {}",
                identity.location, identity.udn
            )));
        }

        let mut scpds = HashMap::new();
        for device in description.all() {
            for reference in &device.services {
                let url = &reference.urls.descriptor;
                if scpds.contains_key(url) {
                    continue;
                }
                let xml = self.fetch(url).await?;
                scpds.insert(url.clone(), self.binder.read_service(&xml)?);
            }
        }

        let mut root_identity = identity.clone();
        root_identity.udn = description.udn.clone();
        let device = Self::assemble(&description, &scpds, &DeviceKind::Remote(root_identity))?;
        info!(
            "📄 Described {} ({} device(s), {} service(s))",
            device.udn,
            device.all_devices().len(),
            device.all_services().len()
        );
        Ok(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::XmlDescriptorBinder;
    use crate::model::Udn;
    use crate::transport::memory::MemoryStreamClient;

    const DEVICE: &str = r#"<root xmlns="urn:schemas-upnp-org:device-1-0">
  <device>
    <deviceType>urn:schemas-upnp-org:device:MediaRenderer:1</deviceType>
    <friendlyName>Salon</friendlyName>
    <UDN>uuid:renderer-1</UDN>
    <serviceList>
      <service>
        <serviceType>urn:schemas-upnp-org:service:RenderingControl:1</serviceType>
        <serviceId>urn:upnp-org:serviceId:RenderingControl</serviceId>
        <SCPDURL>/rc.xml</SCPDURL>
        <controlURL>/rc/ctl</controlURL>
        <eventSubURL>/rc/evt</eventSubURL>
      </service>
    </serviceList>
  </device>
</root>"#;

    const SCPD: &str = r#"<scpd xmlns="urn:schemas-upnp-org:service-1-0">
  <actionList>
    <action>
      <name>GetMute</name>
      <argumentList>
        <argument><name>CurrentMute</name><direction>out</direction><relatedStateVariable>Mute</relatedStateVariable></argument>
      </argumentList>
    </action>
  </actionList>
  <serviceStateTable>
    <stateVariable sendEvents="yes"><name>Mute</name><dataType>boolean</dataType></stateVariable>
  </serviceStateTable>
</scpd>"#;

    fn retriever(client: &MemoryStreamClient) -> HttpDescriptorRetriever {
        HttpDescriptorRetriever::new(
            Arc::new(client.clone()),
            Arc::new(XmlDescriptorBinder),
            ServerInfo::new("Linux", "6.1", "PMOMusic", "0.1"),
        )
    }

    fn identity(id: &str) -> RemoteDeviceIdentity {
        RemoteDeviceIdentity {
            udn: Udn::new(id).unwrap(),
            max_age: 1800,
            location: Url::parse("http://10.0.0.9:49152/desc.xml").unwrap(),
            discovered_on: None,
        }
    }

    #[tokio::test]
    async fn test_retrieves_device_and_services() {
        let client = MemoryStreamClient::new();
        client.set_handler(|_, url: Url| async move {
            let body = if url.path() == "/rc.xml" { SCPD } else { DEVICE };
            Ok(UpnpMessage::response(200).with_xml_body(body.to_string()))
        });

        let device = retriever(&client).retrieve(&identity("renderer-1")).await.unwrap();
        assert_eq!(device.udn, Udn::new("renderer-1").unwrap());
        assert!(!device.is_local());
        let service = &device.services[0];
        assert_eq!(service.actions()[0].name, "GetMute");
        assert_eq!(
            service.remote_urls().unwrap().control.as_str(),
            "http://10.0.0.9:49152/rc/ctl"
        );
        assert_eq!(client.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_foreign_descriptor_is_rejected() {
        let client = MemoryStreamClient::new();
        client.set_handler(|_, _| async { Ok(UpnpMessage::response(200).with_xml_body(DEVICE.to_string())) });
        assert!(retriever(&client).retrieve(&identity("someone-else")).await.is_err());
    }

    #[tokio::test]
    async fn test_http_error_fails_retrieval() {
        let client = MemoryStreamClient::new();
        client.set_handler(|_, _| async { Ok(UpnpMessage::response(404)) });
        assert!(retriever(&client).retrieve(&identity("renderer-1")).await.is_err());
    }
}
