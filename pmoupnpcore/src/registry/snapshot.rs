//! Vue sérialisable du registre, pour l'introspection.

use serde::{Deserialize, Serialize};

use crate::model::Device;

/// Informations structurées sur un device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// UDN complet (`uuid:...`)
    pub udn: String,
    pub device_type: String,
    pub friendly_name: String,
    pub manufacturer: String,
    pub model_name: String,
    /// Services du device, par identifiant
    pub services: Vec<ServiceInfo>,
    /// Devices embarqués
    pub devices: Vec<DeviceInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub service_type: String,
    pub service_id: String,
    pub actions: Vec<String>,
    pub variables: Vec<String>,
}

impl DeviceInfo {
    pub fn from_device(device: &Device) -> Self {
        Self {
            udn: device.udn.to_string(),
            device_type: device.device_type.to_string(),
            friendly_name: device.details.friendly_name.clone(),
            manufacturer: device.details.manufacturer.clone(),
            model_name: device.details.model_name.clone(),
            services: device
                .services
                .iter()
                .map(|s| ServiceInfo {
                    service_type: s.service_type.to_string(),
                    service_id: s.service_id.to_string(),
                    actions: s.actions().iter().map(|a| a.name.clone()).collect(),
                    variables: s.state_variables().iter().map(|v| v.name.clone()).collect(),
                })
                .collect(),
            devices: device.embedded.iter().map(DeviceInfo::from_device).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDeviceInfo {
    pub udn: String,
    pub location: String,
    pub max_age: u32,
    /// Secondes restantes avant expiration
    pub expires_in: u64,
    /// `None` tant que le descripteur n'a pas été récupéré
    pub device: Option<DeviceInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub local_devices: Vec<DeviceInfo>,
    pub remote_devices: Vec<RemoteDeviceInfo>,
    /// SID des abonnements servis par nos services
    pub local_subscriptions: Vec<String>,
    /// SID de nos abonnements aux services distants
    pub remote_subscriptions: Vec<String>,
    pub pending_searches: usize,
}

impl RegistrySnapshot {
    /// Rendu JSON indenté, pour les journaux et les outils de diagnostic.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_json_round_trip() {
        let snapshot = RegistrySnapshot {
            remote_devices: vec![RemoteDeviceInfo {
                udn: "uuid:renderer-1".to_string(),
                location: "http://10.0.0.1:8080/desc.xml".to_string(),
                max_age: 1800,
                expires_in: 1799,
                device: None,
            }],
            local_subscriptions: vec!["uuid:sub-1".to_string()],
            ..Default::default()
        };

        let json = snapshot.to_json().unwrap();
        assert!(json.contains("\"expires_in\": 1799"));
        let back: RegistrySnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }
}
