//! Cibles d'annonce et de recherche d'un arbre de devices locaux.

use crate::message::{NotificationTarget, Usn};
use crate::model::{Device, ServiceType};

/// Couples (NT, USN) annoncés pour un device racine.
///
/// * racine → `upnp:rootdevice`
/// * chaque device → `uuid:<udn>` et son type
/// * chaque type de service distinct d'un device → ce type
pub fn advertisements(root: &Device) -> Vec<(NotificationTarget, Usn)> {
    let mut out = vec![(
        NotificationTarget::RootDevice,
        Usn {
            udn: root.udn.clone(),
            target: Some(NotificationTarget::RootDevice),
        },
    )];
    for device in root.all_devices() {
        out.push((
            NotificationTarget::Udn(device.udn.clone()),
            Usn {
                udn: device.udn.clone(),
                target: None,
            },
        ));
        let dt = NotificationTarget::DeviceType(device.device_type.clone());
        out.push((
            dt.clone(),
            Usn {
                udn: device.udn.clone(),
                target: Some(dt),
            },
        ));
        let mut seen: Vec<&ServiceType> = Vec::new();
        for service in &device.services {
            if seen.contains(&&service.service_type) {
                continue;
            }
            seen.push(&service.service_type);
            let st = NotificationTarget::ServiceType(service.service_type.clone());
            out.push((
                st.clone(),
                Usn {
                    udn: device.udn.clone(),
                    target: Some(st),
                },
            ));
        }
    }
    out
}

/// Réponses dues à une recherche `st` sur l'arbre `root`, sous forme (ST, USN).
///
/// Pour les types, le ST renvoyé reprend la version demandée.
pub fn match_search_target(
    root: &Device,
    st: &NotificationTarget,
    exact_type_match: bool,
) -> Vec<(NotificationTarget, Usn)> {
    match st {
        NotificationTarget::All => advertisements(root),
        NotificationTarget::RootDevice => vec![(
            NotificationTarget::RootDevice,
            Usn {
                udn: root.udn.clone(),
                target: Some(NotificationTarget::RootDevice),
            },
        )],
        NotificationTarget::Udn(udn) => root
            .find_device(udn)
            .map(|d| {
                vec![(
                    st.clone(),
                    Usn {
                        udn: d.udn.clone(),
                        target: None,
                    },
                )]
            })
            .unwrap_or_default(),
        NotificationTarget::DeviceType(requested) => root
            .all_devices()
            .into_iter()
            .filter(|d| d.device_type.satisfies(requested, exact_type_match))
            .map(|d| {
                (
                    st.clone(),
                    Usn {
                        udn: d.udn.clone(),
                        target: Some(st.clone()),
                    },
                )
            })
            .collect(),
        NotificationTarget::ServiceType(requested) => root
            .all_devices()
            .into_iter()
            .filter(|d| {
                d.services
                    .iter()
                    .any(|s| s.service_type.satisfies(requested, exact_type_match))
            })
            .map(|d| {
                (
                    st.clone(),
                    Usn {
                        udn: d.udn.clone(),
                        target: Some(st.clone()),
                    },
                )
            })
            .collect(),
        NotificationTarget::Event => Vec::new(),
    }
}

/// Vrai si une réponse de cible `found` intéresse une recherche `wanted`.
pub fn search_accepts(wanted: &NotificationTarget, found: &NotificationTarget) -> bool {
    match (wanted, found) {
        (NotificationTarget::All, _) => true,
        (NotificationTarget::DeviceType(w), NotificationTarget::DeviceType(f)) => f.satisfies(w, false),
        (NotificationTarget::ServiceType(w), NotificationTarget::ServiceType(f)) => f.satisfies(w, false),
        (w, f) => w == f,
    }
}
