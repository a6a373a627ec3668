//! Construction des messages SSDP sortants.

use chrono::Utc;
use url::Url;

use crate::message::{
    HeaderValue, Method, NotificationSubtype, NotificationTarget, ServerInfo, UpnpMessage, Usn,
};
use crate::transport::{SSDP_MULTICAST_ADDR, SSDP_PORT};

fn multicast_host() -> HeaderValue {
    HeaderValue::Host {
        host: SSDP_MULTICAST_ADDR.to_string(),
        port: Some(SSDP_PORT),
    }
}

pub fn alive(nt: &NotificationTarget, usn: &Usn, location: &Url, max_age: u32, server: &ServerInfo) -> UpnpMessage {
    UpnpMessage::request(Method::Notify, "*")
        .with_header(multicast_host())
        .with_header(HeaderValue::MaxAge(max_age))
        .with_header(HeaderValue::Location(location.clone()))
        .with_header(HeaderValue::Nt(nt.clone()))
        .with_header(HeaderValue::Nts(NotificationSubtype::Alive))
        .with_header(HeaderValue::Server(server.clone()))
        .with_header(HeaderValue::Usn(usn.clone()))
}

pub fn byebye(nt: &NotificationTarget, usn: &Usn) -> UpnpMessage {
    UpnpMessage::request(Method::Notify, "*")
        .with_header(multicast_host())
        .with_header(HeaderValue::Nt(nt.clone()))
        .with_header(HeaderValue::Nts(NotificationSubtype::ByeBye))
        .with_header(HeaderValue::Usn(usn.clone()))
}

pub fn search(st: &NotificationTarget, mx: u32, user_agent: &ServerInfo) -> UpnpMessage {
    UpnpMessage::request(Method::MSearch, "*")
        .with_header(multicast_host())
        .with_header(HeaderValue::Man("ssdp:discover".to_string()))
        .with_header(HeaderValue::Mx(mx))
        .with_header(HeaderValue::St(st.clone()))
        .with_header(HeaderValue::UserAgent(user_agent.clone()))
}

pub fn search_response(
    st: &NotificationTarget,
    usn: &Usn,
    location: &Url,
    max_age: u32,
    server: &ServerInfo,
) -> UpnpMessage {
    UpnpMessage::response(200)
        .with_header(HeaderValue::MaxAge(max_age))
        .with_header(HeaderValue::Date(Utc::now().fixed_offset()))
        .with_header(HeaderValue::Ext)
        .with_header(HeaderValue::Location(location.clone()))
        .with_header(HeaderValue::Server(server.clone()))
        .with_header(HeaderValue::St(st.clone()))
        .with_header(HeaderValue::Usn(usn.clone()))
}
