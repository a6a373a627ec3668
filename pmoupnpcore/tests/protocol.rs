mod common;

use common::{Network, renderer, rendering_control_id};
use pmoupnpcore::message::{Method, ServerInfo, UpnpMessage, read_datagram, read_stream};
use pmoupnpcore::model::Udn;

#[test]
fn test_folded_server_header_is_joined() {
    let raw = "NOTIFY * HTTP/1.1\r\n\
               HOST: 239.255.255.250:1900\r\n\
               SERVER: foo/1\r\n \
               UPnP/1.0\r\n\tbar/2\r\n\
               NT: upnp:rootdevice\r\n\r\n";
    let msg = read_datagram(raw.as_bytes()).unwrap();
    let server = msg.headers.server().unwrap();
    assert_eq!(server.to_string(), "foo/1 UPnP/1.0 bar/2");
    assert_eq!(server, &ServerInfo::new("foo", "1", "bar", "2"));
}

#[test]
fn test_lenient_server_tokens() {
    let server = ServerInfo::parse_lenient("Linux UPnP/1.1");
    assert_eq!(server.os_name, "Linux");
    assert_eq!(server.os_version, "UNKNOWN");
    assert_eq!((server.major_version, server.minor_version), (1, 1));
    assert_eq!(server.product_name, "UNKNOWN");
}

#[tokio::test]
async fn test_unregistered_descriptor_is_not_served() {
    let net = Network::new();
    let node = net.node("10.0.0.1", 8080);
    let udn = Udn::new("nobody").unwrap();

    let device_path = node.stack.namespace().device_descriptor_path(&udn);
    let service_path = node
        .stack
        .namespace()
        .service_descriptor_path(&udn, &rendering_control_id());
    for path in [device_path, service_path] {
        let request = UpnpMessage::request(Method::Get, &path);
        assert!(node.stack.handle_stream_request(&request).await.is_none());
    }

    let outside = UpnpMessage::request(Method::Get, "/index.html");
    assert!(node.stack.handle_stream_request(&outside).await.is_none());
}

#[tokio::test]
async fn test_service_descriptor_lists_declared_actions() {
    let net = Network::new();
    let node = net.node("10.0.0.1", 8080);
    node.stack.publish_device(renderer("renderer-1")).unwrap();

    let path = node
        .stack
        .namespace()
        .service_descriptor_path(&Udn::new("renderer-1").unwrap(), &rendering_control_id());
    let response = node
        .stack
        .handle_stream_request(&UpnpMessage::request(Method::Get, &path))
        .await
        .unwrap();
    assert_eq!(response.status(), Some(200));
    let xml = response.body_text().unwrap();
    assert!(xml.contains("<name>SetVolume</name>"));
    assert!(xml.contains("<name>Volume</name>"));
    assert!(!xml.contains("QueryStateVariable"));
}

#[tokio::test]
async fn test_unsupported_method_on_known_resource() {
    let net = Network::new();
    let node = net.node("10.0.0.1", 8080);
    node.stack.publish_device(renderer("renderer-1")).unwrap();

    let path = node
        .stack
        .namespace()
        .device_descriptor_path(&Udn::new("renderer-1").unwrap());
    let response = node
        .stack
        .handle_stream_request(&UpnpMessage::request(Method::Subscribe, &path))
        .await
        .unwrap();
    assert_eq!(response.status(), Some(405));
    assert!(response.headers.server().is_some());
}

#[tokio::test]
async fn test_notify_for_unknown_callback_is_refused() {
    let net = Network::new();
    let node = net.node("10.0.0.2", 8081);
    let path = node.stack.namespace().callback_path("0123456789abcdef");

    let body = pmoupnpcore::gena::write_property_set(&[(
        "Volume".to_string(),
        pmoupnpcore::variable_types::StateValue::UI2(3),
    )]);
    let raw = format!(
        "NOTIFY {} HTTP/1.1\r\n\
         HOST: 10.0.0.2:8081\r\n\
         CONTENT-TYPE: text/xml; charset=\"utf-8\"\r\n\
         CONTENT-LENGTH: {}\r\n\
         NT: upnp:event\r\n\
         NTS: upnp:propchange\r\n\
         SID: uuid:not-ours\r\n\
         SEQ: 0\r\n\r\n{}",
        path,
        body.len(),
        body
    );
    let request = read_stream(raw.as_bytes()).unwrap();
    let response = node.stack.handle_stream_request(&request).await.unwrap();
    assert_eq!(response.status(), Some(412));

    let mut missing_seq = request.clone();
    missing_seq.headers.remove(pmoupnpcore::message::HeaderType::Seq);
    let response = node.stack.handle_stream_request(&missing_seq).await.unwrap();
    assert_eq!(response.status(), Some(400));
}
