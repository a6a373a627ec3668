//! Exposition HTTP de la pile avec axum.
//!
//! Toutes les requêtes passent par [`UpnpStack::handle_stream_request`] ;
//! un chemin hors de l'espace de noms UPnP répond 404.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{error, info, warn};

use crate::message::{HeaderType, Method, Operation, UpnpHeaders, UpnpMessage, decode_body};
use crate::stack::UpnpStack;

const MAX_BODY: usize = 1024 * 1024;

/// Routeur à monter à la racine du serveur HTTP.
pub fn router(stack: Arc<UpnpStack>) -> Router {
    Router::new().fallback(dispatch).with_state(stack)
}

/// Sert `router(stack)` sur `0.0.0.0:<network.http_port>` jusqu'à erreur.
pub async fn serve(stack: Arc<UpnpStack>) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], stack.config().network.http_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("UPnP HTTP server listening on {}", addr);
    axum::serve(listener, router(stack).into_make_service()).await?;
    Ok(())
}

async fn dispatch(State(stack): State<Arc<UpnpStack>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let Ok(method) = parts.method.as_str().parse::<Method>() else {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    };
    let target = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());

    let lines: Vec<String> = parts
        .headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| format!("{}: {}", k.as_str(), v)))
        .collect();
    let headers = UpnpHeaders::parse_lines(lines.iter().map(String::as_str));

    let bytes = match to_bytes(body, MAX_BODY).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("❌ Failed to read request body: {}", e);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };
    let body = match decode_body(&headers, &bytes) {
        Ok(body) => body,
        Err(e) => {
            warn!("❌ Unreadable request body: {}", e);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let message = UpnpMessage {
        operation: Operation::Request { method, target },
        headers,
        body,
    };
    match stack.handle_stream_request(&message).await {
        Some(response) => into_http(response),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn into_http(message: UpnpMessage) -> Response {
    let status = message
        .status()
        .and_then(|s| StatusCode::from_u16(s).ok())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = message
        .body
        .as_ref()
        .map(|b| b.as_bytes().to_vec())
        .unwrap_or_default();

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    for (name, value) in message.headers.to_pairs() {
        if name.eq_ignore_ascii_case(HeaderType::ContentLength.wire_name()) {
            continue;
        }
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(&value)) {
            (Ok(name), Ok(value)) => {
                response.headers_mut().append(name, value);
            }
            _ => error!("❌ Cannot encode response header {}: {}", name, value),
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ServerInfo;

    #[test]
    fn test_message_headers_reach_http_response() {
        let message = UpnpMessage::response(412)
            .with_header(crate::message::HeaderValue::Server(ServerInfo::new("Linux", "6.1", "PMOMusic", "0.1")))
            .with_xml_body("<e:propertyset/>".to_string());

        let response = into_http(message);
        assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
        let headers = response.headers();
        assert_eq!(
            headers.get("SERVER").and_then(|v| v.to_str().ok()),
            Some("Linux/6.1 UPnP/1.0 PMOMusic/0.1")
        );
        assert!(headers.get("CONTENT-TYPE").is_some());
        assert!(headers.get("CONTENT-LENGTH").is_none());
    }
}
