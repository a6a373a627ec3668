//! Client HTTP (reqwest) pour SOAP, GENA et la récupération des descripteurs.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method as HttpMethod;
use tracing::{debug, trace};
use url::Url;

use super::StreamClient;
use crate::errors::TransportFailure;
use crate::message::{HeaderType, Operation, UpnpHeaders, UpnpMessage};

#[derive(Debug, Clone)]
pub struct HttpStreamClient {
    client: reqwest::Client,
}

impl HttpStreamClient {
    pub fn new(timeout: Duration) -> Result<Self, TransportFailure> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl StreamClient for HttpStreamClient {
    async fn send(&self, request: UpnpMessage, url: &Url) -> Result<UpnpMessage, TransportFailure> {
        let method = request
            .method()
            .ok_or_else(|| TransportFailure("cannot send a response message".to_string()))?;
        let http_method = HttpMethod::from_bytes(method.as_str().as_bytes())
            .map_err(|e| TransportFailure(e.to_string()))?;

        let mut builder = self.client.request(http_method, url.clone());
        for (name, value) in request.headers.to_pairs() {
            if name.eq_ignore_ascii_case(HeaderType::ContentLength.wire_name()) {
                continue;
            }
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body.as_bytes().to_vec());
        }

        debug!("➡️ {} {}", method, url);
        let response = builder.send().await?;
        let status = response.status();

        let lines: Vec<String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| format!("{}: {}", k.as_str(), v)))
            .collect();
        let headers = UpnpHeaders::parse_lines(lines.iter().map(String::as_str));
        let bytes = response.bytes().await?;
        trace!("⬅️ {} {} ({} bytes)", status.as_u16(), url, bytes.len());

        let body = crate::message::decode_body(&headers, &bytes)
            .map_err(|e| TransportFailure(format!("unreadable response from {}: {}", url, e)))?;

        Ok(UpnpMessage {
            operation: Operation::Response {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_string(),
            },
            headers,
            body,
        })
    }
}
