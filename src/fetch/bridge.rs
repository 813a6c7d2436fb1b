//! HTTP through a host-provided bridge
//!
//! Some embeddings have no sockets of their own. The host then exposes a
//! small call interface which performs requests on our behalf: a request is
//! started with a JSON header block, the body is pushed in chunks, and the
//! response headers and body are pulled back out once the host says the
//! exchange is readable.

use crate::{errors::ImageError, fetch::http::HttpTransport};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::{
    header::{HeaderName, HeaderValue},
    Request, Response, StatusCode,
};
use std::{cmp::min, collections::HashMap, sync::Arc, time::Duration};

/// Largest body piece passed across the bridge in one call
pub const BRIDGE_CHUNK_SIZE: usize = 1024 * 1024;

const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Calls implemented by the host
///
/// Each call returns immediately. Identifiers are chosen by the host.
pub trait HostBridge: Send + Sync {
    /// Begin a request, returning its identifier
    fn send(&self, address: &str, request_json: &[u8]) -> Result<u32, ImageError>;

    /// Push part of the request body, returning how much the host accepted
    fn write_body(&self, id: u32, chunk: &[u8], is_eof: bool) -> Result<usize, ImageError>;

    /// Has the response header block arrived yet
    fn is_readable(&self, id: u32) -> Result<bool, ImageError>;

    /// Read part of the response header JSON, returning (length, eof)
    fn recv(&self, id: u32, buf: &mut [u8]) -> Result<(usize, bool), ImageError>;

    /// Read part of the response body, returning (length, eof)
    fn read_body(&self, id: u32, buf: &mut [u8]) -> Result<(usize, bool), ImageError>;
}

#[derive(Serialize, Debug)]
struct BridgeRequest {
    #[serde(skip_serializing_if = "String::is_empty")]
    method: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    headers: HashMap<String, String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct BridgeResponse {
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    status: u16,
    #[serde(default)]
    status_text: String,
}

/// [HttpTransport] that forwards every request across a [HostBridge]
pub struct BridgeTransport<B: HostBridge> {
    bridge: Arc<B>,
}

impl<B: HostBridge> Clone for BridgeTransport<B> {
    fn clone(&self) -> Self {
        BridgeTransport {
            bridge: self.bridge.clone(),
        }
    }
}

impl<B: HostBridge> BridgeTransport<B> {
    pub fn new(bridge: Arc<B>) -> Self {
        BridgeTransport { bridge }
    }

    async fn write_body(&self, id: u32, body: &[u8]) -> Result<(), ImageError> {
        if body.is_empty() {
            self.bridge.write_body(id, &[], true)?;
            return Ok(());
        }
        let mut remaining = body;
        while !remaining.is_empty() {
            let len = min(remaining.len(), BRIDGE_CHUNK_SIZE);
            let is_eof = len == remaining.len();
            let written = self.bridge.write_body(id, &remaining[..len], is_eof)?;
            if written > len {
                return Err(ImageError::Bridge(format!(
                    "host accepted {} bytes of a {} byte chunk",
                    written, len
                )));
            }
            if written < len {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
            remaining = &remaining[written..];
        }
        Ok(())
    }

    fn read_until_eof<F>(&self, mut read: F) -> Result<Bytes, ImageError>
    where
        F: FnMut(&mut [u8]) -> Result<(usize, bool), ImageError>,
    {
        let mut buf = vec![0u8; BRIDGE_CHUNK_SIZE];
        let mut result = BytesMut::new();
        loop {
            let (len, is_eof) = read(&mut buf)?;
            if len > buf.len() {
                return Err(ImageError::Bridge(format!("host returned {} bytes", len)));
            }
            result.extend_from_slice(&buf[..len]);
            if is_eof {
                return Ok(result.freeze());
            }
        }
    }
}

fn encode_request(request: &Request<Bytes>) -> Result<Vec<u8>, ImageError> {
    let mut headers: HashMap<String, String> = HashMap::new();
    for name in request.headers().keys() {
        let values: Vec<&str> = request
            .headers()
            .get_all(name)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect();
        headers.insert(name.as_str().to_owned(), values.join(", "));
    }
    Ok(serde_json::to_vec(&BridgeRequest {
        method: request.method().as_str().to_owned(),
        headers,
    })?)
}

fn decode_response(header_json: &[u8], body: Bytes) -> Result<Response<Bytes>, ImageError> {
    let parsed: BridgeResponse = serde_json::from_slice(header_json)?;
    log::trace!("bridge response {} {}", parsed.status, parsed.status_text);
    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::from_u16(parsed.status)
        .map_err(|_| ImageError::Bridge(format!("invalid status {}", parsed.status)))?;
    for (name, value) in parsed.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ImageError::Bridge(format!("invalid header name {:?}", name)))?;
        let value = HeaderValue::from_str(&value)
            .map_err(|_| ImageError::Bridge(format!("invalid value for header {}", name)))?;
        response.headers_mut().append(name, value);
    }
    Ok(response)
}

#[async_trait]
impl<B: HostBridge + 'static> HttpTransport for BridgeTransport<B> {
    async fn round_trip(&self, request: Request<Bytes>) -> Result<Response<Bytes>, ImageError> {
        let address = request.uri().to_string();
        log::debug!("{} {} via host bridge", request.method(), address);
        let id = self.bridge.send(&address, &encode_request(&request)?)?;
        self.write_body(id, request.body()).await?;
        while !self.bridge.is_readable(id)? {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        let header_json = self.read_until_eof(|buf| self.bridge.recv(id, buf))?;
        let body = self.read_until_eof(|buf| self.bridge.read_body(id, buf))?;
        decode_response(&header_json, body)
    }
}
