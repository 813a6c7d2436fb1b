use crate::{
    errors::ImageError,
    fetch::{check_range, Blob},
};
use async_trait::async_trait;
use bytes::Bytes;
use http::{
    header::{HeaderMap, HeaderValue, CONTENT_TYPE, RANGE},
    Request, Response, StatusCode,
};
use std::sync::Arc;

/// Sends one HTTP request and collects the complete response
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn round_trip(&self, request: Request<Bytes>) -> Result<Response<Bytes>, ImageError>;
}

/// Native transport over a `reqwest` client
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, ImageError> {
        Ok(ReqwestTransport::from_client(
            reqwest::Client::builder()
                .user_agent(default_user_agent())
                .build()?,
        ))
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        ReqwestTransport { client }
    }
}

/// Return the default `User-Agent`, identifying this version of `layerfs`
pub fn default_user_agent() -> HeaderValue {
    static USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
    HeaderValue::from_static(USER_AGENT)
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn round_trip(&self, request: Request<Bytes>) -> Result<Response<Bytes>, ImageError> {
        let (parts, body) = request.into_parts();
        log::debug!("{} {}", parts.method, parts.uri);
        let response = self
            .client
            .request(parts.method, &parts.uri.to_string())
            .headers(parts.headers)
            .body(body)
            .send()
            .await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        let mut result = Response::new(body);
        *result.status_mut() = status;
        *result.headers_mut() = headers;
        Ok(result)
    }
}

/// Value of the `Range` header for `len` bytes at `offset`
pub fn range_header(offset: u64, len: u64) -> String {
    format!("bytes={}-{}", offset, offset + len - 1)
}

fn status_error(response: &Response<Bytes>, url: &str) -> ImageError {
    ImageError::HttpStatus {
        status: response.status().as_u16(),
        url: url.to_owned(),
    }
}

/// Read a range of a remote object
///
/// A `206 Partial Content` body is the range itself, and a `200 OK` body is
/// the whole object which gets sliced here. Multipart responses are refused.
pub async fn read_range(
    transport: &dyn HttpTransport,
    url: &str,
    headers: &HeaderMap,
    offset: u64,
    len: u64,
) -> Result<Bytes, ImageError> {
    if len == 0 {
        return Ok(Bytes::new());
    }
    let mut request = Request::get(url)
        .header(RANGE, range_header(offset, len))
        .body(Bytes::new())?;
    for (name, value) in headers {
        request.headers_mut().insert(name, value.clone());
    }
    let response = transport.round_trip(request).await?;
    let is_multipart = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim_start().to_ascii_lowercase().starts_with("multipart/"))
        .unwrap_or(false);
    if is_multipart {
        return Err(ImageError::MultipartResponse);
    }
    match response.status() {
        StatusCode::PARTIAL_CONTENT => {
            let body = response.into_body();
            if (body.len() as u64) < len {
                return Err(ImageError::UnexpectedContentSize);
            }
            Ok(body.slice(..len as usize))
        }
        StatusCode::OK => {
            let body = response.into_body();
            check_range(body.len() as u64, offset, len)?;
            Ok(body.slice(offset as usize..(offset + len) as usize))
        }
        _ => Err(status_error(&response, url)),
    }
}

/// Fetch a complete remote object
pub async fn get_bytes(
    transport: &dyn HttpTransport,
    url: &str,
    headers: &HeaderMap,
) -> Result<Bytes, ImageError> {
    let mut request = Request::get(url).body(Bytes::new())?;
    for (name, value) in headers {
        request.headers_mut().insert(name, value.clone());
    }
    let response = transport.round_trip(request).await?;
    if response.status() == StatusCode::OK {
        Ok(response.into_body())
    } else {
        Err(status_error(&response, url))
    }
}

/// A blob at a URL, read with range requests
#[derive(Clone)]
pub struct HttpBlob {
    transport: Arc<dyn HttpTransport>,
    url: String,
    size: u64,
}

impl HttpBlob {
    pub fn new(transport: Arc<dyn HttpTransport>, url: String, size: u64) -> Self {
        HttpBlob {
            transport,
            url,
            size,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Blob for HttpBlob {
    fn size(&self) -> u64 {
        self.size
    }

    async fn read_range(&self, offset: u64, len: u64) -> Result<Bytes, ImageError> {
        check_range(self.size, offset, len)?;
        read_range(self.transport.as_ref(), &self.url, &HeaderMap::new(), offset, len).await
    }
}
