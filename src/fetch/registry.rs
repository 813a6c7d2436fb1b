//! Images on a registry server, read through the v2 distribution API

use crate::{
    errors::ImageError,
    fetch::{
        auth::{Auth, AuthorizedTransport},
        http::{default_user_agent, get_bytes, HttpBlob, HttpTransport, ReqwestTransport},
        resolve_from, verify_content, Blob, BlobSource, ResolvedImage,
    },
    image::Reference,
    manifest::{media_types, Descriptor, Platform},
};
use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderMap, HeaderValue, ACCEPT};
use std::{convert::TryInto, sync::Arc, time::Duration};

/// Builder for configuring a [RegistryFetcher]
pub struct RegistryFetcherBuilder {
    req: reqwest::ClientBuilder,
    transport: Option<Arc<dyn HttpTransport>>,
    auth: Auth,
}

impl Default for RegistryFetcherBuilder {
    fn default() -> Self {
        RegistryFetcherBuilder::new()
    }
}

impl RegistryFetcherBuilder {
    pub fn new() -> Self {
        RegistryFetcherBuilder {
            req: reqwest::Client::builder().user_agent(default_user_agent()),
            transport: None,
            auth: Auth::new(),
        }
    }

    /// Use a specific transport instead of a native `reqwest` client
    ///
    /// The timeouts and user agent set on this builder only configure the
    /// native client, so they have no effect once a transport is given.
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set a timeout for each network request
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.req = self.req.timeout(timeout);
        self
    }

    /// Set a timeout for only the initial connect phase of each network request
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.req = self.req.connect_timeout(timeout);
        self
    }

    /// Sets the `User-Agent` header used by the native client
    pub fn user_agent<V>(mut self, value: V) -> Self
    where
        V: TryInto<HeaderValue>,
        V::Error: Into<http::Error>,
    {
        self.req = self.req.user_agent(value);
        self
    }

    /// Log in to a registry host, given as it appears in the API URL
    pub fn login(mut self, host: &str, username: String, password: Option<String>) -> Self {
        self.auth.login(host, username, password);
        self
    }

    /// Construct a fetcher for one image reference
    pub fn build(self, reference: &str) -> Result<RegistryFetcher, ImageError> {
        let reference = Reference::parse(reference)?;
        let inner: Arc<dyn HttpTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::from_client(self.req.build()?)),
        };
        Ok(RegistryFetcher {
            base: reference.api_base(),
            reference,
            transport: Arc::new(AuthorizedTransport::new(inner, self.auth)),
        })
    }
}

/// Content from one repository of a registry
pub struct RegistryFetcher {
    reference: Reference,
    base: String,
    transport: Arc<dyn HttpTransport>,
}

impl RegistryFetcher {
    pub fn builder() -> RegistryFetcherBuilder {
        RegistryFetcherBuilder::new()
    }

    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    fn manifest_url(&self, version: &str) -> String {
        format!("{}/manifests/{}", self.base, version)
    }

    fn blob_url(&self, digest: &str) -> String {
        format!("{}/blobs/{}", self.base, digest)
    }

    async fn get_manifest(&self, version: &str) -> Result<Bytes, ImageError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(media_types::ACCEPT_MANIFESTS));
        let url = self.manifest_url(version);
        log::info!("fetching manifest {}", url);
        get_bytes(self.transport.as_ref(), &url, &headers).await
    }
}

#[async_trait]
impl BlobSource for RegistryFetcher {
    async fn resolve(&self, platform: &Platform) -> Result<ResolvedImage, ImageError> {
        let top = self.get_manifest(self.reference.version_str()).await?;
        if let Some(digest) = self.reference.content_digest() {
            digest.verify(&top)?;
        }
        resolve_from(self, top, platform).await
    }

    async fn open_blob(&self, desc: &Descriptor) -> Result<Arc<dyn Blob>, ImageError> {
        Ok(Arc::new(HttpBlob::new(
            self.transport.clone(),
            self.blob_url(&desc.digest),
            desc.size,
        )))
    }

    async fn fetch_manifest(&self, desc: &Descriptor) -> Result<Bytes, ImageError> {
        let manifest = self.get_manifest(&desc.digest).await?;
        verify_content(desc, &manifest)?;
        Ok(manifest)
    }
}
