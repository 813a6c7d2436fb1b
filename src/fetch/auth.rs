//! Registry authentication
//!
//! Reference: <https://docs.docker.com/registry/spec/auth/token/>

use crate::{errors::ImageError, fetch::http::HttpTransport};
use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use dashmap::DashMap;
use http::{
    header::{HeaderValue, AUTHORIZATION, WWW_AUTHENTICATE},
    Request, Response, StatusCode,
};
use regex::Regex;
use std::{collections::HashMap, sync::Arc};
use url::Url;

#[derive(Clone, Debug)]
struct Login {
    username: String,
    password: Option<String>,
}

impl Login {
    fn basic_header(&self) -> Result<HeaderValue, ImageError> {
        let plain = format!(
            "{}:{}",
            self.username,
            self.password.as_deref().unwrap_or_default()
        );
        let encoded = base64::engine::general_purpose::STANDARD.encode(plain);
        HeaderValue::from_str(&format!("Basic {}", encoded))
            .map_err(|err| ImageError::HttpRequest(err.into()))
    }
}

/// Credentials by registry host, and the bearer tokens they earned
#[derive(Default)]
pub struct Auth {
    logins: HashMap<String, Login>,
    tokens: DashMap<String, HeaderValue>,
}

impl Auth {
    pub fn new() -> Self {
        Default::default()
    }

    /// Use a username and optional password for one registry host
    pub fn login(&mut self, host: &str, username: String, password: Option<String>) {
        self.logins
            .insert(host.to_owned(), Login { username, password });
    }

    fn has_token(&self, host: &str) -> bool {
        self.tokens.contains_key(host)
    }

    fn include_token(&self, host: &str, request: &mut Request<Bytes>) {
        if let Some(token) = self.tokens.get(host) {
            log::debug!("using token for {}", host);
            request
                .headers_mut()
                .insert(AUTHORIZATION, token.value().clone());
        }
    }

    /// Answer a `WWW-Authenticate` challenge, storing the authorization to use
    async fn authenticate_for(
        &self,
        host: &str,
        transport: &dyn HttpTransport,
        auth_header: &str,
    ) -> Result<(), ImageError> {
        if is_basic_challenge(auth_header) {
            return match self.logins.get(host) {
                Some(login) => {
                    self.tokens.insert(host.to_owned(), login.basic_header()?);
                    Ok(())
                }
                None => Err(ImageError::UnsupportedAuthentication(
                    auth_header.to_owned(),
                )),
            };
        }
        let challenge = BearerChallenge::parse(auth_header)?;
        log::debug!("login challenge for {}, {:?}", host, challenge);
        let mut realm = challenge.realm.clone();
        {
            let mut query = realm.query_pairs_mut();
            if let Some(service) = &challenge.service {
                query.append_pair("service", service);
            }
            if let Some(scope) = &challenge.scope {
                query.append_pair("scope", scope);
            }
        }
        let mut request = Request::get(realm.as_str()).body(Bytes::new())?;
        if let Some(login) = self.logins.get(host) {
            request
                .headers_mut()
                .insert(AUTHORIZATION, login.basic_header()?);
        }
        let response = transport.round_trip(request).await?;
        if response.status() != StatusCode::OK {
            return Err(ImageError::HttpStatus {
                status: response.status().as_u16(),
                url: realm.to_string(),
            });
        }
        let token: Token = serde_json::from_slice(response.body())?;
        log::debug!("received token for {}", host);
        let value = HeaderValue::from_str(&format!("Bearer {}", token.token))
            .map_err(|err| ImageError::HttpRequest(err.into()))?;
        self.tokens.insert(host.to_owned(), value);
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct BearerChallenge {
    realm: Url,
    service: Option<String>,
    scope: Option<String>,
}

#[derive(Clone, Deserialize)]
struct Token {
    #[serde(alias = "access_token")]
    token: String,
}

fn is_basic_challenge(auth_header: &str) -> bool {
    auth_header
        .trim_start()
        .get(..5)
        .map(|scheme| scheme.eq_ignore_ascii_case("basic"))
        .unwrap_or(false)
}

impl BearerChallenge {
    fn parse(auth_header: &str) -> Result<Self, ImageError> {
        lazy_static! {
            static ref RE: Regex = Regex::new(concat!(
                "^\\s*",
                "(?i:bearer)",   // Case-insensitive challenge type
                "(?:",           // multiple unordered parameters
                /* */ "\\s*",
                /* */ "(?:",     // alternative group for the parameters
                /* -- */ "(?:service=\"(?P<service>",
                /* -- -- */ r"[\x20-\x21\x23-\x5B\x5D-\x7E]*", // allowed chars from RFC 6750
                /* -- */ ")\")|",
                /* -- */ "(?:scope=\"(?P<scope>",
                /* -- -- */ r"[\x20-\x21\x23-\x5B\x5D-\x7E]*",
                /* -- */ ")\")|",
                /* -- */ "(?:realm=\"(?P<realm>",
                /* -- -- */ "https?://",
                /* -- -- */ "[-_.+a-zA-Z:0-9/]+",
                /* -- */ ")\")|",
                /* -- */ "(?:[a-zA-Z_]+=\"[^\"]*\")", // anything else, like error=
                /* */ ")",
                /* */ ",?",      // commas are all optional, to keep the parser regular
                ")*\\s*$",
            ))
            .unwrap();
        }
        let parsed = RE.captures(auth_header).map(|captures| {
            (
                captures.name("realm").map(|m| m.as_str().parse::<Url>()),
                captures.name("service").map(|m| m.as_str().to_owned()),
                captures.name("scope").map(|m| m.as_str().to_owned()),
            )
        });
        match parsed {
            Some((Some(Ok(realm)), service, scope)) => Ok(BearerChallenge {
                realm,
                service,
                scope,
            }),
            _ => Err(ImageError::UnsupportedAuthentication(
                auth_header.to_owned(),
            )),
        }
    }
}

/// Transport that adds registry credentials and answers `401` challenges
///
/// A request that comes back unauthorized is retried once after the
/// challenge has been answered.
pub struct AuthorizedTransport {
    inner: Arc<dyn HttpTransport>,
    auth: Auth,
}

impl AuthorizedTransport {
    pub fn new(inner: Arc<dyn HttpTransport>, auth: Auth) -> Self {
        AuthorizedTransport { inner, auth }
    }
}

fn request_host(request: &Request<Bytes>) -> String {
    request
        .uri()
        .authority()
        .map(|authority| authority.as_str().to_owned())
        .unwrap_or_default()
}

fn duplicate_request(request: &Request<Bytes>) -> Result<Request<Bytes>, ImageError> {
    let mut copy = Request::builder()
        .method(request.method().clone())
        .uri(request.uri().clone())
        .body(request.body().clone())?;
    *copy.headers_mut() = request.headers().clone();
    Ok(copy)
}

#[async_trait]
impl HttpTransport for AuthorizedTransport {
    async fn round_trip(&self, mut request: Request<Bytes>) -> Result<Response<Bytes>, ImageError> {
        let host = request_host(&request);
        self.auth.include_token(&host, &mut request);
        let had_token = self.auth.has_token(&host);
        let retry = duplicate_request(&request)?;
        let response = self.inner.round_trip(request).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        let challenge = match response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok())
        {
            Some(challenge) => challenge.to_owned(),
            None => return Ok(response),
        };
        if had_token {
            log::info!("authorization for {} was refused, renewing", host);
        }
        self.auth
            .authenticate_for(&host, self.inner.as_ref(), &challenge)
            .await?;
        let mut retry = retry;
        self.auth.include_token(&host, &mut retry);
        self.inner.round_trip(retry).await
    }
}
