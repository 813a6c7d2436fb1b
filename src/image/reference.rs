use crate::{errors::ImageError, image::ContentDigest};
use regex::Regex;
use std::{fmt, str::FromStr};

/// Registry contacted for references without an explicit server
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Actual API host behind [DEFAULT_REGISTRY]
pub const DEFAULT_REGISTRY_HOST: &str = "registry-1.docker.io";

/// Tag used when a reference has neither tag nor digest
pub const DEFAULT_TAG: &str = "latest";

/// Parsed Docker-style image reference
///
/// `[registry/]repository[:tag][@digest]`, where the first path component is
/// a registry only if it contains a dot or a port number, or is exactly
/// `localhost`. This matches the way `docker pull` splits names.
#[derive(Clone, PartialEq, Eq)]
pub struct Reference {
    registry: Option<String>,
    repository: String,
    tag: Option<String>,
    digest: Option<ContentDigest>,
}

fn registry_regex_str() -> &'static str {
    concat!(
        "(?P<reg>",
        /*  */ "(?:", // First domain component
        /* -- */ "[a-zA-Z0-9]|",
        /* -- */ "[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9]",
        /*  */ ")",
        /*  */ "(?:", // Optional additional domain components
        /* -- */ "\\.",
        /* -- */ "(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9])",
        /*  */ ")*",
        /*  */ "(?::[0-9]+)?", // Optional port number
        ")",
    )
}

fn repository_regex_str() -> &'static str {
    concat!(
        "(?P<repo>",
        /*  */ "[a-z0-9]+(?:(?:[._]|__|[-]*)[a-z0-9]+)*",
        /*  */ "(?:/[a-z0-9]+(?:(?:[._]|__|[-]*)[a-z0-9]+)*)*",
        ")"
    )
}

fn tag_regex_str() -> &'static str {
    "(?P<tag>[a-zA-Z0-9_][a-zA-Z0-9_.-]{0,127})"
}

impl Reference {
    /// Parse a [prim@str] as a [Reference]
    ///
    /// ```
    /// # use layerfs::image::Reference;
    /// let r = Reference::parse("localhost:5000/tools/busybox:musl").unwrap();
    /// assert_eq!(r.registry_str(), Some("localhost:5000"));
    /// assert_eq!(r.repository_str(), "tools/busybox");
    /// assert_eq!(r.tag_str(), Some("musl"));
    /// ```
    pub fn parse(s: &str) -> Result<Self, ImageError> {
        lazy_static! {
            static ref HAS_REGISTRY: Regex = Regex::new(concat!(
                "^",
                "(?:", // alternatives group
                /* */ "(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9])", // domain with dots
                /* */ "(?:\\.(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9]))+",
                /* */ "(?::[0-9]+)?",
                /* */ "|(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9])(?::[0-9]+)", // port, no dots
                /* */ "|localhost(?::[0-9]+)?",
                ")",
                "/",
            ))
            .unwrap();
            static ref WITH_REGISTRY: Regex = Regex::new(&format!(
                "^{}/{}(?::{})?(?:@{})?$",
                registry_regex_str(),
                repository_regex_str(),
                tag_regex_str(),
                ContentDigest::regex_str()
            ))
            .unwrap();
            static ref NO_REGISTRY: Regex = Regex::new(&format!(
                "^{}(?::{})?(?:@{})?$",
                repository_regex_str(),
                tag_regex_str(),
                ContentDigest::regex_str()
            ))
            .unwrap();
        }
        let re: &Regex = if HAS_REGISTRY.is_match(s) {
            &WITH_REGISTRY
        } else {
            &NO_REGISTRY
        };
        let captures = re
            .captures(s)
            .ok_or_else(|| ImageError::InvalidReferenceFormat(s.to_owned()))?;
        let repository = captures
            .name("repo")
            .ok_or_else(|| ImageError::InvalidReferenceFormat(s.to_owned()))?
            .as_str()
            .to_owned();
        let digest = match captures.name("dig") {
            Some(m) => Some(ContentDigest::parse(m.as_str())?),
            None => None,
        };
        Ok(Reference {
            registry: captures.name("reg").map(|m| m.as_str().to_owned()),
            repository,
            tag: captures.name("tag").map(|m| m.as_str().to_owned()),
            digest,
        })
    }

    pub fn registry_str(&self) -> Option<&str> {
        self.registry.as_deref()
    }

    pub fn repository_str(&self) -> &str {
        &self.repository
    }

    pub fn tag_str(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn content_digest(&self) -> Option<&ContentDigest> {
        self.digest.as_ref()
    }

    /// Host and optional port of the registry API
    ///
    /// `docker.io`, explicit or implied, is served from a different host name.
    pub fn api_host(&self) -> &str {
        match self.registry_str() {
            None | Some(DEFAULT_REGISTRY) => DEFAULT_REGISTRY_HOST,
            Some(other) => other,
        }
    }

    /// Repository path as the registry API expects it
    ///
    /// Single component names on the default registry live under `library/`.
    pub fn api_repository(&self) -> String {
        let is_default = matches!(self.registry_str(), None | Some(DEFAULT_REGISTRY));
        if is_default && !self.repository.contains('/') {
            format!("library/{}", self.repository)
        } else {
            self.repository.clone()
        }
    }

    /// Plain http is used for `localhost` and other hosts without a dot
    pub fn is_https(&self) -> bool {
        let host = self.api_host();
        let domain = host.split(':').next().unwrap_or(host);
        domain != "localhost" && domain.contains('.')
    }

    /// Base URL of the registry's v2 API for this repository
    pub fn api_base(&self) -> String {
        format!(
            "{}://{}/v2/{}",
            if self.is_https() { "https" } else { "http" },
            self.api_host(),
            self.api_repository()
        )
    }

    /// The digest when one is given, otherwise the tag or `latest`
    pub fn version_str(&self) -> &str {
        match (&self.digest, &self.tag) {
            (Some(digest), _) => digest.as_str(),
            (None, Some(tag)) => tag,
            (None, None) => DEFAULT_TAG,
        }
    }
}

impl FromStr for Reference {
    type Err = ImageError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Reference::parse(s)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(registry) = &self.registry {
            write!(f, "{}/", registry)?;
        }
        write!(f, "{}", self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reference({})", self)
    }
}
