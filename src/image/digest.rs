use crate::errors::ImageError;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::{
    fmt,
    hash::{Hash, Hasher},
    ops::Range,
    str::FromStr,
};

/// A digest securely identifies the specific contents of a binary object
///
/// Digests include the hash format. We can only compute `sha256`, but any
/// well formed digest parses.
#[derive(Clone)]
pub struct ContentDigest {
    serialized: String,
    format_pos: Range<usize>,
    hex_pos: Range<usize>,
}

impl Eq for ContentDigest {}

impl PartialEq for ContentDigest {
    fn eq(&self, other: &Self) -> bool {
        self.serialized.eq(&other.serialized)
    }
}

impl Hash for ContentDigest {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.serialized.hash(state);
    }
}

impl FromStr for ContentDigest {
    type Err = ImageError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContentDigest::parse(s)
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl ContentDigest {
    pub fn as_str(&self) -> &str {
        &self.serialized
    }

    /// Hash content with `sha256`
    ///
    /// ```
    /// # use layerfs::image::ContentDigest;
    /// let digest = ContentDigest::from_content(b"cat");
    /// assert_eq!(digest.as_str(), "sha256:77af778b51abd4a3c51c5ddd97204a9c3ae614ebccb75a606c3b6865aed6744e");
    /// ```
    pub fn from_content(content_bytes: &[u8]) -> Self {
        let serialized = format!("sha256:{:x}", Sha256::digest(content_bytes));
        let len = serialized.len();
        ContentDigest {
            serialized,
            format_pos: 0..6,
            hex_pos: 7..len,
        }
    }

    /// Parse a [prim@str] as a [ContentDigest]
    ///
    /// ```
    /// # use layerfs::image::ContentDigest;
    /// let digest = ContentDigest::parse("format:00112233445566778899aabbccddeeff").unwrap();
    /// assert_eq!(digest.format_str(), "format");
    /// assert_eq!(digest.hex_str(), "00112233445566778899aabbccddeeff")
    /// ```
    pub fn parse(s: &str) -> Result<Self, ImageError> {
        lazy_static! {
            static ref RE: Regex = Regex::new(&format!("^{}$", ContentDigest::regex_str())).unwrap();
        }
        let positions = RE.captures(s).and_then(|captures| {
            Some((
                captures.name("dig_f")?.range(),
                captures.name("dig_h")?.range(),
            ))
        });
        match positions {
            None => Err(ImageError::InvalidReferenceFormat(s.to_owned())),
            Some((format_pos, hex_pos)) => Ok(ContentDigest {
                serialized: s.to_owned(),
                format_pos,
                hex_pos,
            }),
        }
    }

    pub fn format_str(&self) -> &str {
        &self.serialized[self.format_pos.clone()]
    }

    /// Lowercase hex digits, at least 32 of them
    pub fn hex_str(&self) -> &str {
        &self.serialized[self.hex_pos.clone()]
    }

    /// Check that content hashes to this digest
    ///
    /// Formats other than `sha256` can't be checked, so they fail.
    pub fn verify(&self, content_bytes: &[u8]) -> Result<(), ImageError> {
        if self.format_str() != "sha256" {
            return Err(ImageError::UnsupportedDigest(self.clone()));
        }
        let found = ContentDigest::from_content(content_bytes);
        if &found == self {
            Ok(())
        } else {
            Err(ImageError::ContentDigestMismatch {
                expected: self.clone(),
                found,
            })
        }
    }

    pub(crate) fn regex_str() -> &'static str {
        concat!(
            "(?P<dig>", // digest group
            /*  */ "(?P<dig_f>", // digest format group
            /* -- */ "[a-zA-Z][a-zA-Z0-9]*",
            /* -- */ "(?:[-_+.][a-zA-Z][a-zA-Z0-9]*)*", // more components, with separators
            /*  */ ")",
            /*  */ "[:]",
            /*  */ "(?P<dig_h>[a-f0-9]{32,})",
            ")",
        )
    }
}
