//! Error types you might see while preparing or serving an image

use thiserror::Error;

/// Errors during image fetching, layer decoding, and tree assembly
#[derive(Error, Debug)]
pub enum ImageError {
    /// invalid image reference format
    #[error("invalid image reference format: {0:?}")]
    InvalidReferenceFormat(String),

    /// io error
    #[error("io error: {0}")]
    IO(#[from] std::io::Error),

    /// json error
    #[error("json error: {0}")]
    JSON(#[from] serde_json::Error),

    /// asynchronous task failed during image preparation
    #[error("asynchronous task failed during image preparation: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    /// network request error
    #[error("network request error: {0}")]
    NetworkRequest(#[from] reqwest::Error),

    /// malformed http request
    #[error("malformed http request: {0}")]
    HttpRequest(#[from] http::Error),

    /// invalid url
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    /// server responded with an unexpected http status
    #[error("server responded with http status {status} for {url}")]
    HttpStatus { status: u16, url: String },

    /// server answered a range request with a multipart body
    #[error("multipart range responses are not supported")]
    MultipartResponse,

    /// server returned fewer bytes than requested
    #[error("unexpected content size")]
    UnexpectedContentSize,

    /// host http bridge failure
    #[error("host http bridge failure: {0}")]
    Bridge(String),

    /// registry server requested an unsupported type of authentication
    #[error("registry server requested an unsupported type of authentication: {0:?}")]
    UnsupportedAuthentication(String),

    /// tar file format error
    #[error("tar file format error")]
    TARFileError,

    /// gzip decompression error
    #[error("gzip decompression error: {0}")]
    Gzip(std::io::Error),

    /// layer does not end with a chunked layer footer
    #[error("layer does not end with a chunked layer footer")]
    InvalidFooter,

    /// chunked layer table of contents could not be read
    #[error("invalid table of contents: {0}")]
    InvalidToc(String),

    /// virtual filesystem error while building a layer
    #[error("virtual filesystem error while preparing image: {0}")]
    ImageVFSError(#[from] VFSError),

    /// table of contents does not match the digest annotated on its layer
    #[error("table of contents digest mismatch, expected {expected}, found {found}")]
    TocDigestMismatch { expected: String, found: String },

    /// decompressed chunk does not match its digest
    #[error("chunk digest mismatch at offset {offset}, expected {expected}, found {found}")]
    ChunkDigestMismatch {
        offset: u64,
        expected: String,
        found: String,
    },

    /// calculated digest of downloaded content is not what we asked for
    #[error("calculated digest of downloaded content is not what we asked for, expected {expected}, found {found}")]
    ContentDigestMismatch {
        expected: crate::image::ContentDigest,
        found: crate::image::ContentDigest,
    },

    /// digest uses a hash format we can't compute
    #[error("unsupported digest format {0}")]
    UnsupportedDigest(crate::image::ContentDigest),

    /// no manifest in the index matches the requested platform
    #[error("no manifest matches platform {0}")]
    NoMatchingManifest(String),

    /// unsupported manifest media type
    #[error("unsupported manifest type {0:?}")]
    UnsupportedManifestType(String),

    /// referenced blob is not present in a local image
    #[error("blob {0} not found")]
    BlobNotFound(String),

    /// user from the image config is not listed in /etc/passwd
    #[error("unknown user {0:?}")]
    UnknownUser(String),

    /// group from the image config is not listed in /etc/group
    #[error("unknown group {0:?}")]
    UnknownGroup(String),

    /// prefetch did not finish before the layer was handed to the merge
    #[error("prefetch did not finish in time")]
    PrefetchTimeout,

    /// background read did not finish in time
    #[error("background read timed out")]
    BackgroundTimeout,

    /// background task manager is shutting down
    #[error("background task manager is shutting down")]
    TaskManagerClosed,
}

impl ImageError {
    /// Verification errors are never downgraded by retrying a weaker decoder
    pub fn is_verification(&self) -> bool {
        matches!(
            self,
            ImageError::TocDigestMismatch { .. }
                | ImageError::ChunkDigestMismatch { .. }
                | ImageError::ContentDigestMismatch { .. }
                | ImageError::UnsupportedDigest(_)
        )
    }
}

/// Errors from the virtual filesystem layer, convertible to an errno code
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum VFSError {
    #[error("generic I/O error")]
    IO,

    #[error("expected a directory, found another node type")]
    DirectoryExpected,

    #[error("expected a file, found another node type")]
    FileExpected,

    #[error("expected a symlink, found another node type")]
    LinkExpected,

    #[error("unallocated node")]
    UnallocNode,

    #[error("not found")]
    NotFound,

    #[error("path already holds a non-directory node")]
    PlaceholderConflict,

    #[error("too many nested path segments")]
    PathSegmentLimitExceeded,

    #[error("too many nested symbolic links")]
    SymbolicLinkLimitExceeded,

    #[error("inode reference count error")]
    INodeRefCountError,

    #[error("read-only filesystem")]
    ReadOnly,

    #[error("unknown fid")]
    BadFid,

    #[error("fid is not open")]
    NotOpen,

    #[error("fid is already open")]
    AlreadyOpen,

    #[error("invalid argument")]
    InvalidArgument,

    #[error("operation not supported")]
    Unsupported,

    #[error("no data available")]
    NoData,

    #[error("operation not implemented")]
    NotImplemented,

    #[error("content verification failed")]
    VerificationFailed,
}

impl VFSError {
    /// Convert this error to the equivalent kernel errno value
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            VFSError::IO => libc::EIO,
            VFSError::DirectoryExpected => libc::ENOTDIR,
            VFSError::FileExpected => libc::EISDIR,
            VFSError::LinkExpected => libc::EINVAL,
            VFSError::UnallocNode => libc::ENOENT,
            VFSError::NotFound => libc::ENOENT,
            VFSError::PlaceholderConflict => libc::EEXIST,
            VFSError::PathSegmentLimitExceeded => libc::ENAMETOOLONG,
            VFSError::SymbolicLinkLimitExceeded => libc::ELOOP,
            VFSError::INodeRefCountError => libc::ENOMEM,
            VFSError::ReadOnly => libc::EROFS,
            VFSError::BadFid => libc::EBADF,
            VFSError::NotOpen => libc::EBADF,
            VFSError::AlreadyOpen => libc::EBUSY,
            VFSError::InvalidArgument => libc::EINVAL,
            VFSError::Unsupported => libc::ENOTSUP,
            VFSError::NoData => libc::ENODATA,
            VFSError::NotImplemented => libc::ENOSYS,
            VFSError::VerificationFailed => libc::EIO,
        }
    }
}

impl From<ImageError> for VFSError {
    fn from(err: ImageError) -> Self {
        if err.is_verification() {
            log::error!("{}", err);
            VFSError::VerificationFailed
        } else {
            log::warn!("{}", err);
            VFSError::IO
        }
    }
}

/// Errors that end a protocol session
#[derive(Error, Debug)]
pub enum ServerError {
    /// io error
    #[error("io error: {0}")]
    IOError(#[from] std::io::Error),

    /// protocol error
    #[error("protocol error: {0}")]
    ProtocolError(#[from] layerfs_protocol::buffer::Error),

    /// message larger than the negotiated maximum
    #[error("message of {0} bytes exceeds the maximum size")]
    MessageTooLarge(u32),

    /// connection lost unexpectedly
    #[error("connection lost unexpectedly")]
    Disconnected,

    /// task join error
    #[error("task join error: {0}")]
    TaskJoinError(#[from] tokio::task::JoinError),

    /// container image error
    #[error("container image error: {0}")]
    ImageError(#[from] ImageError),
}
