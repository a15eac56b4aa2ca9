//! Typed errors for `blobfetch`. Transient failures are retried internally and
//! never surface here; everything below is either fatal for a single URL or
//! fatal for the whole invocation.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("transient HTTP failure after retries: {0}")]
    Transient(#[from] reqwest::Error),

    #[error("range read returned a short body after {attempts} attempts")]
    ShortBody { attempts: u32 },

    #[error("url inaccessible (status {status}): {body}")]
    Inaccessible { status: u16, body: String },

    #[error("checksum verification failed for {path}")]
    ChecksumMismatch { path: String },

    #[error("ambiguous S3 multipart layout: {count} candidate part sizes (max 5)")]
    AmbiguousLayout { count: usize },

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("failed to allocate shared buffer: {0}")]
    BufferAllocation(String),

    #[error("unsupported operation on a streaming reader")]
    Unsupported,

    #[error("unable to extract a filename from url '{0}'")]
    NoName(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
