//! Concurrent range-fetch downloader for cloud object storage blobs served
//! over pre-signed HTTP(S) URLs, with streaming checksum verification. Ported
//! from `DataBiosphere/getm`.

pub mod buffers;
pub mod checksum;
pub mod concurrent;
pub mod error;
pub mod http;
pub mod orchestrator;
pub mod planner;
pub mod reader;

pub use error::{Error, Result};
pub use http::Client;
pub use reader::Reader;

use std::sync::Arc;

/// Open a reader over `url` with the given `concurrency` knob (`0` raw,
/// `1` keep-alive, `>1` N-way parallel), using the matching default chunk
/// size when `chunk_size` is unset. Mirrors `getm.urlopen`.
pub async fn urlopen(
    client: Arc<Client>,
    url: String,
    chunk_size: Option<u32>,
    concurrency: u32,
) -> Result<Reader> {
    let chunk_size = chunk_size.unwrap_or(if concurrency == 1 {
        orchestrator::DEFAULT_CHUNK_SIZE_KEEP_ALIVE
    } else {
        orchestrator::DEFAULT_CHUNK_SIZE
    });
    Reader::open(client, url, chunk_size, concurrency).await
}
