//! Readers over a single cloud-storage URL. Ported from `BaseURLReader` and
//! its three concrete subclasses in `examples/original_source/getm/reader.py`:
//! `URLRawReader` (no concurrency), `URLReaderKeepAlive` (one connection,
//! background producer), `URLReader` (N-way parallel range GETs).

pub mod keep_alive;
pub mod parallel;
pub mod raw;
pub mod unordered;

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::http::Client;

/// Dispatches to one of the three streaming strategies based on the
/// concurrency knob: `0` is raw, `1` is keep-alive, anything greater is the
/// N-way parallel range reader.
pub enum Reader {
    Raw(raw::RawReader),
    KeepAlive(keep_alive::KeepAliveReader),
    Parallel(parallel::ParallelReader),
}

impl Reader {
    pub async fn open(
        client: Arc<Client>,
        url: String,
        chunk_size: u32,
        concurrency: u32,
    ) -> Result<Self> {
        match concurrency {
            0 => Ok(Reader::Raw(raw::RawReader::open(&client, &url).await?)),
            1 => Ok(Reader::KeepAlive(
                keep_alive::KeepAliveReader::open(client, url, chunk_size, None).await?,
            )),
            n => Ok(Reader::Parallel(
                parallel::ParallelReader::open(client, url, chunk_size, n as usize).await?,
            )),
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            Reader::Raw(r) => r.size(),
            Reader::KeepAlive(r) => r.size(),
            Reader::Parallel(r) => r.size(),
        }
    }

    pub async fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self {
            Reader::Raw(r) => r.read_into(buf).await,
            Reader::KeepAlive(r) => r.read_into(buf).await,
            Reader::Parallel(r) => r.read_into(buf).await,
        }
    }

    pub async fn close(self) {
        match self {
            Reader::Raw(r) => r.close().await,
            Reader::KeepAlive(r) => r.close().await,
            Reader::Parallel(r) => r.close().await,
        }
    }

    /// Streaming readers never support seeking.
    pub fn seek(&self) -> Result<u64> {
        Err(Error::Unsupported)
    }

    pub fn tell(&self) -> Result<u64> {
        Err(Error::Unsupported)
    }

    pub fn truncate(&self) -> Result<()> {
        Err(Error::Unsupported)
    }

    pub fn write(&self, _data: &[u8]) -> Result<usize> {
        Err(Error::Unsupported)
    }
}
