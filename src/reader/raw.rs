//! Single streaming GET, no range concurrency. Ported from `URLRawReader` in
//! `examples/original_source/getm/reader.py`.

use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;

use crate::error::Result;
use crate::http::{BodyStream, Client};

pub struct RawReader {
    size: u64,
    body: BodyStream,
}

impl RawReader {
    pub async fn open(client: &Client, url: &str) -> Result<Self> {
        let size = client.size(url).await?;
        let body = client.get_stream(url).await?;
        Ok(RawReader { size, body })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Read up to `buf.len()` bytes. Returns `0` at end of stream.
    pub async fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.body.read_into(buf).await
    }

    pub async fn close(self) {}

    /// Fetch the whole object in `chunk_size`-byte pieces, in order.
    pub fn iter_content(
        client: Arc<Client>,
        url: String,
        chunk_size: usize,
    ) -> impl Stream<Item = Result<Bytes>> {
        client.iter_content(url, chunk_size)
    }
}
