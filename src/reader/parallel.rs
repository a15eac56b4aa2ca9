//! N-way parallel range-GET reader, delivering parts in submission order.
//! Ported from `URLReader` in `examples/original_source/getm/reader.py`; the
//! `ProcessPoolExecutor` + `ConcurrentQueue` pairing becomes `smol` tasks
//! bounded by [`crate::concurrent::Queue`].

use std::sync::Arc;

use crate::buffers::{BufView, CircularBuffer};
use crate::error::Result;
use crate::http::Client;
use crate::planner::plan;
use crate::concurrent::Queue;

pub struct ParallelReader {
    size: u64,
    buf: CircularBuffer,
    queue: Queue<Result<(i64, u32)>>,
    start: i64,
    stop: i64,
    max_read: i64,
}

impl ParallelReader {
    pub async fn open(
        client: Arc<Client>,
        url: String,
        chunk_size: u32,
        concurrency: usize,
    ) -> Result<Self> {
        assert!(chunk_size >= 1);
        assert!(concurrency >= 1);
        let size = client.size(&url).await?;
        let capacity = (2 * concurrency + 1) * chunk_size as usize;
        let buf = CircularBuffer::new(capacity);
        let mut queue = Queue::new(concurrency);

        for part in plan(size, chunk_size) {
            let client = client.clone();
            let url = url.clone();
            let buf = buf.clone();
            queue.put(async move {
                if part.length > 0 {
                    let mut scratch = vec![0u8; part.length as usize];
                    client
                        .range_read_into(&url, part.start, part.length, &mut scratch)
                        .await?;
                    buf.write_slice(part.start as i64, &scratch);
                }
                Ok((part.start as i64, part.length))
            });
        }

        Ok(ParallelReader {
            size,
            buf,
            queue,
            start: 0,
            stop: 0,
            max_read: concurrency as i64 * chunk_size as i64,
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Largest single `read` request this reader will ever honor in one
    /// call: `concurrency * chunk_size`.
    pub fn max_read(&self) -> i64 {
        self.max_read
    }

    /// Borrow up to `sz` bytes as a view into the shared ring buffer, waiting
    /// on in-flight range fetches as needed. The caller must release the
    /// view (`BufView::mark_released`) before requesting more.
    pub async fn read(&mut self, sz: u64) -> Result<BufView> {
        let mut sz = (sz as i64).min(self.max_read);
        while sz > self.stop - self.start {
            match self.queue.get().await {
                Some(part) => {
                    let (_, length) = part?;
                    self.stop += length as i64;
                }
                None => break,
            }
        }
        sz = sz.min(self.stop - self.start);
        let view = self.buf.view(self.start, self.start + sz);
        self.start += sz;
        Ok(view)
    }

    pub async fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        let view = self.read(buf.len() as u64).await?;
        let n = view.len();
        buf[..n].copy_from_slice(&view);
        view.mark_released();
        Ok(n)
    }

    pub async fn close(mut self) {
        self.queue.abort().await;
    }
}
