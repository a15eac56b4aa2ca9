//! Single background producer task feeding a ring buffer, with the consumer
//! polling for available bytes. Ported from `URLReaderKeepAlive` in
//! `examples/original_source/getm/reader.py`; the producer *process* becomes
//! a `smol` task and the shared-memory buffer becomes an in-process
//! [`CircularBuffer`] guarded by a [`ReleaseTracker`].

use std::sync::Arc;
use std::time::Duration;

use crate::buffers::{BufView, CircularBuffer, ReleaseTracker, CLOSE_SENTINEL};
use crate::error::Result;
use crate::http::Client;

const READ_WAIT: Duration = Duration::from_millis(50);
const DEFAULT_BUFFER_CHUNKS: u32 = 100;

pub struct KeepAliveReader {
    size: u64,
    tracker: Arc<ReleaseTracker>,
    producer: smol::Task<Result<()>>,
    stop: i64,
    max_read: i64,
}

impl KeepAliveReader {
    pub async fn open(
        client: Arc<Client>,
        url: String,
        chunk_size: u32,
        buffer_size: Option<u32>,
    ) -> Result<Self> {
        assert!(chunk_size >= 1);
        let buffer_size = buffer_size.unwrap_or_else(|| Self::compute_buffer_size(1, chunk_size));
        assert!(buffer_size >= 3 * chunk_size, "buffer_size is too small");

        let size = client.size(&url).await?;
        let buf = CircularBuffer::new(buffer_size as usize);
        let producer_buf = buf.clone();
        let tracker = Arc::new(ReleaseTracker::new(buf));

        let producer = smol::spawn(Self::run_producer(client, url, chunk_size, producer_buf));

        Ok(KeepAliveReader {
            size,
            tracker,
            producer,
            stop: 0,
            max_read: (buffer_size - chunk_size) as i64,
        })
    }

    /// Pick a generous ring-buffer size for `concurrent_downloads` producers
    /// sharing the heap, capped the same way the shared-memory original
    /// capped its process-wide probe. Always an exact multiple of
    /// `chunk_size`, since the buffer's wrap/slice math assumes whole chunks.
    pub fn compute_buffer_size(concurrent_downloads: u32, chunk_size: u32) -> u32 {
        let chunks = (DEFAULT_BUFFER_CHUNKS / concurrent_downloads.max(1)).max(3);
        chunks * chunk_size
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    async fn run_producer(
        client: Arc<Client>,
        url: String,
        chunk_size: u32,
        buf: CircularBuffer,
    ) -> Result<()> {
        let mut body = client.get_stream(&url).await?;
        let mut stop = 0i64;
        let capacity = buf.capacity() as i64;
        let mut scratch = vec![0u8; chunk_size as usize];
        loop {
            while stop - buf.start() + chunk_size as i64 >= capacity {
                if buf.start() == CLOSE_SENTINEL {
                    return Ok(());
                }
                smol::Timer::after(READ_WAIT).await;
            }
            let n = body.read_into(&mut scratch).await?;
            if n == 0 {
                break;
            }
            buf.write_slice(stop, &scratch[..n]);
            stop += n as i64;
            buf.set_stop(stop);
        }
        Ok(())
    }

    /// Borrow up to `sz` bytes, polling the producer until they're available
    /// or the object ends. Caller must release the view.
    pub async fn read(&mut self, sz: u64) -> Result<BufView> {
        let buf = self.tracker.buffer().clone();
        let mut sz = (sz as i64).min(self.max_read);
        while sz > self.stop - self.tracker.position() && self.stop < self.size as i64 {
            smol::Timer::after(READ_WAIT).await;
            self.stop = buf.stop();
        }
        sz = sz.max(0).min(self.stop - self.tracker.position());
        Ok(self.tracker.take(sz))
    }

    pub async fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        let view = self.read(buf.len() as u64).await?;
        let n = view.len();
        buf[..n].copy_from_slice(&view);
        view.mark_released();
        Ok(n)
    }

    pub async fn close(self) {
        self.tracker.buffer().close_producer();
        let _ = self.producer.cancel().await;
    }
}
