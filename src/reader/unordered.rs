//! Unordered multi-range helper: fetch parts with `concurrency`-wide
//! parallelism and deliver `(part_id, bytes)` in completion order, not
//! submission order. Ported from `iter_content_unordered`/`_fetch_part_uo`
//! in `examples/original_source/getm/reader.py`.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;

use crate::buffers::BufferArray;
use crate::concurrent::Pool;
use crate::error::Result;
use crate::http::Client;
use crate::planner::plan;

type PartResult = Result<(u32, u32, usize)>; // part_id, length, slot

pub struct UnorderedReader {
    arr: BufferArray,
    pool: Pool<PartResult>,
    remaining: VecDeque<(u32, u64, u32)>,
    client: Arc<Client>,
    url: String,
}

impl UnorderedReader {
    pub async fn open(
        client: Arc<Client>,
        url: String,
        chunk_size: u32,
        concurrency: usize,
    ) -> Result<Self> {
        assert!(concurrency >= 1);
        let size = client.size(&url).await?;
        let arr = BufferArray::new(chunk_size as usize, concurrency);
        let mut remaining: VecDeque<(u32, u64, u32)> = plan(size, chunk_size)
            .into_iter()
            .map(|p| (p.part_id, p.start, p.length))
            .collect();

        let mut pool = Pool::new(concurrency);
        for slot in 0..concurrency {
            if let Some((part_id, start, length)) = remaining.pop_front() {
                Self::schedule(
                    &mut pool,
                    client.clone(),
                    url.clone(),
                    arr.clone(),
                    part_id,
                    start,
                    length,
                    slot,
                );
            }
        }

        Ok(UnorderedReader {
            arr,
            pool,
            remaining,
            client,
            url,
        })
    }

    fn schedule(
        pool: &mut Pool<PartResult>,
        client: Arc<Client>,
        url: String,
        arr: BufferArray,
        part_id: u32,
        start: u64,
        length: u32,
        slot: usize,
    ) {
        pool.put(async move {
            if length > 0 {
                let mut scratch = vec![0u8; length as usize];
                client.range_read_into(&url, start, length, &mut scratch).await?;
                arr.write(slot, &scratch);
            }
            Ok((part_id, length, slot))
        });
    }

    /// The next completed part, in whatever order fetches finish. `None`
    /// once every part has been delivered.
    pub async fn next(&mut self) -> Option<Result<(u32, Bytes)>> {
        let (part_id, length, slot) = match self.pool.get().await? {
            Ok(v) => v,
            Err(e) => return Some(Err(e)),
        };
        let data = Bytes::copy_from_slice(self.arr.slot(slot, length as usize));
        if let Some((next_part_id, start, next_length)) = self.remaining.pop_front() {
            Self::schedule(
                &mut self.pool,
                self.client.clone(),
                self.url.clone(),
                self.arr.clone(),
                next_part_id,
                start,
                next_length,
                slot,
            );
        }
        Some(Ok((part_id, data)))
    }

    pub async fn close(mut self) {
        self.pool.abort().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn every_part_is_delivered_exactly_once() {
        smol::block_on(async {
            let server = MockServer::start().await;
            let data: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();
            Mock::given(method("GET"))
                .respond_with(move |req: &wiremock::Request| {
                    let range = req.headers.get("range").unwrap().to_str().unwrap();
                    let range = range.trim_start_matches("bytes=");
                    let (start, end) = range.split_once('-').unwrap();
                    let (start, end): (usize, usize) = (start.parse().unwrap(), end.parse().unwrap());
                    ResponseTemplate::new(206).set_body_bytes(data[start..=end].to_vec())
                })
                .mount(&server)
                .await;

            let client = Arc::new(Client::new());
            let url = format!("{}/obj", server.uri());
            let mut reader = UnorderedReader::open(client, url, 64, 3).await.unwrap();

            let mut seen = Vec::new();
            while let Some(result) = reader.next().await {
                let (part_id, bytes) = result.unwrap();
                seen.push((part_id, bytes));
            }
            seen.sort_by_key(|(id, _)| *id);
            let reassembled: Vec<u8> = seen.into_iter().flat_map(|(_, b)| b.to_vec()).collect();
            assert_eq!(reassembled, data);
        });
    }
}
