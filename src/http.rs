//! Thin HTTP(S) client wrapping `reqwest`, bridged into the `smol` executor via
//! `async-compat` the same way the old S3 client bridged `rusoto`'s tokio
//! futures. Ported from `examples/original_source/getm/http.py` and
//! `streaming_urls/http.py`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_compat::CompatExt;
use bytes::Bytes;
use futures::Stream;
use lru::LruCache;
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_MD5, ETAG, SERVER};

use crate::error::{Error, Result};

const HEAD_CACHE_CAPACITY: usize = 20;
const MAX_ATTEMPTS: u32 = 10;
const RETRY_STATUS_FORCELIST: [u16; 5] = [429, 500, 502, 503, 504];
const BASE_BACKOFF: Duration = Duration::from_millis(200);

/// Headers and size learned from a single GET, cached by URL so repeated
/// `size`/`name`/`checksums` calls against the same pre-signed URL don't
/// re-probe it.
#[derive(Clone)]
struct HeadInfo {
    size: u64,
    headers: HeaderMap,
}

/// Incremental reader over a response body, used by readers that pull bytes
/// in caller-chosen increments rather than all at once.
pub struct BodyStream {
    resp: reqwest::Response,
    leftover: Bytes,
}

impl BodyStream {
    /// Fill as much of `buf` as the body has left, short of EOF. Returns the
    /// number of bytes written, `0` only at end of body.
    pub async fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            if self.leftover.is_empty() {
                match self.resp.chunk().compat().await.map_err(Error::Transient)? {
                    Some(bytes) => self.leftover = bytes,
                    None => break,
                }
            }
            let take = (buf.len() - filled).min(self.leftover.len());
            buf[filled..filled + take].copy_from_slice(&self.leftover[..take]);
            self.leftover = self.leftover.split_off(take);
            filled += take;
        }
        Ok(filled)
    }
}

pub struct Client {
    http: reqwest::Client,
    head_cache: Mutex<LruCache<String, HeadInfo>>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    pub fn new() -> Self {
        Client {
            http: reqwest::Client::new(),
            head_cache: Mutex::new(LruCache::new(HEAD_CACHE_CAPACITY)),
        }
    }

    async fn backoff(attempt: u32) {
        let delay = BASE_BACKOFF * 2u32.saturating_pow(attempt.saturating_sub(1).min(6));
        smol::Timer::after(delay).await;
    }

    /// GET `url`, retrying transport errors and the retryable status
    /// forcelist up to `MAX_ATTEMPTS` times. Returns whatever status the last
    /// attempt produced; callers decide what counts as success.
    async fn probe(&self, url: &str, range: Option<(u64, u64)>) -> Result<reqwest::Response> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut req = self.http.get(url);
            if let Some((start, end)) = range {
                req = req.header(reqwest::header::RANGE, format!("bytes={start}-{end}"));
            }
            match req.send().compat().await {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if resp.status().is_success() || attempt >= MAX_ATTEMPTS {
                        return Ok(resp);
                    }
                    if RETRY_STATUS_FORCELIST.contains(&status) {
                        tracing::warn!(url, status, attempt, "retrying after retryable status");
                        Self::backoff(attempt).await;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(e) => {
                    if attempt >= MAX_ATTEMPTS {
                        return Err(Error::Transient(e));
                    }
                    tracing::warn!(url, attempt, error = %e, "retrying after transport error");
                    Self::backoff(attempt).await;
                }
            }
        }
    }

    async fn head(&self, url: &str) -> Result<HeadInfo> {
        if let Some(info) = self.head_cache.lock().unwrap().get(url) {
            return Ok(info.clone());
        }
        let resp = self.probe(url, None).await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Inaccessible {
                status: status.as_u16(),
                body: String::new(),
            });
        }
        let headers = resp.headers().clone();
        let size = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        let info = HeadInfo { size, headers };
        self.head_cache
            .lock()
            .unwrap()
            .put(url.to_string(), info.clone());
        Ok(info)
    }

    /// Total object size, from `Content-Length`.
    pub async fn size(&self, url: &str) -> Result<u64> {
        Ok(self.head(url).await?.size)
    }

    /// Best-effort filename: `Content-Disposition`'s `filename=`, falling
    /// back to the URL's last path segment.
    pub async fn name(&self, url: &str) -> Result<String> {
        let info = self.head(url).await?;
        if let Some(cd) = info
            .headers
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
        {
            for part in cd.split(';') {
                let part = part.trim();
                if let Some(rest) = part.strip_prefix("filename=") {
                    let name = rest.trim_matches(|c| c == '"' || c == '\'');
                    if !name.is_empty() {
                        return Ok(name.to_string());
                    }
                }
            }
        }
        let from_path = url::Url::parse(url)
            .ok()
            .and_then(|u| u.path_segments().and_then(|mut s| s.next_back().map(str::to_string)))
            .filter(|s| !s.is_empty());
        from_path.ok_or_else(|| Error::NoName(url.to_string()))
    }

    /// Every checksum the response headers expose, keyed by the algorithm
    /// name callers should pass to [`crate::checksum::Algorithm`].
    pub async fn checksums(&self, url: &str) -> Result<HashMap<String, String>> {
        let info = self.head(url).await?;
        let mut out = HashMap::new();

        if let Some(v) = info
            .headers
            .get("x-goog-hash")
            .and_then(|v| v.to_str().ok())
        {
            for part in v.split(',') {
                if let Some((name, val)) = part.trim().split_once('=') {
                    match name {
                        "crc32c" => {
                            out.insert("gs_crc32c".to_string(), val.to_string());
                        }
                        "md5" => {
                            out.insert("gs_md5".to_string(), val.to_string());
                        }
                        _ => {}
                    }
                }
            }
        }

        if let Some(etag) = info.headers.get(ETAG).and_then(|v| v.to_str().ok()) {
            let etag = etag.trim_matches('"').to_string();
            let is_s3 = info
                .headers
                .get(SERVER)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.contains("AmazonS3"))
                .unwrap_or(false);
            if is_s3 {
                out.insert("s3_etag".to_string(), etag);
            } else {
                out.insert("etag".to_string(), etag);
            }
        }

        if let Some(md5) = info.headers.get(CONTENT_MD5).and_then(|v| v.to_str().ok()) {
            out.insert("md5".to_string(), md5.to_string());
        }

        Ok(out)
    }

    /// Probe accessibility without raising on the common "this object isn't
    /// there" statuses; returns the status and response body when
    /// inaccessible so callers can log or surface it.
    pub async fn accessible(&self, url: &str) -> Result<(bool, u16, Option<String>)> {
        match self.head(url).await {
            Ok(_) => Ok((true, 200, None)),
            Err(Error::Inaccessible { status, .. }) if matches!(status, 400 | 403 | 404) => {
                let resp = self.probe(url, None).await?;
                let body = resp.text().compat().await.unwrap_or_default();
                Ok((false, status, Some(body)))
            }
            Err(e) => Err(e),
        }
    }

    /// Read exactly `length` bytes starting at `start` into `dst[..length]`,
    /// retrying the whole range if the server ever returns fewer bytes than
    /// requested.
    pub async fn range_read_into(
        &self,
        url: &str,
        start: u64,
        length: u32,
        dst: &mut [u8],
    ) -> Result<()> {
        assert!(dst.len() >= length as usize);
        if length == 0 {
            return Ok(());
        }
        let end = start + length as u64 - 1;
        for attempt in 1..=MAX_ATTEMPTS {
            let resp = self.probe(url, Some((start, end))).await?;
            if !resp.status().is_success() {
                return Err(Error::Inaccessible {
                    status: resp.status().as_u16(),
                    body: String::new(),
                });
            }
            let bytes = resp.bytes().compat().await.map_err(Error::Transient)?;
            let n = bytes.len().min(length as usize);
            dst[..n].copy_from_slice(&bytes[..n]);
            if n == length as usize {
                return Ok(());
            }
            tracing::warn!(url, start, length, got = n, attempt, "short range body, retrying");
        }
        Err(Error::ShortBody {
            attempts: MAX_ATTEMPTS,
        })
    }

    /// Open a whole-object streaming GET for incremental reading.
    pub async fn get_stream(&self, url: &str) -> Result<BodyStream> {
        let resp = self.probe(url, None).await?;
        if !resp.status().is_success() {
            return Err(Error::Inaccessible {
                status: resp.status().as_u16(),
                body: String::new(),
            });
        }
        Ok(BodyStream {
            resp,
            leftover: Bytes::new(),
        })
    }

    /// Stream the whole object in `chunk_size`-byte pieces. Runs the fetch
    /// on its own task and hands chunks back over a rendezvous channel, the
    /// same producer/consumer shape as the old pcap decode pipeline.
    pub fn iter_content(
        self: std::sync::Arc<Self>,
        url: String,
        chunk_size: usize,
    ) -> impl Stream<Item = Result<Bytes>> {
        let (tx, rx) = async_channel::bounded::<Result<Bytes>>(1);
        smol::spawn(async move {
            let mut body = match self.get_stream(&url).await {
                Ok(body) => body,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };
            let mut buf = vec![0u8; chunk_size];
            loop {
                match body.read_into(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(Ok(Bytes::copy_from_slice(&buf[..n]))).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                }
            }
        })
        .detach();
        rx
    }
}
