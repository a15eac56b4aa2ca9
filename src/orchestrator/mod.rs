//! Download routing: resolve a target path, pick a reader strategy sized to
//! the object, verify whatever checksum is known, and land the file via
//! [`indirect::IndirectFile`]. Ported from `urlopen`/`iter_content`/
//! `download_iter_parts`/`_get_checksums` in
//! `examples/original_source/getm/__init__.py`, with the manifest-driven
//! batch routing and CLI surface inferred from
//! `examples/original_source/tests/test_cli.py` (the `cli.py` kept on disk is
//! an early, partial revision — its own test suite exercises a fuller one).

pub mod indirect;
pub mod manifest;
pub mod progress;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use std::io::Write;

use crate::checksum::{Algorithm, GsCrc32c, Md5, Null, Verifier};
use crate::concurrent::Heap;
use crate::error::{Error, Result};
use crate::http::Client;
use crate::reader::Reader;
use indirect::IndirectFile;
use manifest::ManifestEntry;
use progress::Progress;

/// Chunk size for the no-concurrency and N-way parallel readers.
pub const DEFAULT_CHUNK_SIZE: u32 = 128 * 1024 * 1024;
/// Chunk size for the single-connection keep-alive reader.
pub const DEFAULT_CHUNK_SIZE_KEEP_ALIVE: u32 = 1024 * 1024;
pub const DEFAULT_CONCURRENCY: u32 = 4;

/// A checksum the caller already knows (from `--checksum`/
/// `--checksum-algorithm` or a manifest entry), checked against the
/// downloaded bytes instead of whatever the response headers expose.
pub struct GivenChecksum {
    pub value: String,
    pub algorithm: Algorithm,
}

impl GivenChecksum {
    pub fn from_manifest(entry: &ManifestEntry) -> Result<Option<Self>> {
        match (&entry.checksum, &entry.checksum_algorithm) {
            (Some(value), Some(alg)) => Ok(Some(GivenChecksum {
                value: value.clone(),
                algorithm: alg.parse()?,
            })),
            _ => Ok(None),
        }
    }
}

/// Resolve the absolute on-disk destination for `url`. With no `filepath`,
/// the object's inferred name is used in the current directory; a directory
/// `filepath` gets the inferred name appended; anything else is used as-is.
/// Mirrors `resolve_target` in `getm/utils.py`.
pub async fn resolve_target(
    client: &Client,
    url: &str,
    filepath: Option<&str>,
) -> Result<PathBuf> {
    match filepath {
        None => Ok(abspath(PathBuf::from(client.name(url).await?))),
        Some(fp) => {
            let path = abspath(expand_user(fp));
            if path.is_dir() {
                Ok(path.join(client.name(url).await?))
            } else {
                Ok(path)
            }
        }
    }
}

fn expand_user(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

fn abspath(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(&path))
            .unwrap_or(path)
    }
}

/// Whichever checksum the response headers expose, in precedence order
/// `gs_crc32c > s3_etag > md5`. Mirrors `_get_checksums`.
async fn infer_checksum(client: &Client, url: &str) -> Result<Option<(String, Algorithm)>> {
    let hashes = client.checksums(url).await?;
    if let Some(v) = hashes.get("gs_crc32c") {
        return Ok(Some((v.clone(), Algorithm::GsCrc32c)));
    }
    if let Some(v) = hashes.get("s3_etag") {
        return Ok(Some((v.clone(), Algorithm::S3Etag)));
    }
    if let Some(v) = hashes.get("md5") {
        return Ok(Some((v.clone(), Algorithm::Md5)));
    }
    Ok(None)
}

fn build_verifier(algorithm: Algorithm, expected: &str, size: u64) -> Result<Verifier> {
    match algorithm {
        Algorithm::Md5 => Ok(Verifier::Md5(Md5::new())),
        Algorithm::GsCrc32c => Ok(Verifier::GsCrc32c(GsCrc32c::new())),
        Algorithm::S3Etag => Verifier::for_s3_etag(expected, size),
        Algorithm::Null => Ok(Verifier::Null(Null::default())),
    }
}

/// Drain `rdr` into `filepath` via [`IndirectFile`], verifying whichever
/// checksum is known (caller-given, else inferred from response headers).
async fn drain(
    client: &Client,
    url: &str,
    mut rdr: Reader,
    filepath: &Path,
    given: Option<GivenChecksum>,
    mut progress: Option<&mut Progress>,
) -> Result<()> {
    let size = rdr.size();
    let (expected, algorithm) = match given {
        Some(g) => (Some(g.value), Some(g.algorithm)),
        None => match infer_checksum(client, url).await? {
            Some((v, a)) => (Some(v), Some(a)),
            None => (None, None),
        },
    };
    let mut verifier = match (&expected, algorithm) {
        (Some(e), Some(a)) => build_verifier(a, e, size)?,
        _ => Verifier::Null(Null::default()),
    };

    let mut file = IndirectFile::create(filepath)?;
    let mut buf = vec![0u8; 1024 * 1024];
    let result: Result<()> = loop {
        match rdr.read_into(&mut buf).await {
            Ok(0) => break Ok(()),
            Ok(n) => {
                verifier.update(&buf[..n]);
                if let Err(e) = file.handle().write_all(&buf[..n]) {
                    break Err(e.into());
                }
                if let Some(p) = progress.as_deref_mut() {
                    p.add(n as u64);
                }
            }
            Err(e) => break Err(e),
        }
    };
    rdr.close().await;
    result?;

    if let Some(expected) = expected {
        if !verifier.matches(&expected) {
            return Err(Error::ChecksumMismatch {
                path: filepath.display().to_string(),
            });
        }
    }
    file.commit()
}

/// Single streaming GET, no concurrency. Used for objects at or below the
/// multipart threshold.
pub async fn oneshot(
    client: Arc<Client>,
    url: &str,
    filepath: &Path,
    given: Option<GivenChecksum>,
    progress: Option<&mut Progress>,
) -> Result<()> {
    let rdr = Reader::open(client.clone(), url.to_string(), DEFAULT_CHUNK_SIZE, 0).await?;
    drain(&client, url, rdr, filepath, given, progress).await
}

/// Concurrent range-fetch download: `concurrency == 1` runs the
/// single-connection keep-alive reader, anything greater runs the N-way
/// parallel range reader.
pub async fn multipart(
    client: Arc<Client>,
    url: &str,
    filepath: &Path,
    chunk_size: u32,
    concurrency: u32,
    given: Option<GivenChecksum>,
    progress: Option<&mut Progress>,
) -> Result<()> {
    assert!(concurrency >= 1, "multipart concurrency must be at least 1");
    let rdr = Reader::open(client.clone(), url.to_string(), chunk_size, concurrency).await?;
    drain(&client, url, rdr, filepath, given, progress).await
}

/// Route one manifest entry through `oneshot` or `multipart` based on
/// whether its size exceeds `multipart_threshold`. Reports progress through
/// a throttled logger, one line per crossed chunk boundary, since a batch of
/// these runs concurrently and a terminal bar per entry would clobber the
/// others' redraws.
pub async fn download_one(
    client: Arc<Client>,
    url: String,
    filepath: Option<String>,
    given: Option<GivenChecksum>,
    concurrency: u32,
    multipart_threshold: u64,
) -> Result<()> {
    let target = resolve_target(&client, &url, filepath.as_deref()).await?;
    let size = client.size(&url).await?;
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| url.clone());
    let mut progress = Progress::logger(&name, size);
    let result = if size <= multipart_threshold {
        oneshot(client, &url, &target, given, Some(&mut progress)).await
    } else {
        let chunk_size = if concurrency == 1 {
            DEFAULT_CHUNK_SIZE_KEEP_ALIVE
        } else {
            DEFAULT_CHUNK_SIZE
        };
        multipart(client, &url, &target, chunk_size, concurrency, given, Some(&mut progress)).await
    };
    progress.finish();
    result
}

/// Outcome of a batch manifest download: which URLs failed and why. Empty
/// when every entry succeeded.
pub struct ExitOutcome {
    pub failures: Vec<(String, Error)>,
}

impl ExitOutcome {
    pub fn exit_code(&self) -> i32 {
        if self.failures.is_empty() {
            0
        } else {
            1
        }
    }
}

/// Download every manifest entry, smallest objects first, with up to
/// `concurrency` transfers running at once. Each entry's accessibility is
/// probed up front (also establishing the size needed for priority
/// ordering): under `continue_after_error` an inaccessible object is
/// recorded as a per-entry failure rather than aborting the whole batch;
/// otherwise it aborts the batch before any download starts, the same as a
/// failure encountered mid-run.
pub async fn download(
    manifest: &[ManifestEntry],
    concurrency: u32,
    multipart_threshold: u64,
    continue_after_error: bool,
) -> Result<ExitOutcome> {
    assert!(concurrency >= 1, "concurrency must be at least 1");
    let client = Arc::new(Client::new());

    let mut failures = Vec::new();
    let mut sized = Vec::with_capacity(manifest.len());
    for entry in manifest {
        match client.accessible(&entry.url).await {
            Ok((true, _, _)) => {
                let size = client.size(&entry.url).await?;
                sized.push((entry.clone(), size));
            }
            Ok((false, status, body)) => {
                let body = body.unwrap_or_default();
                tracing::warn!(url = %entry.url, status, body, "object inaccessible");
                let err = Error::Inaccessible { status, body };
                if continue_after_error {
                    failures.push((entry.url.clone(), err));
                } else {
                    return Err(err);
                }
            }
            Err(e) => {
                if continue_after_error {
                    failures.push((entry.url.clone(), e));
                } else {
                    return Err(e);
                }
            }
        }
    }

    let mut heap: Heap<(String, Result<()>)> = Heap::new(concurrency as usize);
    for (entry, size) in sized {
        let client = client.clone();
        let given = GivenChecksum::from_manifest(&entry)?;
        let url = entry.url.clone();
        let filepath = entry.filepath.clone();
        let priority = -(size as i64);
        heap.priority_put(priority, async move {
            let result =
                download_one(client, url.clone(), filepath, given, concurrency, multipart_threshold)
                    .await;
            (url, result)
        });
    }

    while let Some((url, result)) = heap.get().await {
        match result {
            Ok(()) => {}
            Err(e) if continue_after_error => failures.push((url, e)),
            Err(e) => {
                heap.abort().await;
                return Err(e);
            }
        }
    }
    Ok(ExitOutcome { failures })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_target_falls_back_to_cwd_relative_name() {
        smol::block_on(async {
            let server = wiremock::MockServer::start().await;
            wiremock::Mock::given(wiremock::matchers::method("GET"))
                .respond_with(
                    wiremock::ResponseTemplate::new(200)
                        .insert_header("content-length", "0")
                        .insert_header("content-disposition", "attachment; filename=\"blob.bin\""),
                )
                .mount(&server)
                .await;
            let client = Client::new();
            let url = format!("{}/obj", server.uri());
            let target = resolve_target(&client, &url, None).await.unwrap();
            assert_eq!(target.file_name().unwrap(), "blob.bin");
            assert!(target.is_absolute());
        });
    }

    #[test]
    fn resolve_target_appends_name_under_a_directory() {
        smol::block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let server = wiremock::MockServer::start().await;
            wiremock::Mock::given(wiremock::matchers::method("GET"))
                .respond_with(
                    wiremock::ResponseTemplate::new(200)
                        .insert_header("content-length", "0")
                        .insert_header("content-disposition", "attachment; filename=\"blob.bin\""),
                )
                .mount(&server)
                .await;
            let client = Client::new();
            let url = format!("{}/obj", server.uri());
            let target = resolve_target(&client, &url, Some(dir.path().to_str().unwrap()))
                .await
                .unwrap();
            assert_eq!(target, dir.path().join("blob.bin"));
        });
    }

    #[test]
    fn resolve_target_honors_an_explicit_file_path() {
        smol::block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let explicit = dir.path().join("chosen-name.bin");
            let server = wiremock::MockServer::start().await;
            wiremock::Mock::given(wiremock::matchers::method("GET"))
                .respond_with(wiremock::ResponseTemplate::new(200).insert_header("content-length", "0"))
                .mount(&server)
                .await;
            let client = Client::new();
            let url = format!("{}/obj", server.uri());
            let target = resolve_target(&client, &url, Some(explicit.to_str().unwrap()))
                .await
                .unwrap();
            assert_eq!(target, explicit);
        });
    }

    #[test]
    fn oneshot_downloads_and_verifies_md5() {
        smol::block_on(async {
            let server = wiremock::MockServer::start().await;
            let data = b"hello world, this is a small object".to_vec();
            let digest = format!("{:x}", md5::compute(&data));
            wiremock::Mock::given(wiremock::matchers::method("GET"))
                .respond_with(
                    wiremock::ResponseTemplate::new(200)
                        .insert_header("content-length", data.len().to_string())
                        .set_body_bytes(data.clone()),
                )
                .mount(&server)
                .await;

            let dir = tempfile::tempdir().unwrap();
            let target = dir.path().join("out.bin");
            let client = Arc::new(Client::new());
            let url = format!("{}/obj", server.uri());
            let given = GivenChecksum {
                value: digest,
                algorithm: Algorithm::Md5,
            };
            oneshot(client, &url, &target, Some(given), None).await.unwrap();
            assert_eq!(std::fs::read(&target).unwrap(), data);
        });
    }

    #[test]
    fn oneshot_rejects_a_mismatched_checksum() {
        smol::block_on(async {
            let server = wiremock::MockServer::start().await;
            let data = b"some bytes".to_vec();
            wiremock::Mock::given(wiremock::matchers::method("GET"))
                .respond_with(
                    wiremock::ResponseTemplate::new(200)
                        .insert_header("content-length", data.len().to_string())
                        .set_body_bytes(data),
                )
                .mount(&server)
                .await;

            let dir = tempfile::tempdir().unwrap();
            let target = dir.path().join("out.bin");
            let client = Arc::new(Client::new());
            let url = format!("{}/obj", server.uri());
            let given = GivenChecksum {
                value: "not the right digest".to_string(),
                algorithm: Algorithm::Md5,
            };
            let result = oneshot(client, &url, &target, Some(given), None).await;
            assert!(matches!(result, Err(Error::ChecksumMismatch { .. })));
            assert!(!target.exists());
        });
    }

    #[test]
    fn download_routes_small_and_large_entries_and_verifies_content() {
        smol::block_on(async {
            let server = wiremock::MockServer::start().await;
            let small: Vec<u8> = (0..4u32).map(|i| i as u8).collect();
            let large: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();

            wiremock::Mock::given(wiremock::matchers::method("GET"))
                .and(wiremock::matchers::path("/small"))
                .respond_with(
                    wiremock::ResponseTemplate::new(200)
                        .insert_header("content-length", small.len().to_string())
                        .set_body_bytes(small.clone()),
                )
                .mount(&server)
                .await;
            wiremock::Mock::given(wiremock::matchers::method("GET"))
                .and(wiremock::matchers::path("/large"))
                .respond_with(move |req: &wiremock::Request| {
                    if let Some(range) = req.headers.get("range") {
                        let range = range.to_str().unwrap().trim_start_matches("bytes=");
                        let (start, end) = range.split_once('-').unwrap();
                        let (start, end): (usize, usize) = (start.parse().unwrap(), end.parse().unwrap());
                        wiremock::ResponseTemplate::new(206).set_body_bytes(large[start..=end].to_vec())
                    } else {
                        wiremock::ResponseTemplate::new(200)
                            .insert_header("content-length", large.len().to_string())
                            .set_body_bytes(large.clone())
                    }
                })
                .mount(&server)
                .await;

            let dir = tempfile::tempdir().unwrap();
            let manifest = vec![
                ManifestEntry {
                    url: format!("{}/small", server.uri()),
                    filepath: Some(dir.path().join("small.bin").to_str().unwrap().to_string()),
                    checksum: None,
                    checksum_algorithm: None,
                },
                ManifestEntry {
                    url: format!("{}/large", server.uri()),
                    filepath: Some(dir.path().join("large.bin").to_str().unwrap().to_string()),
                    checksum: None,
                    checksum_algorithm: None,
                },
            ];

            let outcome = download(&manifest, 2, 1024, false).await.unwrap();
            assert_eq!(outcome.exit_code(), 0);
            assert_eq!(std::fs::read(dir.path().join("small.bin")).unwrap(), small);
            assert_eq!(std::fs::read(dir.path().join("large.bin")).unwrap(), large);
        });
    }
}
