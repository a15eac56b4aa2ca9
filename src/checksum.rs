//! Streaming checksum verifiers for the cloud-storage checksum taxonomy:
//! Google Cloud Storage's base64 CRC32C, Amazon S3's single- and multi-part
//! ETag, plain MD5, and a null verifier. Ported from
//! `examples/original_source/getm/checksum.py`.

use crate::error::{Error, Result};

const MIB: u64 = 1024 * 1024;

/// Which algorithm a manifest entry or HTTP header selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Md5,
    GsCrc32c,
    S3Etag,
    Null,
}

impl std::str::FromStr for Algorithm {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "md5" => Ok(Algorithm::Md5),
            "gs_crc32c" => Ok(Algorithm::GsCrc32c),
            "s3_etag" => Ok(Algorithm::S3Etag),
            "null" => Ok(Algorithm::Null),
            other => Err(Error::InvalidManifest(format!(
                "unknown checksum-algorithm '{other}'"
            ))),
        }
    }
}

/// Streaming MD5, fed bytes in file order.
pub struct Md5 {
    ctx: md5::Context,
}

impl Md5 {
    pub fn new() -> Self {
        Md5 { ctx: md5::Context::new() }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.ctx.consume(data);
    }

    pub fn hexdigest(self) -> String {
        format!("{:x}", self.ctx.compute())
    }

    pub fn matches(self, expected: &str) -> bool {
        self.hexdigest().eq_ignore_ascii_case(expected)
    }
}

/// Google Cloud Storage's CRC32C of the whole object, presented base64-encoded
/// and big-endian in `x-goog-hash`.
pub struct GsCrc32c {
    state: u32,
}

impl Default for GsCrc32c {
    fn default() -> Self {
        GsCrc32c { state: 0 }
    }
}

impl GsCrc32c {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.state = crc32c::crc32c_append(self.state, data);
    }

    pub fn strdigest(&self) -> String {
        base64::encode(self.state.to_be_bytes())
    }

    pub fn matches(&self, expected: &str) -> bool {
        self.strdigest() == expected
    }
}

/// S3's ETag for a single candidate part size: an MD5 over each `part_size`
/// chunk of the stream, concatenated and re-hashed, then suffixed `-N` for
/// N > 1 parts (plain MD5 hex for N == 1).
struct S3EtagCandidate {
    part_size: u64,
    current: md5::Context,
    current_len: u64,
    part_digests: Vec<[u8; 16]>,
}

impl S3EtagCandidate {
    fn new(part_size: u64) -> Self {
        S3EtagCandidate {
            part_size,
            current: md5::Context::new(),
            current_len: 0,
            part_digests: Vec::new(),
        }
    }

    fn update(&mut self, mut data: &[u8]) {
        while self.current_len + data.len() as u64 >= self.part_size {
            let to_add = (self.part_size - self.current_len) as usize;
            self.current.consume(&data[..to_add]);
            let digest = std::mem::replace(&mut self.current, md5::Context::new()).compute();
            self.part_digests.push(digest.0);
            data = &data[to_add..];
            self.current_len = 0;
        }
        self.current.consume(data);
        self.current_len += data.len() as u64;
    }

    fn strdigest(mut self) -> String {
        if self.current_len > 0 {
            let digest = self.current.compute();
            self.part_digests.push(digest.0);
        }
        if self.part_digests.len() == 1 {
            hex::encode(self.part_digests[0])
        } else {
            let mut concatenated = Vec::with_capacity(self.part_digests.len() * 16);
            for d in &self.part_digests {
                concatenated.extend_from_slice(d);
            }
            let composite = md5::compute(&concatenated);
            format!("{:x}-{}", composite, self.part_digests.len())
        }
    }
}

/// Enumerate candidate part sizes (multiples of 1 MiB) for an S3 multipart
/// ETag given the total object `size` and the part count `N` parsed from the
/// `-N` suffix. Mirrors `_s3_multipart_layouts` exactly.
pub fn s3_multipart_layouts(size: u64, number_of_parts: u32) -> Result<Vec<u64>> {
    if number_of_parts == 1 {
        return Ok(vec![size]);
    }
    let n = number_of_parts as u64;
    let min_part_size = ceil_div(size, n * MIB) * MIB;
    let max_part_size = (ceil_div(size, (n - 1) * MIB) - 1) * MIB;
    let layouts = if min_part_size == max_part_size {
        vec![min_part_size]
    } else {
        let steps = 1 + (max_part_size - min_part_size) / MIB;
        (0..steps).map(|i| min_part_size + i * MIB).collect()
    };
    if layouts.len() > 5 {
        return Err(Error::AmbiguousLayout { count: layouts.len() });
    }
    Ok(layouts)
}

fn ceil_div(a: u64, b: u64) -> u64 {
    (a + b - 1) / b
}

/// Parse the part count out of an S3 ETag's `-N` suffix (absent ⇒ 1 part).
pub fn part_count_from_s3_etag(etag: &str) -> u32 {
    match etag.rsplit_once('-') {
        Some((_, n)) => n.parse().unwrap_or(1),
        None => 1,
    }
}

/// S3 multipart ETag verifier: fans out over every plausible part-size
/// hypothesis and matches if any of them does.
pub struct S3MultiEtag {
    candidates: Vec<S3EtagCandidate>,
}

impl S3MultiEtag {
    pub fn new(size: u64, number_of_parts: u32) -> Result<Self> {
        let layouts = s3_multipart_layouts(size, number_of_parts)?;
        Ok(S3MultiEtag {
            candidates: layouts.into_iter().map(S3EtagCandidate::new).collect(),
        })
    }

    pub fn update(&mut self, data: &[u8]) {
        for candidate in &mut self.candidates {
            candidate.update(data);
        }
    }

    pub fn strdigests(self) -> Vec<String> {
        self.candidates.into_iter().map(|c| c.strdigest()).collect()
    }

    pub fn matches(self, expected: &str) -> bool {
        self.strdigests().iter().any(|d| d == expected)
    }
}

/// Accepts any digest. Used when no checksum is known and the caller opts in.
#[derive(Default)]
pub struct Null;

impl Null {
    pub fn update(&mut self, _data: &[u8]) {}
    pub fn matches(self, _expected: &str) -> bool {
        true
    }
}

/// Uniform streaming interface over every verifier variant, selected once at
/// construction time from either a manifest entry or response headers.
pub enum Verifier {
    Md5(Md5),
    GsCrc32c(GsCrc32c),
    S3Etag(Md5), // single-part S3 ETag is identical to MD5 hex
    S3MultiEtag(S3MultiEtag),
    Null(Null),
}

impl Verifier {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Verifier::Md5(v) => v.update(data),
            Verifier::GsCrc32c(v) => v.update(data),
            Verifier::S3Etag(v) => v.update(data),
            Verifier::S3MultiEtag(v) => v.update(data),
            Verifier::Null(v) => v.update(data),
        }
    }

    pub fn matches(self, expected: &str) -> bool {
        match self {
            Verifier::Md5(v) => v.matches(expected),
            Verifier::GsCrc32c(v) => v.matches(expected),
            Verifier::S3Etag(v) => v.matches(expected),
            Verifier::S3MultiEtag(v) => v.matches(expected),
            Verifier::Null(v) => v.matches(expected),
        }
    }

    /// Build a verifier for an S3 ETag header value, choosing single- or
    /// multi-part based on the presence of a `-N` suffix.
    pub fn for_s3_etag(etag: &str, size: u64) -> Result<Self> {
        let parts = part_count_from_s3_etag(etag);
        if parts == 1 {
            Ok(Verifier::S3Etag(Md5::new()))
        } else {
            Ok(Verifier::S3MultiEtag(S3MultiEtag::new(size, parts)?))
        }
    }
}
