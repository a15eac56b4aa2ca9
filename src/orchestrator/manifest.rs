//! Manifest entries and validation. Ported from `getm/cli.py`'s
//! `_validate_manifest` and the JSON schema it checks against, exercised by
//! `examples/original_source/tests/test_cli.py::test_validate_manifest`.

use serde::Deserialize;

use crate::checksum::Algorithm;
use crate::error::{Error, Result};

/// One entry of a `--manifest` JSON array, or the single entry synthesized
/// from positional CLI args.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    pub url: String,
    pub filepath: Option<String>,
    pub checksum: Option<String>,
    #[serde(rename = "checksum-algorithm")]
    pub checksum_algorithm: Option<String>,
}

/// Parse and validate a manifest document. Every entry must name a `url`;
/// `checksum` and `checksum-algorithm` must be either both present or both
/// absent, and the algorithm name must be one `blobfetch` recognizes.
pub fn parse(document: &str) -> Result<Vec<ManifestEntry>> {
    let entries: Vec<ManifestEntry> = serde_json::from_str(document)
        .map_err(|e| Error::InvalidManifest(format!("malformed manifest JSON: {e}")))?;
    for entry in &entries {
        validate(entry)?;
    }
    Ok(entries)
}

pub fn validate(entry: &ManifestEntry) -> Result<()> {
    if entry.url.is_empty() {
        return Err(Error::InvalidManifest("entry is missing 'url'".to_string()));
    }
    match (&entry.checksum, &entry.checksum_algorithm) {
        (None, None) => Ok(()),
        (Some(_), Some(alg)) => alg.parse::<Algorithm>().map(|_| ()),
        _ => Err(Error::InvalidManifest(
            "'checksum' and 'checksum-algorithm' must be supplied together".to_string(),
        )),
    }
}
