//! Write-to-temp-then-link target files, so a crash or checksum failure
//! midway through a download never leaves a partial file at the requested
//! path. Ported from `indirect_open` in `examples/original_source/getm/utils.py`.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::Result;

/// A handle to a temporary file that is hard-linked into place on
/// [`commit`](IndirectFile::commit) and removed unlinked on drop otherwise.
pub struct IndirectFile {
    filepath: PathBuf,
    tmp: PathBuf,
    file: Option<File>,
}

impl IndirectFile {
    pub fn create(filepath: impl AsRef<Path>) -> Result<Self> {
        let filepath = filepath.as_ref().to_path_buf();
        let dir = filepath.parent().unwrap_or_else(|| Path::new("."));
        let tmp = dir.join(format!(".blobfetch-{}", Uuid::new_v4()));
        let file = File::create(&tmp)?;
        Ok(IndirectFile {
            filepath,
            tmp,
            file: Some(file),
        })
    }

    pub fn handle(&mut self) -> &mut File {
        self.file.as_mut().expect("IndirectFile already committed")
    }

    /// Close the temp file, replace any existing target, and link the temp
    /// file into place. The temp file's directory entry is removed after the
    /// link is made, leaving only `filepath` pointing at the data.
    pub fn commit(mut self) -> Result<()> {
        self.file.take();
        if self.filepath.is_file() {
            fs::remove_file(&self.filepath)?;
        }
        fs::hard_link(&self.tmp, &self.filepath)?;
        fs::remove_file(&self.tmp)?;
        Ok(())
    }
}

impl Drop for IndirectFile {
    fn drop(&mut self) {
        if self.file.is_some() {
            let _ = fs::remove_file(&self.tmp);
        }
    }
}
