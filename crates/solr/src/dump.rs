//! Batch dump files for offline runs.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use tracing::info;

/// Appends update bodies to `<prefix>-<N>.json`.
///
/// The file number is the smallest unused one; `create_new` gives exclusive
/// allocation, so concurrent runs with the same prefix land in separate files.
#[derive(Debug)]
pub struct DumpWriter {
  path: PathBuf,
  file: std::fs::File,
}

impl DumpWriter {
  pub fn allocate(prefix: &str) -> std::io::Result<Self> {
    for n in 1.. {
      let path = PathBuf::from(format!("{prefix}-{n}.json"));
      match OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(file) => {
          info!(path = %path.display(), "Dumping update batches to file");
          return Ok(Self { path, file });
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
        Err(e) => return Err(e),
      }
    }
    unreachable!("file numbers are unbounded")
  }

  pub fn append(&mut self, body: &str) -> std::io::Result<()> {
    self.file.write_all(body.as_bytes())?;
    self.file.write_all(b"\n")
  }

  pub fn path(&self) -> &std::path::Path {
    &self.path
  }
}
