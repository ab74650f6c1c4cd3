/*++

Licensed under the Apache-2.0 license.

File Name:

   lib.rs

Abstract:

    Container serialization routines: the container bytes and their side files.

--*/
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;

/// Container Writer
pub struct ContainerWriter<W: Write> {
    writer: W,
}

impl<W: Write> ContainerWriter<W> {
    /// Create an instance of `ContainerWriter`
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write a finished container
    pub fn write(&mut self, container: &[u8]) -> anyhow::Result<()> {
        self.writer.write_all(container)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Output file with its complete contents
#[derive(Debug, Clone)]
pub struct Artifact {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
}

impl Artifact {
    pub fn new(path: impl Into<PathBuf>, bytes: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            bytes,
        }
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(path)
        .with_context(|| format!("Failed to create file {}", path.display()))?;
    ContainerWriter::new(file)
        .write(bytes)
        .with_context(|| format!("Failed to write file {}", path.display()))
}

/// Persist every artifact of a run
///
/// Parent directories are created before any file is opened.
pub fn write_artifacts(artifacts: &[Artifact]) -> anyhow::Result<()> {
    for artifact in artifacts {
        if let Some(parent) = artifact.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create directory {}", parent.display())
                })?;
            }
        }
    }
    for artifact in artifacts {
        write_file(&artifact.path, &artifact.bytes)?;
        log::info!(
            "Wrote {} ({} bytes)",
            artifact.path.display(),
            artifact.bytes.len()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_artifacts_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let container = dir.path().join("out/image.sb");
        let hash = dir.path().join("out/hash.bin");
        std::fs::create_dir_all(dir.path().join("out")).unwrap();
        std::fs::write(&container, vec![0xff; 100]).unwrap();

        write_artifacts(&[
            Artifact::new(&container, vec![1, 2, 3]),
            Artifact::new(&hash, vec![4; 32]),
        ])
        .unwrap();
        assert_eq!(std::fs::read(&container).unwrap(), vec![1, 2, 3]);
        assert_eq!(std::fs::read(&hash).unwrap(), vec![4; 32]);
    }
}
