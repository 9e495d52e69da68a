use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use peerdrop_protocol::{ChunkFrame, FileMeta};

use crate::TransferError;

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Where an outgoing file's bytes come from.
#[derive(Debug, Clone)]
pub enum FileSource {
    Path { path: PathBuf, meta: FileMeta },
    Memory { data: Bytes, meta: FileMeta },
}

impl FileSource {
    /// Stats `path` and guesses its MIME type from the extension.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, TransferError> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(TransferError::InvalidPath(format!(
                "not a regular file: {}",
                path.display()
            )));
        }
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| TransferError::InvalidPath(path.display().to_string()))?
            .to_string();
        let mime = mime_guess::from_path(&path).first_or_octet_stream();
        let meta = FileMeta::new(name, metadata.len(), mime.essence_str());
        Ok(FileSource::Path { path, meta })
    }

    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let name = name.into();
        let data = data.into();
        let mime = mime_guess::from_path(&name).first_or_octet_stream();
        let meta = FileMeta::new(name, data.len() as u64, mime.essence_str());
        FileSource::Memory { data, meta }
    }

    pub fn meta(&self) -> &FileMeta {
        match self {
            FileSource::Path { meta, .. } | FileSource::Memory { meta, .. } => meta,
        }
    }

    /// Opens the source for reading in `chunk_size` pieces.
    pub async fn open(&self, chunk_size: usize) -> Result<ChunkReader, TransferError> {
        let input = match self {
            FileSource::Path { path, .. } => Input::File(tokio::fs::File::open(path).await?),
            FileSource::Memory { data, .. } => Input::Memory(data.clone()),
        };
        Ok(ChunkReader {
            input,
            chunk_size: chunk_size.max(1),
            size: self.meta().size,
            offset: 0,
            next_index: 0,
        })
    }
}

enum Input {
    File(tokio::fs::File),
    Memory(Bytes),
}

/// Reads a source as consecutively indexed frames.
pub struct ChunkReader {
    input: Input,
    chunk_size: usize,
    size: u64,
    offset: u64,
    next_index: u32,
}

impl ChunkReader {
    /// Reads the next frame. Returns `None` once `size` bytes were read.
    pub async fn next_chunk(&mut self) -> Result<Option<ChunkFrame>, TransferError> {
        let remaining = self.size - self.offset;
        if remaining == 0 {
            return Ok(None);
        }
        let len = remaining.min(self.chunk_size as u64) as usize;

        let payload = match &mut self.input {
            Input::File(file) => {
                let mut buf = BytesMut::zeroed(len);
                file.read_exact(&mut buf).await?;
                buf.freeze()
            }
            Input::Memory(data) => {
                let start = self.offset as usize;
                data.slice(start..start + len)
            }
        };

        let index = self.next_index;
        self.next_index = self
            .next_index
            .checked_add(1)
            .ok_or(TransferError::TooManyChunks)?;
        self.offset += len as u64;
        Ok(Some(ChunkFrame::new(index, payload)))
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn remaining(&self) -> u64 {
        self.size - self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    #[test]
    fn checksum_bytes_deterministic() {
        let c1 = checksum_bytes(b"hello world");
        assert_eq!(c1, checksum_bytes(b"hello world"));
        assert_eq!(c1.len(), 64);
        assert_ne!(c1, checksum_bytes(b"hello"));
    }

    #[tokio::test]
    async fn file_source_guesses_mime() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "notes.txt", b"hello");
        let source = FileSource::from_path(&path).await.unwrap();
        assert_eq!(source.meta().name, "notes.txt");
        assert_eq!(source.meta().size, 5);
        assert_eq!(source.meta().mime_type, "text/plain");
    }

    #[tokio::test]
    async fn directory_is_not_a_source() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            FileSource::from_path(dir.path()).await,
            Err(TransferError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn reads_indexed_chunks_from_file() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"AABBCCDDEE");
        let source = FileSource::from_path(&path).await.unwrap();
        let mut reader = source.open(4).await.unwrap();

        let c0 = reader.next_chunk().await.unwrap().unwrap();
        assert_eq!((c0.index, &c0.payload[..]), (0, &b"AABB"[..]));
        let c1 = reader.next_chunk().await.unwrap().unwrap();
        assert_eq!((c1.index, &c1.payload[..]), (1, &b"CCDD"[..]));
        let c2 = reader.next_chunk().await.unwrap().unwrap();
        assert_eq!((c2.index, &c2.payload[..]), (2, &b"EE"[..]));
        assert_eq!(reader.remaining(), 0);
        assert!(reader.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn exact_multiple_has_no_trailing_empty_chunk() {
        let source = FileSource::from_bytes("x.bin", vec![7u8; 8]);
        let mut reader = source.open(4).await.unwrap();
        assert_eq!(reader.next_chunk().await.unwrap().unwrap().payload.len(), 4);
        assert_eq!(reader.next_chunk().await.unwrap().unwrap().payload.len(), 4);
        assert!(reader.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_source_yields_nothing() {
        let source = FileSource::from_bytes("empty.txt", Bytes::new());
        let mut reader = source.open(4).await.unwrap();
        assert!(reader.next_chunk().await.unwrap().is_none());
    }
}
