//! Per-file and aggregate SHA-256 digests

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Digest of one uploaded file; lives only for the request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDigest {
    pub filename: String,
    pub sha256: String,
    pub bytes: u64,
}

/// Incremental hasher fed chunk by chunk as a file part streams in
#[derive(Default)]
pub struct FileHasher {
    hasher: Sha256,
    bytes: u64,
}

impl FileHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.bytes += chunk.len() as u64;
    }

    pub fn finish(self, filename: String) -> FileDigest {
        FileDigest {
            filename,
            sha256: hex::encode(self.hasher.finalize()),
            bytes: self.bytes,
        }
    }
}

/// Checksum reported for a request.
///
/// One file: its own digest, unchanged. Several: SHA-256 over
/// `"<filename>:<digest>\n"` for each file in encounter order.
/// Returns `None` for an empty batch.
pub fn request_checksum(files: &[FileDigest]) -> Option<String> {
    match files {
        [] => None,
        [single] => Some(single.sha256.clone()),
        many => {
            let mut aggregate = Sha256::new();
            for file in many {
                aggregate.update(file.filename.as_bytes());
                aggregate.update(b":");
                aggregate.update(file.sha256.as_bytes());
                aggregate.update(b"\n");
            }
            Some(hex::encode(aggregate.finalize()))
        }
    }
}

/// Total bytes across all files
pub fn total_bytes(files: &[FileDigest]) -> u64 {
    files.iter().map(|file| file.bytes).sum()
}
