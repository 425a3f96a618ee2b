use sha1::{Digest, Sha1};
use std::fs::File;
use std::io::Read;
use std::path::Path;

const READ_CHUNK_SIZE: usize = 16384;

/// SHA-1 of an in-memory buffer as lowercase hex
pub fn sha1_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn calculate_sha1(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha1::new();
    let mut buffer = [0u8; READ_CHUNK_SIZE];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Hash a file on the blocking pool so large jars don't stall the runtime
pub async fn calculate_sha1_async(path: &Path) -> std::io::Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || calculate_sha1(&path))
        .await
        .map_err(std::io::Error::other)?
}

/// Case-insensitive comparison of two hex digests
pub fn digest_matches(computed: &str, expected: &str) -> bool {
    computed.eq_ignore_ascii_case(expected)
}
