//! Shared-secret auth token, persisted across restarts.
//!
//! The token is cached on disk so a browser session stays valid across
//! server restarts; it is regenerated once the file is older than the TTL.

use crate::error::PlayResult;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::debug;

/// Minimum plausible token length; anything shorter is regenerated.
const MIN_TOKEN_LEN: usize = 10;

/// Load the cached token if it is fresh, otherwise create and persist a new one.
///
/// A cached token is reused when the file's modification time is within
/// `ttl` and its contents are at least 10 characters long.
pub fn load_or_create(path: &Path, ttl: Duration) -> PlayResult<String> {
    if let Some(token) = load_fresh(path, ttl) {
        debug!(path = %path.display(), "restored auth token");
        return Ok(token);
    }

    let token = generate();
    std::fs::write(path, &token)?;
    debug!(path = %path.display(), "persisted new auth token");
    Ok(token)
}

fn load_fresh(path: &Path, ttl: Duration) -> Option<String> {
    let meta = std::fs::metadata(path).ok()?;
    let age = SystemTime::now()
        .duration_since(meta.modified().ok()?)
        .ok()?;
    if age >= ttl {
        return None;
    }

    let token = std::fs::read_to_string(path).ok()?.trim().to_string();
    if token.len() < MIN_TOKEN_LEN {
        return None;
    }
    Some(token)
}

/// Generate a fresh token: 16 random bytes, hex-encoded.
pub fn generate() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_32_hex_chars() {
        let token = generate();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn creates_and_reuses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth");

        let first = load_or_create(&path, Duration::from_secs(3600)).unwrap();
        assert_eq!(first.len(), 32);

        let second = load_or_create(&path, Duration::from_secs(3600)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn regenerates_expired() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth");

        let first = load_or_create(&path, Duration::from_secs(3600)).unwrap();
        // TTL of zero means the cached file is always stale.
        let second = load_or_create(&path, Duration::ZERO).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn rejects_short_cached_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth");
        std::fs::write(&path, "short").unwrap();

        let token = load_or_create(&path, Duration::from_secs(3600)).unwrap();
        assert_ne!(token, "short");
        assert_eq!(token.len(), 32);
    }

    #[test]
    fn trims_whitespace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth");
        std::fs::write(&path, "0123456789abcdef\n").unwrap();

        let token = load_or_create(&path, Duration::from_secs(3600)).unwrap();
        assert_eq!(token, "0123456789abcdef");
    }
}
