//! Content hashing.

/// Hex-encoded BLAKE3 digest of `data`.
#[must_use]
pub fn blake3_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        assert_eq!(
            blake3_bytes(b"hello world"),
            "d74981efa70a0c880b8d8c1985d075dbcbf679b99a5f9914e5aaf96b831a9e24"
        );
    }

    #[test]
    fn test_digest_tracks_content() {
        let a = blake3_bytes(b"{\"lockfileVersion\": 2}\n");
        let b = blake3_bytes(b"{\"lockfileVersion\": 3}\n");
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
        assert_eq!(a, blake3_bytes(b"{\"lockfileVersion\": 2}\n"));
    }
}
