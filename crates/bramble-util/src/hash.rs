/// Compute the BLAKE3 hash of a byte slice, returning the hex-encoded digest.
///
/// Used to fingerprint lockfile content so an install can short-circuit
/// when `node_modules` is already up to date.
#[must_use]
pub fn blake3_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blake3_bytes_known_digest() {
        let hash = blake3_bytes(b"hello world");
        assert_eq!(
            hash,
            "d74981efa70a0c880b8d8c1985d075dbcbf679b99a5f9914e5aaf96b831a9e24"
        );
    }

    #[test]
    fn test_blake3_bytes_differs() {
        assert_ne!(blake3_bytes(b"a"), blake3_bytes(b"b"));
    }
}
