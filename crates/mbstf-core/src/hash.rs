use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `bytes`, used as the session ETag.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        // SHA-256("") per FIPS 180-4 test vectors.
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn differs_on_differing_input() {
        assert_ne!(sha256_hex(b"a"), sha256_hex(b"b"));
    }
}
