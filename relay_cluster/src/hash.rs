// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Hashing utilities used around handshake challenge computation

pub(crate) const DIGEST_BYTES: usize = 32;
pub(crate) type Digest = [u8; DIGEST_BYTES];

type HmacSha256 = hmac::Hmac<sha2::Sha256>;

/// Compute the digest of a challenge keyed by the shared cookie
pub(crate) fn challenge_digest(secret: &'_ str, challenge: u32) -> Digest {
    use hmac::Mac;

    // HMAC accepts keys of any length, so keying never fails
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return [0u8; DIGEST_BYTES],
    };
    mac.update(&challenge.to_be_bytes());
    mac.finalize().into_bytes().into()
}

/// Compare a received digest against the expected one without short-circuiting
pub(crate) fn digests_match(expected: &Digest, received: &[u8]) -> bool {
    if received.len() != DIGEST_BYTES {
        return false;
    }
    expected
        .iter()
        .zip(received.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_digest_generation() {
        let digest = challenge_digest("cookie", 42);
        assert_eq!(DIGEST_BYTES, digest.len());
        assert_eq!(
            digest,
            [
                22, 118, 211, 15, 245, 52, 29, 205, 92, 234, 12, 239, 207, 66, 244, 233, 70, 84,
                143, 62, 208, 108, 237, 90, 80, 150, 141, 172, 35, 18, 3, 190
            ]
        );
    }

    #[test]
    fn digests_compare_by_value() {
        let digest = challenge_digest("cookie", 7);
        assert!(digests_match(&digest, &digest));
        assert!(!digests_match(&digest, &challenge_digest("cookie", 8)));
        assert!(!digests_match(&digest, &challenge_digest("other", 7)));
        assert!(!digests_match(&digest, &digest[..16]));
    }
}
