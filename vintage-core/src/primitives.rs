//! Cryptographic building blocks for the native recipient types.

use chacha20poly1305::{
    aead::{self, Aead, KeyInit},
    ChaCha20Poly1305, Key,
};
use hkdf::Hkdf;
use sha2::Sha256;

/// Length of a ChaCha20-Poly1305 authentication tag.
const TAG_BYTES: usize = 16;

/// One-shot ChaCha20-Poly1305 encryption under a single-use key.
///
/// The nonce is all zeroes and there is no associated data. Every caller
/// derives `key` freshly (from an ephemeral ECDH share or a salted
/// passphrase), so the key itself provides the uniqueness that a nonce
/// normally would; reusing a key here is a caller bug.
pub fn aead_encrypt(key: &[u8; 32], plaintext: &[u8]) -> Vec<u8> {
    ChaCha20Poly1305::new(Key::from_slice(key))
        .encrypt(&[0; 12].into(), plaintext)
        .expect("a wrapped file key fits in one ChaCha20-Poly1305 message")
}

/// One-shot ChaCha20-Poly1305 decryption of a message whose plaintext
/// length is known up front.
///
/// Callers state the length they expect (`FILE_KEY_BYTES` for a wrapped
/// file key) and any other ciphertext size is rejected before the tag is
/// checked. Poly1305 does not commit to its key, so an attacker given room
/// to pad a ciphertext could craft one that opens under many candidate
/// keys; a 32-byte ciphertext leaves space for at most two, which is the
/// one-bit loss the format accepts.
pub fn aead_decrypt(key: &[u8; 32], size: usize, ciphertext: &[u8]) -> Result<Vec<u8>, aead::Error> {
    if ciphertext.len() != size + TAG_BYTES {
        return Err(aead::Error);
    }

    ChaCha20Poly1305::new(Key::from_slice(key)).decrypt(&[0; 12].into(), ciphertext)
}

/// HKDF-SHA-256, expanded to a 32-byte key for the given purpose.
///
/// Every key in the format is pulled out of the file key or an ECDH shared
/// secret through this function; `label` is what keeps the header MAC key,
/// the payload key, and each recipient's wrap key in separate domains.
pub fn hkdf(salt: &[u8], label: &[u8], ikm: &[u8]) -> [u8; 32] {
    let mut okm = [0; 32];
    Hkdf::<Sha256>::new(Some(salt), ikm)
        .expand(label, &mut okm)
        .expect("32 bytes is within the HKDF-SHA-256 output bound");
    okm
}

#[cfg(test)]
mod tests {
    use super::{aead_decrypt, aead_encrypt, hkdf};

    #[test]
    fn aead_round_trip() {
        let key = [14; 32];
        let plaintext = b"12345678";
        let encrypted = aead_encrypt(&key, plaintext);
        let decrypted = aead_decrypt(&key, plaintext.len(), &encrypted).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn aead_rejects_wrong_size() {
        let key = [14; 32];
        let encrypted = aead_encrypt(&key, b"12345678");
        assert!(aead_decrypt(&key, 7, &encrypted).is_err());
    }

    #[test]
    fn aead_rejects_tampering() {
        let key = [14; 32];
        let mut encrypted = aead_encrypt(&key, b"12345678");
        encrypted[3] ^= 0x40;
        assert!(aead_decrypt(&key, 8, &encrypted).is_err());
    }

    #[test]
    fn hkdf_rfc5869_test_case_1() {
        let ikm = [0x0b; 22];
        let salt: Vec<u8> = (0x00..=0x0c).collect();
        let info: Vec<u8> = (0xf0..=0xf9).collect();

        let expected = [
            0x3c, 0xb2, 0x5f, 0x25, 0xfa, 0xac, 0xd5, 0x7a, 0x90, 0x43, 0x4f, 0x64, 0xd0, 0x36,
            0x2f, 0x2a, 0x2d, 0x2d, 0x0a, 0x90, 0xcf, 0x1a, 0x5a, 0x4c, 0x5d, 0xb0, 0x2d, 0x56,
            0xec, 0xc4, 0xc5, 0xbf,
        ];
        assert_eq!(hkdf(&salt, &info, &ikm), expected);
    }
}
