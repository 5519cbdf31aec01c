//! The "X25519" recipient type, native to age.

use base64::{prelude::BASE64_STANDARD_NO_PAD, Engine};
use bech32::{ToBase32, Variant};
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use vintage_core::{
    format::{FileKey, Stanza, FILE_KEY_BYTES},
    primitives::{aead_decrypt, aead_encrypt, hkdf},
};
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::{
    error::{DecryptError, EncryptError},
    util::{parse_bech32, read::base64_arg},
};

// Bech32 HRPs are lower-case on the wire; the identity encoding is
// upper-cased for display.
const SECRET_KEY_PREFIX: &str = "age-secret-key-";
const PUBLIC_KEY_PREFIX: &str = "age";

pub(crate) const X25519_STANZA_TAG: &str = "X25519";
const X25519_KEY_LABEL: &[u8] = b"age-encryption.org/v1/X25519";

const EPK_BYTES: usize = 32;
const ENCRYPTED_FILE_KEY_BYTES: usize = FILE_KEY_BYTES + 16;

/// Derives the file-key wrapping key from the shared secret and both public
/// shares. The salt binds the ephemeral and recipient keys to the wrap.
fn wrap_key(shared_secret: &x25519_dalek::SharedSecret, epk: &PublicKey, pk: &PublicKey) -> [u8; 32] {
    let mut salt = [0; EPK_BYTES * 2];
    salt[..EPK_BYTES].copy_from_slice(epk.as_bytes());
    salt[EPK_BYTES..].copy_from_slice(pk.as_bytes());

    hkdf(&salt, X25519_KEY_LABEL, shared_secret.as_bytes())
}

/// The standard age identity type, which can decrypt files encrypted to the
/// corresponding [`Recipient`].
#[derive(Clone)]
pub struct Identity(StaticSecret);

impl std::str::FromStr for Identity {
    type Err = &'static str;

    /// Parses an X25519 identity from its Bech32 encoding.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_bech32(s)
            .ok_or("invalid Bech32 encoding")
            .and_then(|(hrp, bytes)| {
                if hrp != SECRET_KEY_PREFIX {
                    return Err("incorrect HRP");
                }
                TryInto::<[u8; 32]>::try_into(&bytes[..])
                    .map_err(|_| "incorrect identity length")
                    .map(StaticSecret::from)
                    .map(Identity)
            })
    }
}

impl Identity {
    /// Generates a new identity.
    pub fn generate() -> Self {
        Identity(StaticSecret::random_from_rng(OsRng))
    }

    /// Serializes this identity as an uppercase Bech32 string.
    pub fn to_string(&self) -> SecretString {
        let mut sk_bytes = self.0.to_bytes();
        let mut encoded = bech32::encode(SECRET_KEY_PREFIX, sk_bytes.to_base32(), Variant::Bech32)
            .expect("HRP is valid");
        let ret = SecretString::new(encoded.to_uppercase());

        // Clear intermediates.
        sk_bytes.zeroize();
        encoded.zeroize();

        ret
    }

    /// Returns the recipient key for this identity.
    pub fn to_public(&self) -> Recipient {
        Recipient((&self.0).into())
    }
}

impl crate::Identity for Identity {
    fn unwrap_stanza(&self, stanza: &Stanza) -> Option<Result<FileKey, DecryptError>> {
        if stanza.tag != X25519_STANZA_TAG {
            return None;
        }
        if stanza.args.len() != 1 || stanza.body.len() != ENCRYPTED_FILE_KEY_BYTES {
            return Some(Err(DecryptError::InvalidHeader));
        }

        let epk: PublicKey = match base64_arg::<_, EPK_BYTES>(&stanza.args[0]) {
            Some(epk) => epk.into(),
            None => return Some(Err(DecryptError::InvalidHeader)),
        };

        let pk: PublicKey = (&self.0).into();
        let shared_secret = self.0.diffie_hellman(&epk);
        if !shared_secret.was_contributory() {
            // The ephemeral share is a low-order point; no honest encryptor
            // produces these.
            return Some(Err(DecryptError::DecryptionFailed));
        }

        let enc_key = wrap_key(&shared_secret, &epk, &pk);

        // A decryption failure is "not ours", not an error: the stanza gives
        // us no way to tell which X25519 identity it was wrapped to, so the
        // caller must be free to try the remaining stanzas and identities.
        aead_decrypt(&enc_key, FILE_KEY_BYTES, &stanza.body)
            .ok()
            .map(|mut pt| {
                let file_key: [u8; FILE_KEY_BYTES] = pt[..].try_into().unwrap();
                pt.zeroize();
                Ok(file_key.into())
            })
    }
}

/// The standard age recipient type. Files encrypted to this recipient can be
/// decrypted with the corresponding [`Identity`].
///
/// This recipient type is anonymous: the encrypted file does not reveal
/// which recipient it is encrypted to.
#[derive(Clone)]
pub struct Recipient(PublicKey);

impl std::str::FromStr for Recipient {
    type Err = &'static str;

    /// Parses a recipient from its Bech32 encoding.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_bech32(s)
            .ok_or("invalid Bech32 encoding")
            .and_then(|(hrp, bytes)| {
                if hrp != PUBLIC_KEY_PREFIX {
                    return Err("incorrect HRP");
                }
                TryInto::<[u8; 32]>::try_into(&bytes[..])
                    .map_err(|_| "incorrect pubkey length")
                    .map(PublicKey::from)
                    .map(Recipient)
            })
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            bech32::encode(PUBLIC_KEY_PREFIX, self.0.as_bytes().to_base32(), Variant::Bech32)
                .expect("HRP is valid")
        )
    }
}

impl crate::Recipient for Recipient {
    fn wrap_file_key(&self, file_key: &FileKey) -> Result<Vec<Stanza>, EncryptError> {
        let esk = EphemeralSecret::random_from_rng(OsRng);
        let epk: PublicKey = (&esk).into();

        let shared_secret = esk.diffie_hellman(&self.0);
        if !shared_secret.was_contributory() {
            return Err(EncryptError::LowOrderPoint);
        }

        let enc_key = wrap_key(&shared_secret, &epk, &self.0);
        let encrypted_file_key = aead_encrypt(&enc_key, file_key.expose_secret());

        Ok(vec![Stanza {
            tag: X25519_STANZA_TAG.to_owned(),
            args: vec![BASE64_STANDARD_NO_PAD.encode(epk.as_bytes())],
            body: encrypted_file_key,
        }])
    }
}
