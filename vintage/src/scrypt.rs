//! The "scrypt" passphrase-based recipient type, native to age.

use base64::{prelude::BASE64_STANDARD_NO_PAD, Engine};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use vintage_core::{
    format::{FileKey, Stanza, FILE_KEY_BYTES},
    primitives::{aead_decrypt, aead_encrypt},
};
use zeroize::Zeroize;

use crate::{
    error::{DecryptError, EncryptError},
    primitives::scrypt,
    util::read::base64_arg,
};

pub(crate) const SCRYPT_STANZA_TAG: &str = "scrypt";
const SCRYPT_SALT_LABEL: &[u8] = b"age-encryption.org/v1/scrypt";

/// The largest work factor accepted when unwrapping a passphrase stanza:
/// beyond 2^22 the derivation stops being interactive and starts being a
/// denial of service.
pub(crate) const MAX_WORK_FACTOR: u8 = 22;

const SALT_LEN: usize = 16;
const ENCRYPTED_FILE_KEY_BYTES: usize = FILE_KEY_BYTES + 16;

/// Roughly a second of work on current hardware, and the same cost the
/// reference implementation hard-codes.
const DEFAULT_WORK_FACTOR: u8 = 18;

fn passphrase_key(salt: &[u8; SALT_LEN], log_n: u8, passphrase: &SecretString) -> [u8; 32] {
    let mut inner_salt = [0; SCRYPT_SALT_LABEL.len() + SALT_LEN];
    inner_salt[..SCRYPT_SALT_LABEL.len()].copy_from_slice(SCRYPT_SALT_LABEL);
    inner_salt[SCRYPT_SALT_LABEL.len()..].copy_from_slice(salt);

    scrypt(&inner_salt, log_n, passphrase.expose_secret())
        .expect("work factor is within the supported range")
}

/// A passphrase-based recipient. Anyone with the passphrase can decrypt.
///
/// A passphrase stanza must be the only stanza in a header, so this
/// recipient cannot be combined with any other.
pub struct Recipient {
    passphrase: SecretString,
    log_n: u8,
}

impl Recipient {
    /// Constructs a recipient with the default work factor.
    ///
    /// This API should only be used with a passphrase that was provided by
    /// (or generated for) a human. For programmatic use cases, generate an
    /// [`x25519::Identity`] instead.
    ///
    /// [`x25519::Identity`]: crate::x25519::Identity
    pub fn new(passphrase: SecretString) -> Self {
        Recipient {
            passphrase,
            log_n: DEFAULT_WORK_FACTOR,
        }
    }

    /// Sets the work factor, as the base-2 logarithm of the scrypt cost
    /// parameter N. Valid values are 1 through 22 inclusive; wrapping fails
    /// outside that range.
    pub fn set_work_factor(&mut self, log_n: u8) {
        self.log_n = log_n;
    }
}

impl crate::Recipient for Recipient {
    fn wrap_file_key(&self, file_key: &FileKey) -> Result<Vec<Stanza>, EncryptError> {
        if self.log_n == 0 || self.log_n > MAX_WORK_FACTOR {
            return Err(EncryptError::InvalidWorkFactor { log_n: self.log_n });
        }

        let mut salt = [0; SALT_LEN];
        OsRng.fill_bytes(&mut salt);

        let mut enc_key = passphrase_key(&salt, self.log_n, &self.passphrase);
        let encrypted_file_key = aead_encrypt(&enc_key, file_key.expose_secret());
        enc_key.zeroize();

        Ok(vec![Stanza {
            tag: SCRYPT_STANZA_TAG.to_owned(),
            args: vec![
                BASE64_STANDARD_NO_PAD.encode(salt),
                format!("{}", self.log_n),
            ],
            body: encrypted_file_key,
        }])
    }
}

/// The identity corresponding to a [`Recipient`]: the same passphrase.
pub struct Identity<'a> {
    pub(crate) passphrase: &'a SecretString,
    pub(crate) max_work_factor: Option<u8>,
}

impl<'a> crate::Identity for Identity<'a> {
    fn unwrap_stanza(&self, stanza: &Stanza) -> Option<Result<FileKey, DecryptError>> {
        if stanza.tag != SCRYPT_STANZA_TAG {
            return None;
        }
        if stanza.args.len() != 2 || stanza.body.len() != ENCRYPTED_FILE_KEY_BYTES {
            return Some(Err(DecryptError::InvalidHeader));
        }

        let salt = match base64_arg::<_, SALT_LEN>(&stanza.args[0]) {
            Some(salt) => salt,
            None => return Some(Err(DecryptError::InvalidHeader)),
        };

        // The work factor must be a canonical decimal (digits only, no sign,
        // no leading zero; `u8::parse` alone would accept a leading `+`),
        // and is bounded before any scrypt work happens: too low means a
        // deliberately weak file, too high is a denial of service.
        let log_n_arg = &stanza.args[1];
        if !log_n_arg.bytes().all(|b| b.is_ascii_digit())
            || (log_n_arg.len() > 1 && log_n_arg.starts_with('0'))
        {
            return Some(Err(DecryptError::InvalidHeader));
        }
        let log_n = match log_n_arg.parse::<u8>() {
            Ok(log_n) if log_n > 0 => log_n,
            _ => return Some(Err(DecryptError::InvalidHeader)),
        };
        // scrypt itself cannot evaluate log_n >= 64, so even a permissive
        // caller override is capped below it.
        let maximum = self.max_work_factor.unwrap_or(MAX_WORK_FACTOR).min(63);
        if log_n > maximum {
            return Some(Err(DecryptError::ExcessiveWork {
                required: log_n,
                maximum,
            }));
        }

        let mut enc_key = passphrase_key(&salt, log_n, self.passphrase);
        let result = aead_decrypt(&enc_key, FILE_KEY_BYTES, &stanza.body)
            .map(|mut pt| {
                let file_key: [u8; FILE_KEY_BYTES] = pt[..].try_into().unwrap();
                pt.zeroize();
                file_key.into()
            })
            .map_err(DecryptError::from);
        enc_key.zeroize();

        Some(result)
    }
}
