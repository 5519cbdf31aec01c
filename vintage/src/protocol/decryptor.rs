//! Decryptors for age files.

use secrecy::SecretString;
use std::io::Read;

use super::Nonce;
use crate::{
    error::DecryptError,
    format::HeaderV1,
    keys::v1_payload_key,
    primitives::stream::{Stream, StreamReader},
    scrypt, Identity,
};

struct BaseDecryptor<R: Read> {
    /// The underlying reader, positioned at the start of the payload.
    input: R,
    header: HeaderV1,
    nonce: Nonce,
}

impl<R: Read> BaseDecryptor<R> {
    /// Runs `filter` over the header stanzas to recover the file key, then
    /// checks the header MAC against it before deriving the payload key.
    fn obtain_payload_key<F>(self, filter: F) -> Result<StreamReader<R>, DecryptError>
    where
        F: FnOnce(&HeaderV1) -> Result<vintage_core::format::FileKey, DecryptError>,
    {
        let file_key = filter(&self.header)?;
        let payload_key = v1_payload_key(&file_key, &self.header, &self.nonce)?;
        Ok(Stream::decrypt(payload_key, self.input))
    }
}

/// Decryptor for an age file encrypted to a list of recipients.
pub struct RecipientsDecryptor<R: Read>(BaseDecryptor<R>);

impl<R: Read> RecipientsDecryptor<R> {
    pub(super) fn new(input: R, header: HeaderV1, nonce: Nonce) -> Self {
        RecipientsDecryptor(BaseDecryptor {
            input,
            header,
            nonce,
        })
    }

    /// Attempts to decrypt the age file with the given identities.
    ///
    /// If successful, returns a reader that will provide the plaintext.
    pub fn decrypt<'a>(
        self,
        identities: impl Iterator<Item = &'a dyn Identity>,
    ) -> Result<StreamReader<R>, DecryptError> {
        self.0.obtain_payload_key(|header| {
            // Trial-unwrap every stanza with every identity. A concrete
            // failure from one identity does not stop the trial; it is
            // surfaced only if nothing unwraps, so the caller learns no more
            // than "these identities cannot open this file".
            let mut saved_err = None;
            for identity in identities {
                match identity.unwrap_stanzas(&header.stanzas) {
                    Some(Ok(file_key)) => return Ok(file_key),
                    Some(Err(e)) => saved_err = saved_err.or(Some(e)),
                    None => (),
                }
            }
            Err(saved_err.unwrap_or(DecryptError::NoMatchingKeys))
        })
    }
}

/// Decryptor for an age file encrypted with a passphrase.
pub struct PassphraseDecryptor<R: Read>(BaseDecryptor<R>);

impl<R: Read> PassphraseDecryptor<R> {
    pub(super) fn new(input: R, header: HeaderV1, nonce: Nonce) -> Self {
        PassphraseDecryptor(BaseDecryptor {
            input,
            header,
            nonce,
        })
    }

    /// Attempts to decrypt the age file with the given passphrase.
    ///
    /// `max_work_factor` overrides the default bound on the scrypt work
    /// factor this decryption is willing to perform.
    ///
    /// If successful, returns a reader that will provide the plaintext.
    pub fn decrypt(
        self,
        passphrase: &SecretString,
        max_work_factor: Option<u8>,
    ) -> Result<StreamReader<R>, DecryptError> {
        let identity = scrypt::Identity {
            passphrase,
            max_work_factor,
        };

        self.0.obtain_payload_key(|header| {
            identity
                .unwrap_stanzas(&header.stanzas)
                .unwrap_or(Err(DecryptError::NoMatchingKeys))
        })
    }
}
