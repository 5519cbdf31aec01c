//! *Library for encrypting and decrypting age files*
//!
//! This crate implements file encryption according to the [age-encryption.org/v1]
//! specification. It generates and consumes encrypted files that are
//! compatible with other implementations of the format.
//!
//! The encryption and decryption APIs are provided by [`Encryptor`] and
//! [`Decryptor`]:
//! - For most cases (including programmatic usage), use
//!   [`Encryptor::with_recipients`] with [`x25519::Recipient`], and
//!   [`Decryptor`] with [`x25519::Identity`].
//! - APIs are available for passphrase-based encryption and decryption.
//!   These should only be used with passphrases that were provided by (or
//!   generated for) a human.
//!
//! Age-encrypted files are binary and non-malleable. To encode them as text,
//! use the wrapping readers and writers in the [`armor`] module.
//!
//! [age-encryption.org/v1]: https://age-encryption.org/v1
//!
//! # Examples
//!
//! ## Recipient-based encryption
//!
//! ```
//! use std::io::{Read, Write};
//! use std::iter;
//!
//! # fn run_main() -> Result<(), Box<dyn std::error::Error>> {
//! let key = vintage::x25519::Identity::generate();
//! let pubkey = key.to_public();
//!
//! let plaintext = b"Hello world!";
//!
//! // Encrypt the plaintext to a ciphertext...
//! let encrypted = {
//!     let encryptor = vintage::Encryptor::with_recipients(vec![Box::new(pubkey)])?;
//!
//!     let mut encrypted = vec![];
//!     let mut writer = encryptor.wrap_output(&mut encrypted)?;
//!     writer.write_all(plaintext)?;
//!     writer.finish()?;
//!
//!     encrypted
//! };
//!
//! // ... and decrypt the obtained ciphertext to the plaintext again.
//! let decrypted = {
//!     let decryptor = match vintage::Decryptor::new(&encrypted[..])? {
//!         vintage::Decryptor::Recipients(d) => d,
//!         _ => unreachable!(),
//!     };
//!
//!     let mut decrypted = vec![];
//!     let mut reader = decryptor.decrypt(
//!         iter::once(&key as &dyn vintage::Identity))?;
//!     reader.read_to_end(&mut decrypted)?;
//!
//!     decrypted
//! };
//!
//! assert_eq!(decrypted, plaintext);
//! # Ok(())
//! # }
//! # run_main().unwrap();
//! ```
//!
//! ## Passphrase-based encryption
//!
//! ```
//! use secrecy::SecretString;
//! use std::io::{Read, Write};
//!
//! # fn run_main() -> Result<(), Box<dyn std::error::Error>> {
//! let plaintext = b"Hello world!";
//! let passphrase = "this is not a good passphrase";
//!
//! // Encrypt the plaintext to a ciphertext using the passphrase...
//! let encrypted = {
//!     let encryptor =
//!         vintage::Encryptor::with_user_passphrase(SecretString::new(passphrase.to_owned()));
//!
//!     let mut encrypted = vec![];
//!     let mut writer = encryptor.wrap_output(&mut encrypted)?;
//!     writer.write_all(plaintext)?;
//!     writer.finish()?;
//!
//!     encrypted
//! };
//!
//! // ... and decrypt the ciphertext to the plaintext again using the same
//! // passphrase.
//! let decrypted = {
//!     let decryptor = match vintage::Decryptor::new(&encrypted[..])? {
//!         vintage::Decryptor::Passphrase(d) => d,
//!         _ => unreachable!(),
//!     };
//!
//!     let mut decrypted = vec![];
//!     let mut reader = decryptor.decrypt(
//!         &SecretString::new(passphrase.to_owned()), None)?;
//!     reader.read_to_end(&mut decrypted)?;
//!
//!     decrypted
//! };
//!
//! assert_eq!(decrypted, plaintext);
//! # Ok(())
//! # }
//! # run_main().unwrap();
//! ```

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_docs)]

mod error;
mod format;
mod identity;
mod keys;
mod primitives;
mod protocol;
pub mod scrypt;
mod util;
pub mod x25519;

pub use error::{DecryptError, EncryptError};
pub use identity::IdentityFile;
pub use primitives::armor;
pub use primitives::stream::{StreamReader, StreamWriter};
pub use protocol::{decryptor, Decryptor, Encryptor};
pub use vintage_core::format::{FileKey, Stanza};

/// A private key or other value that can unwrap an opaque file key from a
/// recipient stanza.
///
/// Implementations of this trait are the join point for new recipient types:
/// the decryption machinery only ever talks to this interface.
pub trait Identity {
    /// Attempts to unwrap the given stanza with this identity.
    ///
    /// You should not need to call this directly; instead, pass identities
    /// to [`RecipientsDecryptor::decrypt`].
    ///
    /// Returns:
    /// - `Some(Ok(file_key))` on success.
    /// - `Some(Err(e))` if the stanza matched this identity but was
    ///   cryptographically or structurally invalid.
    /// - `None` if the stanza does not match this identity.
    ///
    /// [`RecipientsDecryptor::decrypt`]: decryptor::RecipientsDecryptor::decrypt
    fn unwrap_stanza(&self, stanza: &Stanza) -> Option<Result<FileKey, DecryptError>>;

    /// Attempts to unwrap any of the given stanzas.
    ///
    /// The whole header is presented at once so that recipient types which
    /// spread their wrapping across several stanzas can aggregate them.
    ///
    /// Returns:
    /// - `Some(Ok(file_key))` on success.
    /// - `Some(Err(e))` if a stanza matched this identity but did not
    ///   unwrap, and no other stanza succeeded.
    /// - `None` if none of the stanzas match this identity.
    fn unwrap_stanzas(&self, stanzas: &[Stanza]) -> Option<Result<FileKey, DecryptError>> {
        let mut saved_err = None;
        for stanza in stanzas {
            match self.unwrap_stanza(stanza) {
                Some(Ok(file_key)) => return Some(Ok(file_key)),
                Some(Err(e)) => saved_err = saved_err.or(Some(e)),
                None => (),
            }
        }
        saved_err.map(Err)
    }
}

/// A public key or other value that can wrap an opaque file key into one or
/// more recipient stanzas.
///
/// Implementations of this trait are the join point for new recipient types:
/// the encryption machinery only ever talks to this interface.
pub trait Recipient {
    /// Wraps the given file key, returning stanzas to be placed in an age
    /// file header.
    ///
    /// You should not need to call this directly; instead, pass recipients
    /// to [`Encryptor::with_recipients`].
    fn wrap_file_key(&self, file_key: &FileKey) -> Result<Vec<Stanza>, EncryptError>;
}
