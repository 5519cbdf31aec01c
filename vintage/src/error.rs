//! Error types.

use std::fmt;
use std::io;

use crate::scrypt::MAX_WORK_FACTOR;

/// The various errors that can be returned during the encryption process.
#[derive(Debug)]
pub enum EncryptError {
    /// An I/O error occurred during encryption.
    Io(io::Error),
    /// The encryptor was not given any recipients.
    MissingRecipients,
    /// A passphrase recipient was mixed with other recipient types.
    ///
    /// A passphrase stanza must be the only stanza in a header, so a
    /// passphrase cannot share a file with public-key recipients.
    MixedRecipientAndPassphrase,
    /// The recipient's public key produced an all-zero shared secret.
    ///
    /// This happens only for low-order public keys, which no honest key
    /// generation can produce.
    LowOrderPoint,
    /// The requested scrypt work factor is outside the supported range.
    InvalidWorkFactor {
        /// The requested work factor.
        log_n: u8,
    },
}

impl From<io::Error> for EncryptError {
    fn from(e: io::Error) -> Self {
        EncryptError::Io(e)
    }
}

impl fmt::Display for EncryptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncryptError::Io(e) => e.fmt(f),
            EncryptError::MissingRecipients => write!(f, "Missing recipients"),
            EncryptError::MixedRecipientAndPassphrase => {
                write!(f, "Cannot encrypt to a passphrase and other recipients together")
            }
            EncryptError::LowOrderPoint => {
                write!(f, "Cannot encrypt to this recipient's public key")
            }
            EncryptError::InvalidWorkFactor { log_n } => {
                write!(
                    f,
                    "Passphrase work factor {} is outside the supported range 1..={}",
                    log_n, MAX_WORK_FACTOR
                )
            }
        }
    }
}

impl std::error::Error for EncryptError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EncryptError::Io(inner) => Some(inner),
            _ => None,
        }
    }
}

/// The various errors that can be returned during the decryption process.
#[derive(Debug)]
pub enum DecryptError {
    /// The file failed to decrypt.
    DecryptionFailed,
    /// The file used an excessive work factor for passphrase encryption.
    ExcessiveWork {
        /// The work factor the file demands.
        required: u8,
        /// The maximum work factor this decryption will perform.
        maximum: u8,
    },
    /// The header was invalid.
    InvalidHeader,
    /// The MAC in the header was invalid.
    InvalidMac,
    /// An I/O error occurred during decryption.
    Io(io::Error),
    /// None of the provided identities could unwrap any stanza.
    NoMatchingKeys,
    /// An unknown age format version, probably from a newer implementation.
    UnknownFormat,
}

impl fmt::Display for DecryptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecryptError::DecryptionFailed => write!(f, "Decryption failed"),
            DecryptError::ExcessiveWork { required, maximum } => write!(
                f,
                "Excessive work factor for passphrase: {} (maximum {})",
                required, maximum
            ),
            DecryptError::InvalidHeader => write!(f, "Header is invalid"),
            DecryptError::InvalidMac => write!(f, "Header MAC is invalid"),
            DecryptError::Io(e) => e.fmt(f),
            DecryptError::NoMatchingKeys => write!(f, "No matching keys found"),
            DecryptError::UnknownFormat => {
                write!(f, "Unknown format version; try upgrading to the latest release")
            }
        }
    }
}

impl From<chacha20poly1305::aead::Error> for DecryptError {
    fn from(_: chacha20poly1305::aead::Error) -> Self {
        DecryptError::DecryptionFailed
    }
}

impl From<io::Error> for DecryptError {
    fn from(e: io::Error) -> Self {
        DecryptError::Io(e)
    }
}

impl From<hmac::digest::MacError> for DecryptError {
    fn from(_: hmac::digest::MacError) -> Self {
        DecryptError::InvalidMac
    }
}

impl std::error::Error for DecryptError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DecryptError::Io(inner) => Some(inner),
            _ => None,
        }
    }
}
