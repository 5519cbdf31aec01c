//! Common types and encoding primitives for the age file format.
//!
//! This crate holds the pieces of the [age format] that every recipient
//! implementation needs to agree on: the 16-byte file key, the recipient
//! stanza and its strict line-oriented codec, and the small set of
//! cryptographic operations (HKDF-SHA-256 and one-shot ChaCha20-Poly1305)
//! that the native recipient types are built from.
//!
//! Most users want the `vintage` crate instead; this crate exists so that
//! out-of-tree recipient families can speak the stanza format without
//! depending on the full encryption library.
//!
//! [age format]: https://age-encryption.org/v1

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_docs)]

pub mod format;
pub mod primitives;

pub use format::{FileKey, Stanza, FILE_KEY_BYTES};
