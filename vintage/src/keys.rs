//! Key derivation from the file key.

use secrecy::{ExposeSecret, Secret};
use vintage_core::{format::FileKey, primitives::hkdf};

use crate::{
    error::DecryptError,
    format::HeaderV1,
    primitives::{stream::PayloadKey, HmacKey},
    protocol::Nonce,
};

const HEADER_KEY_LABEL: &[u8] = b"header";
const PAYLOAD_KEY_LABEL: &[u8] = b"payload";

/// Derives the header MAC key: `HKDF["", "header"](file_key)`.
pub(crate) fn mac_key(file_key: &FileKey) -> HmacKey {
    HmacKey(Secret::new(hkdf(
        &[],
        HEADER_KEY_LABEL,
        file_key.expose_secret(),
    )))
}

/// Derives the payload key for a v1 file: `HKDF[nonce, "payload"](file_key)`.
///
/// The header MAC is verified first, so a payload key is never derived from
/// a file key that does not match the header.
pub(crate) fn v1_payload_key(
    file_key: &FileKey,
    header: &HeaderV1,
    nonce: &Nonce,
) -> Result<PayloadKey, DecryptError> {
    header.verify_mac(mac_key(file_key))?;

    Ok(PayloadKey(Secret::new(hkdf(
        nonce.as_ref(),
        PAYLOAD_KEY_LABEL,
        file_key.expose_secret(),
    ))))
}
