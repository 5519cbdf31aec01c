use bech32::{FromBase32, Variant};

pub(crate) const LINE_ENDING: &str = "\n";

/// Decodes a Bech32 string, returning its human-readable part and data.
///
/// Only the original Bech32 checksum is accepted, not Bech32m.
pub(crate) fn parse_bech32(s: &str) -> Option<(String, Vec<u8>)> {
    bech32::decode(s).ok().and_then(|(hrp, data, variant)| {
        if let Variant::Bech32 = variant {
            Vec::from_base32(&data).ok().map(|d| (hrp, d))
        } else {
            None
        }
    })
}

pub(crate) mod read {
    use base64::{prelude::BASE64_STANDARD_NO_PAD, Engine};

    /// Decodes a fixed-size unpadded base64 stanza argument.
    ///
    /// Returns `None` unless the argument is exactly the canonical encoded
    /// length for `N` bytes and decodes canonically.
    pub(crate) fn base64_arg<A: AsRef<[u8]>, const N: usize>(arg: &A) -> Option<[u8; N]> {
        if arg.as_ref().len() != ((4 * N) + 2) / 3 {
            return None;
        }

        BASE64_STANDARD_NO_PAD
            .decode(arg.as_ref())
            .ok()?
            .try_into()
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::read::base64_arg;

    #[test]
    fn base64_arg_rejects_wrong_length() {
        assert!(base64_arg::<_, 32>(&"dGVzdA").is_none());
        assert_eq!(base64_arg::<_, 4>(&"dGVzdA"), Some(*b"test"));
    }

    #[test]
    fn base64_arg_rejects_padding() {
        assert_eq!(base64_arg::<_, 7>(&"dGVzdGluZw"), Some(*b"testing"));
        assert!(base64_arg::<_, 7>(&"dGVzdGluZw=").is_none());
    }
}
