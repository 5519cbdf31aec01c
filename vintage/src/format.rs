//! The age header format.

use std::io::{self, Read, Write};

use vintage_core::format::Stanza;

use crate::{
    error::DecryptError,
    primitives::{HmacKey, HmacWriter},
};

const AGE_MAGIC: &[u8] = b"age-encryption.org/";
const V1_MAGIC: &[u8] = b"v1";
const MAC_TAG: &[u8] = b"---";

/// The incremental header reader refuses to buffer more than this.
const MAX_HEADER_BYTES: usize = 64 * 1024;

/// A v1 header holds at least one and at most this many stanzas.
const MAX_HEADER_STANZAS: usize = 64;

/// An age file header: the version line, the recipient stanzas, and the MAC.
pub(crate) enum Header {
    V1(HeaderV1),
    /// A version we don't know. Not a parse failure; callers surface it as
    /// an unsupported-version error.
    Unknown(String),
}

/// The v1 header.
///
/// `encoded` is the exact serialized bytes from the start of the version
/// line through the `---` MAC tag. The MAC is always computed over these
/// bytes: on the encrypt side they are the bytes that will be written out,
/// and on the decrypt side the bytes that were consumed from the input, so
/// the MAC never depends on re-serialization.
pub(crate) struct HeaderV1 {
    pub(crate) stanzas: Vec<Stanza>,
    pub(crate) mac: [u8; 32],
    encoded: Vec<u8>,
}

impl HeaderV1 {
    /// Assembles and MACs a header for the given stanzas.
    pub(crate) fn new(stanzas: Vec<Stanza>, mac_key: HmacKey) -> Self {
        let encoded = write::header_v1_minus_mac(&stanzas);

        let mut mac = [0; 32];
        let mut hmac = HmacWriter::new(mac_key);
        hmac.write_all(&encoded).expect("HMAC writer is infallible");
        mac.copy_from_slice(&hmac.finalize().into_bytes());

        HeaderV1 {
            stanzas,
            mac,
            encoded,
        }
    }

    /// Verifies the MAC against the exact bytes this header was parsed from
    /// (or serialized to), in constant time.
    pub(crate) fn verify_mac(&self, mac_key: HmacKey) -> Result<(), hmac::digest::MacError> {
        let mut hmac = HmacWriter::new(mac_key);
        hmac.write_all(&self.encoded)
            .expect("HMAC writer is infallible");
        hmac.verify(&self.mac)
    }

    pub(crate) fn any_scrypt(&self) -> bool {
        self.stanzas
            .iter()
            .any(|stanza| stanza.tag == crate::scrypt::SCRYPT_STANZA_TAG)
    }
}

impl Header {
    /// Reads a header from the start of an age file.
    ///
    /// The input is buffered incrementally: the buffer grows only by what
    /// the parser declares it is missing, and never beyond the header size
    /// limit.
    pub(crate) fn read<R: Read>(mut input: R) -> Result<Self, DecryptError> {
        let mut data = vec![];
        loop {
            match read::header(&data) {
                Ok((remainder, header)) => {
                    break Ok(match header {
                        read::ParsedHeader::V1 { stanzas, mac } => {
                            // Everything consumed before the ` <mac>\n`
                            // suffix is the MAC input.
                            let consumed = data.len() - remainder.len();
                            let encoded = data[..consumed - 45].to_vec();
                            debug_assert!(encoded.ends_with(MAC_TAG));
                            Header::V1(HeaderV1 {
                                stanzas,
                                mac,
                                encoded,
                            })
                        }
                        read::ParsedHeader::Unknown(version) => Header::Unknown(version),
                    });
                }
                Err(nom::Err::Incomplete(needed)) => {
                    let n = match needed {
                        nom::Needed::Size(n) => n.get(),
                        nom::Needed::Unknown => 1,
                    };
                    let m = data.len();
                    if m + n > MAX_HEADER_BYTES {
                        break Err(DecryptError::InvalidHeader);
                    }
                    data.resize(m + n, 0);
                    input.read_exact(&mut data[m..m + n])?;
                }
                Err(_) => break Err(DecryptError::InvalidHeader),
            }
        }
    }

    /// Writes the header, byte-identical to what was parsed or MACed.
    pub(crate) fn write<W: Write>(&self, mut output: W) -> io::Result<()> {
        match self {
            Header::V1(header) => {
                use base64::{prelude::BASE64_STANDARD_NO_PAD, Engine};

                output.write_all(&header.encoded)?;
                output.write_all(b" ")?;
                output.write_all(BASE64_STANDARD_NO_PAD.encode(header.mac).as_bytes())?;
                output.write_all(b"\n")
            }
            Header::Unknown(_) => panic!("cannot write a header of unknown version"),
        }
    }
}

mod read {
    use nom::{
        branch::alt,
        bytes::streaming::{tag, take},
        character::streaming::newline,
        combinator::{map, map_opt, verify},
        multi::many1,
        sequence::{pair, preceded, terminated},
        IResult,
    };
    use vintage_core::format::{read::arbitrary_string, Stanza};

    use super::{AGE_MAGIC, MAC_TAG, MAX_HEADER_STANZAS, V1_MAGIC};
    use crate::util::read::base64_arg;

    pub(super) enum ParsedHeader {
        V1 { stanzas: Vec<Stanza>, mac: [u8; 32] },
        Unknown(String),
    }

    fn stanza(input: &[u8]) -> IResult<&[u8], Stanza> {
        map(vintage_core::format::read::stanza, Stanza::from)(input)
    }

    fn header_v1(input: &[u8]) -> IResult<&[u8], ParsedHeader> {
        preceded(
            pair(tag(V1_MAGIC), newline),
            map(
                pair(
                    verify(many1(stanza), |stanzas: &Vec<Stanza>| {
                        stanzas.len() <= MAX_HEADER_STANZAS
                    }),
                    preceded(
                        pair(tag(MAC_TAG), tag(b" ")),
                        terminated(
                            map_opt(take(43usize), |mac| base64_arg::<_, 32>(&mac)),
                            newline,
                        ),
                    ),
                ),
                |(stanzas, mac)| ParsedHeader::V1 { stanzas, mac },
            ),
        )(input)
    }

    /// The first header line is `age-encryption.org/` followed by a version
    /// string; everything after that line is version-specific.
    pub(super) fn header(input: &[u8]) -> IResult<&[u8], ParsedHeader> {
        preceded(
            tag(AGE_MAGIC),
            alt((
                header_v1,
                // A malformed v1 header is a parse failure, not a file from
                // the future.
                map_opt(terminated(arbitrary_string, newline), |version| {
                    if version == "v1" {
                        None
                    } else {
                        Some(ParsedHeader::Unknown(version.to_string()))
                    }
                }),
            )),
        )(input)
    }
}

mod write {
    use cookie_factory::{combinator::slice, combinator::string, multi::all, sequence::tuple};
    use vintage_core::format::{write::stanza, Stanza};

    use super::{AGE_MAGIC, MAC_TAG, V1_MAGIC};

    /// Serializes the MAC input: version line, stanzas, and the `---` tag.
    pub(super) fn header_v1_minus_mac(stanzas: &[Stanza]) -> Vec<u8> {
        cookie_factory::gen_simple(
            tuple((
                slice(AGE_MAGIC),
                slice(V1_MAGIC),
                string("\n"),
                all(stanzas
                    .iter()
                    .map(|s| stanza(&s.tag, &s.args, &s.body))),
                slice(MAC_TAG),
            )),
            vec![],
        )
        .expect("can serialize into a Vec")
    }
}

#[cfg(test)]
mod tests {
    use secrecy::Secret;
    use vintage_core::format::Stanza;

    use super::{Header, HeaderV1};
    use crate::primitives::HmacKey;

    const TEST_HEADER: &str = "age-encryption.org/v1
-> X25519 CJM36AHmTbdHSuOQL+NESqyVQE75f2e610iRdLPEN20
C3ZAeY64NXS4QFrksLm3EGz+uPRyI0eQsWw7LWbbYig
-> X25519 ytazqsbmUnPwVWMVx0c1X9iUtGdY4yAB08UQTY2hNCI
N3pgrXkbIn/RrVt0T0G3sQr1wGWuclqKxTSWHSqGdkc
-> scrypt bBjlhJVYZeE4aqUdmtRHfw 15
ZV/AhotwSGqaPCU43cepl4WYUouAa17a3xpu4G2yi5k
-> ssh-rsa mhir0Q
xD7o4VEOu1t7KZQ1gDgq2FPzBEeSRqbnqvQEXdLRYy143BxR6oFxsUUJCRB0ErXA
mgmZq7tIm5ZyY89OmqZztOgG2tEB1TZvX3Q8oXESBuFjBBQkKaMLkaqh5GjcGRrZ
e5MmTXRdEyNPRl8qpystNZR1q2rEDUHSEJInVLW8OtvQRG8P303VpjnOUU53FSBw
yXxDtzxKxeloceFubn/HWGcR0mHU+1e9l39myQEUZjIoqFIELXvh9o6RUgYzaAI+
m/uPLMQdlIkiOOdbsrE6tFesRLZNHAYspeRKI9MJ++Xg9i7rutU34ZM+1BL6KgZf
J9FSm+GFHiVWpr1MfYCo/w
-> ssh-ed25519 BjH7FA RO+wV4kbbl4NtSmp56lQcfRdRp3dEFpdQmWkaoiw6lY
51eEu5Oo2JYAG7OU4oamH03FDRP18/GnzeCrY7Z+sa8
-> some-other-recipient mhir0Q BjH7FA 37
m/uPLMQdlIkiOOdbsrE6tFesRLZNHAYspeRKI9MJ++Xg9i7rutU34ZM+1BL6KgZf
J9FSm+GFHiVWpr1MfYCo/w
--- fgMiVLJHMlg9fW7CVG/hPS5EAU4Zeg19LyCP7SoH5nA
";

    #[test]
    fn parse_and_reserialize() {
        let header = Header::read(TEST_HEADER.as_bytes()).unwrap();
        match &header {
            Header::V1(v1) => {
                assert_eq!(v1.stanzas.len(), 6);
                assert_eq!(v1.stanzas[0].tag, "X25519");
                assert_eq!(v1.stanzas[5].tag, "some-other-recipient");
                assert_eq!(v1.stanzas[5].args, &["mhir0Q", "BjH7FA", "37"]);
            }
            Header::Unknown(_) => panic!("expected v1 header"),
        }

        let mut data = vec![];
        header.write(&mut data).unwrap();
        assert_eq!(std::str::from_utf8(&data), Ok(TEST_HEADER));
    }

    #[test]
    fn stanza_order_is_preserved() {
        let stanzas = vec![
            Stanza {
                tag: "first".to_string(),
                args: vec!["one".to_string()],
                body: vec![1; 32],
            },
            Stanza {
                tag: "second".to_string(),
                args: vec!["two".to_string()],
                body: vec![2; 32],
            },
        ];
        let header = HeaderV1::new(stanzas, HmacKey(Secret::new([9; 32])));

        let mut data = vec![];
        Header::V1(header).write(&mut data).unwrap();

        let parsed = match Header::read(&data[..]).unwrap() {
            Header::V1(v1) => v1,
            Header::Unknown(_) => panic!("expected v1 header"),
        };
        assert_eq!(
            parsed.stanzas.iter().map(|s| s.tag.as_str()).collect::<Vec<_>>(),
            &["first", "second"]
        );
        assert!(parsed.verify_mac(HmacKey(Secret::new([9; 32]))).is_ok());
        assert!(parsed.verify_mac(HmacKey(Secret::new([10; 32]))).is_err());
    }

    #[test]
    fn unknown_version() {
        let header = Header::read(&b"age-encryption.org/v2\n-> something\n\n"[..]).unwrap();
        match header {
            Header::Unknown(version) => assert_eq!(version, "v2"),
            Header::V1(_) => panic!("expected unknown version"),
        }
    }

    #[test]
    fn mac_tamper_is_detected() {
        let stanzas = vec![Stanza {
            tag: "X25519".to_string(),
            args: vec!["test".to_string()],
            body: vec![7; 32],
        }];
        let key = || HmacKey(Secret::new([3; 32]));
        let header = HeaderV1::new(stanzas, key());

        let mut data = vec![];
        Header::V1(header).write(&mut data).unwrap();

        // Flip one bit in the stanza argument; the result still parses.
        let idx = data.windows(4).position(|w| w == &b"test"[..]).unwrap();
        data[idx] ^= 0x01;
        match Header::read(&data[..]).unwrap() {
            Header::V1(parsed) => assert!(parsed.verify_mac(key()).is_err()),
            Header::Unknown(_) => panic!("expected v1 header"),
        }
    }

    #[test]
    fn stanza_count_is_bounded() {
        let build = |count: usize| {
            let mut data = b"age-encryption.org/v1\n".to_vec();
            for _ in 0..count {
                data.extend_from_slice(b"-> a\n\n");
            }
            data.extend_from_slice(b"--- ");
            data.extend_from_slice(&[b'A'; 43]);
            data.extend_from_slice(b"\n");
            data
        };

        assert!(Header::read(&build(64)[..]).is_ok());
        assert!(Header::read(&build(65)[..]).is_err());
    }

    #[test]
    fn oversized_header_rejected() {
        // A syntactically endless run of stanzas must hit the size bound
        // rather than buffer without limit.
        let mut data = b"age-encryption.org/v1\n".to_vec();
        for _ in 0..3000 {
            data.extend_from_slice(b"-> stanza arg arg arg arg\nAAAA\n");
        }
        assert!(Header::read(&data[..]).is_err());
    }
}
