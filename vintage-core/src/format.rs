//! The file key and the recipient stanza codec.

use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, Secret};

/// The prefix of every stanza's first line.
const STANZA_PREFIX: &str = "-> ";

/// The length of an age file key.
pub const FILE_KEY_BYTES: usize = 16;

/// Maximum length in bytes of a stanza's type tag.
pub const MAX_TAG_BYTES: usize = 64;

/// Maximum number of arguments a stanza may carry.
pub const MAX_STANZA_ARGS: usize = 8;

/// Maximum length in bytes of a single stanza argument.
pub const MAX_ARG_BYTES: usize = 128;

/// Maximum number of base64 lines in a stanza body (3 KiB of raw bytes).
pub const MAX_BODY_LINES: usize = 64;

/// The per-file secret from which every other key is derived.
///
/// Wrapped to each recipient in the header, and zeroized on drop.
pub struct FileKey(Secret<[u8; FILE_KEY_BYTES]>);

impl FileKey {
    /// Samples a fresh file key from the operating system's CSPRNG.
    pub fn generate() -> Self {
        let mut file_key = [0; FILE_KEY_BYTES];
        OsRng.fill_bytes(&mut file_key);
        FileKey(Secret::new(file_key))
    }
}

impl From<[u8; FILE_KEY_BYTES]> for FileKey {
    fn from(file_key: [u8; FILE_KEY_BYTES]) -> Self {
        FileKey(Secret::new(file_key))
    }
}

impl ExposeSecret<[u8; FILE_KEY_BYTES]> for FileKey {
    fn expose_secret(&self) -> &[u8; FILE_KEY_BYTES] {
        self.0.expose_secret()
    }
}

/// One typed record in an age header, usually carrying a wrapped [`FileKey`].
///
/// The stanza is the format's unit of polymorphism: the tag selects which
/// recipient implementation knows how to interpret the args and body.
#[derive(Debug, PartialEq, Eq)]
pub struct Stanza {
    /// The type tag identifying this stanza.
    pub tag: String,
    /// Zero or more arguments, each an "arbitrary string" (ASCII 33-126).
    pub args: Vec<String>,
    /// The raw body bytes.
    pub body: Vec<u8>,
}

/// A stanza borrowed from parser input.
///
/// The body is kept as its base64 source lines so that decoding can be
/// deferred until the surrounding header has parsed completely.
#[derive(Debug)]
pub struct RawStanza<'a> {
    /// The type tag identifying this stanza.
    pub tag: &'a str,
    /// Zero or more arguments.
    pub args: Vec<&'a str>,
    body: Vec<&'a [u8]>,
}

impl<'a> RawStanza<'a> {
    /// Decodes and returns the stanza body.
    pub fn body(&self) -> Vec<u8> {
        use base64::{prelude::BASE64_STANDARD_NO_PAD, Engine};

        // The parser always produces at least the final (short) line.
        let (last, full) = self.body.split_last().unwrap();

        let mut encoded = Vec::with_capacity(full.len() * 64 + last.len());
        for line in full {
            encoded.extend_from_slice(line);
        }
        encoded.extend_from_slice(last);

        // Canonicality was enforced line by line during parsing.
        BASE64_STANDARD_NO_PAD.decode(&encoded).unwrap()
    }
}

impl From<RawStanza<'_>> for Stanza {
    fn from(stanza: RawStanza<'_>) -> Self {
        let body = stanza.body();
        Stanza {
            tag: stanza.tag.to_string(),
            args: stanza.args.into_iter().map(String::from).collect(),
            body,
        }
    }
}

/// Checks whether `s` is a valid age "arbitrary string" (`1*VCHAR` in ABNF).
pub fn is_arbitrary_string<S: AsRef<str>>(s: &S) -> bool {
    let s = s.as_ref();
    !s.is_empty() && s.bytes().all(|b| (33..=126).contains(&b))
}

/// Decoding operations for age types.
pub mod read {
    use nom::{
        bytes::streaming::{tag, take_while_m_n},
        character::streaming::newline,
        combinator::{map_opt, map_res, verify},
        multi::{many_till, separated_list1},
        sequence::{pair, preceded, terminated},
        IResult,
    };

    use super::{
        RawStanza, MAX_ARG_BYTES, MAX_BODY_LINES, MAX_STANZA_ARGS, MAX_TAG_BYTES, STANZA_PREFIX,
    };

    fn is_base64_char(c: u8) -> bool {
        // Standard (not URL-safe) alphabet, unpadded.
        c.is_ascii_alphanumeric() || c == b'+' || c == b'/'
    }

    /// Returns the 6-bit value of a standard base64 character.
    fn base64_value(c: u8) -> Option<u8> {
        match c {
            b'A'..=b'Z' => Some(c - b'A'),
            b'a'..=b'z' => Some(c - b'a' + 26),
            b'0'..=b'9' => Some(c - b'0' + 52),
            b'+' => Some(62),
            b'/' => Some(63),
            _ => None,
        }
    }

    /// Rejects final lines whose last character leaves non-zero trailing
    /// bits, which would make the encoding non-canonical.
    fn is_canonical_tail(line: &[u8]) -> bool {
        let spare_bits = match line.len() % 4 {
            0 => return true,
            1 => return false,
            2 => 4,
            _ => 2,
        };
        match line.last().and_then(|&c| base64_value(c)) {
            Some(v) => v & ((1 << spare_bits) - 1) == 0,
            None => false,
        }
    }

    /// Reads an age "arbitrary string": ASCII characters 33-126, non-empty.
    pub fn arbitrary_string(input: &[u8]) -> IResult<&[u8], &str> {
        map_res(
            take_while_m_n(1, MAX_ARG_BYTES, |c| (33..=126).contains(&c)),
            std::str::from_utf8,
        )(input)
    }

    fn wrapped_encoded_data(input: &[u8]) -> IResult<&[u8], Vec<&[u8]>> {
        map_opt(
            many_till(
                // Every line before the last is exactly 64 columns.
                terminated(take_while_m_n(64, 64, is_base64_char), newline),
                // The final line is strictly shorter (empty if necessary),
                // a valid base64 length, and canonical.
                verify(
                    terminated(take_while_m_n(0, 63, is_base64_char), newline),
                    |line: &[u8]| is_canonical_tail(line),
                ),
            ),
            |(mut lines, last): (Vec<&[u8]>, &[u8])| {
                if lines.len() > MAX_BODY_LINES {
                    return None;
                }
                lines.push(last);
                Some(lines)
            },
        )(input)
    }

    /// Reads one age stanza.
    ///
    /// The first line is `-> ` followed by the tag and zero or more
    /// SP-separated arguments; the body is canonical unpadded base64 wrapped
    /// at exactly 64 columns, terminated by a short (possibly empty) line.
    pub fn stanza(input: &[u8]) -> IResult<&[u8], RawStanza<'_>> {
        map_opt(
            pair(
                preceded(
                    tag(STANZA_PREFIX),
                    terminated(separated_list1(tag(" "), arbitrary_string), newline),
                ),
                wrapped_encoded_data,
            ),
            |(mut tokens, body)| {
                if tokens.len() > 1 + MAX_STANZA_ARGS {
                    return None;
                }
                let tag = tokens.remove(0);
                if tag.len() > MAX_TAG_BYTES {
                    return None;
                }
                Some(RawStanza {
                    tag,
                    args: tokens,
                    body,
                })
            },
        )(input)
    }
}

/// Encoding operations for age types.
pub mod write {
    use base64::{prelude::BASE64_STANDARD_NO_PAD, Engine};
    use cookie_factory::{
        combinator::string,
        multi::separated_list,
        sequence::{pair, tuple},
        SerializeFn, WriteContext,
    };
    use std::io::Write;
    use std::iter;

    use super::STANZA_PREFIX;

    fn wrapped_encoded_data<'a, W: 'a + Write>(data: &[u8]) -> impl SerializeFn<W> + 'a {
        let encoded = BASE64_STANDARD_NO_PAD.encode(data);

        move |mut w: WriteContext<W>| {
            let mut rest = encoded.as_str();

            while rest.len() >= 64 {
                let (line, tail) = rest.split_at(64);
                w = pair(string(line), string("\n"))(w)?;
                rest = tail;
            }

            // The final line must be short, so a body that fills its last
            // line exactly is followed by an empty one.
            pair(string(rest), string("\n"))(w)
        }
    }

    /// Writes one age stanza.
    pub fn stanza<'a, W: 'a + Write, S: AsRef<str>>(
        tag: &'a str,
        args: &'a [S],
        body: &'a [u8],
    ) -> impl SerializeFn<W> + 'a {
        pair(
            tuple((
                string(STANZA_PREFIX),
                separated_list(
                    string(" "),
                    iter::once(tag)
                        .chain(args.iter().map(|s| s.as_ref()))
                        .map(string),
                ),
                string("\n"),
            )),
            wrapped_encoded_data(body),
        )
    }
}

#[cfg(test)]
mod tests {
    use base64::{prelude::BASE64_STANDARD_NO_PAD, Engine};

    use super::{read, write};

    fn parse_and_serialize(encoded: &str, tag: &str, args: &[&str], body: &[u8]) {
        let (rest, stanza) = read::stanza(encoded.as_bytes()).unwrap();
        assert!(rest.is_empty());
        assert_eq!(stanza.tag, tag);
        assert_eq!(stanza.args, args);
        assert_eq!(stanza.body(), body);

        let mut buf = vec![];
        cookie_factory::gen_simple(write::stanza(tag, args, body), &mut buf).unwrap();
        assert_eq!(buf, encoded.as_bytes());
    }

    #[test]
    fn stanza_with_short_body() {
        let body = BASE64_STANDARD_NO_PAD
            .decode("C3ZAeY64NXS4QFrksLm3EGz+uPRyI0eQsWw7LWbbYig")
            .unwrap();
        parse_and_serialize(
            "-> X25519 CJM36AHmTbdHSuOQL+NESqyVQE75f2e610iRdLPEN20\nC3ZAeY64NXS4QFrksLm3EGz+uPRyI0eQsWw7LWbbYig\n",
            "X25519",
            &["CJM36AHmTbdHSuOQL+NESqyVQE75f2e610iRdLPEN20"],
            &body,
        );
    }

    #[test]
    fn stanza_with_empty_body() {
        // An empty body is a single empty line.
        parse_and_serialize("-> empty-body some args\n\n", "empty-body", &["some", "args"], &[]);
    }

    #[test]
    fn stanza_with_full_final_line() {
        let body = BASE64_STANDARD_NO_PAD
            .decode("xD7o4VEOu1t7KZQ1gDgq2FPzBEeSRqbnqvQEXdLRYy143BxR6oFxsUUJCRB0ErXA")
            .unwrap();
        // A body filling its last line exactly needs a trailing empty line.
        parse_and_serialize(
            "-> full-body\nxD7o4VEOu1t7KZQ1gDgq2FPzBEeSRqbnqvQEXdLRYy143BxR6oFxsUUJCRB0ErXA\n\n",
            "full-body",
            &[],
            &body,
        );
    }

    #[test]
    fn unterminated_full_line_is_incomplete() {
        // Without the mandatory short line, a 0 mod 64 body is ambiguous;
        // the parser must keep asking for more input.
        let encoded =
            "-> full-body\nxD7o4VEOu1t7KZQ1gDgq2FPzBEeSRqbnqvQEXdLRYy143BxR6oFxsUUJCRB0ErXA\n";
        assert!(matches!(
            read::stanza(encoded.as_bytes()),
            Err(nom::Err::Incomplete(_))
        ));
    }

    #[test]
    fn base64_padding_rejected() {
        assert!(read::stanza(b"-> pad\nTm8gcGFkZGluZyE\n").is_ok());
        assert!(read::stanza(b"-> pad\nTm8gcGFkZGluZyE=\n").is_err());
        // Internal padding as well.
        assert!(read::stanza(b"-> pad\nSW50ZXJuYWw=UGFk\n").is_err());
    }

    #[test]
    fn invalid_base64_length_rejected() {
        // A final line of length 1 mod 4 can never be valid base64.
        assert!(read::stanza(b"-> tag\n/\n").is_err());
    }

    #[test]
    fn trailing_bits_rejected() {
        // "dy" decodes to one byte plus four spare bits, which must be zero.
        assert!(read::stanza(b"-> tag\ndy\n").is_err());
        assert!(read::stanza(b"-> tag\ndw\n").is_ok());
        // "ddd" leaves two spare bits.
        assert!(read::stanza(b"-> tag\nddd\n").is_err());
        assert!(read::stanza(b"-> tag\nddc\n").is_ok());
    }

    #[test]
    fn oversized_tag_rejected() {
        let encoded = format!("-> {}\n\n", "t".repeat(65));
        assert!(read::stanza(encoded.as_bytes()).is_err());
    }

    #[test]
    fn too_many_args_rejected() {
        let encoded = format!("-> tag{}\n\n", " a".repeat(9));
        assert!(read::stanza(encoded.as_bytes()).is_err());
    }
}
