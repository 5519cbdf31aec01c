//! Encryption and decryption routines for age files.

use rand::{rngs::OsRng, RngCore};
use secrecy::SecretString;
use std::io::{self, Read, Write};
use vintage_core::format::FileKey;

use crate::{
    error::{DecryptError, EncryptError},
    format::{Header, HeaderV1},
    keys::{mac_key, v1_payload_key},
    primitives::stream::{PayloadKey, Stream, StreamWriter},
    scrypt, Recipient,
};

pub mod decryptor;

/// The per-stream nonce written in the clear between the header and the
/// payload. Distinct from any AEAD nonce.
pub(crate) struct Nonce([u8; 16]);

impl AsRef<[u8]> for Nonce {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Nonce {
    fn random() -> Self {
        let mut nonce = [0; 16];
        OsRng.fill_bytes(&mut nonce);
        Nonce(nonce)
    }

    fn read<R: Read>(input: &mut R) -> io::Result<Self> {
        let mut nonce = [0; 16];
        input.read_exact(&mut nonce)?;
        Ok(Nonce(nonce))
    }
}

/// The two ways an age file can be keyed.
enum EncryptorType {
    /// Encryption to a list of recipients.
    Recipients(Vec<Box<dyn Recipient>>),
    /// Encryption to a passphrase.
    Passphrase(SecretString),
}

/// Encryptor for creating an age file.
pub struct Encryptor(EncryptorType);

impl Encryptor {
    /// Returns an `Encryptor` that will encrypt to the given recipients.
    ///
    /// Returns an error if no recipients were provided.
    pub fn with_recipients(recipients: Vec<Box<dyn Recipient>>) -> Result<Self, EncryptError> {
        if recipients.is_empty() {
            return Err(EncryptError::MissingRecipients);
        }
        Ok(Encryptor(EncryptorType::Recipients(recipients)))
    }

    /// Returns an `Encryptor` that will encrypt with a passphrase, using the
    /// default work factor. Anyone with the passphrase can decrypt.
    ///
    /// This API should only be used with a passphrase that was provided by
    /// (or generated for) a human. For programmatic use cases, generate an
    /// [`x25519::Identity`] and use [`Encryptor::with_recipients`] instead.
    ///
    /// [`x25519::Identity`]: crate::x25519::Identity
    pub fn with_user_passphrase(passphrase: SecretString) -> Self {
        Encryptor(EncryptorType::Passphrase(passphrase))
    }

    /// Samples a file key, wraps it to every recipient, and assembles the
    /// MACed header.
    fn prepare_header(self) -> Result<(Header, Nonce, PayloadKey), EncryptError> {
        let file_key = FileKey::generate();

        let stanzas = match self.0 {
            EncryptorType::Recipients(recipients) => {
                let mut stanzas = Vec::with_capacity(recipients.len());
                for recipient in recipients {
                    stanzas.extend(recipient.wrap_file_key(&file_key)?);
                }
                stanzas
            }
            EncryptorType::Passphrase(passphrase) => {
                scrypt::Recipient::new(passphrase).wrap_file_key(&file_key)?
            }
        };

        // A recipient may produce several stanzas but must produce at least
        // one, and a passphrase stanza must stand alone.
        if stanzas.is_empty() {
            return Err(EncryptError::MissingRecipients);
        }
        if stanzas.len() > 1 && stanzas.iter().any(|s| s.tag == scrypt::SCRYPT_STANZA_TAG) {
            return Err(EncryptError::MixedRecipientAndPassphrase);
        }

        let header = HeaderV1::new(stanzas, mac_key(&file_key));
        let nonce = Nonce::random();
        let payload_key =
            v1_payload_key(&file_key, &header, &nonce).expect("freshly computed MAC is correct");

        Ok((Header::V1(header), nonce, payload_key))
    }

    /// Creates a wrapper around a writer that encrypts its input.
    ///
    /// Returns errors from the underlying writer while writing the header.
    ///
    /// You **must** call [`StreamWriter::finish`] when you are done writing;
    /// without it the final chunk is never emitted and the file will fail to
    /// decrypt.
    pub fn wrap_output<W: Write>(self, mut output: W) -> Result<StreamWriter<W>, EncryptError> {
        let (header, nonce, payload_key) = self.prepare_header()?;
        header.write(&mut output)?;
        output.write_all(nonce.as_ref())?;
        Ok(Stream::encrypt(payload_key, output))
    }
}

/// Decryptor for an age file.
pub enum Decryptor<R: Read> {
    /// The file is encrypted to a list of recipients, and requires matching
    /// identities for decryption.
    Recipients(decryptor::RecipientsDecryptor<R>),
    /// The file is encrypted with a passphrase.
    Passphrase(decryptor::PassphraseDecryptor<R>),
}

impl<R: Read> Decryptor<R> {
    /// Attempts to create a decryptor for an age file.
    ///
    /// Returns an error if the input does not begin with a valid header.
    pub fn new(mut input: R) -> Result<Self, DecryptError> {
        match Header::read(&mut input)? {
            Header::V1(header) => {
                let nonce = Nonce::read(&mut input)?;
                Decryptor::from_v1_header(input, header, nonce)
            }
            Header::Unknown(_) => Err(DecryptError::UnknownFormat),
        }
    }

    fn from_v1_header(input: R, header: HeaderV1, nonce: Nonce) -> Result<Self, DecryptError> {
        // Classify the header before any unwrapping happens: a passphrase
        // stanza must be the only stanza.
        let any_scrypt = header.any_scrypt();

        if any_scrypt && header.stanzas.len() == 1 {
            Ok(Decryptor::Passphrase(decryptor::PassphraseDecryptor::new(
                input, header, nonce,
            )))
        } else if !any_scrypt {
            Ok(Decryptor::Recipients(decryptor::RecipientsDecryptor::new(
                input, header, nonce,
            )))
        } else {
            Err(DecryptError::InvalidHeader)
        }
    }
}

#[cfg(test)]
mod tests {
    use secrecy::{ExposeSecret, SecretString};
    use std::io::{Read, Write};
    use vintage_core::format::FileKey;

    use super::{Decryptor, Encryptor, Nonce};
    use crate::{
        error::{DecryptError, EncryptError},
        format::{Header, HeaderV1},
        keys::{mac_key, v1_payload_key},
        primitives::stream::Stream,
        scrypt, x25519, Identity, Recipient,
    };

    fn encrypt_to(recipients: Vec<Box<dyn Recipient>>, plaintext: &[u8]) -> Vec<u8> {
        let mut encrypted = vec![];
        let encryptor = Encryptor::with_recipients(recipients).unwrap();
        let mut w = encryptor.wrap_output(&mut encrypted).unwrap();
        w.write_all(plaintext).unwrap();
        w.finish().unwrap();
        encrypted
    }

    fn decrypt_with<'a>(
        encrypted: &[u8],
        identities: impl Iterator<Item = &'a dyn Identity>,
    ) -> Result<Vec<u8>, DecryptError> {
        let decryptor = match Decryptor::new(encrypted)? {
            Decryptor::Recipients(d) => d,
            Decryptor::Passphrase(_) => panic!("expected recipients decryptor"),
        };
        let mut r = decryptor.decrypt(identities)?;
        let mut decrypted = vec![];
        r.read_to_end(&mut decrypted)?;
        Ok(decrypted)
    }

    #[test]
    fn x25519_round_trip() {
        let sk: x25519::Identity = x25519::tests::TEST_SK.parse().unwrap();
        let pk: x25519::Recipient = x25519::tests::TEST_PK.parse().unwrap();

        let test_msg = b"This is a test message. For testing.";
        let encrypted = encrypt_to(vec![Box::new(pk)], test_msg);
        let decrypted =
            decrypt_with(&encrypted, std::iter::once(&sk as &dyn Identity)).unwrap();

        assert_eq!(&decrypted[..], &test_msg[..]);
    }

    #[test]
    fn scrypt_round_trip() {
        let test_msg = b"This is a test message. For testing.";

        let mut encrypted = vec![];
        let encryptor =
            Encryptor::with_recipients(vec![Box::new({
                let mut r = scrypt::Recipient::new(SecretString::new("passphrase".to_owned()));
                r.set_work_factor(10);
                r
            })])
            .unwrap();
        let mut w = encryptor.wrap_output(&mut encrypted).unwrap();
        w.write_all(test_msg).unwrap();
        w.finish().unwrap();

        let d = match Decryptor::new(&encrypted[..]) {
            Ok(Decryptor::Passphrase(d)) => d,
            _ => panic!("expected passphrase decryptor"),
        };
        let mut r = d
            .decrypt(&SecretString::new("passphrase".to_owned()), None)
            .unwrap();
        let mut decrypted = vec![];
        r.read_to_end(&mut decrypted).unwrap();

        assert_eq!(&decrypted[..], &test_msg[..]);
    }

    #[test]
    fn wrong_passphrase_fails() {
        let mut encrypted = vec![];
        let encryptor = Encryptor::with_recipients(vec![Box::new({
            let mut r = scrypt::Recipient::new(SecretString::new("correct".to_owned()));
            r.set_work_factor(10);
            r
        })])
        .unwrap();
        let mut w = encryptor.wrap_output(&mut encrypted).unwrap();
        w.write_all(b"secret").unwrap();
        w.finish().unwrap();

        let d = match Decryptor::new(&encrypted[..]) {
            Ok(Decryptor::Passphrase(d)) => d,
            _ => panic!("expected passphrase decryptor"),
        };
        assert!(matches!(
            d.decrypt(&SecretString::new("incorrect".to_owned()), None),
            Err(DecryptError::DecryptionFailed)
        ));
    }

    #[test]
    fn multiple_recipients_preserve_order() {
        let sk1 = x25519::Identity::generate();
        let sk2 = x25519::Identity::generate();

        let test_msg = b"one file, two readers";
        let encrypted = encrypt_to(
            vec![Box::new(sk1.to_public()), Box::new(sk2.to_public())],
            test_msg,
        );

        // Each identity alone can decrypt.
        for sk in [&sk1, &sk2] {
            let decrypted =
                decrypt_with(&encrypted, std::iter::once(sk as &dyn Identity)).unwrap();
            assert_eq!(&decrypted[..], &test_msg[..]);
        }

        // The header carries the stanzas in input order. The wrapped file
        // keys differ, so matching each stanza back to its recipient is done
        // by unwrapping.
        let header = match Header::read(&encrypted[..]).unwrap() {
            Header::V1(v1) => v1,
            Header::Unknown(_) => panic!("expected v1 header"),
        };
        assert_eq!(header.stanzas.len(), 2);
        let unwrapped: Vec<bool> = header
            .stanzas
            .iter()
            .map(|stanza| sk1.unwrap_stanza(stanza).is_some())
            .collect();
        assert_eq!(unwrapped, &[true, false]);
    }

    #[test]
    fn mixed_scrypt_and_recipients_cannot_encrypt() {
        let pk = x25519::Identity::generate().to_public();
        let encryptor = Encryptor::with_recipients(vec![
            Box::new(pk),
            Box::new(scrypt::Recipient::new(SecretString::new(
                "passphrase".to_owned(),
            ))),
        ])
        .unwrap();

        let mut sink = vec![];
        assert!(matches!(
            encryptor.wrap_output(&mut sink),
            Err(EncryptError::MixedRecipientAndPassphrase)
        ));
    }

    #[test]
    fn no_recipients_cannot_encrypt() {
        assert!(matches!(
            Encryptor::with_recipients(vec![]),
            Err(EncryptError::MissingRecipients)
        ));
    }

    #[test]
    fn mixed_scrypt_header_cannot_decrypt() {
        // Hand-assemble a header that pairs a scrypt stanza with an X25519
        // stanza; classification must reject it before any unwrapping.
        let file_key = FileKey::from([27; 16]);
        let pk = x25519::Identity::generate().to_public();

        let mut stanzas = pk.wrap_file_key(&file_key).unwrap();
        let mut passphrase = scrypt::Recipient::new(SecretString::new("pw".to_owned()));
        passphrase.set_work_factor(10);
        stanzas.extend(passphrase.wrap_file_key(&file_key).unwrap());

        let header = HeaderV1::new(stanzas, mac_key(&file_key));
        let nonce = Nonce([0; 16]);
        let payload_key = v1_payload_key(&file_key, &header, &nonce).unwrap();

        let mut encrypted = vec![];
        Header::V1(header).write(&mut encrypted).unwrap();
        encrypted.extend_from_slice(nonce.as_ref());
        let mut w = Stream::encrypt(payload_key, &mut encrypted);
        w.write_all(b"never readable").unwrap();
        w.finish().unwrap();

        assert!(matches!(
            Decryptor::new(&encrypted[..]),
            Err(DecryptError::InvalidHeader)
        ));
    }

    #[test]
    fn no_matching_identity_fails() {
        let pk = x25519::Identity::generate().to_public();
        let other = x25519::Identity::generate();

        let encrypted = encrypt_to(vec![Box::new(pk)], b"not for you");
        assert!(matches!(
            decrypt_with(&encrypted, std::iter::once(&other as &dyn Identity)),
            Err(DecryptError::NoMatchingKeys)
        ));
    }

    #[test]
    fn empty_plaintext_round_trip() {
        let sk = x25519::Identity::generate();
        let encrypted = encrypt_to(vec![Box::new(sk.to_public())], b"");
        let decrypted = decrypt_with(&encrypted, std::iter::once(&sk as &dyn Identity)).unwrap();
        assert!(decrypted.is_empty());
    }

    #[test]
    fn file_key_is_shared_across_stanzas() {
        // Both stanzas wrap the same 16-byte file key, so either identity
        // derives the same payload key and reads the same plaintext.
        let sk1 = x25519::Identity::generate();
        let sk2 = x25519::Identity::generate();
        let encrypted = encrypt_to(
            vec![Box::new(sk1.to_public()), Box::new(sk2.to_public())],
            b"shared",
        );

        let header = match Header::read(&encrypted[..]).unwrap() {
            Header::V1(v1) => v1,
            Header::Unknown(_) => panic!("expected v1 header"),
        };

        let fk1 = sk1.unwrap_stanzas(&header.stanzas).unwrap().unwrap();
        let fk2 = sk2.unwrap_stanzas(&header.stanzas).unwrap().unwrap();
        assert_eq!(fk1.expose_secret(), fk2.expose_secret());
    }
}
