use std::fs::File;
use std::io;

use crate::x25519;

/// A list of identities parsed from a file.
pub struct IdentityFile {
    identities: Vec<x25519::Identity>,
}

impl IdentityFile {
    /// Parses one or more identities from a file containing valid UTF-8.
    pub fn from_file(filename: String) -> io::Result<Self> {
        File::open(&filename)
            .map(io::BufReader::new)
            .and_then(|data| IdentityFile::parse_identities(Some(filename), data))
    }

    /// Parses one or more identities from a buffered input containing valid
    /// UTF-8.
    pub fn from_buffer<R: io::BufRead>(data: R) -> io::Result<Self> {
        Self::parse_identities(None, data)
    }

    fn parse_identities<R: io::BufRead>(filename: Option<String>, data: R) -> io::Result<Self> {
        let mut identities = vec![];

        for (line_number, line) in data.lines().enumerate() {
            let line = line?;
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match line.parse::<x25519::Identity>() {
                Ok(identity) => identities.push(identity),
                Err(_) => {
                    // Report the line number instead of the line, so the file
                    // contents never leak into error messages.
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        match filename {
                            Some(filename) => format!(
                                "identity file {} contains non-identity data on line {}",
                                filename,
                                line_number + 1
                            ),
                            None => format!(
                                "identity file contains non-identity data on line {}",
                                line_number + 1
                            ),
                        },
                    ));
                }
            }
        }

        Ok(IdentityFile { identities })
    }

    /// Returns the identities in this file.
    pub fn into_identities(self) -> Vec<x25519::Identity> {
        self.identities
    }
}
