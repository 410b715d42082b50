//! HMAC-SHA256 message signing over canonical JSON
//!
//! The platform authenticates every message by an HMAC over the raw bytes of
//! its JSON encoding, so both sides have to agree on those bytes exactly:
//! compact separators, object keys in insertion order, and non-ASCII text
//! escaped as `\uXXXX`. [`canonical_json`] produces that encoding and
//! [`Signer`] computes and verifies the hex digests.

use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::ser::Formatter;
use sha2::Sha256;
use std::fmt;
use std::io;

type HmacSha256 = Hmac<Sha256>;

/// Compact formatter that escapes every non-ASCII character as a UTF-16
/// `\uXXXX` sequence.
#[derive(Debug, Default, Clone, Copy)]
struct AsciiFormatter;

impl Formatter for AsciiFormatter {
    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let mut start = 0;
        for (index, ch) in fragment.char_indices() {
            if ch.is_ascii() {
                continue;
            }
            writer.write_all(&fragment.as_bytes()[start..index])?;
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                write!(writer, "\\u{unit:04x}")?;
            }
            start = index + ch.len_utf8();
        }
        writer.write_all(&fragment.as_bytes()[start..])
    }
}

/// Serialize a value to the canonical wire encoding used for signing.
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    let mut buf = Vec::with_capacity(128);
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, AsciiFormatter);
    value.serialize(&mut serializer)?;
    // The formatter only ever writes ASCII.
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Keyed signer holding the gateway's shared secret
#[derive(Clone)]
pub struct Signer {
    key: Vec<u8>,
}

impl Signer {
    pub fn new(secret_key: impl AsRef<[u8]>) -> Self {
        Self {
            key: secret_key.as_ref().to_vec(),
        }
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.key).expect("HMAC-SHA256 accepts keys of any length")
    }

    /// Lower-case hex HMAC-SHA256 of `message`.
    pub fn sign(&self, message: &[u8]) -> String {
        let mut mac = self.mac();
        mac.update(message);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Canonicalize `value` and sign it, returning `(canonical, digest)`.
    pub fn sign_json<T: Serialize + ?Sized>(
        &self,
        value: &T,
    ) -> Result<(String, String), serde_json::Error> {
        let canonical = canonical_json(value)?;
        let digest = self.sign(canonical.as_bytes());
        Ok((canonical, digest))
    }

    /// Constant-time check of a hex digest against `message`.
    pub fn verify(&self, message: &[u8], digest: &str) -> bool {
        let Ok(expected) = hex::decode(digest) else {
            return false;
        };
        let mut mac = self.mac();
        mac.update(message);
        mac.verify_slice(&expected).is_ok()
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer").field("key", &"***").finish()
    }
}
