//! In-memory key material.
//!
//! [`KeyMaterial`] is the immutable representation of one key: identity,
//! validity window, capability flags, public parameters, the optionally
//! protected private parameters, and bound subkeys. It also carries the
//! v4 key packet codec (tags 5, 6, 7, 13, 14) used by the keyring
//! exchange format.

use std::io::Read;

use chrono::{DateTime, Utc};
use sha1::{Digest, Sha1};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};
use crate::internal::{
    datetime_to_timestamp, read_array, read_mpi, read_u8, simple_checksum, timestamp_to_datetime,
    to_hex, write_mpi,
};
use crate::packet::{encode_packet, Tag};
use crate::types::{HashAlgorithm, KeyFlags, SymmetricAlgorithm};

/// RSA public-key algorithm id.
pub(crate) const PK_ALGO_RSA: u8 = 1;

/// A v4 key fingerprint: 20 octets of SHA-1 over the public key packet.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 20]);

impl Fingerprint {
    /// Wrap raw fingerprint bytes.
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// The key id: the low 64 bits of the fingerprint.
    pub fn key_id(&self) -> KeyId {
        let mut id = [0u8; 8];
        id.copy_from_slice(&self.0[12..]);
        KeyId::from_bytes(id)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", to_hex(&self.0))
    }
}

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

/// An eight-octet key id, as carried in session-key and signature packets.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyId([u8; 8]);

impl KeyId {
    /// Wrap raw key id bytes.
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl std::fmt::Display for KeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", to_hex(&self.0))
    }
}

impl std::fmt::Debug for KeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyId({})", to_hex(&self.0))
    }
}

/// Public key parameters. Only RSA is carried; other algorithms are
/// rejected at parse time with `UnsupportedAlgorithm`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicParams {
    /// RSA modulus and public exponent as big-endian magnitudes
    Rsa {
        /// Modulus
        n: Vec<u8>,
        /// Public exponent
        e: Vec<u8>,
    },
}

/// Decrypted RSA secret parameters, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretMpis {
    /// Private exponent
    pub d: Vec<u8>,
    /// First prime
    pub p: Vec<u8>,
    /// Second prime
    pub q: Vec<u8>,
    /// Multiplicative inverse of p mod q
    pub u: Vec<u8>,
}

impl std::fmt::Debug for SecretMpis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print private material.
        write!(f, "SecretMpis(..)")
    }
}

impl SecretMpis {
    /// Serialize as the algorithm-specific MPI area of a secret key packet.
    pub(crate) fn to_mpi_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_mpi(&mut out, &self.d);
        write_mpi(&mut out, &self.p);
        write_mpi(&mut out, &self.q);
        write_mpi(&mut out, &self.u);
        out
    }

    /// Parse the algorithm-specific MPI area.
    pub(crate) fn from_mpi_bytes(data: &[u8]) -> Result<Self> {
        let mut cursor = std::io::Cursor::new(data);
        let mpis = SecretMpis {
            d: read_mpi(&mut cursor)?,
            p: read_mpi(&mut cursor)?,
            q: read_mpi(&mut cursor)?,
            u: read_mpi(&mut cursor)?,
        };
        Ok(mpis)
    }
}

/// String-to-key specifier (RFC 4880 section 3.7): iterated and salted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct S2k {
    /// Hash algorithm used for derivation
    pub hash: HashAlgorithm,
    /// Salt prepended to the passphrase
    pub salt: [u8; 8],
    /// Encoded iteration count octet
    pub count_byte: u8,
}

impl S2k {
    /// Total number of octets hashed, decoded from the count octet.
    pub fn byte_count(&self) -> usize {
        let c = self.count_byte as usize;
        (16 + (c & 15)) << ((c >> 4) + 6)
    }
}

/// Integrity check trailing the encrypted secret MPI blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobIntegrity {
    /// Twenty-octet SHA-1 (s2k usage 254)
    Sha1,
    /// Two-octet simple checksum (s2k usage 255)
    Checksum,
}

/// Private-key parameters as stored in key material.
#[derive(Debug, Clone)]
pub enum SecretParams {
    /// Stored in the clear; the unlock passphrase is ignored
    Unprotected {
        /// The secret MPIs
        mpis: SecretMpis,
    },
    /// Passphrase-protected blob
    Protected {
        /// Symmetric cipher protecting the blob
        sym: SymmetricAlgorithm,
        /// Key derivation specifier
        s2k: S2k,
        /// CFB initialisation vector
        iv: Vec<u8>,
        /// Encrypted MPI area plus integrity trailer
        blob: Vec<u8>,
        /// Which integrity trailer the blob carries
        integrity: BlobIntegrity,
    },
}

/// Immutable in-memory representation of a key with its subkeys.
#[derive(Debug, Clone)]
pub struct KeyMaterial {
    /// v4 fingerprint (identity of this key)
    pub fingerprint: Fingerprint,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Expiry; `None` means the key never expires
    pub expires_at: Option<DateTime<Utc>>,
    /// Capability flags
    pub flags: KeyFlags,
    /// User identities (primary keys only)
    pub user_ids: Vec<String>,
    /// Public key parameters
    pub public_params: PublicParams,
    /// Private parameters, when this is secret key material
    pub secret_params: Option<SecretParams>,
    /// Bound subkeys; empty for subkeys themselves
    pub subkeys: Vec<KeyMaterial>,
    /// Raw self-signature packets retained from parsing, re-emitted on
    /// export so external tools keep accepting the key
    pub certifications: Vec<Vec<u8>>,
}

impl KeyMaterial {
    /// Build key material from RSA public parameters.
    ///
    /// The fingerprint is derived from the parameters and creation time,
    /// exactly as a parser would compute it from the wire form.
    pub fn new_rsa(n: Vec<u8>, e: Vec<u8>, created_at: DateTime<Utc>, flags: KeyFlags) -> Self {
        let public_params = PublicParams::Rsa { n, e };
        let fingerprint = fingerprint_v4(&public_params, &created_at);
        Self {
            fingerprint,
            created_at,
            expires_at: None,
            flags,
            user_ids: Vec::new(),
            public_params,
            secret_params: None,
            subkeys: Vec::new(),
            certifications: Vec::new(),
        }
    }

    /// Attach a user identity (builder style).
    pub fn with_user_id(mut self, uid: impl Into<String>) -> Self {
        self.user_ids.push(uid.into());
        self
    }

    /// Attach secret parameters (builder style).
    pub fn with_secret_params(mut self, params: SecretParams) -> Self {
        self.secret_params = Some(params);
        self
    }

    /// Attach an expiry time (builder style).
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Bind a subkey (builder style).
    pub fn with_subkey(mut self, subkey: KeyMaterial) -> Self {
        self.subkeys.push(subkey);
        self
    }

    /// The key id of this key.
    pub fn key_id(&self) -> KeyId {
        self.fingerprint.key_id()
    }

    /// Whether this key is expired as of `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| expiry < now)
    }

    /// Whether secret parameters are present.
    pub fn has_secret(&self) -> bool {
        self.secret_params.is_some()
    }

    /// A public-only copy of this key (secret parameters stripped,
    /// subkeys included).
    pub fn to_public(&self) -> KeyMaterial {
        let mut public = self.clone();
        public.secret_params = None;
        for subkey in &mut public.subkeys {
            subkey.secret_params = None;
        }
        public
    }

    /// Validate the subkey invariant: a non-empty subset of
    /// {encrypt, sign}, no nested subkeys.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.flags.is_empty() {
            return Err(Error::InvalidInput(format!(
                "key {} has no capabilities",
                self.fingerprint
            )));
        }
        for subkey in &self.subkeys {
            if !subkey.subkeys.is_empty() {
                return Err(Error::InvalidInput(format!(
                    "subkey {} has nested subkeys",
                    subkey.fingerprint
                )));
            }
            if subkey.flags.certify || (!subkey.flags.encrypt && !subkey.flags.sign) {
                return Err(Error::InvalidInput(format!(
                    "subkey {} capabilities must be a non-empty subset of {{encrypt, sign}}",
                    subkey.fingerprint
                )));
            }
        }
        Ok(())
    }

    /// Serialize the v4 public key packet body.
    pub(crate) fn encode_public_body(&self) -> Vec<u8> {
        encode_public_body(&self.public_params, &self.created_at)
    }

    /// Serialize as a public key packet (tag 6 or 14).
    pub(crate) fn encode_public_packet(&self, primary: bool) -> Vec<u8> {
        let tag = if primary { Tag::PublicKey } else { Tag::PublicSubkey };
        encode_packet(tag, &self.encode_public_body())
    }

    /// Serialize as a secret key packet (tag 5 or 7).
    ///
    /// Fails with `InvalidInput` when no secret parameters are present.
    pub(crate) fn encode_secret_packet(&self, primary: bool) -> Result<Vec<u8>> {
        let params = self.secret_params.as_ref().ok_or_else(|| {
            Error::InvalidInput(format!("key {} has no secret material", self.fingerprint))
        })?;
        let mut body = self.encode_public_body();
        match params {
            SecretParams::Unprotected { mpis } => {
                body.push(0);
                let mpi_bytes = mpis.to_mpi_bytes();
                let checksum = simple_checksum(&mpi_bytes);
                body.extend_from_slice(&mpi_bytes);
                body.extend_from_slice(&checksum.to_be_bytes());
            }
            SecretParams::Protected {
                sym,
                s2k,
                iv,
                blob,
                integrity,
            } => {
                body.push(match integrity {
                    BlobIntegrity::Sha1 => 254,
                    BlobIntegrity::Checksum => 255,
                });
                body.push(sym.id());
                body.push(3); // iterated and salted S2K
                body.push(s2k.hash.id());
                body.extend_from_slice(&s2k.salt);
                body.push(s2k.count_byte);
                body.extend_from_slice(iv);
                body.extend_from_slice(blob);
            }
        }
        let tag = if primary { Tag::SecretKey } else { Tag::SecretSubkey };
        Ok(encode_packet(tag, &body))
    }
}

/// Compute a v4 fingerprint from public parameters and creation time.
pub(crate) fn fingerprint_v4(params: &PublicParams, created_at: &DateTime<Utc>) -> Fingerprint {
    let body = encode_public_body(params, created_at);
    let mut hasher = Sha1::new();
    hasher.update([0x99]);
    hasher.update((body.len() as u16).to_be_bytes());
    hasher.update(&body);
    Fingerprint(hasher.finalize().into())
}

fn encode_public_body(params: &PublicParams, created_at: &DateTime<Utc>) -> Vec<u8> {
    let mut body = Vec::new();
    body.push(4); // version
    body.extend_from_slice(&datetime_to_timestamp(created_at).to_be_bytes());
    match params {
        PublicParams::Rsa { n, e } => {
            body.push(PK_ALGO_RSA);
            write_mpi(&mut body, n);
            write_mpi(&mut body, e);
        }
    }
    body
}

/// A key packet parsed off the wire, before signatures and subkeys are
/// folded into a [`KeyMaterial`] tree.
pub(crate) struct ParsedKeyPacket {
    pub created_at: DateTime<Utc>,
    pub public_params: PublicParams,
    pub secret_params: Option<SecretParams>,
}

/// Parse a public or secret key packet body (tags 5, 6, 7, 14).
pub(crate) fn parse_key_body(body: &[u8], has_secret: bool) -> Result<ParsedKeyPacket> {
    let mut cursor = std::io::Cursor::new(body);
    let version = read_u8(&mut cursor, "key packet")?;
    if version != 4 {
        return Err(Error::UnsupportedAlgorithm(format!("key packet version {version}")));
    }
    let created = u32::from_be_bytes(read_array::<_, 4>(&mut cursor)?);
    let algo = read_u8(&mut cursor, "key packet")?;
    if algo != PK_ALGO_RSA {
        return Err(Error::UnsupportedAlgorithm(format!("public-key algorithm {algo}")));
    }
    let n = read_mpi(&mut cursor)?;
    let e = read_mpi(&mut cursor)?;
    let public_params = PublicParams::Rsa { n, e };

    let secret_params = if has_secret {
        Some(parse_secret_params(&mut cursor, body)?)
    } else {
        None
    };

    Ok(ParsedKeyPacket {
        created_at: timestamp_to_datetime(created),
        public_params,
        secret_params,
    })
}

fn parse_secret_params(
    cursor: &mut std::io::Cursor<&[u8]>,
    body: &[u8],
) -> Result<SecretParams> {
    let usage = read_u8(cursor, "secret key packet")?;
    match usage {
        0 => {
            let rest = &body[cursor.position() as usize..];
            if rest.len() < 2 {
                return Err(Error::CorruptKeyMaterial("truncated secret MPIs".into()));
            }
            let (mpi_area, checksum_bytes) = rest.split_at(rest.len() - 2);
            let expected = u16::from_be_bytes([checksum_bytes[0], checksum_bytes[1]]);
            if simple_checksum(mpi_area) != expected {
                return Err(Error::CorruptKeyMaterial(
                    "secret key checksum mismatch".into(),
                ));
            }
            let mpis = SecretMpis::from_mpi_bytes(mpi_area)
                .map_err(|_| Error::CorruptKeyMaterial("unparsable secret MPIs".into()))?;
            Ok(SecretParams::Unprotected { mpis })
        }
        254 | 255 => {
            let sym = SymmetricAlgorithm::from_id(read_u8(cursor, "secret key packet")?)?;
            let s2k_type = read_u8(cursor, "secret key packet")?;
            if s2k_type != 3 {
                return Err(Error::UnsupportedAlgorithm(format!(
                    "S2K specifier type {s2k_type}"
                )));
            }
            let hash = HashAlgorithm::from_id(read_u8(cursor, "secret key packet")?)?;
            let salt = read_array::<_, 8>(cursor)?;
            let count_byte = read_u8(cursor, "secret key packet")?;
            let mut iv = vec![0u8; sym.block_size()];
            cursor.read_exact(&mut iv)?;
            let blob = body[cursor.position() as usize..].to_vec();
            if blob.is_empty() {
                return Err(Error::CorruptKeyMaterial("empty protected blob".into()));
            }
            Ok(SecretParams::Protected {
                sym,
                s2k: S2k {
                    hash,
                    salt,
                    count_byte,
                },
                iv,
                blob,
                integrity: if usage == 254 {
                    BlobIntegrity::Sha1
                } else {
                    BlobIntegrity::Checksum
                },
            })
        }
        other => Err(Error::UnsupportedAlgorithm(format!(
            "secret key protection mode {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::KeyFlags;

    fn sample_key() -> KeyMaterial {
        // Parameters need not be a real key pair for codec tests.
        KeyMaterial::new_rsa(
            vec![0xC3; 256],
            vec![0x01, 0x00, 0x01],
            timestamp_to_datetime(1_700_000_000),
            KeyFlags::primary(),
        )
        .with_user_id("Alice <alice@example.com>")
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = sample_key();
        let b = sample_key();
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_eq!(a.key_id(), b.key_id());
        assert_eq!(a.fingerprint.to_string().len(), 40);
    }

    #[test]
    fn test_fingerprint_depends_on_creation_time() {
        let a = sample_key();
        let mut b = sample_key();
        b.created_at = timestamp_to_datetime(1_700_000_001);
        let recomputed = fingerprint_v4(&b.public_params, &b.created_at);
        assert_ne!(a.fingerprint, recomputed);
    }

    #[test]
    fn test_public_packet_round_trip() {
        let key = sample_key();
        let packet = key.encode_public_packet(true);
        let mut cursor = std::io::Cursor::new(&packet);
        let header = crate::packet::read_header(&mut cursor).unwrap().unwrap();
        assert_eq!(header.tag, Tag::PublicKey);
        let body = crate::packet::BodyReader::new(&mut cursor, header.length)
            .read_to_vec()
            .unwrap();
        let parsed = parse_key_body(&body, false).unwrap();
        assert_eq!(parsed.public_params, key.public_params);
        assert_eq!(parsed.created_at, key.created_at);
        assert_eq!(
            fingerprint_v4(&parsed.public_params, &parsed.created_at),
            key.fingerprint
        );
    }

    #[test]
    fn test_unprotected_secret_round_trip() {
        let key = sample_key().with_secret_params(SecretParams::Unprotected {
            mpis: SecretMpis {
                d: vec![0x11; 255],
                p: vec![0x22; 128],
                q: vec![0x33; 128],
                u: vec![0x44; 128],
            },
        });
        let packet = key.encode_secret_packet(true).unwrap();
        let mut cursor = std::io::Cursor::new(&packet);
        let header = crate::packet::read_header(&mut cursor).unwrap().unwrap();
        assert_eq!(header.tag, Tag::SecretKey);
        let body = crate::packet::BodyReader::new(&mut cursor, header.length)
            .read_to_vec()
            .unwrap();
        let parsed = parse_key_body(&body, true).unwrap();
        match parsed.secret_params.unwrap() {
            SecretParams::Unprotected { mpis } => assert_eq!(mpis.d, vec![0x11; 255]),
            other => panic!("expected unprotected params, got {other:?}"),
        }
    }

    #[test]
    fn test_corrupted_secret_checksum_detected() {
        let key = sample_key().with_secret_params(SecretParams::Unprotected {
            mpis: SecretMpis {
                d: vec![0x11; 16],
                p: vec![0x22; 8],
                q: vec![0x33; 8],
                u: vec![0x44; 8],
            },
        });
        let mut packet = key.encode_secret_packet(true).unwrap();
        let len = packet.len();
        packet[len - 10] ^= 0x01; // corrupt an MPI octet
        let mut cursor = std::io::Cursor::new(&packet);
        let header = crate::packet::read_header(&mut cursor).unwrap().unwrap();
        let body = crate::packet::BodyReader::new(&mut cursor, header.length)
            .read_to_vec()
            .unwrap();
        assert!(matches!(
            parse_key_body(&body, true),
            Err(Error::CorruptKeyMaterial(_))
        ));
    }

    #[test]
    fn test_subkey_invariant_rejects_certify() {
        let mut subkey = KeyMaterial::new_rsa(
            vec![0xD5; 256],
            vec![0x01, 0x00, 0x01],
            timestamp_to_datetime(1_700_000_100),
            KeyFlags {
                encrypt: true,
                sign: false,
                certify: true,
            },
        );
        subkey.user_ids.clear();
        let key = sample_key().with_subkey(subkey);
        assert!(matches!(key.validate(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_s2k_count_decoding() {
        let s2k = S2k {
            hash: HashAlgorithm::Sha256,
            salt: [0; 8],
            count_byte: 0xE0,
        };
        // (16 + 0) << (14 + 6)
        assert_eq!(s2k.byte_count(), 16 << 20);
    }
}
