//! Public type definitions for the streampgp library.
//!
//! This module contains the data structures shared by the pipelines:
//! algorithm identifiers, capability flags, signature policies, and the
//! verification result delivered when an inbound stream completes.

use crate::error::{Error, Result};

/// Capability flags of a key or subkey.
///
/// A subkey may only carry `encrypt` and/or `sign`; `certify` is reserved
/// for primary keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyFlags {
    /// Key may encrypt session keys
    pub encrypt: bool,
    /// Key may create data signatures
    pub sign: bool,
    /// Key may certify other keys (primary keys only)
    pub certify: bool,
}

impl KeyFlags {
    /// Flags for a conventional primary key (sign + certify).
    pub fn primary() -> Self {
        Self {
            encrypt: false,
            sign: true,
            certify: true,
        }
    }

    /// Flags for a conventional encryption subkey.
    pub fn encryption_subkey() -> Self {
        Self {
            encrypt: true,
            sign: false,
            certify: false,
        }
    }

    /// Flags for a signing subkey.
    pub fn signing_subkey() -> Self {
        Self {
            encrypt: false,
            sign: true,
            certify: false,
        }
    }

    /// Parse from the RFC 4880 key-flags subpacket bitmask.
    pub fn from_bitmask(mask: u8) -> Self {
        Self {
            certify: (mask & 0x01) != 0,
            sign: (mask & 0x02) != 0,
            encrypt: (mask & 0x0C) != 0,
        }
    }

    /// Convert to the RFC 4880 key-flags subpacket bitmask.
    pub fn to_bitmask(&self) -> u8 {
        let mut mask = 0u8;
        if self.certify {
            mask |= 0x01;
        }
        if self.sign {
            mask |= 0x02;
        }
        if self.encrypt {
            // encrypt-communications and encrypt-storage
            mask |= 0x0C;
        }
        mask
    }

    /// True if no capability is set.
    pub fn is_empty(&self) -> bool {
        !(self.encrypt || self.sign || self.certify)
    }
}

/// The purpose a key is selected for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    /// Encrypt a session key to a recipient
    Encrypt,
    /// Create a data signature
    Sign,
    /// Decrypt an inbound session key
    Decrypt,
}

impl std::fmt::Display for Purpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Purpose::Encrypt => write!(f, "encrypt"),
            Purpose::Sign => write!(f, "sign"),
            Purpose::Decrypt => write!(f, "decrypt"),
        }
    }
}

/// Policy applied to the trailing signature of a decrypted message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SignaturePolicy {
    /// Verify a signature if one is present, pass otherwise (default)
    #[default]
    VerifyIfPresent,
    /// Fail unless a valid signature is present (absent counts as invalid)
    RequireValid,
    /// Fail unless a valid signature from the given identity is present
    RequireFrom(String),
    /// Never inspect signature state
    Ignore,
}

/// Validity of the signature on a consumed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    /// Signature present and cryptographically valid
    Valid,
    /// Signature present but did not verify
    Invalid,
    /// Signature present but the signer is not in the keyring
    SignerUnknown,
    /// No signature in the message
    Absent,
}

/// Verification outcome of an inbound pipeline.
///
/// Signatures trail the signed data in the OpenPGP packet sequence, so
/// this is only available once the stream has been fully consumed; see
/// [`DecryptionPipeline::finish`](crate::DecryptionPipeline::finish).
#[derive(Debug, Clone)]
pub struct VerificationResult {
    /// Whether the message carried a signature at all
    pub signature_present: bool,
    /// Resolved signer identity, if the signer was found in the keyring
    pub signer: Option<String>,
    /// Validity of the signature
    pub validity: Validity,
}

impl VerificationResult {
    pub(crate) fn absent() -> Self {
        Self {
            signature_present: false,
            signer: None,
            validity: Validity::Absent,
        }
    }
}

/// Symmetric cipher used for the encrypted data packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SymmetricAlgorithm {
    /// AES with a 128-bit key
    Aes128,
    /// AES with a 192-bit key
    Aes192,
    /// AES with a 256-bit key (default)
    #[default]
    Aes256,
}

impl SymmetricAlgorithm {
    /// RFC 4880 algorithm id.
    pub fn id(&self) -> u8 {
        match self {
            SymmetricAlgorithm::Aes128 => 7,
            SymmetricAlgorithm::Aes192 => 8,
            SymmetricAlgorithm::Aes256 => 9,
        }
    }

    /// Key size in bytes.
    pub fn key_size(&self) -> usize {
        match self {
            SymmetricAlgorithm::Aes128 => 16,
            SymmetricAlgorithm::Aes192 => 24,
            SymmetricAlgorithm::Aes256 => 32,
        }
    }

    /// Cipher block size in bytes (16 for all AES variants).
    pub fn block_size(&self) -> usize {
        16
    }

    /// Look up an algorithm by its RFC 4880 id.
    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            7 => Ok(SymmetricAlgorithm::Aes128),
            8 => Ok(SymmetricAlgorithm::Aes192),
            9 => Ok(SymmetricAlgorithm::Aes256),
            other => Err(Error::UnsupportedAlgorithm(format!(
                "symmetric algorithm {other}"
            ))),
        }
    }
}

/// Hash algorithm used for signatures, S2K and the integrity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    /// SHA-1: fingerprints, MDC, legacy S2K
    Sha1,
    /// SHA-256: data signatures and default S2K
    Sha256,
}

impl HashAlgorithm {
    /// RFC 4880 algorithm id.
    pub fn id(&self) -> u8 {
        match self {
            HashAlgorithm::Sha1 => 2,
            HashAlgorithm::Sha256 => 8,
        }
    }

    /// Digest size in bytes.
    pub fn digest_size(&self) -> usize {
        match self {
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha256 => 32,
        }
    }

    /// Look up an algorithm by its RFC 4880 id.
    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            2 => Ok(HashAlgorithm::Sha1),
            8 => Ok(HashAlgorithm::Sha256),
            other => Err(Error::UnsupportedAlgorithm(format!("hash algorithm {other}"))),
        }
    }
}

/// Compression applied inside the encryption layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionAlgorithm {
    /// No compression
    Uncompressed,
    /// Raw DEFLATE ("ZIP", RFC 1951), what GPG emits by default
    Zip,
    /// ZLIB (RFC 1950, default for outbound messages)
    #[default]
    Zlib,
}

impl CompressionAlgorithm {
    /// RFC 4880 algorithm id.
    pub fn id(&self) -> u8 {
        match self {
            CompressionAlgorithm::Uncompressed => 0,
            CompressionAlgorithm::Zip => 1,
            CompressionAlgorithm::Zlib => 2,
        }
    }

    /// Look up an algorithm by its RFC 4880 id.
    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            0 => Ok(CompressionAlgorithm::Uncompressed),
            1 => Ok(CompressionAlgorithm::Zip),
            2 => Ok(CompressionAlgorithm::Zlib),
            other => Err(Error::UnsupportedAlgorithm(format!(
                "compression algorithm {other}"
            ))),
        }
    }
}
