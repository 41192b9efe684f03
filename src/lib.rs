//! # StreamPGP
//!
//! A streaming OpenPGP library: encrypt-and-sign and decrypt-and-verify
//! pipelines assembled with fluent builders over any [`std::io::Read`].
//!
//! This library provides:
//!
//! - **Encryption pipelines**: Encrypt to one or multiple recipients,
//!   with optional signing, compression, and ASCII armor
//! - **Decryption pipelines**: Decrypt and verify in one streaming pass,
//!   with armor detection and a configurable signature policy
//! - **Keyrings**: Load, query, and export collections of keys in the
//!   OpenPGP exchange format (armored or binary)
//! - **Key selection**: Deterministic capability-based (sub)key choice
//! - **Secret-key protection**: Passphrase-protected keys (iterated and
//!   salted S2K) unlocked on demand
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::io::Read;
//! use streampgp::*;
//!
//! # fn demo(public: &[u8], secret: &[u8], message: &[u8]) -> Result<()> {
//! let mut ring = Keyring::from_public_bytes(public)?;
//! ring.import_secret_bytes(secret)?;
//!
//! // Encrypt and sign.
//! let mut pipeline = EncryptionPipelineBuilder::new(&ring)
//!     .signed_by("alice@example.com")
//!     .signer_passphrase("correct horse")
//!     .armored(true)
//!     .to_recipient("bob@example.com")?
//!     .build(message)?;
//! let mut ciphertext = Vec::new();
//! pipeline.read_to_end(&mut ciphertext)?;
//!
//! // Decrypt and verify.
//! let mut pipeline = DecryptionPipelineBuilder::new(&ring)
//!     .passphrase("correct horse")
//!     .signature_policy(SignaturePolicy::RequireValid)
//!     .build(&ciphertext[..])?;
//! let mut plaintext = Vec::new();
//! pipeline.read_to_end(&mut plaintext)?;
//! let verification = pipeline.finish()?;
//! assert_eq!(verification.validity, Validity::Valid);
//! # Ok(())
//! # }
//! ```
//!
//! ## Design
//!
//! Every pipeline stage is a pull-based [`std::io::Read`] adapter, so
//! messages of any size stream through without being buffered whole;
//! bodies whose length is not known upfront are emitted as
//! partial-length chunks. Because signatures trail the signed data in
//! the packet sequence, the verification outcome of an inbound pipeline
//! is only available from [`DecryptionPipeline::finish`] after the
//! stream has been consumed.

// Modules
mod error;
mod internal;
mod types;

mod armor;
mod decrypt;
mod encrypt;
mod key;
mod keyring;
mod packet;
mod provider;
mod select;
mod unlock;

// Re-export error types
pub use error::{Error, Result};

// Re-export all public types
pub use types::{
    CompressionAlgorithm,
    HashAlgorithm,
    KeyFlags,
    Purpose,
    SignaturePolicy,
    SymmetricAlgorithm,
    Validity,
    VerificationResult,
};

// Re-export key material and keyring types
pub use key::{
    BlobIntegrity,
    Fingerprint,
    KeyId,
    KeyMaterial,
    PublicParams,
    S2k,
    SecretMpis,
    SecretParams,
};
pub use keyring::{KeyNode, Keyring, Role};

// Re-export key selection
pub use select::{find_decryption_key, select, SelectionPolicy, TieBreak};

// Re-export secret-key protection
pub use unlock::{protect, PrivateOperator, SecretKeyUnlocker};

// Re-export the provider seam
pub use provider::{CryptoProvider, DigestSink, StandardProvider, SymmetricCipher};

// Re-export armor helpers
pub use armor::{armor_bytes, dearmor_bytes, is_armored, ArmorDecoder, ArmorEncoder, ArmorKind};

// Re-export the pipelines
pub use decrypt::{recipients_of, DecryptionPipeline, DecryptionPipelineBuilder};
pub use encrypt::{EncryptionPipeline, EncryptionPipelineBuilder, ReadyEncryptionPipelineBuilder};
