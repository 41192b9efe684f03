//! Unlocking protected secret keys.
//!
//! [`SecretKeyUnlocker`] turns stored [`SecretParams`] into a usable
//! [`PrivateOperator`]: for protected material it derives the wrapping
//! key from the passphrase (iterated and salted S2K), decrypts the MPI
//! blob in CFB mode and verifies the integrity trailer before anything
//! else sees the plaintext. A failed trailer check means the passphrase
//! was wrong; an unparsable plaintext after a good check means the
//! stored material itself is damaged.

use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::internal::simple_checksum;
use crate::key::{BlobIntegrity, KeyMaterial, PublicParams, S2k, SecretMpis, SecretParams};
use crate::provider::CryptoProvider;
use crate::types::{HashAlgorithm, SymmetricAlgorithm};

/// An unlocked private key, ready for signing and session-key
/// decryption. The secret parameters are zeroized when this is dropped.
pub struct PrivateOperator {
    n: Vec<u8>,
    e: Vec<u8>,
    mpis: SecretMpis,
}

impl PrivateOperator {
    pub(crate) fn new(params: &PublicParams, mpis: SecretMpis) -> Self {
        let PublicParams::Rsa { n, e } = params;
        Self {
            n: n.clone(),
            e: e.clone(),
            mpis,
        }
    }

    pub(crate) fn modulus(&self) -> &[u8] {
        &self.n
    }

    pub(crate) fn public_exponent(&self) -> &[u8] {
        &self.e
    }

    pub(crate) fn private_exponent(&self) -> &[u8] {
        &self.mpis.d
    }

    pub(crate) fn prime_p(&self) -> &[u8] {
        &self.mpis.p
    }

    pub(crate) fn prime_q(&self) -> &[u8] {
        &self.mpis.q
    }
}

impl std::fmt::Debug for PrivateOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PrivateOperator(..)")
    }
}

/// Derive a symmetric key from a passphrase (RFC 4880 section 3.7.1.3).
///
/// When the requested key is longer than one digest, further contexts
/// are hashed with an increasing number of zero-octet prefixes and the
/// digests concatenated.
pub(crate) fn s2k_derive(
    s2k: &S2k,
    passphrase: &[u8],
    key_len: usize,
    provider: &dyn CryptoProvider,
) -> Zeroizing<Vec<u8>> {
    let mut material = Vec::with_capacity(s2k.salt.len() + passphrase.len());
    material.extend_from_slice(&s2k.salt);
    material.extend_from_slice(passphrase);
    let material = Zeroizing::new(material);
    let total = s2k.byte_count().max(material.len());

    let mut key = Zeroizing::new(Vec::with_capacity(key_len));
    let mut context = 0usize;
    while key.len() < key_len {
        let mut sink = provider.digest(s2k.hash);
        for _ in 0..context {
            sink.update(&[0]);
        }
        let mut fed = 0usize;
        while fed < total {
            let take = material.len().min(total - fed);
            sink.update(&material[..take]);
            fed += take;
        }
        key.extend_from_slice(&sink.finish());
        context += 1;
    }
    key.truncate(key_len);
    key
}

/// Turns secret key material into a [`PrivateOperator`].
#[derive(Default)]
pub struct SecretKeyUnlocker {
    passphrase: Option<Zeroizing<Vec<u8>>>,
}

impl SecretKeyUnlocker {
    /// An unlocker without a passphrase; only unprotected material can
    /// be unlocked.
    pub fn new() -> Self {
        Self::default()
    }

    /// An unlocker holding a passphrase. The copy is zeroized on drop.
    pub fn with_passphrase(passphrase: &str) -> Self {
        Self {
            passphrase: Some(Zeroizing::new(passphrase.as_bytes().to_vec())),
        }
    }

    /// Unlock the secret parameters of `key`.
    ///
    /// Unprotected material unlocks regardless of whether a passphrase
    /// was supplied. Protected material requires one; a wrong passphrase
    /// surfaces as [`Error::WrongPassphrase`].
    pub fn unlock(&self, key: &KeyMaterial, provider: &dyn CryptoProvider) -> Result<PrivateOperator> {
        let params = key.secret_params.as_ref().ok_or_else(|| {
            Error::NoMatchingSecretKey(format!("key {} has no secret material", key.fingerprint))
        })?;
        match params {
            SecretParams::Unprotected { mpis } => {
                Ok(PrivateOperator::new(&key.public_params, mpis.clone()))
            }
            SecretParams::Protected {
                sym,
                s2k,
                iv,
                blob,
                integrity,
            } => {
                let passphrase = self.passphrase.as_ref().ok_or_else(|| {
                    Error::InvalidInput(format!(
                        "key {} is passphrase-protected but no passphrase was supplied",
                        key.fingerprint
                    ))
                })?;
                let mpis = decrypt_blob(*sym, s2k, iv, blob, *integrity, passphrase, provider)?;
                Ok(PrivateOperator::new(&key.public_params, mpis))
            }
        }
    }
}

fn decrypt_blob(
    sym: SymmetricAlgorithm,
    s2k: &S2k,
    iv: &[u8],
    blob: &[u8],
    integrity: BlobIntegrity,
    passphrase: &[u8],
    provider: &dyn CryptoProvider,
) -> Result<SecretMpis> {
    let wrap_key = s2k_derive(s2k, passphrase, sym.key_size(), provider);
    let mut plain = Zeroizing::new(blob.to_vec());
    provider.decryptor(sym, &wrap_key, iv)?.process(&mut plain);

    let trailer_len = match integrity {
        BlobIntegrity::Sha1 => 20,
        BlobIntegrity::Checksum => 2,
    };
    if plain.len() < trailer_len + 2 {
        return Err(Error::CorruptKeyMaterial("protected blob too short".into()));
    }
    let (mpi_area, trailer) = plain.split_at(plain.len() - trailer_len);

    let ok = match integrity {
        BlobIntegrity::Sha1 => {
            let mut sink = provider.digest(HashAlgorithm::Sha1);
            sink.update(mpi_area);
            bool::from(sink.finish()[..].ct_eq(trailer))
        }
        BlobIntegrity::Checksum => {
            bool::from(simple_checksum(mpi_area).to_be_bytes()[..].ct_eq(trailer))
        }
    };
    if !ok {
        return Err(Error::WrongPassphrase);
    }

    SecretMpis::from_mpi_bytes(mpi_area)
        .map_err(|_| Error::CorruptKeyMaterial("unparsable secret MPIs after unlock".into()))
}

/// Protect secret MPIs under a passphrase, producing stored parameters
/// that [`SecretKeyUnlocker`] can open again.
///
/// Uses AES-256 with a SHA-256 S2K and a SHA-1 integrity trailer, and
/// draws the salt and IV from the provider.
pub fn protect(
    mpis: &SecretMpis,
    passphrase: &str,
    provider: &dyn CryptoProvider,
) -> Result<SecretParams> {
    let sym = SymmetricAlgorithm::Aes256;
    let mut salt = [0u8; 8];
    provider.random(&mut salt);
    let mut iv = vec![0u8; sym.block_size()];
    provider.random(&mut iv);
    let s2k = S2k {
        hash: HashAlgorithm::Sha256,
        salt,
        // 65536 << 6 hashed octets, the conventional middle ground
        count_byte: 0x60,
    };

    let wrap_key = s2k_derive(&s2k, passphrase.as_bytes(), sym.key_size(), provider);
    let mut blob = mpis.to_mpi_bytes();
    let mut sink = provider.digest(HashAlgorithm::Sha1);
    sink.update(&blob);
    blob.extend_from_slice(&sink.finish());
    provider.encryptor(sym, &wrap_key, &iv)?.process(&mut blob);

    Ok(SecretParams::Protected {
        sym,
        s2k,
        iv,
        blob,
        integrity: BlobIntegrity::Sha1,
    })
}
