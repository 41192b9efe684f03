//! Cryptographic provider: the seam between the pipelines and the
//! primitive implementations.
//!
//! The pipelines only ever talk to the [`CryptoProvider`] trait, so the
//! primitives can be swapped out in one place (tests substitute a
//! deterministic provider to get reproducible ciphertext). The default
//! [`StandardProvider`] is backed by the RustCrypto crates: `aes` +
//! `cfb-mode` for the symmetric layer, `sha1`/`sha2` for digests, and
//! `rsa` for the asymmetric operations.

use aes::{Aes128, Aes192, Aes256};
use cfb_mode::cipher::KeyIvInit;
use cfb_mode::{BufDecryptor, BufEncryptor};
use rand::RngCore;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, Pkcs1v15Encrypt, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::key::PublicParams;
use crate::types::{HashAlgorithm, SymmetricAlgorithm};
use crate::unlock::PrivateOperator;

/// Incremental hash computation.
pub trait DigestSink: Send {
    /// Feed data into the hash.
    fn update(&mut self, data: &[u8]);
    /// Consume the sink and produce the digest.
    fn finish(self: Box<Self>) -> Vec<u8>;
}

/// Stateful CFB keystream over a byte stream; encrypts or decrypts
/// `data` in place, carrying state across calls.
pub trait SymmetricCipher: Send {
    /// Transform the next span of the stream in place.
    fn process(&mut self, data: &mut [u8]);
}

/// The primitive operations the pipelines need.
pub trait CryptoProvider: Send + Sync {
    /// Fill `buf` with cryptographically secure random bytes.
    fn random(&self, buf: &mut [u8]);

    /// Start an incremental hash.
    fn digest(&self, algo: HashAlgorithm) -> Box<dyn DigestSink>;

    /// CFB encryptor keyed with `key` and `iv`.
    fn encryptor(
        &self,
        algo: SymmetricAlgorithm,
        key: &[u8],
        iv: &[u8],
    ) -> Result<Box<dyn SymmetricCipher>>;

    /// CFB decryptor keyed with `key` and `iv`.
    fn decryptor(
        &self,
        algo: SymmetricAlgorithm,
        key: &[u8],
        iv: &[u8],
    ) -> Result<Box<dyn SymmetricCipher>>;

    /// Encrypt a session-key payload to a public key (PKCS#1 v1.5).
    fn encrypt_to_key(&self, params: &PublicParams, payload: &[u8]) -> Result<Vec<u8>>;

    /// Decrypt a session-key payload with an unlocked private key.
    fn decrypt_with_key(&self, operator: &PrivateOperator, ciphertext: &[u8]) -> Result<Vec<u8>>;

    /// Sign a digest with an unlocked private key (PKCS#1 v1.5).
    fn sign_digest(
        &self,
        operator: &PrivateOperator,
        algo: HashAlgorithm,
        digest: &[u8],
    ) -> Result<Vec<u8>>;

    /// Verify a signature over a digest against a public key.
    ///
    /// Returns `SignatureInvalid` when the signature does not match.
    fn verify_digest(
        &self,
        params: &PublicParams,
        algo: HashAlgorithm,
        digest: &[u8],
        signature: &[u8],
    ) -> Result<()>;
}

/// Default provider backed by the RustCrypto implementations.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardProvider;

/// Read adapter applying a CFB keystream to everything passing through.
pub(crate) struct CipherReader<R: std::io::Read> {
    pub(crate) inner: R,
    pub(crate) cipher: Box<dyn SymmetricCipher>,
}

impl<R: std::io::Read> std::io::Read for CipherReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.cipher.process(&mut buf[..n]);
        }
        Ok(n)
    }
}

enum StandardDigest {
    Sha1(Sha1),
    Sha256(Sha256),
}

impl DigestSink for StandardDigest {
    fn update(&mut self, data: &[u8]) {
        match self {
            StandardDigest::Sha1(h) => h.update(data),
            StandardDigest::Sha256(h) => h.update(data),
        }
    }

    fn finish(self: Box<Self>) -> Vec<u8> {
        match *self {
            StandardDigest::Sha1(h) => h.finalize().to_vec(),
            StandardDigest::Sha256(h) => h.finalize().to_vec(),
        }
    }
}

enum CfbCipher {
    EncAes128(BufEncryptor<Aes128>),
    EncAes192(BufEncryptor<Aes192>),
    EncAes256(BufEncryptor<Aes256>),
    DecAes128(BufDecryptor<Aes128>),
    DecAes192(BufDecryptor<Aes192>),
    DecAes256(BufDecryptor<Aes256>),
}

impl SymmetricCipher for CfbCipher {
    fn process(&mut self, data: &mut [u8]) {
        match self {
            CfbCipher::EncAes128(c) => c.encrypt(data),
            CfbCipher::EncAes192(c) => c.encrypt(data),
            CfbCipher::EncAes256(c) => c.encrypt(data),
            CfbCipher::DecAes128(c) => c.decrypt(data),
            CfbCipher::DecAes192(c) => c.decrypt(data),
            CfbCipher::DecAes256(c) => c.decrypt(data),
        }
    }
}

fn bad_key(e: impl std::fmt::Display) -> Error {
    Error::Crypto(format!("cipher initialisation failed: {e}"))
}

impl CryptoProvider for StandardProvider {
    fn random(&self, buf: &mut [u8]) {
        rand::thread_rng().fill_bytes(buf);
    }

    fn digest(&self, algo: HashAlgorithm) -> Box<dyn DigestSink> {
        match algo {
            HashAlgorithm::Sha1 => Box::new(StandardDigest::Sha1(Sha1::new())),
            HashAlgorithm::Sha256 => Box::new(StandardDigest::Sha256(Sha256::new())),
        }
    }

    fn encryptor(
        &self,
        algo: SymmetricAlgorithm,
        key: &[u8],
        iv: &[u8],
    ) -> Result<Box<dyn SymmetricCipher>> {
        let cipher = match algo {
            SymmetricAlgorithm::Aes128 => {
                CfbCipher::EncAes128(BufEncryptor::new_from_slices(key, iv).map_err(bad_key)?)
            }
            SymmetricAlgorithm::Aes192 => {
                CfbCipher::EncAes192(BufEncryptor::new_from_slices(key, iv).map_err(bad_key)?)
            }
            SymmetricAlgorithm::Aes256 => {
                CfbCipher::EncAes256(BufEncryptor::new_from_slices(key, iv).map_err(bad_key)?)
            }
        };
        Ok(Box::new(cipher))
    }

    fn decryptor(
        &self,
        algo: SymmetricAlgorithm,
        key: &[u8],
        iv: &[u8],
    ) -> Result<Box<dyn SymmetricCipher>> {
        let cipher = match algo {
            SymmetricAlgorithm::Aes128 => {
                CfbCipher::DecAes128(BufDecryptor::new_from_slices(key, iv).map_err(bad_key)?)
            }
            SymmetricAlgorithm::Aes192 => {
                CfbCipher::DecAes192(BufDecryptor::new_from_slices(key, iv).map_err(bad_key)?)
            }
            SymmetricAlgorithm::Aes256 => {
                CfbCipher::DecAes256(BufDecryptor::new_from_slices(key, iv).map_err(bad_key)?)
            }
        };
        Ok(Box::new(cipher))
    }

    fn encrypt_to_key(&self, params: &PublicParams, payload: &[u8]) -> Result<Vec<u8>> {
        let key = rsa_public(params)?;
        key.encrypt(&mut rand::thread_rng(), Pkcs1v15Encrypt, payload)
            .map_err(|e| Error::Crypto(format!("session-key encryption failed: {e}")))
    }

    fn decrypt_with_key(&self, operator: &PrivateOperator, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let key = rsa_private(operator)?;
        key.decrypt(Pkcs1v15Encrypt, ciphertext)
            .map_err(|e| Error::Crypto(format!("session-key decryption failed: {e}")))
    }

    fn sign_digest(
        &self,
        operator: &PrivateOperator,
        algo: HashAlgorithm,
        digest: &[u8],
    ) -> Result<Vec<u8>> {
        let key = rsa_private(operator)?;
        key.sign(pkcs1v15_scheme(algo), digest)
            .map_err(|e| Error::Crypto(format!("signing failed: {e}")))
    }

    fn verify_digest(
        &self,
        params: &PublicParams,
        algo: HashAlgorithm,
        digest: &[u8],
        signature: &[u8],
    ) -> Result<()> {
        let key = rsa_public(params)?;
        // The MPI form strips leading zeros; PKCS#1 verification expects
        // the signature left-padded to the modulus size.
        let size = key.size();
        let mut padded;
        let signature = if signature.len() < size {
            padded = vec![0u8; size - signature.len()];
            padded.extend_from_slice(signature);
            &padded[..]
        } else {
            signature
        };
        key.verify(pkcs1v15_scheme(algo), digest, signature)
            .map_err(|e| Error::SignatureInvalid(format!("rsa verification failed: {e}")))
    }
}

fn pkcs1v15_scheme(algo: HashAlgorithm) -> Pkcs1v15Sign {
    match algo {
        HashAlgorithm::Sha1 => Pkcs1v15Sign::new::<Sha1>(),
        HashAlgorithm::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
    }
}

fn rsa_public(params: &PublicParams) -> Result<RsaPublicKey> {
    let PublicParams::Rsa { n, e } = params;
    RsaPublicKey::new(BigUint::from_bytes_be(n), BigUint::from_bytes_be(e))
        .map_err(|e| Error::CorruptKeyMaterial(format!("invalid RSA public key: {e}")))
}

fn rsa_private(operator: &PrivateOperator) -> Result<RsaPrivateKey> {
    RsaPrivateKey::from_components(
        BigUint::from_bytes_be(operator.modulus()),
        BigUint::from_bytes_be(operator.public_exponent()),
        BigUint::from_bytes_be(operator.private_exponent()),
        vec![
            BigUint::from_bytes_be(operator.prime_p()),
            BigUint::from_bytes_be(operator.prime_q()),
        ],
    )
    .map_err(|e| Error::CorruptKeyMaterial(format!("invalid RSA private key: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_matches_one_shot() {
        let provider = StandardProvider;
        let mut sink = provider.digest(HashAlgorithm::Sha256);
        sink.update(b"hello ");
        sink.update(b"world");
        assert_eq!(sink.finish(), Sha256::digest(b"hello world").to_vec());
    }

    #[test]
    fn test_cfb_round_trip_across_calls() {
        let provider = StandardProvider;
        let key = [0x42u8; 32];
        let iv = [0u8; 16];
        let plaintext = b"attack at dawn, hold until the signal".to_vec();

        let mut buf = plaintext.clone();
        let mut enc = provider
            .encryptor(SymmetricAlgorithm::Aes256, &key, &iv)
            .unwrap();
        // Split at an odd offset so the keystream must carry state.
        let (a, b) = buf.split_at_mut(7);
        enc.process(a);
        enc.process(b);
        assert_ne!(buf, plaintext);

        let mut dec = provider
            .decryptor(SymmetricAlgorithm::Aes256, &key, &iv)
            .unwrap();
        let (a, b) = buf.split_at_mut(19);
        dec.process(a);
        dec.process(b);
        assert_eq!(buf, plaintext);
    }

    #[test]
    fn test_random_is_not_constant() {
        let provider = StandardProvider;
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        provider.random(&mut a);
        provider.random(&mut b);
        assert_ne!(a, b);
    }
}
