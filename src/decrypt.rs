//! Inbound pipeline: decrypt-and-verify.
//!
//! `build` reads the message head eagerly (armor detection, session-key
//! packets, the encrypted packet header), so key-material problems
//! surface as typed errors before any plaintext is produced. Reading
//! the pipeline then yields the literal data as it is decrypted and
//! decompressed; nothing buffers the whole message.
//!
//! Signatures trail the signed data in the packet sequence, so the
//! verification outcome only exists once the stream has been consumed:
//! [`DecryptionPipeline::finish`] drains the remainder, checks the
//! modification detection code, verifies the trailing signature and
//! applies the configured [`SignaturePolicy`]. A tampered ciphertext
//! also fails the final `read` with an error, so a caller that never
//! calls `finish` still cannot mistake damaged plaintext for good.

use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use subtle::ConstantTimeEq;
use tracing::debug;
use zeroize::Zeroizing;

use crate::armor::{is_armored, ArmorDecoder};
use crate::error::{Error, Result};
use crate::internal::{read_array, read_u8, simple_checksum};
use crate::key::{KeyId, PK_ALGO_RSA};
use crate::keyring::{Keyring, Role};
use crate::packet::{
    read_header, BodyReader, OnePassSignature, PacketHeader, Pkesk, SignaturePacket, Tag,
};
use crate::provider::{CipherReader, CryptoProvider, DigestSink, StandardProvider};
use crate::select::find_decryption_key;
use crate::types::{
    CompressionAlgorithm, HashAlgorithm, SignaturePolicy, SymmetricAlgorithm, Validity,
    VerificationResult,
};
use crate::unlock::SecretKeyUnlocker;

/// Builder for the inbound pipeline.
pub struct DecryptionPipelineBuilder<'a> {
    ring: &'a Keyring,
    provider: Box<dyn CryptoProvider>,
    unlocker: SecretKeyUnlocker,
    policy: SignaturePolicy,
}

impl<'a> DecryptionPipelineBuilder<'a> {
    /// Start a builder decrypting against `ring`.
    pub fn new(ring: &'a Keyring) -> Self {
        Self {
            ring,
            provider: Box::new(StandardProvider),
            unlocker: SecretKeyUnlocker::new(),
            policy: SignaturePolicy::default(),
        }
    }

    /// Substitute the cryptographic provider.
    pub fn provider(mut self, provider: Box<dyn CryptoProvider>) -> Self {
        self.provider = provider;
        self
    }

    /// Passphrase for protected secret keys.
    pub fn passphrase(mut self, passphrase: &str) -> Self {
        self.unlocker = SecretKeyUnlocker::with_passphrase(passphrase);
        self
    }

    /// Policy applied to the message signature at close.
    pub fn signature_policy(mut self, policy: SignaturePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Open the message head and wire the pipeline over `source`.
    ///
    /// Armor is detected automatically. Fails here, before any
    /// plaintext exists, when no session-key packet names a key in the
    /// ring ([`Error::NoMatchingSecretKey`]) or the passphrase is wrong.
    pub fn build<R: Read + 'a>(self, source: R) -> Result<DecryptionPipeline<'a>> {
        let mut raw: Box<dyn Read + 'a> = {
            let mut buffered = BufReader::new(source);
            if is_armored(buffered.fill_buf()?) {
                Box::new(ArmorDecoder::new(buffered))
            } else {
                Box::new(buffered)
            }
        };

        // Session-key packets up to the encrypted data packet.
        let mut pkesks = Vec::new();
        let seipd_length = loop {
            let header = read_header(&mut raw)?.ok_or_else(|| {
                Error::MalformedPacketStream("message ended before encrypted data".into())
            })?;
            match header.tag {
                Tag::Pkesk => {
                    let body = BodyReader::new(&mut raw, header.length).read_to_vec()?;
                    pkesks.push(Pkesk::parse(&body)?);
                }
                Tag::Marker | Tag::Trust => {
                    BodyReader::new(&mut raw, header.length).read_to_vec()?;
                }
                Tag::Seipd => break header.length,
                Tag::SymEncryptedData => {
                    return Err(Error::UnsupportedAlgorithm(
                        "symmetrically encrypted data without integrity protection".into(),
                    ))
                }
                other => {
                    return Err(Error::MalformedPacketStream(format!(
                        "unexpected {other:?} packet before encrypted data"
                    )))
                }
            }
        };
        if pkesks.is_empty() {
            return Err(Error::MalformedPacketStream(
                "no session-key packets before encrypted data".into(),
            ));
        }

        let (sym, session_key) =
            recover_session_key(self.ring, &self.unlocker, self.provider.as_ref(), &pkesks)?;
        debug!(algo = sym.id(), "session key recovered");

        let mut body = BodyReader::new(raw, seipd_length);
        let version = read_u8(&mut body, "encrypted data packet")?;
        if version != 1 {
            return Err(Error::UnsupportedAlgorithm(format!(
                "integrity-protected packet version {version}"
            )));
        }
        let cipher =
            self.provider
                .decryptor(sym, &session_key, &vec![0u8; sym.block_size()])?;
        let mut decrypted = CipherReader {
            inner: body,
            cipher,
        };

        // Random prefix with its two repeated octets: the quick check
        // that the recovered session key actually fits this message.
        let block = sym.block_size();
        let mut prefix = vec![0u8; block + 2];
        decrypted.read_exact(&mut prefix).map_err(|_| {
            Error::MalformedPacketStream("encrypted data shorter than its prefix".into())
        })?;
        if prefix[block - 2..block] != prefix[block..] {
            return Err(Error::Crypto("session key quick check failed".into()));
        }
        let mut mdc_sink = self.provider.digest(HashAlgorithm::Sha1);
        mdc_sink.update(&prefix);
        let mut verifier = MdcVerifier::new(decrypted, mdc_sink)?;

        // The plaintext is either a compressed packet wrapping the
        // message or the message packets directly.
        let first = read_header(&mut verifier)?
            .ok_or_else(|| Error::MalformedPacketStream("empty decrypted message".into()))?;
        let (mut content, mut pending) = if first.tag == Tag::CompressedData {
            let mut body = BodyReader::new(verifier, first.length);
            let algo =
                CompressionAlgorithm::from_id(read_u8(&mut body, "compressed data packet")?)?;
            let content = match algo {
                CompressionAlgorithm::Zlib => {
                    ContentStream::Zlib(flate2::read::ZlibDecoder::new(body))
                }
                CompressionAlgorithm::Zip => {
                    ContentStream::Zip(flate2::read::DeflateDecoder::new(body))
                }
                CompressionAlgorithm::Uncompressed => ContentStream::Stored(body),
            };
            (content, None)
        } else {
            (ContentStream::Plain(verifier), Some(first))
        };

        // Message packets up to the literal data.
        let mut one_pass = Vec::new();
        let mut leading_sigs = Vec::new();
        let mut literal = loop {
            let header = match pending.take() {
                Some(header) => header,
                None => read_header(&mut content)?.ok_or_else(|| {
                    Error::MalformedPacketStream("no literal data packet in message".into())
                })?,
            };
            match header.tag {
                Tag::OnePassSignature => {
                    let body = BodyReader::new(&mut content, header.length).read_to_vec()?;
                    one_pass.push(OnePassSignature::parse(&body)?);
                }
                Tag::Signature => {
                    let body = BodyReader::new(&mut content, header.length).read_to_vec()?;
                    leading_sigs.push(SignaturePacket::parse(&body)?);
                }
                Tag::Marker => {
                    BodyReader::new(&mut content, header.length).read_to_vec()?;
                }
                Tag::CompressedData => {
                    return Err(Error::MalformedPacketStream(
                        "nested compressed data packet".into(),
                    ))
                }
                Tag::LiteralData => break BodyReader::new(content, header.length),
                other => {
                    return Err(Error::MalformedPacketStream(format!(
                        "unexpected {other:?} packet before literal data"
                    )))
                }
            }
        };

        // Literal header: format, filename, date. All recorded but only
        // the payload matters to the stream.
        let _format = read_u8(&mut literal, "literal data packet")?;
        let name_len = read_u8(&mut literal, "literal data packet")? as usize;
        let mut name = vec![0u8; name_len];
        literal
            .read_exact(&mut name)
            .map_err(|_| Error::MalformedPacketStream("truncated literal data header".into()))?;
        let _date = read_array::<_, 4>(&mut literal)?;

        // Hash the data for verification when the message announces a
        // signature up front.
        let data_sink = one_pass
            .first()
            .map(|op| op.hash_algo)
            .or_else(|| leading_sigs.first().map(|sig| sig.hash_algo))
            .map(|algo| self.provider.digest(algo));

        Ok(DecryptionPipeline {
            state: PipeState::Streaming(literal),
            one_pass,
            leading_sigs,
            data_sink,
            policy: self.policy,
            ring: self.ring,
            provider: self.provider,
            outcome: None,
        })
    }

    /// Decrypt `input` into `output` (file convenience).
    pub fn build_file(self, input: &Path, output: &Path) -> Result<VerificationResult> {
        let source = std::fs::File::open(input)?;
        let mut pipeline = self.build(source)?;
        let mut sink = std::fs::File::create(output)?;
        std::io::copy(&mut pipeline, &mut sink).map_err(Error::from_io)?;
        pipeline.finish()
    }
}

/// List the key ids a message is encrypted to, without decrypting it.
///
/// Reads the session-key packets off the head of `source`; armor is
/// detected automatically. An all-zero key id is an anonymous
/// recipient.
pub fn recipients_of<R: Read>(source: R) -> Result<Vec<KeyId>> {
    let mut raw: Box<dyn Read> = {
        let mut buffered = BufReader::new(source);
        if is_armored(buffered.fill_buf()?) {
            Box::new(ArmorDecoder::new(buffered))
        } else {
            Box::new(buffered)
        }
    };
    let mut ids = Vec::new();
    loop {
        let header = read_header(&mut raw)?.ok_or_else(|| {
            Error::MalformedPacketStream("message ended before encrypted data".into())
        })?;
        match header.tag {
            Tag::Pkesk => {
                let body = BodyReader::new(&mut raw, header.length).read_to_vec()?;
                ids.push(Pkesk::parse(&body)?.key_id);
            }
            Tag::Marker | Tag::Trust => {
                BodyReader::new(&mut raw, header.length).read_to_vec()?;
            }
            Tag::Seipd | Tag::SymEncryptedData => break,
            other => {
                return Err(Error::MalformedPacketStream(format!(
                    "unexpected {other:?} packet before encrypted data"
                )))
            }
        }
    }
    Ok(ids)
}

/// Recover the session key by trying every session-key packet against
/// the secret ring. A zero key id is the anonymous-recipient wildcard
/// and is tried against every secret node.
fn recover_session_key(
    ring: &Keyring,
    unlocker: &SecretKeyUnlocker,
    provider: &dyn CryptoProvider,
    pkesks: &[Pkesk],
) -> Result<(SymmetricAlgorithm, Zeroizing<Vec<u8>>)> {
    let mut tried_any = false;
    for pkesk in pkesks {
        let wildcard = pkesk.key_id.as_bytes() == &[0u8; 8];
        let candidates: Vec<_> = if wildcard {
            ring.nodes(Role::Secret)
                .map(|(_, node)| node)
                .filter(|node| node.material.has_secret())
                .collect()
        } else {
            find_decryption_key(ring, &pkesk.key_id).into_iter().collect()
        };

        for node in candidates {
            tried_any = true;
            let operator = match unlocker.unlock(&node.material, provider) {
                Ok(operator) => operator,
                // A wildcard names no key, so an unopenable candidate is
                // just another wrong key.
                Err(_) if wildcard => continue,
                Err(err) => return Err(err),
            };
            let payload = match provider.decrypt_with_key(&operator, &pkesk.encrypted_session_key)
            {
                Ok(payload) => Zeroizing::new(payload),
                // Under a wildcard this is just the wrong key; move on.
                Err(_) => continue,
            };
            if payload.len() < 4 {
                continue;
            }
            let Ok(algo) = SymmetricAlgorithm::from_id(payload[0]) else {
                continue;
            };
            let key = &payload[1..payload.len() - 2];
            let expected =
                u16::from_be_bytes([payload[payload.len() - 2], payload[payload.len() - 1]]);
            if key.len() != algo.key_size() || simple_checksum(key) != expected {
                continue;
            }
            return Ok((algo, Zeroizing::new(key.to_vec())));
        }
    }
    if tried_any {
        Err(Error::Crypto("session-key decryption failed".into()))
    } else {
        let ids: Vec<String> = pkesks.iter().map(|p| p.key_id.to_string()).collect();
        Err(Error::NoMatchingSecretKey(ids.join(", ")))
    }
}

/// Decrypted plaintext minus its trailing modification detection code.
///
/// Holds back the final 22 octets (the MDC packet) so downstream packet
/// parsing never sees them, and verifies them when the stream ends.
struct MdcVerifier<R: Read> {
    inner: R,
    sink: Option<Box<dyn DigestSink>>,
    tail: Vec<u8>,
    checked: bool,
}

const MDC_LEN: usize = 22;

impl<R: Read> MdcVerifier<R> {
    fn new(mut inner: R, sink: Box<dyn DigestSink>) -> Result<Self> {
        let mut tail = vec![0u8; MDC_LEN];
        inner
            .read_exact(&mut tail)
            .map_err(|_| Error::IntegrityCheckFailed)?;
        Ok(Self {
            inner,
            sink: Some(sink),
            tail,
            checked: false,
        })
    }

    fn verify(&mut self) -> Result<()> {
        let Some(mut sink) = self.sink.take() else {
            return Ok(());
        };
        if self.tail.len() != MDC_LEN || self.tail[0] != 0xD3 || self.tail[1] != 0x14 {
            return Err(Error::IntegrityCheckFailed);
        }
        // The detection code covers its own packet header.
        sink.update(&self.tail[..2]);
        let digest = sink.finish();
        if !bool::from(digest[..].ct_eq(&self.tail[2..])) {
            return Err(Error::IntegrityCheckFailed);
        }
        Ok(())
    }
}

impl<R: Read> Read for MdcVerifier<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.checked || buf.is_empty() {
            return Ok(0);
        }
        let mut fresh = vec![0u8; buf.len().min(8192)];
        let n = self.inner.read(&mut fresh)?;
        if n == 0 {
            self.checked = true;
            self.verify().map_err(Error::into_io)?;
            return Ok(0);
        }
        self.tail.extend_from_slice(&fresh[..n]);
        let deliver = self.tail.len() - MDC_LEN;
        let out: Vec<u8> = self.tail.drain(..deliver).collect();
        if let Some(sink) = &mut self.sink {
            sink.update(&out);
        }
        buf[..out.len()].copy_from_slice(&out);
        Ok(out.len())
    }
}

type Verifier<'a> = MdcVerifier<CipherReader<BodyReader<Box<dyn Read + 'a>>>>;

/// The message layer under the encryption: either the packets directly
/// or a single compression layer around them.
enum ContentStream<'a> {
    Plain(Verifier<'a>),
    Zlib(flate2::read::ZlibDecoder<BodyReader<Verifier<'a>>>),
    Zip(flate2::read::DeflateDecoder<BodyReader<Verifier<'a>>>),
    Stored(BodyReader<Verifier<'a>>),
}

impl<'a> ContentStream<'a> {
    /// Unwind back to the integrity verifier, draining any remaining
    /// compressed-body bytes on the way.
    fn into_verifier(self) -> Result<Verifier<'a>> {
        match self {
            ContentStream::Plain(verifier) => Ok(verifier),
            ContentStream::Zlib(decoder) => drain_body(decoder.into_inner()),
            ContentStream::Zip(decoder) => drain_body(decoder.into_inner()),
            ContentStream::Stored(body) => drain_body(body),
        }
    }
}

fn drain_body(mut body: BodyReader<Verifier<'_>>) -> Result<Verifier<'_>> {
    std::io::copy(&mut body, &mut std::io::sink()).map_err(Error::from_io)?;
    Ok(body.into_inner())
}

impl Read for ContentStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            ContentStream::Plain(r) => r.read(buf),
            ContentStream::Zlib(r) => r.read(buf),
            ContentStream::Zip(r) => r.read(buf),
            ContentStream::Stored(r) => r.read(buf),
        }
    }
}

enum PipeState<'a> {
    Streaming(BodyReader<ContentStream<'a>>),
    Finished,
}

/// The assembled inbound stream. Reading yields decrypted plaintext;
/// [`finish`](Self::finish) delivers the verification outcome.
pub struct DecryptionPipeline<'a> {
    state: PipeState<'a>,
    one_pass: Vec<OnePassSignature>,
    leading_sigs: Vec<SignaturePacket>,
    data_sink: Option<Box<dyn DigestSink>>,
    policy: SignaturePolicy,
    ring: &'a Keyring,
    provider: Box<dyn CryptoProvider>,
    outcome: Option<Result<VerificationResult>>,
}

impl<'a> DecryptionPipeline<'a> {
    /// Consume the rest of the stream and deliver the verification
    /// outcome, applying the configured signature policy.
    pub fn finish(mut self) -> Result<VerificationResult> {
        let mut scratch = [0u8; 8192];
        loop {
            match Read::read(&mut self, &mut scratch) {
                Ok(0) => break,
                Ok(_) => {}
                Err(io) => {
                    return Err(match self.outcome.take() {
                        Some(Err(real)) => real,
                        _ => Error::from_io(io),
                    })
                }
            }
        }
        match self.outcome.take() {
            Some(Ok(result)) => apply_policy(&self.policy, result),
            Some(Err(error)) => Err(error),
            None => Err(Error::MalformedPacketStream(
                "stream ended without completing".into(),
            )),
        }
    }

    /// Trailing packets, integrity check, signature verification.
    fn finalize(&mut self, body: BodyReader<ContentStream<'a>>) -> Result<VerificationResult> {
        let mut content = body.into_inner();
        let mut trailing = Vec::new();
        loop {
            match read_header(&mut content)? {
                None => break,
                Some(PacketHeader { tag, length }) => match tag {
                    Tag::Signature => {
                        let bytes = BodyReader::new(&mut content, length).read_to_vec()?;
                        trailing.push(SignaturePacket::parse(&bytes)?);
                    }
                    Tag::Marker | Tag::Trust => {
                        BodyReader::new(&mut content, length).read_to_vec()?;
                    }
                    other => {
                        return Err(Error::MalformedPacketStream(format!(
                            "unexpected trailing {other:?} packet"
                        )))
                    }
                },
            }
        }

        // Unwinding to the verifier and draining it runs the integrity
        // check over everything that was streamed.
        let mut verifier = content.into_verifier()?;
        std::io::copy(&mut verifier, &mut std::io::sink()).map_err(Error::from_io)?;

        Ok(self.verify_signatures(trailing))
    }

    fn verify_signatures(&mut self, trailing: Vec<SignaturePacket>) -> VerificationResult {
        let mut signatures = std::mem::take(&mut self.leading_sigs);
        signatures.extend(trailing);

        let Some(sig) = signatures.first() else {
            if !self.one_pass.is_empty() {
                // Announced but never delivered.
                return VerificationResult {
                    signature_present: true,
                    signer: None,
                    validity: Validity::Invalid,
                };
            }
            return VerificationResult::absent();
        };

        let issuer = sig.issuer;
        let node = issuer.and_then(|id| self.ring.find_by_key_id(Role::Public, &id));
        let Some(node) = node else {
            debug!(issuer = ?issuer, "signer not in keyring");
            return VerificationResult {
                signature_present: true,
                signer: None,
                validity: Validity::SignerUnknown,
            };
        };
        let signer = self
            .ring
            .identities_of(Role::Public, node)
            .first()
            .cloned()
            .unwrap_or_else(|| node.material.fingerprint.to_string());

        let validity = match self.data_sink.take() {
            // Signature without any announcement: the data was never
            // hashed, so it cannot be checked.
            None => Validity::Invalid,
            Some(mut sink) => {
                sink.update(&sig.hashed_region);
                sink.update(&SignaturePacket::trailer(sig.hashed_region.len()));
                let digest = sink.finish();
                let quick_ok = digest.len() >= 2 && digest[..2] == sig.left16;
                if sig.pk_algo == PK_ALGO_RSA
                    && quick_ok
                    && digest.len() == sig.hash_algo.digest_size()
                    && self
                        .provider
                        .verify_digest(
                            &node.material.public_params,
                            sig.hash_algo,
                            &digest,
                            &sig.signature_mpi,
                        )
                        .is_ok()
                {
                    Validity::Valid
                } else {
                    Validity::Invalid
                }
            }
        };

        VerificationResult {
            signature_present: true,
            signer: Some(signer),
            validity,
        }
    }
}

impl Read for DecryptionPipeline<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let PipeState::Streaming(body) = &mut self.state else {
            return Ok(0);
        };
        let n = body.read(buf)?;
        if n > 0 {
            if let Some(sink) = &mut self.data_sink {
                sink.update(&buf[..n]);
            }
            return Ok(n);
        }

        // Literal data exhausted: process the tail of the message now so
        // integrity failures surface from this final read.
        let PipeState::Streaming(body) = std::mem::replace(&mut self.state, PipeState::Finished)
        else {
            return Ok(0);
        };
        match self.finalize(body) {
            Ok(result) => {
                self.outcome = Some(Ok(result));
                Ok(0)
            }
            Err(error) => {
                let io = std::io::Error::new(std::io::ErrorKind::InvalidData, error.to_string());
                self.outcome = Some(Err(error));
                Err(io)
            }
        }
    }
}

fn apply_policy(policy: &SignaturePolicy, result: VerificationResult) -> Result<VerificationResult> {
    match policy {
        SignaturePolicy::Ignore => Ok(result),
        SignaturePolicy::VerifyIfPresent => {
            if result.signature_present && result.validity == Validity::Invalid {
                Err(Error::SignatureInvalid(
                    "message signature did not verify".into(),
                ))
            } else {
                Ok(result)
            }
        }
        SignaturePolicy::RequireValid => match result.validity {
            Validity::Valid => Ok(result),
            Validity::Absent => Err(Error::SignatureInvalid(
                "message is not signed but a valid signature is required".into(),
            )),
            Validity::SignerUnknown => Err(Error::SignatureInvalid(
                "signer is not in the keyring".into(),
            )),
            Validity::Invalid => Err(Error::SignatureInvalid(
                "message signature did not verify".into(),
            )),
        },
        SignaturePolicy::RequireFrom(identity) => {
            if result.validity != Validity::Valid {
                return Err(Error::SignatureInvalid(format!(
                    "no valid signature from {identity:?}"
                )));
            }
            match &result.signer {
                Some(signer) if signer.contains(identity.as_str()) => Ok(result),
                _ => Err(Error::SignatureInvalid(format!(
                    "message is signed, but not by {identity:?}"
                ))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::StandardProvider;
    use sha1::{Digest, Sha1};

    fn mdc_wrapped(plaintext: &[u8]) -> Vec<u8> {
        let mut hasher = Sha1::new();
        hasher.update(plaintext);
        hasher.update([0xD3, 0x14]);
        let digest = hasher.finalize();
        let mut data = plaintext.to_vec();
        data.extend_from_slice(&[0xD3, 0x14]);
        data.extend_from_slice(&digest);
        data
    }

    fn verifier_over(data: Vec<u8>) -> Result<MdcVerifier<std::io::Cursor<Vec<u8>>>> {
        MdcVerifier::new(
            std::io::Cursor::new(data),
            StandardProvider.digest(HashAlgorithm::Sha1),
        )
    }

    #[test]
    fn test_mdc_verifier_passes_good_stream() {
        let plaintext = b"the quick brown fox jumps over the lazy dog".to_vec();
        let mut verifier = verifier_over(mdc_wrapped(&plaintext)).unwrap();
        let mut out = Vec::new();
        verifier.read_to_end(&mut out).unwrap();
        assert_eq!(out, plaintext);
    }

    #[test]
    fn test_mdc_verifier_withholds_trailer() {
        // Downstream must never see the detection-code packet.
        let plaintext = vec![0x55u8; 100];
        let mut verifier = verifier_over(mdc_wrapped(&plaintext)).unwrap();
        let mut out = Vec::new();
        verifier.read_to_end(&mut out).unwrap();
        assert_eq!(out.len(), plaintext.len());
    }

    #[test]
    fn test_mdc_verifier_rejects_tampered_byte() {
        let plaintext = b"original content".to_vec();
        let mut data = mdc_wrapped(&plaintext);
        data[3] ^= 0x01;
        let mut verifier = verifier_over(data).unwrap();
        let err = verifier.read_to_end(&mut Vec::new()).unwrap_err();
        assert!(matches!(
            Error::from_io(err),
            Error::IntegrityCheckFailed
        ));
    }

    #[test]
    fn test_mdc_verifier_rejects_truncation() {
        let plaintext = b"original content".to_vec();
        let mut data = mdc_wrapped(&plaintext);
        data.truncate(data.len() - 4);
        let mut verifier = verifier_over(data).unwrap();
        let err = verifier.read_to_end(&mut Vec::new()).unwrap_err();
        assert!(matches!(
            Error::from_io(err),
            Error::IntegrityCheckFailed
        ));
    }

    fn rsa_secret_key(passphrase: Option<&str>) -> crate::key::KeyMaterial {
        use rsa::traits::{PrivateKeyParts, PublicKeyParts};
        let key = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        let primes = key.primes();
        let mpis = crate::key::SecretMpis {
            d: key.d().to_bytes_be(),
            p: primes[0].to_bytes_be(),
            q: primes[1].to_bytes_be(),
            u: vec![0x01],
        };
        let params = match passphrase {
            Some(pass) => crate::unlock::protect(&mpis, pass, &StandardProvider).unwrap(),
            None => crate::key::SecretParams::Unprotected { mpis },
        };
        crate::key::KeyMaterial::new_rsa(
            key.n().to_bytes_be(),
            key.e().to_bytes_be(),
            chrono::Utc::now(),
            crate::types::KeyFlags {
                encrypt: true,
                sign: true,
                certify: true,
            },
        )
        .with_secret_params(params)
    }

    #[test]
    fn test_wildcard_skips_unopenable_candidates() {
        let provider = StandardProvider;
        let locked = rsa_secret_key(Some("hunter2"));
        let open = rsa_secret_key(None);

        // The protected key comes first, so a wildcard walk hits it
        // before the key that can actually be opened.
        let mut ring = Keyring::new();
        ring.insert_secret(locked).unwrap();
        ring.insert_secret(open.clone()).unwrap();

        let session_key = [0x5Au8; 16];
        let mut payload = vec![SymmetricAlgorithm::Aes128.id()];
        payload.extend_from_slice(&session_key);
        payload.extend_from_slice(&simple_checksum(&session_key).to_be_bytes());
        let encrypted = provider
            .encrypt_to_key(&open.public_params, &payload)
            .unwrap();
        let pkesk = Pkesk {
            key_id: KeyId::from_bytes([0u8; 8]),
            pk_algo: 1,
            encrypted_session_key: encrypted,
        };

        let (algo, key) =
            recover_session_key(&ring, &SecretKeyUnlocker::new(), &provider, &[pkesk]).unwrap();
        assert_eq!(algo, SymmetricAlgorithm::Aes128);
        assert_eq!(&key[..], &session_key[..]);
    }

    #[test]
    fn test_named_pkesk_still_surfaces_unlock_failure() {
        let provider = StandardProvider;
        let locked = rsa_secret_key(Some("hunter2"));
        let key_id = locked.key_id();
        let mut ring = Keyring::new();
        ring.insert_secret(locked).unwrap();

        let pkesk = Pkesk {
            key_id,
            pk_algo: 1,
            encrypted_session_key: vec![0x01; 128],
        };
        assert!(matches!(
            recover_session_key(&ring, &SecretKeyUnlocker::new(), &provider, &[pkesk]),
            Err(Error::InvalidInput(_))
        ));
    }

    fn result(present: bool, signer: Option<&str>, validity: Validity) -> VerificationResult {
        VerificationResult {
            signature_present: present,
            signer: signer.map(str::to_string),
            validity,
        }
    }

    #[test]
    fn test_policy_verify_if_present() {
        let policy = SignaturePolicy::VerifyIfPresent;
        assert!(apply_policy(&policy, result(false, None, Validity::Absent)).is_ok());
        assert!(apply_policy(&policy, result(true, Some("a"), Validity::Valid)).is_ok());
        assert!(apply_policy(&policy, result(true, None, Validity::SignerUnknown)).is_ok());
        assert!(matches!(
            apply_policy(&policy, result(true, Some("a"), Validity::Invalid)),
            Err(Error::SignatureInvalid(_))
        ));
    }

    #[test]
    fn test_policy_require_valid() {
        let policy = SignaturePolicy::RequireValid;
        assert!(apply_policy(&policy, result(true, Some("a"), Validity::Valid)).is_ok());
        for bad in [Validity::Absent, Validity::Invalid, Validity::SignerUnknown] {
            assert!(matches!(
                apply_policy(&policy, result(bad != Validity::Absent, None, bad)),
                Err(Error::SignatureInvalid(_))
            ));
        }
    }

    #[test]
    fn test_policy_require_from() {
        let policy = SignaturePolicy::RequireFrom("alice@example.com".into());
        assert!(apply_policy(
            &policy,
            result(true, Some("Alice <alice@example.com>"), Validity::Valid)
        )
        .is_ok());
        assert!(apply_policy(
            &policy,
            result(true, Some("Bob <bob@example.com>"), Validity::Valid)
        )
        .is_err());
        assert!(apply_policy(
            &policy,
            result(true, Some("Alice <alice@example.com>"), Validity::Invalid)
        )
        .is_err());
    }

    #[test]
    fn test_policy_ignore_never_fails() {
        let policy = SignaturePolicy::Ignore;
        assert!(apply_policy(&policy, result(true, None, Validity::Invalid)).is_ok());
        assert!(apply_policy(&policy, result(false, None, Validity::Absent)).is_ok());
    }
}
