//! Outbound pipeline: encrypt-and-sign.
//!
//! The pipeline is assembled by a fluent builder in two stages. The
//! first stage ([`EncryptionPipelineBuilder`]) only collects
//! configuration; naming the recipients moves it to the second stage
//! ([`ReadyEncryptionPipelineBuilder`]), which resolves every recipient
//! and the signer against the keyring up front, so configuration errors
//! surface before a single plaintext byte is consumed. `build` then
//! wires the stages together into one pull-based [`Read`]:
//!
//! ```text
//! source -> literal data (+ one-pass/signature) -> compression
//!        -> integrity-protected encryption -> session-key packets -> armor
//! ```
//!
//! Every stage streams; long messages are emitted as partial-length
//! chunks and nothing buffers the whole message.

use std::io::Read;
use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::debug;
use zeroize::Zeroizing;

use crate::armor::{ArmorEncoder, ArmorKind};
use crate::error::{Error, Result};
use crate::internal::{datetime_to_timestamp, simple_checksum};
use crate::key::{KeyId, PublicParams};
use crate::keyring::{Keyring, Role};
use crate::packet::{OnePassSignature, PacketFramer, Pkesk, SignatureBuilder, SignaturePacket, Tag};
use crate::provider::{CipherReader, CryptoProvider, DigestSink, StandardProvider};
use crate::select::{select, SelectionPolicy};
use crate::types::{CompressionAlgorithm, HashAlgorithm, Purpose, SymmetricAlgorithm};
use crate::unlock::{PrivateOperator, SecretKeyUnlocker};

/// First builder stage: collects configuration.
///
/// Naming recipients with [`to_recipients`](Self::to_recipients) (or
/// [`to_recipient`](Self::to_recipient)) advances to the ready stage.
pub struct EncryptionPipelineBuilder<'a> {
    ring: &'a Keyring,
    provider: Box<dyn CryptoProvider>,
    policy: SelectionPolicy,
    symmetric: SymmetricAlgorithm,
    compression: CompressionAlgorithm,
    armored: bool,
    signer_identity: Option<String>,
    signer_passphrase: Option<String>,
}

impl<'a> EncryptionPipelineBuilder<'a> {
    /// Start a builder encrypting against `ring`.
    pub fn new(ring: &'a Keyring) -> Self {
        Self {
            ring,
            provider: Box::new(StandardProvider),
            policy: SelectionPolicy::default(),
            symmetric: SymmetricAlgorithm::default(),
            compression: CompressionAlgorithm::default(),
            armored: true,
            signer_identity: None,
            signer_passphrase: None,
        }
    }

    /// Substitute the cryptographic provider.
    pub fn provider(mut self, provider: Box<dyn CryptoProvider>) -> Self {
        self.provider = provider;
        self
    }

    /// Override how recipient and signer keys are chosen.
    pub fn selection_policy(mut self, policy: SelectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Symmetric cipher for the data (default AES-256).
    pub fn symmetric_algorithm(mut self, algo: SymmetricAlgorithm) -> Self {
        self.symmetric = algo;
        self
    }

    /// Compression inside the encryption layer (default ZLIB).
    pub fn compression(mut self, algo: CompressionAlgorithm) -> Self {
        self.compression = algo;
        self
    }

    /// Toggle ASCII armor (default on). Binary output is smaller but
    /// not printable-safe.
    pub fn armored(mut self, armored: bool) -> Self {
        self.armored = armored;
        self
    }

    /// Sign the message as `identity` (resolved from the secret ring).
    pub fn signed_by(mut self, identity: impl Into<String>) -> Self {
        self.signer_identity = Some(identity.into());
        self
    }

    /// Passphrase unlocking the signer's secret key.
    pub fn signer_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.signer_passphrase = Some(passphrase.into());
        self
    }

    /// Name a single recipient and advance to the ready stage.
    pub fn to_recipient(self, identity: &str) -> Result<ReadyEncryptionPipelineBuilder> {
        self.to_recipients([identity])
    }

    /// Name the recipients and advance to the ready stage.
    ///
    /// Each identity is resolved to an encryption-capable key now;
    /// an unknown identity fails with [`Error::KeyNotFound`] and an
    /// empty set with [`Error::IncompleteConfiguration`]. The signer,
    /// if any, is resolved and unlocked here too.
    pub fn to_recipients<'i>(
        self,
        identities: impl IntoIterator<Item = &'i str>,
    ) -> Result<ReadyEncryptionPipelineBuilder> {
        let now = Utc::now();
        let mut recipients: Vec<ResolvedRecipient> = Vec::new();
        for identity in identities {
            let node = select(
                self.ring,
                Role::Public,
                Purpose::Encrypt,
                identity,
                &self.policy,
                now,
            )?;
            // The same key reached through two identities counts once.
            if recipients
                .iter()
                .any(|r| r.fingerprint == node.material.fingerprint)
            {
                continue;
            }
            recipients.push(ResolvedRecipient {
                fingerprint: node.material.fingerprint,
                key_id: node.material.key_id(),
                params: node.material.public_params.clone(),
            });
        }
        if recipients.is_empty() {
            return Err(Error::IncompleteConfiguration("recipients"));
        }

        let signer = match &self.signer_identity {
            None => None,
            Some(identity) => {
                let node = select(
                    self.ring,
                    Role::Secret,
                    Purpose::Sign,
                    identity,
                    &self.policy,
                    now,
                )?;
                let unlocker = match &self.signer_passphrase {
                    Some(pass) => SecretKeyUnlocker::with_passphrase(pass),
                    None => SecretKeyUnlocker::new(),
                };
                let operator = unlocker.unlock(&node.material, self.provider.as_ref())?;
                Some(ResolvedSigner {
                    key_id: node.material.key_id(),
                    operator,
                })
            }
        };

        debug!(
            recipients = recipients.len(),
            signed = signer.is_some(),
            "encryption pipeline ready"
        );
        Ok(ReadyEncryptionPipelineBuilder {
            provider: self.provider,
            symmetric: self.symmetric,
            compression: self.compression,
            armored: self.armored,
            recipients,
            signer,
        })
    }
}

struct ResolvedRecipient {
    fingerprint: crate::key::Fingerprint,
    key_id: KeyId,
    params: PublicParams,
}

struct ResolvedSigner {
    key_id: KeyId,
    operator: PrivateOperator,
}

/// Second builder stage: recipients resolved, ready to consume a source.
///
/// Single use; `build` consumes the builder, so one configuration
/// produces one message (and one session key). Holds no borrow of the
/// keyring: everything it needs was copied out during resolution.
pub struct ReadyEncryptionPipelineBuilder {
    provider: Box<dyn CryptoProvider>,
    symmetric: SymmetricAlgorithm,
    compression: CompressionAlgorithm,
    armored: bool,
    recipients: Vec<ResolvedRecipient>,
    signer: Option<ResolvedSigner>,
}

impl ReadyEncryptionPipelineBuilder {
    /// Wire the pipeline over `source`.
    pub fn build<'a, R: Read + 'a>(self, source: R) -> Result<EncryptionPipeline<'a>> {
        let now = Utc::now();

        // Fresh session key per message, zeroized when encryption ends.
        let mut session_key = Zeroizing::new(vec![0u8; self.symmetric.key_size()]);
        self.provider.random(&mut session_key);

        let mut head = Vec::new();
        for recipient in &self.recipients {
            let mut payload = Zeroizing::new(Vec::with_capacity(session_key.len() + 3));
            payload.push(self.symmetric.id());
            payload.extend_from_slice(&session_key);
            payload.extend_from_slice(&simple_checksum(&session_key).to_be_bytes());
            let encrypted = self.provider.encrypt_to_key(&recipient.params, &payload)?;
            head.extend_from_slice(
                &Pkesk {
                    key_id: recipient.key_id,
                    pk_algo: 1,
                    encrypted_session_key: encrypted,
                }
                .encode(),
            );
        }

        // CFB with a zero IV; the random prefix inside the body takes
        // the IV's role.
        let cipher = self.provider.encryptor(
            self.symmetric,
            &session_key,
            &vec![0u8; self.symmetric.block_size()],
        )?;
        let mdc_sink = self.provider.digest(HashAlgorithm::Sha1);
        let mut prefix = vec![0u8; self.symmetric.block_size() + 2];
        {
            let (random, repeat) = prefix.split_at_mut(self.symmetric.block_size());
            self.provider.random(random);
            repeat.copy_from_slice(&random[random.len() - 2..]);
        }

        let message = MessageReader::new(source, self.signer, self.provider, now);

        let mut stream: Box<dyn Read + 'a> = Box::new(message);
        if self.compression != CompressionAlgorithm::Uncompressed {
            stream = Box::new(compress(stream, self.compression));
        }

        let mdc_stream = MdcStream::new(prefix, stream, mdc_sink);
        let encrypted = CipherReader {
            inner: mdc_stream,
            cipher,
        };
        // SEIPD body: a plaintext version octet, then the ciphertext.
        let seipd_body = std::io::Cursor::new(vec![1u8]).chain(encrypted);
        let framed = PacketFramer::new(Tag::Seipd, seipd_body);
        let mut out: Box<dyn Read + 'a> = Box::new(std::io::Cursor::new(head).chain(framed));

        if self.armored {
            out = Box::new(ArmorEncoder::new(ArmorKind::Message, out));
        }
        Ok(EncryptionPipeline { inner: out })
    }

    /// Encrypt `input` into `output` (file convenience).
    pub fn build_file(self, input: &Path, output: &Path) -> Result<u64> {
        let source = std::fs::File::open(input)?;
        let mut pipeline = self.build(source)?;
        let mut sink = std::fs::File::create(output)?;
        Ok(std::io::copy(&mut pipeline, &mut sink)?)
    }
}

/// The assembled outbound stream. Reading pulls plaintext from the
/// source and yields the complete OpenPGP message.
pub struct EncryptionPipeline<'a> {
    inner: Box<dyn Read + 'a>,
}

impl Read for EncryptionPipeline<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

fn compress<'a>(inner: Box<dyn Read + 'a>, algo: CompressionAlgorithm) -> impl Read + 'a {
    let compressed: Box<dyn Read + 'a> = match algo {
        CompressionAlgorithm::Zlib => Box::new(flate2::read::ZlibEncoder::new(
            inner,
            flate2::Compression::default(),
        )),
        CompressionAlgorithm::Zip => Box::new(flate2::read::DeflateEncoder::new(
            inner,
            flate2::Compression::default(),
        )),
        CompressionAlgorithm::Uncompressed => inner,
    };
    let body = std::io::Cursor::new(vec![algo.id()]).chain(compressed);
    PacketFramer::new(Tag::CompressedData, body)
}

/// Inner message: optional one-pass packet, the literal data packet, and
/// the trailing signature once the source is exhausted.
struct MessageReader<'a> {
    state: MessageState<'a>,
    signer: Option<SignerContext>,
}

struct SignerContext {
    operator: PrivateOperator,
    builder: SignatureBuilder,
    provider: Box<dyn CryptoProvider>,
}

enum MessageState<'a> {
    Emit {
        buf: Vec<u8>,
        pos: usize,
        next: Option<PacketFramer<LiteralSource<'a>>>,
    },
    Literal(PacketFramer<LiteralSource<'a>>),
    Done,
}

impl<'a> MessageReader<'a> {
    fn new<R: Read + 'a>(
        source: R,
        signer: Option<ResolvedSigner>,
        provider: Box<dyn CryptoProvider>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut one_pass = Vec::new();
        let (sink, signer) = match signer {
            None => (None, None),
            Some(resolved) => {
                one_pass = OnePassSignature {
                    sig_type: 0x00,
                    hash_algo: HashAlgorithm::Sha256,
                    pk_algo: 1,
                    key_id: resolved.key_id,
                    last: true,
                }
                .encode();
                let context = SignerContext {
                    operator: resolved.operator,
                    builder: SignatureBuilder::binary_document(resolved.key_id, now),
                    provider,
                };
                (
                    Some(context.provider.digest(HashAlgorithm::Sha256)),
                    Some(context),
                )
            }
        };

        // Literal data header: binary format, no filename, build time.
        let mut literal_header = vec![b'b', 0x00];
        literal_header.extend_from_slice(&datetime_to_timestamp(&now).to_be_bytes());
        let literal = PacketFramer::new(
            Tag::LiteralData,
            LiteralSource {
                header: literal_header,
                header_pos: 0,
                inner: Box::new(source),
                sink,
            },
        );

        let state = if one_pass.is_empty() {
            MessageState::Literal(literal)
        } else {
            MessageState::Emit {
                buf: one_pass,
                pos: 0,
                next: Some(literal),
            }
        };
        Self { state, signer }
    }

    fn finish_signature(
        &mut self,
        literal: PacketFramer<LiteralSource<'a>>,
    ) -> std::io::Result<MessageState<'a>> {
        let source = literal.into_inner();
        let (Some(sink), Some(context)) = (source.sink, self.signer.take()) else {
            return Ok(MessageState::Done);
        };
        let mut sink = sink;
        let region = context.builder.hashed_region();
        sink.update(&region);
        sink.update(&SignaturePacket::trailer(region.len()));
        let digest = sink.finish();
        let signature_mpi = context
            .provider
            .sign_digest(&context.operator, HashAlgorithm::Sha256, &digest)
            .map_err(Error::into_io)?;
        let packet = context.builder.into_packet(&digest, signature_mpi);
        Ok(MessageState::Emit {
            buf: packet.encode(),
            pos: 0,
            next: None,
        })
    }
}

impl Read for MessageReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            match std::mem::replace(&mut self.state, MessageState::Done) {
                MessageState::Emit {
                    buf: bytes,
                    pos,
                    next,
                } => {
                    if pos < bytes.len() {
                        let n = buf.len().min(bytes.len() - pos);
                        buf[..n].copy_from_slice(&bytes[pos..pos + n]);
                        self.state = MessageState::Emit {
                            buf: bytes,
                            pos: pos + n,
                            next,
                        };
                        return Ok(n);
                    }
                    match next {
                        Some(literal) => self.state = MessageState::Literal(literal),
                        None => return Ok(0),
                    }
                }
                MessageState::Literal(mut literal) => {
                    let n = literal.read(buf)?;
                    if n > 0 {
                        self.state = MessageState::Literal(literal);
                        return Ok(n);
                    }
                    self.state = self.finish_signature(literal)?;
                    if matches!(self.state, MessageState::Done) {
                        return Ok(0);
                    }
                }
                MessageState::Done => return Ok(0),
            }
        }
    }
}

/// Literal packet body: header bytes, then the source, teed into the
/// signature digest.
struct LiteralSource<'a> {
    header: Vec<u8>,
    header_pos: usize,
    inner: Box<dyn Read + 'a>,
    sink: Option<Box<dyn DigestSink>>,
}

impl Read for LiteralSource<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.header_pos < self.header.len() {
            let n = buf.len().min(self.header.len() - self.header_pos);
            buf[..n].copy_from_slice(&self.header[self.header_pos..self.header_pos + n]);
            self.header_pos += n;
            return Ok(n);
        }
        let n = self.inner.read(buf)?;
        if n > 0 {
            if let Some(sink) = &mut self.sink {
                sink.update(&buf[..n]);
            }
        }
        Ok(n)
    }
}

/// Plaintext of the integrity-protected packet: random prefix, the
/// message, then the modification detection code packet. Everything
/// streamed (including the MDC packet's own header) feeds the digest.
struct MdcStream<'a> {
    state: MdcState<'a>,
}

enum MdcState<'a> {
    Prefix {
        buf: Vec<u8>,
        pos: usize,
        inner: Box<dyn Read + 'a>,
        sink: Box<dyn DigestSink>,
    },
    Body {
        inner: Box<dyn Read + 'a>,
        sink: Box<dyn DigestSink>,
    },
    Trailer {
        buf: Vec<u8>,
        pos: usize,
    },
    Done,
}

impl<'a> MdcStream<'a> {
    fn new(prefix: Vec<u8>, inner: Box<dyn Read + 'a>, sink: Box<dyn DigestSink>) -> Self {
        Self {
            state: MdcState::Prefix {
                buf: prefix,
                pos: 0,
                inner,
                sink,
            },
        }
    }
}

impl Read for MdcStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            match std::mem::replace(&mut self.state, MdcState::Done) {
                MdcState::Prefix {
                    buf: bytes,
                    pos,
                    inner,
                    mut sink,
                } => {
                    if pos < bytes.len() {
                        let n = buf.len().min(bytes.len() - pos);
                        buf[..n].copy_from_slice(&bytes[pos..pos + n]);
                        sink.update(&buf[..n]);
                        self.state = MdcState::Prefix {
                            buf: bytes,
                            pos: pos + n,
                            inner,
                            sink,
                        };
                        return Ok(n);
                    }
                    self.state = MdcState::Body { inner, sink };
                }
                MdcState::Body {
                    mut inner,
                    mut sink,
                } => {
                    let n = inner.read(buf)?;
                    if n > 0 {
                        sink.update(&buf[..n]);
                        self.state = MdcState::Body { inner, sink };
                        return Ok(n);
                    }
                    // The MDC digest covers its own packet header.
                    sink.update(&[0xD3, 0x14]);
                    let digest = sink.finish();
                    let mut trailer = vec![0xD3, 0x14];
                    trailer.extend_from_slice(&digest);
                    self.state = MdcState::Trailer {
                        buf: trailer,
                        pos: 0,
                    };
                }
                MdcState::Trailer { buf: bytes, pos } => {
                    if pos >= bytes.len() {
                        return Ok(0);
                    }
                    let n = buf.len().min(bytes.len() - pos);
                    buf[..n].copy_from_slice(&bytes[pos..pos + n]);
                    self.state = MdcState::Trailer {
                        buf: bytes,
                        pos: pos + n,
                    };
                    return Ok(n);
                }
                MdcState::Done => return Ok(0),
            }
        }
    }
}
