//! OpenPGP packet framing (RFC 4880 section 4).
//!
//! This module is the wire-format contract for the pipelines: tag-typed,
//! length-prefixed binary records. Decoding accepts both the old and the
//! new header format (GPG still emits old-format headers for some packet
//! types); encoding always uses the new format. Bodies whose size is not
//! known upfront are streamed as partial-length chunks, which is what lets
//! the pipelines run without buffering whole messages.

use std::io::Read;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::internal::{datetime_to_timestamp, read_array, read_mpi, read_u8, timestamp_to_datetime, write_mpi};
use crate::key::KeyId;
use crate::types::{HashAlgorithm, KeyFlags};

/// Chunk size for partial-length bodies. Must be a power of two and at
/// least 512 per RFC 4880 section 4.2.2.4.
pub(crate) const PARTIAL_CHUNK: usize = 4096;

/// Packet type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    /// Public-key encrypted session key (tag 1)
    Pkesk,
    /// Signature (tag 2)
    Signature,
    /// One-pass signature (tag 4)
    OnePassSignature,
    /// Secret key (tag 5)
    SecretKey,
    /// Public key (tag 6)
    PublicKey,
    /// Secret subkey (tag 7)
    SecretSubkey,
    /// Compressed data (tag 8)
    CompressedData,
    /// Symmetrically encrypted data without integrity protection (tag 9)
    SymEncryptedData,
    /// Marker (tag 10)
    Marker,
    /// Literal data (tag 11)
    LiteralData,
    /// Trust (tag 12)
    Trust,
    /// User id (tag 13)
    UserId,
    /// Public subkey (tag 14)
    PublicSubkey,
    /// User attribute (tag 17)
    UserAttribute,
    /// Symmetrically encrypted and integrity protected data (tag 18)
    Seipd,
    /// Modification detection code (tag 19)
    Mdc,
    /// Any tag this implementation does not interpret
    Unknown(u8),
}

impl Tag {
    /// RFC 4880 tag value.
    pub fn id(&self) -> u8 {
        match self {
            Tag::Pkesk => 1,
            Tag::Signature => 2,
            Tag::OnePassSignature => 4,
            Tag::SecretKey => 5,
            Tag::PublicKey => 6,
            Tag::SecretSubkey => 7,
            Tag::CompressedData => 8,
            Tag::SymEncryptedData => 9,
            Tag::Marker => 10,
            Tag::LiteralData => 11,
            Tag::Trust => 12,
            Tag::UserId => 13,
            Tag::PublicSubkey => 14,
            Tag::UserAttribute => 17,
            Tag::Seipd => 18,
            Tag::Mdc => 19,
            Tag::Unknown(id) => *id,
        }
    }

    /// Look up a tag by its RFC 4880 value.
    pub fn from_id(id: u8) -> Tag {
        match id {
            1 => Tag::Pkesk,
            2 => Tag::Signature,
            4 => Tag::OnePassSignature,
            5 => Tag::SecretKey,
            6 => Tag::PublicKey,
            7 => Tag::SecretSubkey,
            8 => Tag::CompressedData,
            9 => Tag::SymEncryptedData,
            10 => Tag::Marker,
            11 => Tag::LiteralData,
            12 => Tag::Trust,
            13 => Tag::UserId,
            14 => Tag::PublicSubkey,
            17 => Tag::UserAttribute,
            18 => Tag::Seipd,
            19 => Tag::Mdc,
            other => Tag::Unknown(other),
        }
    }
}

/// Length field of a packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketLength {
    /// Body length known upfront
    Definite(u64),
    /// First segment of a partial-length body
    Partial(u32),
    /// Old-format indeterminate length: body extends to end of input
    Indeterminate,
}

/// Decoded packet header.
#[derive(Debug, Clone, Copy)]
pub struct PacketHeader {
    /// Packet type
    pub tag: Tag,
    /// Length of the (first segment of the) body
    pub length: PacketLength,
}

/// Read the next packet header, or `None` at clean end of input.
pub fn read_header<R: Read>(reader: &mut R) -> Result<Option<PacketHeader>> {
    let mut ctb = [0u8; 1];
    match reader.read(&mut ctb)? {
        0 => return Ok(None),
        _ => {}
    }
    let ctb = ctb[0];
    if ctb & 0x80 == 0 {
        return Err(Error::MalformedPacketStream(format!(
            "invalid packet tag octet 0x{ctb:02x}"
        )));
    }

    if ctb & 0x40 != 0 {
        // New format: tag in the low six bits, length field follows.
        let tag = Tag::from_id(ctb & 0x3F);
        let length = read_new_length(reader)?;
        Ok(Some(PacketHeader { tag, length }))
    } else {
        // Old format: tag in bits 2..5, length type in the low two bits.
        let tag = Tag::from_id((ctb >> 2) & 0x0F);
        let length = match ctb & 0x03 {
            0 => PacketLength::Definite(read_u8(reader, "packet length")? as u64),
            1 => PacketLength::Definite(reader.read_u16::<BigEndian>()? as u64),
            2 => PacketLength::Definite(reader.read_u32::<BigEndian>()? as u64),
            _ => PacketLength::Indeterminate,
        };
        Ok(Some(PacketHeader { tag, length }))
    }
}

/// Read a new-format length field (also used for partial continuations).
fn read_new_length<R: Read>(reader: &mut R) -> Result<PacketLength> {
    let first = read_u8(reader, "packet length")?;
    match first {
        0..=191 => Ok(PacketLength::Definite(first as u64)),
        192..=223 => {
            let second = read_u8(reader, "packet length")?;
            Ok(PacketLength::Definite(
                ((first as u64 - 192) << 8) + second as u64 + 192,
            ))
        }
        224..=254 => Ok(PacketLength::Partial(1u32 << (first & 0x1F))),
        255 => Ok(PacketLength::Definite(reader.read_u32::<BigEndian>()? as u64)),
    }
}

/// Encode a new-format definite length field.
fn write_new_length(out: &mut Vec<u8>, len: u64) {
    if len < 192 {
        out.push(len as u8);
    } else if len < 8384 {
        let adjusted = len - 192;
        out.push((adjusted >> 8) as u8 + 192);
        out.push((adjusted & 0xFF) as u8);
    } else {
        out.push(255);
        out.write_u32::<BigEndian>(len as u32).expect("vec write");
    }
}

/// Encode a complete packet with a definite-length new-format header.
pub fn encode_packet(tag: Tag, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 6);
    out.push(0xC0 | tag.id());
    write_new_length(&mut out, body.len() as u64);
    out.extend_from_slice(body);
    out
}

/// Reader over one packet body, following partial-length continuations.
///
/// Takes the underlying reader by value; pass `&mut reader` to borrow.
/// Once this yields EOF the underlying reader is positioned at the next
/// packet header.
pub struct BodyReader<R: Read> {
    inner: R,
    remaining: u64,
    /// More length segments follow after `remaining` is consumed
    continued: bool,
    indeterminate: bool,
}

impl<R: Read> BodyReader<R> {
    /// Start reading the body described by `length`.
    pub fn new(inner: R, length: PacketLength) -> Self {
        match length {
            PacketLength::Definite(n) => Self {
                inner,
                remaining: n,
                continued: false,
                indeterminate: false,
            },
            PacketLength::Partial(n) => Self {
                inner,
                remaining: n as u64,
                continued: true,
                indeterminate: false,
            },
            PacketLength::Indeterminate => Self {
                inner,
                remaining: 0,
                continued: false,
                indeterminate: true,
            },
        }
    }

    /// Read the whole body into a vector (small packets only).
    pub fn read_to_vec(mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        Read::read_to_end(&mut self, &mut buf)?;
        Ok(buf)
    }

    /// Recover the underlying reader, normally after this yielded EOF.
    pub fn into_inner(self) -> R {
        self.inner
    }

    fn advance_segment(&mut self) -> std::io::Result<()> {
        match read_new_length(&mut self.inner).map_err(Error::into_io)? {
            PacketLength::Definite(n) => {
                self.remaining = n;
                self.continued = false;
            }
            PacketLength::Partial(n) => {
                self.remaining = n as u64;
                self.continued = true;
            }
            PacketLength::Indeterminate => {
                return Err(Error::MalformedPacketStream(
                    "indeterminate length in partial continuation".into(),
                )
                .into_io());
            }
        }
        Ok(())
    }
}

impl<R: Read> Read for BodyReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.indeterminate {
            return self.inner.read(buf);
        }
        while self.remaining == 0 {
            if !self.continued {
                return Ok(0);
            }
            self.advance_segment()?;
        }
        let want = buf.len().min(self.remaining as usize);
        let n = self.inner.read(&mut buf[..want])?;
        if n == 0 {
            return Err(Error::MalformedPacketStream("truncated packet body".into()).into_io());
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

/// Frames an inner byte stream as one packet, streaming the body in
/// partial-length chunks when it is longer than [`PARTIAL_CHUNK`].
pub struct PacketFramer<R: Read> {
    tag: Tag,
    inner: R,
    started: bool,
    finished: bool,
    buf: Vec<u8>,
    pos: usize,
}

impl<R: Read> PacketFramer<R> {
    /// Frame `inner` as the body of a packet with the given tag.
    pub fn new(tag: Tag, inner: R) -> Self {
        Self {
            tag,
            inner,
            started: false,
            finished: false,
            buf: Vec::new(),
            pos: 0,
        }
    }

    /// Recover the inner reader, normally after the framer hit EOF.
    pub fn into_inner(self) -> R {
        self.inner
    }

    fn fill_chunk(&mut self) -> std::io::Result<Vec<u8>> {
        let mut chunk = vec![0u8; PARTIAL_CHUNK];
        let mut filled = 0;
        while filled < chunk.len() {
            match self.inner.read(&mut chunk[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        chunk.truncate(filled);
        Ok(chunk)
    }

    fn next_block(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        if self.finished {
            return Ok(None);
        }
        let chunk = self.fill_chunk()?;
        let mut block = Vec::with_capacity(chunk.len() + 8);
        if !self.started {
            block.push(0xC0 | self.tag.id());
            self.started = true;
        }
        if chunk.len() == PARTIAL_CHUNK {
            // 4096 == 1 << 12
            block.push(224 + PARTIAL_CHUNK.trailing_zeros() as u8);
        } else {
            write_new_length(&mut block, chunk.len() as u64);
            self.finished = true;
        }
        block.extend_from_slice(&chunk);
        Ok(Some(block))
    }
}

impl<R: Read> Read for PacketFramer<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.pos >= self.buf.len() {
            match self.next_block()? {
                Some(block) => {
                    self.buf = block;
                    self.pos = 0;
                }
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.buf.len() - self.pos);
        buf[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Public-key encrypted session key packet, version 3.
#[derive(Debug, Clone)]
pub struct Pkesk {
    /// Key id of the (sub)key the session key is encrypted to
    pub key_id: KeyId,
    /// Public-key algorithm (1 = RSA)
    pub pk_algo: u8,
    /// The asymmetrically encrypted session-key payload (MPI value)
    pub encrypted_session_key: Vec<u8>,
}

impl Pkesk {
    /// Serialize as a complete packet.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(self.encrypted_session_key.len() + 16);
        body.push(3); // version
        body.extend_from_slice(self.key_id.as_bytes());
        body.push(self.pk_algo);
        write_mpi(&mut body, &self.encrypted_session_key);
        encode_packet(Tag::Pkesk, &body)
    }

    /// Parse a packet body.
    pub fn parse(body: &[u8]) -> Result<Pkesk> {
        let mut cursor = std::io::Cursor::new(body);
        let version = read_u8(&mut cursor, "session-key packet")?;
        if version != 3 {
            return Err(Error::MalformedPacketStream(format!(
                "unsupported session-key packet version {version}"
            )));
        }
        let key_id = KeyId::from_bytes(read_array::<_, 8>(&mut cursor)?);
        let pk_algo = read_u8(&mut cursor, "session-key packet")?;
        let encrypted_session_key = read_mpi(&mut cursor)?;
        Ok(Pkesk {
            key_id,
            pk_algo,
            encrypted_session_key,
        })
    }
}

/// One-pass signature packet, version 3.
///
/// Precedes the signed data so a verifier can hash in a single pass.
#[derive(Debug, Clone)]
pub struct OnePassSignature {
    /// Signature type (0x00 = binary document)
    pub sig_type: u8,
    /// Hash algorithm the signer used
    pub hash_algo: HashAlgorithm,
    /// Public-key algorithm (1 = RSA)
    pub pk_algo: u8,
    /// Key id of the signing key
    pub key_id: KeyId,
    /// True when this is the last (only) one-pass packet before the data
    pub last: bool,
}

impl OnePassSignature {
    /// Serialize as a complete packet.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(13);
        body.push(3); // version
        body.push(self.sig_type);
        body.push(self.hash_algo.id());
        body.push(self.pk_algo);
        body.extend_from_slice(self.key_id.as_bytes());
        body.push(self.last as u8);
        encode_packet(Tag::OnePassSignature, &body)
    }

    /// Parse a packet body.
    pub fn parse(body: &[u8]) -> Result<OnePassSignature> {
        let mut cursor = std::io::Cursor::new(body);
        let version = read_u8(&mut cursor, "one-pass signature")?;
        if version != 3 {
            return Err(Error::MalformedPacketStream(format!(
                "unsupported one-pass signature version {version}"
            )));
        }
        let sig_type = read_u8(&mut cursor, "one-pass signature")?;
        let hash_algo = HashAlgorithm::from_id(read_u8(&mut cursor, "one-pass signature")?)?;
        let pk_algo = read_u8(&mut cursor, "one-pass signature")?;
        let key_id = KeyId::from_bytes(read_array::<_, 8>(&mut cursor)?);
        let last = read_u8(&mut cursor, "one-pass signature")? != 0;
        Ok(OnePassSignature {
            sig_type,
            hash_algo,
            pk_algo,
            key_id,
            last,
        })
    }
}

// Signature subpacket types this implementation interprets.
const SUBPACKET_CREATION_TIME: u8 = 2;
const SUBPACKET_KEY_EXPIRY: u8 = 9;
const SUBPACKET_ISSUER: u8 = 16;
const SUBPACKET_KEY_FLAGS: u8 = 27;

/// Signature packet, version 4.
#[derive(Debug, Clone)]
pub struct SignaturePacket {
    /// Signature type (0x00 binary document, 0x13 certification, 0x18 binding)
    pub sig_type: u8,
    /// Public-key algorithm (1 = RSA)
    pub pk_algo: u8,
    /// Hash algorithm
    pub hash_algo: HashAlgorithm,
    /// Raw bytes from the version octet through the hashed subpackets,
    /// exactly as they must be fed to the hash
    pub hashed_region: Vec<u8>,
    /// Creation time from the hashed subpackets
    pub created_at: Option<DateTime<Utc>>,
    /// Issuer key id
    pub issuer: Option<KeyId>,
    /// Key flags (present on certification/binding signatures)
    pub key_flags: Option<KeyFlags>,
    /// Key expiration, seconds after key creation
    pub key_expiry_secs: Option<u32>,
    /// Leftmost sixteen bits of the signed digest
    pub left16: [u8; 2],
    /// The signature itself (MPI value)
    pub signature_mpi: Vec<u8>,
}

impl SignaturePacket {
    /// The final trailer fed to the hash after the hashed region.
    pub fn trailer(hashed_region_len: usize) -> [u8; 6] {
        let len = hashed_region_len as u32;
        [
            0x04,
            0xFF,
            (len >> 24) as u8,
            (len >> 16) as u8,
            (len >> 8) as u8,
            len as u8,
        ]
    }

    /// Serialize as a complete packet.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = self.hashed_region.clone();
        // Unhashed subpackets: just the issuer.
        let mut unhashed = Vec::new();
        if let Some(issuer) = &self.issuer {
            unhashed.push(9); // subpacket length: type + 8 octets
            unhashed.push(SUBPACKET_ISSUER);
            unhashed.extend_from_slice(issuer.as_bytes());
        }
        body.write_u16::<BigEndian>(unhashed.len() as u16)
            .expect("vec write");
        body.extend_from_slice(&unhashed);
        body.extend_from_slice(&self.left16);
        write_mpi(&mut body, &self.signature_mpi);
        encode_packet(Tag::Signature, &body)
    }

    /// Parse a packet body.
    pub fn parse(body: &[u8]) -> Result<SignaturePacket> {
        let mut cursor = std::io::Cursor::new(body);
        let version = read_u8(&mut cursor, "signature")?;
        if version != 4 {
            return Err(Error::MalformedPacketStream(format!(
                "unsupported signature version {version}"
            )));
        }
        let sig_type = read_u8(&mut cursor, "signature")?;
        let pk_algo = read_u8(&mut cursor, "signature")?;
        let hash_algo = HashAlgorithm::from_id(read_u8(&mut cursor, "signature")?)?;
        let hashed_len = cursor.read_u16::<BigEndian>()? as usize;
        let mut hashed = vec![0u8; hashed_len];
        cursor.read_exact(&mut hashed)?;

        let mut packet = SignaturePacket {
            sig_type,
            pk_algo,
            hash_algo,
            hashed_region: Vec::new(),
            created_at: None,
            issuer: None,
            key_flags: None,
            key_expiry_secs: None,
            left16: [0; 2],
            signature_mpi: Vec::new(),
        };
        parse_subpackets(&hashed, &mut packet)?;

        // The hashed region is the prefix of the body we just walked.
        let hashed_region_len = 6 + hashed_len;
        packet.hashed_region = body[..hashed_region_len].to_vec();

        let unhashed_len = cursor.read_u16::<BigEndian>()? as usize;
        let mut unhashed = vec![0u8; unhashed_len];
        cursor.read_exact(&mut unhashed)?;
        // Only the issuer is trusted from the unhashed area, and only if
        // the hashed area did not already carry one.
        parse_subpackets_unhashed(&unhashed, &mut packet)?;

        packet.left16 = read_array::<_, 2>(&mut cursor)?;
        packet.signature_mpi = read_mpi(&mut cursor)?;
        Ok(packet)
    }
}

fn parse_subpackets(data: &[u8], packet: &mut SignaturePacket) -> Result<()> {
    each_subpacket(data, |typ, value| {
        match typ {
            SUBPACKET_CREATION_TIME if value.len() == 4 => {
                let secs = u32::from_be_bytes([value[0], value[1], value[2], value[3]]);
                packet.created_at = Some(timestamp_to_datetime(secs));
            }
            SUBPACKET_KEY_EXPIRY if value.len() == 4 => {
                packet.key_expiry_secs =
                    Some(u32::from_be_bytes([value[0], value[1], value[2], value[3]]));
            }
            SUBPACKET_ISSUER if value.len() == 8 => {
                let mut id = [0u8; 8];
                id.copy_from_slice(value);
                packet.issuer = Some(KeyId::from_bytes(id));
            }
            SUBPACKET_KEY_FLAGS if !value.is_empty() => {
                packet.key_flags = Some(KeyFlags::from_bitmask(value[0]));
            }
            _ => {}
        }
        Ok(())
    })
}

fn parse_subpackets_unhashed(data: &[u8], packet: &mut SignaturePacket) -> Result<()> {
    each_subpacket(data, |typ, value| {
        if typ == SUBPACKET_ISSUER && value.len() == 8 && packet.issuer.is_none() {
            let mut id = [0u8; 8];
            id.copy_from_slice(value);
            packet.issuer = Some(KeyId::from_bytes(id));
        }
        Ok(())
    })
}

fn each_subpacket(data: &[u8], mut f: impl FnMut(u8, &[u8]) -> Result<()>) -> Result<()> {
    let mut cursor = std::io::Cursor::new(data);
    loop {
        let pos = cursor.position() as usize;
        if pos >= data.len() {
            return Ok(());
        }
        let len = match read_new_length(&mut cursor)? {
            PacketLength::Definite(n) => n as usize,
            _ => {
                return Err(Error::MalformedPacketStream(
                    "partial length in signature subpacket".into(),
                ))
            }
        };
        if len == 0 {
            return Err(Error::MalformedPacketStream("empty signature subpacket".into()));
        }
        let typ = read_u8(&mut cursor, "signature subpacket")? & 0x7F;
        let start = cursor.position() as usize;
        let end = start + len - 1;
        if end > data.len() {
            return Err(Error::MalformedPacketStream(
                "signature subpacket overruns area".into(),
            ));
        }
        f(typ, &data[start..end])?;
        cursor.set_position(end as u64);
    }
}

/// Assembles the hashed region of a new v4 signature.
pub(crate) struct SignatureBuilder {
    sig_type: u8,
    pk_algo: u8,
    hash_algo: HashAlgorithm,
    hashed_subpackets: Vec<u8>,
    issuer: KeyId,
}

impl SignatureBuilder {
    /// A binary-document signature created now by `issuer`.
    pub(crate) fn binary_document(issuer: KeyId, created_at: DateTime<Utc>) -> Self {
        let mut builder = Self {
            sig_type: 0x00,
            pk_algo: 1,
            hash_algo: HashAlgorithm::Sha256,
            hashed_subpackets: Vec::new(),
            issuer,
        };
        builder.push_subpacket(SUBPACKET_CREATION_TIME, &datetime_to_timestamp(&created_at).to_be_bytes());
        builder
    }

    fn push_subpacket(&mut self, typ: u8, value: &[u8]) {
        // All subpackets we emit fit in the one-octet length form.
        self.hashed_subpackets.push(value.len() as u8 + 1);
        self.hashed_subpackets.push(typ);
        self.hashed_subpackets.extend_from_slice(value);
    }

    /// The hashed region: version through hashed subpackets.
    pub(crate) fn hashed_region(&self) -> Vec<u8> {
        let mut region = Vec::with_capacity(self.hashed_subpackets.len() + 6);
        region.push(4);
        region.push(self.sig_type);
        region.push(self.pk_algo);
        region.push(self.hash_algo.id());
        region
            .write_u16::<BigEndian>(self.hashed_subpackets.len() as u16)
            .expect("vec write");
        region.extend_from_slice(&self.hashed_subpackets);
        region
    }

    /// Assemble the finished packet once the digest has been signed.
    pub(crate) fn into_packet(self, digest: &[u8], signature_mpi: Vec<u8>) -> SignaturePacket {
        let hashed_region = self.hashed_region();
        SignaturePacket {
            sig_type: self.sig_type,
            pk_algo: self.pk_algo,
            hash_algo: self.hash_algo,
            hashed_region,
            created_at: None,
            issuer: Some(self.issuer),
            key_flags: None,
            key_expiry_secs: None,
            left16: [digest[0], digest[1]],
            signature_mpi,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definite_length_encodings() {
        for (len, expect) in [
            (0u64, vec![0x00]),
            (191, vec![0xBF]),
            (192, vec![0xC0, 0x00]),
            (8383, vec![0xDF, 0xFF]),
            (8384, vec![0xFF, 0x00, 0x00, 0x20, 0xC0]),
        ] {
            let mut out = Vec::new();
            write_new_length(&mut out, len);
            assert_eq!(out, expect, "length {len}");

            let mut cursor = std::io::Cursor::new(&out);
            assert_eq!(
                read_new_length(&mut cursor).unwrap(),
                PacketLength::Definite(len)
            );
        }
    }

    #[test]
    fn test_header_round_trip() {
        let packet = encode_packet(Tag::LiteralData, b"hello");
        let mut cursor = std::io::Cursor::new(&packet);
        let header = read_header(&mut cursor).unwrap().unwrap();
        assert_eq!(header.tag, Tag::LiteralData);
        assert_eq!(header.length, PacketLength::Definite(5));
        let body = BodyReader::new(&mut cursor, header.length)
            .read_to_vec()
            .unwrap();
        assert_eq!(body, b"hello");
    }

    #[test]
    fn test_old_format_header() {
        // Old-format PKESK header with a one-octet length.
        let data = [0x84u8, 0x03, 0xAA, 0xBB, 0xCC];
        let mut cursor = std::io::Cursor::new(&data[..]);
        let header = read_header(&mut cursor).unwrap().unwrap();
        assert_eq!(header.tag, Tag::Pkesk);
        assert_eq!(header.length, PacketLength::Definite(3));
    }

    #[test]
    fn test_old_format_indeterminate() {
        let data = [0xA3u8, 0x01, 0x02, 0x03];
        let mut cursor = std::io::Cursor::new(&data[..]);
        let header = read_header(&mut cursor).unwrap().unwrap();
        assert_eq!(header.tag, Tag::CompressedData);
        assert_eq!(header.length, PacketLength::Indeterminate);
        let body = BodyReader::new(&mut cursor, header.length)
            .read_to_vec()
            .unwrap();
        assert_eq!(body, vec![0x01, 0x02, 0x03]);
    }

    #[test]
    fn test_framer_small_body_uses_definite_length() {
        let framer = PacketFramer::new(Tag::LiteralData, std::io::Cursor::new(b"tiny".to_vec()));
        let mut out = Vec::new();
        let mut framer = framer;
        framer.read_to_end(&mut out).unwrap();
        assert_eq!(out, encode_packet(Tag::LiteralData, b"tiny"));
    }

    #[test]
    fn test_framer_streams_partial_chunks() {
        let body = vec![0x5A; PARTIAL_CHUNK * 2 + 100];
        let mut framer = PacketFramer::new(Tag::Seipd, std::io::Cursor::new(body.clone()));
        let mut framed = Vec::new();
        framer.read_to_end(&mut framed).unwrap();

        let mut cursor = std::io::Cursor::new(&framed);
        let header = read_header(&mut cursor).unwrap().unwrap();
        assert_eq!(header.tag, Tag::Seipd);
        assert_eq!(header.length, PacketLength::Partial(PARTIAL_CHUNK as u32));
        let reassembled = BodyReader::new(&mut cursor, header.length)
            .read_to_vec()
            .unwrap();
        assert_eq!(reassembled, body);
    }

    #[test]
    fn test_framer_exact_chunk_multiple_ends_with_zero_final() {
        let body = vec![0x11; PARTIAL_CHUNK];
        let mut framer = PacketFramer::new(Tag::CompressedData, std::io::Cursor::new(body.clone()));
        let mut framed = Vec::new();
        framer.read_to_end(&mut framed).unwrap();

        let mut cursor = std::io::Cursor::new(&framed);
        let header = read_header(&mut cursor).unwrap().unwrap();
        let reassembled = BodyReader::new(&mut cursor, header.length)
            .read_to_vec()
            .unwrap();
        assert_eq!(reassembled, body);
    }

    #[test]
    fn test_pkesk_round_trip() {
        let pkesk = Pkesk {
            key_id: KeyId::from_bytes([1, 2, 3, 4, 5, 6, 7, 8]),
            pk_algo: 1,
            encrypted_session_key: vec![0x42; 256],
        };
        let encoded = pkesk.encode();
        let mut cursor = std::io::Cursor::new(&encoded);
        let header = read_header(&mut cursor).unwrap().unwrap();
        assert_eq!(header.tag, Tag::Pkesk);
        let body = BodyReader::new(&mut cursor, header.length)
            .read_to_vec()
            .unwrap();
        let parsed = Pkesk::parse(&body).unwrap();
        assert_eq!(parsed.key_id, pkesk.key_id);
        assert_eq!(parsed.encrypted_session_key, pkesk.encrypted_session_key);
    }

    #[test]
    fn test_signature_builder_round_trip() {
        let issuer = KeyId::from_bytes([9, 9, 9, 9, 1, 1, 1, 1]);
        let builder = SignatureBuilder::binary_document(issuer, chrono::Utc::now());
        let digest = [0xAB; 32];
        let packet = builder.into_packet(&digest, vec![0x77; 128]);
        let encoded = packet.encode();

        let mut cursor = std::io::Cursor::new(&encoded);
        let header = read_header(&mut cursor).unwrap().unwrap();
        assert_eq!(header.tag, Tag::Signature);
        let body = BodyReader::new(&mut cursor, header.length)
            .read_to_vec()
            .unwrap();
        let parsed = SignaturePacket::parse(&body).unwrap();
        assert_eq!(parsed.sig_type, 0x00);
        assert_eq!(parsed.issuer, Some(issuer));
        assert_eq!(parsed.left16, [0xAB, 0xAB]);
        assert_eq!(parsed.hashed_region, packet.hashed_region);
        assert!(parsed.created_at.is_some());
    }

    #[test]
    fn test_garbage_header_is_malformed() {
        let mut cursor = std::io::Cursor::new(&[0x00u8, 0x01][..]);
        assert!(matches!(
            read_header(&mut cursor),
            Err(Error::MalformedPacketStream(_))
        ));
    }
}
