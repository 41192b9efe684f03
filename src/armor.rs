//! ASCII armor: the printable-safe envelope around a binary packet stream.
//!
//! An armored block is a `-----BEGIN PGP ...-----` line, optional armor
//! headers, an empty line, a base64 body wrapped at 64 columns, a `=XXXX`
//! CRC-24 line, and the matching `-----END PGP ...-----` line. Both the
//! encoder and the decoder are streaming; neither holds more than one
//! line of data.

use std::io::{BufRead, Read};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::error::{Error, Result};

/// Number of raw bytes per armored line (encodes to 64 base64 columns).
const LINE_BYTES: usize = 48;

const CRC24_INIT: u32 = 0x00B7_04CE;
const CRC24_POLY: u32 = 0x0186_4CFB;

/// Kind of armored block, selecting the BEGIN/END delimiter text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmorKind {
    /// `PGP MESSAGE`
    Message,
    /// `PGP PUBLIC KEY BLOCK`
    PublicKey,
    /// `PGP PRIVATE KEY BLOCK`
    PrivateKey,
}

impl ArmorKind {
    fn label(&self) -> &'static str {
        match self {
            ArmorKind::Message => "PGP MESSAGE",
            ArmorKind::PublicKey => "PGP PUBLIC KEY BLOCK",
            ArmorKind::PrivateKey => "PGP PRIVATE KEY BLOCK",
        }
    }
}

/// Incremental OpenPGP CRC-24.
#[derive(Debug, Clone)]
pub(crate) struct Crc24(u32);

impl Crc24 {
    pub(crate) fn new() -> Self {
        Self(CRC24_INIT)
    }

    pub(crate) fn update(&mut self, data: &[u8]) {
        for &byte in data {
            self.0 ^= (byte as u32) << 16;
            for _ in 0..8 {
                self.0 <<= 1;
                if self.0 & 0x0100_0000 != 0 {
                    self.0 ^= CRC24_POLY;
                }
            }
        }
    }

    pub(crate) fn finish(&self) -> [u8; 3] {
        let v = self.0 & 0x00FF_FFFF;
        [(v >> 16) as u8, (v >> 8) as u8, v as u8]
    }
}

/// Check whether a byte stream looks like an armored block.
pub fn is_armored(prefix: &[u8]) -> bool {
    let trimmed: Vec<u8> = prefix
        .iter()
        .copied()
        .skip_while(|b| b.is_ascii_whitespace())
        .collect();
    trimmed.starts_with(b"-----BEGIN PGP")
}

enum EncoderState {
    Header,
    Body,
    Trailer,
    Done,
}

/// Pull-based armor encoder over an inner binary stream.
pub struct ArmorEncoder<R: Read> {
    inner: R,
    kind: ArmorKind,
    crc: Crc24,
    state: EncoderState,
    buf: Vec<u8>,
    pos: usize,
}

impl<R: Read> ArmorEncoder<R> {
    /// Armor `inner` as a block of the given kind.
    pub fn new(kind: ArmorKind, inner: R) -> Self {
        Self {
            inner,
            kind,
            crc: Crc24::new(),
            state: EncoderState::Header,
            buf: Vec::new(),
            pos: 0,
        }
    }

    fn next_block(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        match self.state {
            EncoderState::Header => {
                self.state = EncoderState::Body;
                Ok(Some(
                    format!("-----BEGIN {}-----\n\n", self.kind.label()).into_bytes(),
                ))
            }
            EncoderState::Body => {
                let mut raw = vec![0u8; LINE_BYTES];
                let mut filled = 0;
                while filled < raw.len() {
                    match self.inner.read(&mut raw[filled..])? {
                        0 => break,
                        n => filled += n,
                    }
                }
                raw.truncate(filled);
                if raw.is_empty() {
                    self.state = EncoderState::Trailer;
                    return self.next_block();
                }
                self.crc.update(&raw);
                let mut line = BASE64.encode(&raw).into_bytes();
                line.push(b'\n');
                Ok(Some(line))
            }
            EncoderState::Trailer => {
                self.state = EncoderState::Done;
                let crc = BASE64.encode(self.crc.finish());
                Ok(Some(
                    format!("={}\n-----END {}-----\n", crc, self.kind.label()).into_bytes(),
                ))
            }
            EncoderState::Done => Ok(None),
        }
    }
}

impl<R: Read> Read for ArmorEncoder<R> {
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

/// Armor a complete byte slice (convenience for key exports).
pub fn armor_bytes(kind: ArmorKind, data: &[u8]) -> String {
    let mut encoder = ArmorEncoder::new(kind, std::io::Cursor::new(data));
    let mut out = String::new();
    encoder
        .read_to_string(&mut out)
        .expect("armoring in-memory data cannot fail");
    out
}

enum DecoderState {
    Preamble,
    Body,
    Done,
}

/// Streaming armor decoder over a buffered text stream.
pub struct ArmorDecoder<R: BufRead> {
    inner: R,
    crc: Crc24,
    state: DecoderState,
    buf: Vec<u8>,
    pos: usize,
}

impl<R: BufRead> ArmorDecoder<R> {
    /// De-armor `inner`; the BEGIN line is located on first read.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            crc: Crc24::new(),
            state: DecoderState::Preamble,
            buf: Vec::new(),
            pos: 0,
        }
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        let n = self
            .inner
            .read_line(&mut line)
            .map_err(|_| Error::MalformedPacketStream("armor is not valid UTF-8".into()))?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    fn skip_preamble(&mut self) -> Result<()> {
        // Locate the BEGIN line, then skip armor headers up to the
        // blank separator line.
        loop {
            match self.read_line()? {
                None => {
                    return Err(Error::MalformedPacketStream(
                        "no armor begin line found".into(),
                    ))
                }
                Some(line) if line.starts_with("-----BEGIN PGP") => break,
                Some(_) => continue,
            }
        }
        loop {
            match self.read_line()? {
                None => {
                    return Err(Error::MalformedPacketStream(
                        "armor ended inside headers".into(),
                    ))
                }
                Some(line) if line.is_empty() => return Ok(()),
                // Header lines are `Key: Value`; a base64 line this early
                // means the blank separator was omitted, tolerate it by
                // treating the line as body data.
                Some(line) if !line.contains(':') => {
                    self.decode_body_line(&line)?;
                    return Ok(());
                }
                Some(_) => continue,
            }
        }
    }

    fn decode_body_line(&mut self, line: &str) -> Result<()> {
        let decoded = BASE64
            .decode(line.trim())
            .map_err(|e| Error::MalformedPacketStream(format!("invalid armor base64: {e}")))?;
        self.crc.update(&decoded);
        self.buf = decoded;
        self.pos = 0;
        Ok(())
    }

    fn advance(&mut self) -> Result<bool> {
        loop {
            match self.state {
                DecoderState::Preamble => {
                    self.skip_preamble()?;
                    self.state = DecoderState::Body;
                    if self.pos < self.buf.len() {
                        return Ok(true);
                    }
                }
                DecoderState::Body => {
                    let line = self.read_line()?.ok_or_else(|| {
                        Error::MalformedPacketStream("armor ended without end line".into())
                    })?;
                    if let Some(crc_line) = line.strip_prefix('=') {
                        let expected = BASE64.decode(crc_line.trim()).map_err(|e| {
                            Error::MalformedPacketStream(format!("invalid armor checksum: {e}"))
                        })?;
                        if expected != self.crc.finish() {
                            return Err(Error::MalformedPacketStream(
                                "armor checksum mismatch".into(),
                            ));
                        }
                        // The end line must follow the checksum.
                        loop {
                            match self.read_line()? {
                                None => {
                                    return Err(Error::MalformedPacketStream(
                                        "armor ended without end line".into(),
                                    ))
                                }
                                Some(l) if l.starts_with("-----END PGP") => break,
                                Some(l) if l.is_empty() => continue,
                                Some(_) => {
                                    return Err(Error::MalformedPacketStream(
                                        "unexpected data after armor checksum".into(),
                                    ))
                                }
                            }
                        }
                        self.state = DecoderState::Done;
                        return Ok(false);
                    }
                    if line.starts_with("-----END PGP") {
                        // Checksum line is optional in newer emitters.
                        self.state = DecoderState::Done;
                        return Ok(false);
                    }
                    if line.is_empty() {
                        continue;
                    }
                    self.decode_body_line(&line)?;
                    if self.pos < self.buf.len() {
                        return Ok(true);
                    }
                }
                DecoderState::Done => return Ok(false),
            }
        }
    }
}

impl<R: BufRead> Read for ArmorDecoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.pos >= self.buf.len() {
            match self.advance().map_err(Error::into_io)? {
                true => {}
                false => return Ok(0),
            }
        }
        let n = buf.len().min(self.buf.len() - self.pos);
        buf[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// De-armor a complete byte slice (convenience for key imports).
pub fn dearmor_bytes(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ArmorDecoder::new(std::io::BufReader::new(std::io::Cursor::new(data)));
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).map_err(Error::from_io)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc24_known_value() {
        // CRC of the empty string is the initialisation vector.
        assert_eq!(Crc24::new().finish(), [0xB7, 0x04, 0xCE]);
    }

    #[test]
    fn test_armor_round_trip() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let armored = armor_bytes(ArmorKind::Message, &data);
        assert!(armored.starts_with("-----BEGIN PGP MESSAGE-----\n"));
        assert!(armored.ends_with("-----END PGP MESSAGE-----\n"));
        // Body lines stay within the 64-column convention.
        for line in armored.lines() {
            assert!(line.len() <= 64 || line.starts_with("-----"));
        }
        assert_eq!(dearmor_bytes(armored.as_bytes()).unwrap(), data);
    }

    #[test]
    fn test_armor_detect() {
        assert!(is_armored(b"-----BEGIN PGP MESSAGE-----"));
        assert!(is_armored(b"\n  -----BEGIN PGP PUBLIC KEY BLOCK-----"));
        assert!(!is_armored(b"\x84\x8c\x03"));
    }

    #[test]
    fn test_corrupt_checksum_rejected() {
        let armored = armor_bytes(ArmorKind::Message, b"payload");
        // Flip a character inside the checksum line.
        let broken = armored.replacen("\n=", "\n=A", 1);
        assert!(matches!(
            dearmor_bytes(broken.as_bytes()),
            Err(Error::MalformedPacketStream(_))
        ));
    }

    #[test]
    fn test_missing_end_line_rejected() {
        let armored = armor_bytes(ArmorKind::Message, b"payload");
        let truncated = armored.replace("-----END PGP MESSAGE-----\n", "");
        assert!(matches!(
            dearmor_bytes(truncated.as_bytes()),
            Err(Error::MalformedPacketStream(_))
        ));
    }

    #[test]
    fn test_armor_headers_are_skipped() {
        let data = b"hello armor";
        let body = BASE64.encode(data);
        let mut crc = Crc24::new();
        crc.update(data);
        let crc_b64 = BASE64.encode(crc.finish());
        let armored = format!(
            "-----BEGIN PGP MESSAGE-----\nVersion: Oracle 1.0\nComment: test\n\n{body}\n={crc_b64}\n-----END PGP MESSAGE-----\n"
        );
        assert_eq!(dearmor_bytes(armored.as_bytes()).unwrap(), data);
    }
}
