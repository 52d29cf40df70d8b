//! Message framing on the byte stream (RFC 6242).
//!
//! Two framings exist:
//!
//! ```text
//! base:1.0   <xml ...>]]>]]>
//! base:1.1   \n#<len>\n<len bytes>\n#<len>\n<len bytes>...\n##\n
//! ```
//!
//! The `<hello>` exchange always uses base:1.0 framing. Once both sides
//! agree on base:1.1 the framer is upgraded and stays chunked for the rest
//! of the session. Decoding errors are fatal: a desynced stream cannot be
//! resynchronised.

use std::fmt::Write as _;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::capabilities::ProtocolVersion;
use crate::error::{NetconfError, Result};
use crate::transport::ByteChannel;

/// base:1.0 end-of-message marker
pub const END_OF_MESSAGE: &[u8] = b"]]>]]>";

/// base:1.1 end-of-chunks marker
pub const END_OF_CHUNKS: &[u8] = b"\n##\n";

/// Largest chunk size allowed by RFC 6242
pub const MAX_CHUNK_SIZE: u64 = 4_294_967_295;

/// Default upper bound on a single decoded message (64 MiB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

const READ_CHUNK: usize = 8 * 1024;

/// Incremental decoder for both framings.
///
/// `decode` never consumes a partial message from the caller's buffer in a
/// way that loses data, so it can be called again after more bytes arrive.
#[derive(Debug)]
pub struct FrameDecoder {
    version: ProtocolVersion,
    max_message_size: usize,
    /// base:1.0 resume offset for the marker search
    scan_from: usize,
    /// base:1.1 payload collected so far for the current message
    chunked: BytesMut,
    /// base:1.1 bytes still owed by the current chunk
    remaining: usize,
}

enum ChunkHeader {
    Incomplete,
    Chunk { len: usize, consumed: usize },
    End { consumed: usize },
}

impl FrameDecoder {
    /// Decoder for the given framing.
    pub fn new(version: ProtocolVersion, max_message_size: usize) -> Self {
        Self {
            version,
            max_message_size,
            scan_from: 0,
            chunked: BytesMut::new(),
            remaining: 0,
        }
    }

    /// Current framing.
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Switch framing between messages.
    pub fn set_version(&mut self, version: ProtocolVersion) {
        self.version = version;
        self.scan_from = 0;
        self.chunked.clear();
        self.remaining = 0;
    }

    /// Whether a message has been started but not finished.
    pub fn in_progress(&self, buf: &BytesMut) -> bool {
        match self.version {
            ProtocolVersion::V1_0 => buf.iter().any(|b| !b.is_ascii_whitespace()),
            ProtocolVersion::V1_1 => !buf.is_empty() || !self.chunked.is_empty() || self.remaining > 0,
        }
    }

    /// Try to take one complete message out of `buf`.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>> {
        match self.version {
            ProtocolVersion::V1_0 => self.decode_eom(buf),
            ProtocolVersion::V1_1 => self.decode_chunked(buf),
        }
    }

    /// Called once the stream reported end of file.
    ///
    /// Returns `Ok(None)` on a clean close between messages and a framing
    /// error if the stream stopped inside a message.
    pub fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>> {
        if let Some(msg) = self.decode(buf)? {
            return Ok(Some(msg));
        }
        if self.in_progress(buf) {
            return Err(NetconfError::Framing(
                "stream ended in the middle of a message".to_string(),
            ));
        }
        Ok(None)
    }

    fn decode_eom(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>> {
        let start = self.scan_from.min(buf.len());
        if let Some(pos) = find(&buf[start..], END_OF_MESSAGE) {
            let msg = buf.split_to(start + pos).freeze();
            buf.advance(END_OF_MESSAGE.len());
            self.scan_from = 0;
            return Ok(Some(msg));
        }

        if buf.len() > self.max_message_size {
            return Err(NetconfError::Framing(format!(
                "message exceeds {} bytes without end-of-message marker",
                self.max_message_size
            )));
        }
        // A marker may straddle the next read; rescan its possible prefix.
        self.scan_from = buf.len().saturating_sub(END_OF_MESSAGE.len() - 1);
        Ok(None)
    }

    fn decode_chunked(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>> {
        loop {
            if self.remaining > 0 {
                if buf.is_empty() {
                    return Ok(None);
                }
                let take = self.remaining.min(buf.len());
                self.chunked.extend_from_slice(&buf.split_to(take));
                self.remaining -= take;
                if self.remaining > 0 {
                    return Ok(None);
                }
                continue;
            }

            match parse_chunk_header(buf)? {
                ChunkHeader::Incomplete => return Ok(None),
                ChunkHeader::Chunk { len, consumed } => {
                    if self.chunked.len() + len > self.max_message_size {
                        return Err(NetconfError::Framing(format!(
                            "chunked message exceeds {} bytes",
                            self.max_message_size
                        )));
                    }
                    buf.advance(consumed);
                    self.remaining = len;
                },
                ChunkHeader::End { consumed } => {
                    buf.advance(consumed);
                    if self.chunked.is_empty() {
                        return Err(NetconfError::Framing(
                            "end-of-chunks marker without any chunk".to_string(),
                        ));
                    }
                    return Ok(Some(self.chunked.split().freeze()));
                },
            }
        }
    }
}

fn parse_chunk_header(buf: &[u8]) -> Result<ChunkHeader> {
    const MAX_DIGITS: usize = 10;

    let bad = |what: &str| Err(NetconfError::Framing(format!("invalid chunk header: {what}")));

    match buf.first() {
        None => return Ok(ChunkHeader::Incomplete),
        Some(b'\n') => {},
        Some(other) => return bad(&format!("expected LF, found 0x{other:02x}")),
    }
    match buf.get(1) {
        None => return Ok(ChunkHeader::Incomplete),
        Some(b'#') => {},
        Some(other) => return bad(&format!("expected '#', found 0x{other:02x}")),
    }
    match buf.get(2) {
        None => return Ok(ChunkHeader::Incomplete),
        Some(b'#') => {
            return match buf.get(3) {
                None => Ok(ChunkHeader::Incomplete),
                Some(b'\n') => Ok(ChunkHeader::End { consumed: 4 }),
                Some(_) => bad("end-of-chunks marker not followed by LF"),
            };
        },
        Some(b'0') => return bad("chunk size must be positive without leading zeros"),
        Some(d) if d.is_ascii_digit() => {},
        Some(other) => return bad(&format!("expected chunk size, found 0x{other:02x}")),
    }

    let digits = buf[2..]
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .count();
    if digits > MAX_DIGITS {
        return bad("chunk size too long");
    }
    match buf.get(2 + digits) {
        None => Ok(ChunkHeader::Incomplete),
        Some(b'\n') => {
            // Only ASCII digits, parse cannot fail on content.
            let text = std::str::from_utf8(&buf[2..2 + digits]).unwrap_or("0");
            let len: u64 = text.parse().unwrap_or(0);
            if len == 0 || len > MAX_CHUNK_SIZE {
                return bad(&format!("chunk size {text} out of range"));
            }
            let len = usize::try_from(len)
                .map_err(|_| NetconfError::Framing(format!("chunk size {len} too large")))?;
            Ok(ChunkHeader::Chunk {
                len,
                consumed: 2 + digits + 1,
            })
        },
        Some(other) => bad(&format!("expected LF after size, found 0x{other:02x}")),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Append one framed message to `dst`.
///
/// base:1.1 payloads are written as a single chunk.
pub fn encode(version: ProtocolVersion, payload: &[u8], dst: &mut BytesMut) {
    match version {
        ProtocolVersion::V1_0 => {
            dst.extend_from_slice(payload);
            dst.extend_from_slice(END_OF_MESSAGE);
        },
        ProtocolVersion::V1_1 => encode_chunked(payload, payload.len().max(1), dst),
    }
}

/// Append a base:1.1 message split into chunks of at most `chunk_size` bytes.
pub fn encode_chunked(payload: &[u8], chunk_size: usize, dst: &mut BytesMut) {
    let chunk_size = chunk_size.max(1);
    for chunk in payload.chunks(chunk_size) {
        let mut header = String::with_capacity(16);
        let _ = write!(header, "\n#{}\n", chunk.len());
        dst.extend_from_slice(header.as_bytes());
        dst.extend_from_slice(chunk);
    }
    dst.extend_from_slice(END_OF_CHUNKS);
}

/// Reads and writes whole messages on a [`ByteChannel`].
pub struct MessageFramer {
    channel: Box<dyn ByteChannel>,
    decoder: FrameDecoder,
    read_buf: BytesMut,
    write_buf: BytesMut,
    eof: bool,
}

impl MessageFramer {
    /// Framer in base:1.0 mode, as required for the hello exchange.
    pub fn new(channel: impl ByteChannel + 'static, max_message_size: usize) -> Self {
        Self {
            channel: Box::new(channel),
            decoder: FrameDecoder::new(ProtocolVersion::V1_0, max_message_size),
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            write_buf: BytesMut::with_capacity(READ_CHUNK),
            eof: false,
        }
    }

    /// Framing currently in use.
    pub fn version(&self) -> ProtocolVersion {
        self.decoder.version()
    }

    /// Switch to the negotiated framing. Bytes already buffered are kept.
    pub fn upgrade(&mut self, version: ProtocolVersion) {
        if version != self.decoder.version() {
            tracing::debug!(%version, "switching message framing");
            self.decoder.set_version(version);
        }
    }

    /// Read the next complete message.
    ///
    /// Cancel safe: dropping the future between reads loses no data.
    pub async fn read_message(&mut self) -> Result<Bytes> {
        loop {
            if let Some(msg) = self.decoder.decode(&mut self.read_buf)? {
                tracing::trace!(bytes = msg.len(), "received message");
                return Ok(msg);
            }
            if self.eof {
                return Err(NetconfError::ConnectionClosed);
            }

            self.read_buf.reserve(READ_CHUNK);
            let n = self.channel.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                self.eof = true;
                return match self.decoder.decode_eof(&mut self.read_buf)? {
                    Some(msg) => Ok(msg),
                    None => Err(NetconfError::ConnectionClosed),
                };
            }
        }
    }

    /// Frame and send one message.
    pub async fn write_message(&mut self, payload: &[u8]) -> Result<()> {
        if payload.is_empty() {
            return Err(NetconfError::InvalidMessage(
                "refusing to send an empty message".to_string(),
            ));
        }
        self.write_buf.clear();
        encode(self.decoder.version(), payload, &mut self.write_buf);
        self.channel.write_all(&self.write_buf).await?;
        self.channel.flush().await?;
        tracing::trace!(bytes = payload.len(), "sent message");
        Ok(())
    }

    /// Shut down the write side of the channel.
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.channel.shutdown().await {
            tracing::debug!(error = %e, "channel shutdown failed");
        }
    }
}

impl std::fmt::Debug for MessageFramer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageFramer")
            .field("version", &self.decoder.version())
            .field("buffered", &self.read_buf.len())
            .field("eof", &self.eof)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn decoder(version: ProtocolVersion) -> FrameDecoder {
        FrameDecoder::new(version, DEFAULT_MAX_MESSAGE_SIZE)
    }

    #[test]
    fn test_eom_decode_strips_marker() {
        let mut dec = decoder(ProtocolVersion::V1_0);
        let mut buf = BytesMut::from(&b"<hello/>]]>]]><rpc/>]]>]]>"[..]);
        assert_eq!(dec.decode(&mut buf).unwrap().unwrap(), &b"<hello/>"[..]);
        assert_eq!(dec.decode(&mut buf).unwrap().unwrap(), &b"<rpc/>"[..]);
        assert!(dec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_eom_marker_split_across_reads() {
        let mut dec = decoder(ProtocolVersion::V1_0);
        let mut buf = BytesMut::from(&b"<a/>]]>]"[..]);
        assert!(dec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"]>");
        assert_eq!(dec.decode(&mut buf).unwrap().unwrap(), &b"<a/>"[..]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_chunked_multiple_chunks() {
        let mut dec = decoder(ProtocolVersion::V1_1);
        let mut buf = BytesMut::from(&b"\n#4\n<rpc\n#17\n message-id=\"1\"/>\n##\n"[..]);
        let msg = dec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg, &b"<rpc message-id=\"1\"/>"[..]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_chunked_rejects_bad_headers() {
        for bad in [
            &b"\n#0\n"[..],
            &b"\n#01\nx\n##\n"[..],
            &b"\n#abc\n"[..],
            &b"#4\nabcd\n##\n"[..],
            &b"\n#4x\nabcd"[..],
            &b"\n#99999999999\n"[..],
            &b"\n##\n"[..],
            &b"\n##x"[..],
        ] {
            let mut dec = decoder(ProtocolVersion::V1_1);
            let mut buf = BytesMut::from(bad);
            assert!(
                matches!(dec.decode(&mut buf), Err(NetconfError::Framing(_))),
                "accepted {:?}",
                String::from_utf8_lossy(bad)
            );
        }
    }

    #[test]
    fn test_chunked_short_chunk_is_framing_error_at_eof() {
        let mut dec = decoder(ProtocolVersion::V1_1);
        let mut buf = BytesMut::from(&b"\n#10\nabc\n##\n"[..]);
        assert!(dec.decode(&mut buf).unwrap().is_none());
        assert!(matches!(
            dec.decode_eof(&mut buf),
            Err(NetconfError::Framing(_))
        ));
    }

    #[test]
    fn test_clean_eof_between_messages() {
        let mut dec = decoder(ProtocolVersion::V1_0);
        let mut buf = BytesMut::from(&b"\n"[..]);
        assert!(dec.decode_eof(&mut buf).unwrap().is_none());

        let mut dec = decoder(ProtocolVersion::V1_0);
        let mut buf = BytesMut::from(&b"<rpc>"[..]);
        assert!(dec.decode_eof(&mut buf).is_err());
    }

    #[test]
    fn test_max_message_size_enforced() {
        let mut dec = FrameDecoder::new(ProtocolVersion::V1_1, 8);
        let mut buf = BytesMut::from(&b"\n#9\n"[..]);
        assert!(dec.decode(&mut buf).is_err());

        let mut dec = FrameDecoder::new(ProtocolVersion::V1_0, 8);
        let mut buf = BytesMut::from(&b"0123456789"[..]);
        assert!(dec.decode(&mut buf).is_err());
    }

    #[tokio::test]
    async fn test_framer_reads_across_partial_io() {
        let mock = tokio_test::io::Builder::new()
            .read(b"<hello/>]]")
            .read(b">]]>\n#3\n<a/")
            .read(b">\n##\n")
            .build();
        let mut framer = MessageFramer::new(mock, DEFAULT_MAX_MESSAGE_SIZE);
        assert_eq!(framer.read_message().await.unwrap(), &b"<hello/>"[..]);
        framer.upgrade(ProtocolVersion::V1_1);
        assert_eq!(framer.read_message().await.unwrap(), &b"<a/>"[..]);
        assert!(matches!(
            framer.read_message().await,
            Err(NetconfError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_framer_write_uses_current_version() {
        let mock = tokio_test::io::Builder::new()
            .write(b"<hello/>]]>]]>")
            .write(b"\n#6\n<rpc/>\n##\n")
            .build();
        let mut framer = MessageFramer::new(mock, DEFAULT_MAX_MESSAGE_SIZE);
        framer.write_message(b"<hello/>").await.unwrap();
        framer.upgrade(ProtocolVersion::V1_1);
        framer.write_message(b"<rpc/>").await.unwrap();
    }

    fn payload() -> impl Strategy<Value = Vec<u8>> {
        proptest::collection::vec(any::<u8>(), 1..512).prop_filter("marker first found at the end", |p| {
            let framed = [p.as_slice(), END_OF_MESSAGE].concat();
            find(&framed, END_OF_MESSAGE) == Some(p.len())
        })
    }

    proptest! {
        #[test]
        fn prop_eom_roundtrip(body in payload(), cut in 0usize..600) {
            let mut wire = BytesMut::new();
            encode(ProtocolVersion::V1_0, &body, &mut wire);
            let original = wire.clone();

            let cut = cut.min(wire.len());
            let mut dec = decoder(ProtocolVersion::V1_0);
            let mut buf = BytesMut::from(&wire[..cut]);
            let mut out = dec.decode(&mut buf).unwrap();
            if out.is_none() {
                buf.extend_from_slice(&wire[cut..]);
                out = dec.decode(&mut buf).unwrap();
            }
            let decoded = out.unwrap();
            prop_assert_eq!(&decoded[..], &body[..]);

            let mut again = BytesMut::new();
            encode(ProtocolVersion::V1_0, &decoded, &mut again);
            prop_assert_eq!(again, original);
        }

        #[test]
        fn prop_chunking_is_transparent(
            body in proptest::collection::vec(any::<u8>(), 1..1024),
            chunk_size in 1usize..300,
            feed in 1usize..64,
        ) {
            let mut wire = BytesMut::new();
            encode_chunked(&body, chunk_size, &mut wire);

            let mut dec = decoder(ProtocolVersion::V1_1);
            let mut buf = BytesMut::new();
            let mut decoded = None;
            for piece in wire.chunks(feed) {
                buf.extend_from_slice(piece);
                if let Some(msg) = dec.decode(&mut buf).unwrap() {
                    decoded = Some(msg);
                }
            }
            prop_assert_eq!(&decoded.unwrap()[..], &body[..]);
            prop_assert!(buf.is_empty());
        }

        #[test]
        fn prop_truncated_chunk_never_yields_message(
            body in proptest::collection::vec(any::<u8>(), 2..256),
            missing in 1usize..64,
        ) {
            let mut wire = BytesMut::new();
            encode(ProtocolVersion::V1_1, &body, &mut wire);
            // Drop bytes from the chunk payload and keep the trailer.
            let missing = missing.min(body.len() - 1);
            let header_len = wire.len() - body.len() - END_OF_CHUNKS.len();
            let mut damaged = BytesMut::from(&wire[..header_len + body.len() - missing]);
            damaged.extend_from_slice(END_OF_CHUNKS);

            let mut dec = decoder(ProtocolVersion::V1_1);
            let result = dec.decode(&mut damaged);
            let result = match result {
                Ok(None) => dec.decode_eof(&mut damaged),
                other => other,
            };
            prop_assert!(matches!(result, Err(NetconfError::Framing(_))));
        }
    }
}
