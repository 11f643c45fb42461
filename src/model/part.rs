//! A single MIME entity with its materialized body.

use std::io::{self, Read};
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use sha2::{Digest, Sha512_224};

use super::address::{parse_address_list, EmailAddress};
use super::header_map::HeaderMap;
use crate::error::{MailError, Result};
use crate::parser::header::{decode_charset, head_decode, parse_header_block};
use crate::parser::media_type::{parse_disposition, parse_media_type, Params};
use crate::parser::transfer::decoder_for;
use crate::section::{ReadAt, Section, SectionReader};
use crate::walk::session::Session;

/// Header holding the SHA-512/224 of a part's undecoded body.
pub const HASH_HEADER: &str = "X-HashOfFullMessage";

/// Content type assumed for caller-built entities and raw message streams.
pub const DEFAULT_CONTENT_TYPE: &str = "message/rfc822";

/// Content type assumed for header blocks without `Content-Type` (RFC 2045 §5.2).
pub const PLAIN_CONTENT_TYPE: &str = "text/plain";

/// One node of the MIME tree.
///
/// The body is transfer-decoded (base64 / quoted-printable) and owned as a
/// [`Section`], so it can be re-read any number of times. Parts are immutable
/// once built; [`MailPart::spawn`] creates children.
#[derive(Debug)]
pub struct MailPart {
    content_type: String,
    media_type: Params,
    header: HeaderMap,
    level: usize,
    seq: u64,
    parent: Option<Arc<MailPart>>,
    body: Section,
}

impl MailPart {
    /// Wrap a whole raw message stream as a root `message/rfc822` part.
    ///
    /// The body is the complete message (headers included); walking the part
    /// parses it. Its hash therefore covers the full message.
    pub fn from_reader<R: Read>(session: &Session, reader: R) -> Result<Self> {
        Self::build(
            session,
            None,
            HeaderMap::new(),
            reader,
            DEFAULT_CONTENT_TYPE,
        )
    }

    /// Build a part from an already parsed header map and its raw body.
    ///
    /// Without a `Content-Type` header the part is `message/rfc822`.
    pub fn from_entity<R: Read>(
        session: &Session,
        parent: Option<Arc<MailPart>>,
        header: HeaderMap,
        body: R,
    ) -> Result<Self> {
        Self::build(session, parent, header, body, DEFAULT_CONTENT_TYPE)
    }

    /// Read a complete entity (header block + body) from `reader`.
    ///
    /// Without a `Content-Type` header the part is `text/plain`. The stream
    /// goes through the session's materializer first, so large entities are
    /// spilled to disk rather than buffered.
    pub fn parse<R: Read>(
        session: &Session,
        reader: R,
        parent: Option<Arc<MailPart>>,
    ) -> Result<Self> {
        let raw = session.materializer().materialize(reader)?;
        Self::from_entity_bytes(session, parent, raw.as_bytes(), PLAIN_CONTENT_TYPE)
    }

    /// Parse the entity in `raw`, using `default_type` when `Content-Type` is absent.
    pub(crate) fn from_entity_bytes(
        session: &Session,
        parent: Option<Arc<MailPart>>,
        raw: &[u8],
        default_type: &str,
    ) -> Result<Self> {
        let block = parse_header_block(raw, session.max_header_bytes())?;
        Self::build(
            session,
            parent,
            block.header,
            &raw[block.body_offset..],
            default_type,
        )
    }

    /// Create a child of `self` one level deeper, with the next sequence number.
    pub fn spawn<R: Read>(
        self: &Arc<Self>,
        session: &Session,
        header: HeaderMap,
        body: R,
    ) -> Result<MailPart> {
        Self::from_entity(session, Some(Arc::clone(self)), header, body)
    }

    fn build<R: Read>(
        session: &Session,
        parent: Option<Arc<MailPart>>,
        mut header: HeaderMap,
        body: R,
        default_type: &str,
    ) -> Result<Self> {
        let level = parent.as_ref().map_or(1, |p| p.level + 1);
        let seq = session.next_seq();

        let (content_type, media_type) = match header.get("Content-Type") {
            Some(value) if !value.trim().is_empty() => {
                parse_media_type(value).map_err(|e| e.in_part(seq))?
            }
            _ => (default_type.to_string(), Params::new()),
        };

        let mut hashing = HashingReader::new(body);
        let section = {
            let encoding = header.get("Content-Transfer-Encoding");
            let decoder = decoder_for(encoding, &mut hashing);
            session
                .materializer()
                .materialize(decoder)
                .map_err(|e| e.in_part(seq))?
        };
        // The decoder may stop early on trailing garbage; hash every raw byte.
        io::copy(&mut hashing, &mut io::sink()).map_err(|e| MailError::from(e).in_part(seq))?;

        if !header.contains(HASH_HEADER) {
            header.set(HASH_HEADER, hashing.finish());
        }

        Ok(Self {
            content_type,
            media_type,
            header,
            level,
            seq,
            parent,
            body: section,
        })
    }

    /// Lower-cased `type/subtype`.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Content-Type parameters (lower-cased names).
    pub fn media_type(&self) -> &Params {
        &self.media_type
    }

    pub fn header(&self) -> &HeaderMap {
        &self.header
    }

    /// Depth from the root (root = 1).
    pub fn level(&self) -> usize {
        self.level
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn parent(&self) -> Option<&Arc<MailPart>> {
        self.parent.as_ref()
    }

    /// The transfer-decoded body.
    pub fn body(&self) -> &Section {
        &self.body
    }

    /// A fresh reader over the body, starting at offset 0.
    pub fn body_reader(&self) -> SectionReader<'_> {
        self.body.reader()
    }

    pub fn size(&self) -> u64 {
        self.body.size()
    }

    /// Base64url SHA-512/224 of the undecoded body.
    pub fn hash(&self) -> Option<&str> {
        self.header.get(HASH_HEADER)
    }

    pub fn is_multipart(&self) -> bool {
        self.content_type.starts_with("multipart/")
    }

    pub fn is_message(&self) -> bool {
        self.content_type.starts_with("message/")
    }

    /// The `filename` parameter of `Content-Disposition`, or `""`.
    pub fn file_name(&self) -> String {
        let Some(value) = self.header.get("Content-Disposition") else {
            return String::new();
        };
        match parse_disposition(value) {
            Ok((_, params)) => params
                .get("filename")
                .map(|name| head_decode(name))
                .unwrap_or_default(),
            Err(_) => String::new(),
        }
    }

    /// `true` if `Content-Disposition` says `attachment`.
    pub fn is_attachment(&self) -> bool {
        self.header
            .get("Content-Disposition")
            .and_then(|v| parse_disposition(v).ok())
            .is_some_and(|(kind, _)| kind == "attachment")
    }

    /// First value of `name` with RFC 2047 encoded-words decoded.
    pub fn header_decoded(&self, name: &str) -> Option<String> {
        self.header.get(name).map(head_decode)
    }

    /// All addresses in every `name` header (e.g. `"To"`).
    pub fn addresses(&self, name: &str) -> Vec<EmailAddress> {
        self.header
            .get_all(name)
            .iter()
            .flat_map(|v| parse_address_list(v))
            .collect()
    }

    /// The `charset` parameter, if any.
    pub fn charset(&self) -> Option<&str> {
        self.media_type.get("charset").map(String::as_str)
    }

    /// Body decoded to UTF-8 using the part's charset (default US-ASCII).
    ///
    /// Unknown charsets fall back to lossy UTF-8.
    pub fn text(&self) -> String {
        let bytes = self.body.as_bytes();
        let charset = self.charset().unwrap_or("us-ascii");
        decode_charset(charset, bytes).unwrap_or_else(|| {
            tracing::warn!(charset, seq = self.seq, "Unknown body charset, using UTF-8");
            String::from_utf8_lossy(bytes).into_owned()
        })
    }
}

/// Passes bytes through while feeding them to SHA-512/224.
struct HashingReader<R> {
    inner: R,
    hasher: Sha512_224,
}

impl<R: Read> HashingReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha512_224::new(),
        }
    }

    fn finish(self) -> String {
        URL_SAFE.encode(self.hasher.finalize())
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

/// SHA-512/224 of `data`, base64url-encoded as stored in [`HASH_HEADER`].
pub fn body_hash(data: &[u8]) -> String {
    URL_SAFE.encode(Sha512_224::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::section::Materializer;

    fn session() -> Session {
        Session::new()
    }

    #[test]
    fn test_parse_entity_with_base64_body() {
        let raw = b"Content-Type: text/plain; charset=utf-8\r\nContent-Transfer-Encoding: base64\r\n\r\nY2Fmw6k=\r\n";
        let part = MailPart::parse(&session(), &raw[..], None).unwrap();
        assert_eq!(part.content_type(), "text/plain");
        assert_eq!(part.charset(), Some("utf-8"));
        assert_eq!(part.body().as_bytes(), "café".as_bytes());
        assert_eq!(part.text(), "café");
        assert_eq!(part.level(), 1);
        // Hash covers the encoded bytes, not the decoded ones.
        assert_eq!(part.hash(), Some(body_hash(b"Y2Fmw6k=\r\n").as_str()));
    }

    #[test]
    fn test_existing_hash_is_kept() {
        let mut header = HeaderMap::new();
        header.append("x-hashoffullmessage", "precomputed");
        let part = MailPart::from_entity(&session(), None, header, &b"body"[..]).unwrap();
        assert_eq!(part.hash(), Some("precomputed"));
        assert_eq!(part.content_type(), DEFAULT_CONTENT_TYPE);
    }

    #[test]
    fn test_hash_header_keeps_its_spelling() {
        let part = MailPart::parse(&session(), &b"Content-Type: text/plain\n\nx"[..], None).unwrap();
        let names: Vec<&str> = part.header().iter().map(|(k, _)| k).collect();
        assert_eq!(names, ["Content-Type", HASH_HEADER]);
        assert_eq!(HASH_HEADER, "X-HashOfFullMessage");
    }

    #[test]
    fn test_parse_spills_large_entity() {
        let s = Session::new().with_materializer(Materializer::new(64));
        let mut raw = b"Content-Type: application/octet-stream\n\n".to_vec();
        raw.extend(std::iter::repeat(b'q').take(4096));
        let part = MailPart::parse(&s, &raw[..], None).unwrap();
        assert_eq!(part.size(), 4096);
        assert!(part.body().as_bytes().iter().all(|&b| b == b'q'));
        assert!(s.materializer().spills() >= 2);
    }

    #[test]
    fn test_hash_shape() {
        let hash = body_hash(b"");
        // 28 digest bytes → 40 base64 chars with padding
        assert_eq!(hash.len(), 40);
        assert!(hash.ends_with("=="));
        assert!(!hash.contains('+') && !hash.contains('/'));
    }

    #[test]
    fn test_spawn_increments_level_and_seq() {
        let s = session();
        let root = Arc::new(MailPart::from_reader(&s, &b"Subject: x\n\nhi"[..]).unwrap());
        let child = root.spawn(&s, HeaderMap::new(), &b""[..]).unwrap();
        assert_eq!(child.level(), root.level() + 1);
        assert!(child.seq() > root.seq());
        assert_eq!(child.parent().map(|p| p.seq()), Some(root.seq()));
    }

    #[test]
    fn test_file_name_from_disposition() {
        let raw = b"Content-Disposition: attachment; filename=\"=?UTF-8?Q?r=C3=A9sum=C3=A9.pdf?=\"\n\n%PDF";
        let part = MailPart::parse(&session(), &raw[..], None).unwrap();
        assert_eq!(part.file_name(), "résumé.pdf");
        assert!(part.is_attachment());

        let plain = MailPart::parse(&session(), &b"Subject: x\n\nbody"[..], None).unwrap();
        assert_eq!(plain.file_name(), "");
        assert_eq!(plain.content_type(), PLAIN_CONTENT_TYPE);
    }

    #[test]
    fn test_malformed_content_type_is_error() {
        let raw = b"Content-Type: garbage\n\nbody";
        let err = MailPart::parse(&session(), &raw[..], None).unwrap_err();
        assert!(err.is_parse());
    }

    #[test]
    fn test_decoded_header_and_addresses() {
        let raw = b"Subject: =?UTF-8?B?SG9sYQ==?=\nTo: Ann <ann@example.com>, bob@example.com\n\n";
        let part = MailPart::parse(&session(), &raw[..], None).unwrap();
        assert_eq!(part.header_decoded("subject").as_deref(), Some("Hola"));
        let to = part.addresses("to");
        assert_eq!(to.len(), 2);
        assert_eq!(to[0].display_name, "Ann");
        assert_eq!(to[1].address, "bob@example.com");
    }
}
