//! RFC 5322 header blocks: splitting, unfolding, and RFC 2047 encoded-words.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use tracing::warn;

use crate::error::{MailError, Result};
use crate::model::header_map::HeaderMap;

/// Default limit for a single header block (256 KB).
pub const MAX_HEADER_BYTES: usize = 256 * 1024;

/// Base64 as found in the wild: padding optional, stray trailing bits ignored.
pub(crate) const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// A parsed header block and where the body starts.
#[derive(Debug)]
pub struct HeaderBlock {
    pub header: HeaderMap,
    /// Byte offset of the first body byte within the entity.
    pub body_offset: usize,
}

/// Parse the header block at the start of `data`.
///
/// The block ends at the first empty line. Reaching the end of `data` is
/// accepted once at least one field has been read (the body is then empty).
/// Lines that are neither `name: value` nor a continuation are rejected.
pub fn parse_header_block(data: &[u8], limit: usize) -> Result<HeaderBlock> {
    let bom = data.len() - strip_bom(data).len();
    let data = &data[bom..];
    let (end, body_offset) = split_header_block(data, limit)?;
    let text = decode_header_bytes(&data[..end]);

    let mut fields: Vec<(String, String)> = Vec::new();
    for line in text.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.starts_with(' ') || line.starts_with('\t') {
            let Some(last) = fields.last_mut() else {
                return Err(MailError::MalformedHeader(line.to_string()));
            };
            last.1.push(' ');
            last.1.push_str(line.trim());
        } else if let Some(colon_pos) = line.find(':') {
            let name = line[..colon_pos].trim_end();
            if name.is_empty() || name.contains(' ') || name.contains('\t') {
                return Err(MailError::MalformedHeader(line.to_string()));
            }
            fields.push((name.to_string(), line[colon_pos + 1..].trim().to_string()));
        } else {
            return Err(MailError::MalformedHeader(line.to_string()));
        }
    }

    if fields.is_empty() && end == data.len() && body_offset == data.len() {
        return Err(MailError::UnterminatedHeader);
    }

    Ok(HeaderBlock {
        header: fields.iter().map(|(k, v)| (k.as_str(), v.clone())).collect(),
        body_offset: bom + body_offset,
    })
}

/// Locate the end of the header block.
///
/// Returns `(header_end, body_start)`; `header_end == body_start == data.len()`
/// when no empty line terminates the block.
fn split_header_block(data: &[u8], limit: usize) -> Result<(usize, usize)> {
    let mut pos = 0;
    while pos < data.len() {
        if pos > limit {
            return Err(MailError::HeaderTooLarge { limit });
        }
        let (line_end, next) = match data[pos..].iter().position(|&b| b == b'\n') {
            Some(i) => (pos + i, pos + i + 1),
            None => (data.len(), data.len()),
        };
        let line = &data[pos..line_end];
        if line.is_empty() || line == b"\r" {
            return Ok((pos, next));
        }
        pos = next;
    }
    if pos > limit {
        return Err(MailError::HeaderTooLarge { limit });
    }
    Ok((data.len(), data.len()))
}

fn strip_bom(data: &[u8]) -> &[u8] {
    data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data)
}

/// Skip an mbox `From ` separator line and a UTF-8 BOM at the start of a message.
pub fn skip_from_line(data: &[u8]) -> &[u8] {
    let data = strip_bom(data);
    if data.starts_with(b"From ") {
        if let Some(pos) = data.iter().position(|&b| b == b'\n') {
            return &data[pos + 1..];
        }
    }
    data
}

/// Decode raw header bytes to a string.
///
/// Tries UTF-8 first, then falls back to Windows-1252 (which accepts every byte).
pub fn decode_header_bytes(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

/// Decode RFC 2047 encoded-words in a header value.
///
/// Example: `"=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?="` → `"Hola mundo"`
///
/// Whitespace between two adjacent encoded-words is dropped and their bytes
/// are joined before charset decoding; whitespace next to plain text is kept.
/// If any word uses an unknown charset or cannot be decoded, the original
/// value is returned unchanged.
pub fn head_decode(input: &str) -> String {
    if !input.contains("=?") {
        return input.to_string();
    }
    match try_head_decode(input) {
        Ok(decoded) => decoded,
        Err(reason) => {
            warn!(header = input, reason = %reason, "Keeping header undecoded");
            input.to_string()
        }
    }
}

fn try_head_decode(input: &str) -> std::result::Result<String, String> {
    let mut result = String::with_capacity(input.len());
    let mut pending = PendingWord::default();
    let mut remaining = input;

    while let Some(start) = remaining.find("=?") {
        let before = &remaining[..start];
        let after_start = &remaining[start + 2..];

        match parse_one_word(after_start) {
            Some(word) => {
                let word = word?;
                let joins = pending.charset.is_some() && before.trim().is_empty();
                if !joins {
                    pending.flush(&mut result)?;
                    result.push_str(before);
                } else if !pending.same_charset(&word.charset) {
                    pending.flush(&mut result)?;
                }
                pending.push(word.charset, &word.bytes);
                remaining = &remaining[start + 2 + word.consumed..];
            }
            None => {
                pending.flush(&mut result)?;
                result.push_str(before);
                result.push_str("=?");
                remaining = after_start;
            }
        }
    }

    pending.flush(&mut result)?;
    result.push_str(remaining);
    Ok(result)
}

/// Bytes of consecutive encoded-words sharing a charset, decoded together.
#[derive(Default)]
struct PendingWord {
    charset: Option<String>,
    bytes: Vec<u8>,
}

impl PendingWord {
    fn same_charset(&self, charset: &str) -> bool {
        self.charset
            .as_deref()
            .is_some_and(|c| c.eq_ignore_ascii_case(charset))
    }

    fn push(&mut self, charset: String, bytes: &[u8]) {
        if self.charset.is_none() {
            self.charset = Some(charset);
        }
        self.bytes.extend_from_slice(bytes);
    }

    fn flush(&mut self, out: &mut String) -> std::result::Result<(), String> {
        if let Some(charset) = self.charset.take() {
            let text = decode_charset(&charset, &self.bytes)
                .ok_or_else(|| format!("unknown charset {charset:?}"))?;
            out.push_str(&text);
            self.bytes.clear();
        }
        Ok(())
    }
}

struct EncodedWord {
    charset: String,
    bytes: Vec<u8>,
    consumed: usize, // bytes consumed from the string *after* the initial "=?"
}

/// Parse one encoded-word following `=?`.
///
/// `None` means the text is not an encoded-word at all (kept literally);
/// `Some(Err(_))` means it is one, but its payload cannot be decoded.
fn parse_one_word(s: &str) -> Option<std::result::Result<EncodedWord, String>> {
    // Format: charset?encoding?encoded_text?=
    let first_q = s.find('?')?;
    let charset = &s[..first_q];
    if charset.is_empty() || charset.contains(char::is_whitespace) {
        return None;
    }

    let rest = &s[first_q + 1..];
    let second_q = rest.find('?')?;
    let encoding = &rest[..second_q];

    let rest2 = &rest[second_q + 1..];
    let end = rest2.find("?=")?;
    let encoded_text = &rest2[..end];
    if encoded_text.contains(char::is_whitespace) {
        return None;
    }

    let consumed = first_q + 1 + second_q + 1 + end + 2;

    let bytes = match encoding {
        "B" | "b" => match LENIENT_BASE64.decode(encoded_text) {
            Ok(bytes) => bytes,
            Err(e) => return Some(Err(format!("bad base64 word: {e}"))),
        },
        "Q" | "q" => decode_q_encoding(encoded_text),
        _ => return None,
    };

    // RFC 2231 allows a language suffix: "utf-8*en"
    let charset = charset.split('*').next().unwrap_or(charset).to_string();

    Some(Ok(EncodedWord {
        charset,
        bytes,
        consumed,
    }))
}

/// Decode Q-encoding (RFC 2047): underscores → spaces, `=XX` → byte.
fn decode_q_encoding(input: &str) -> Vec<u8> {
    let mut result = Vec::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                result.push(b' ');
                i += 1;
            }
            b'=' if i + 2 < bytes.len() => {
                match (hex_val(bytes[i + 1]), hex_val(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        result.push(hi << 4 | lo);
                        i += 3;
                    }
                    _ => {
                        result.push(b'=');
                        i += 1;
                    }
                }
            }
            b => {
                result.push(b);
                i += 1;
            }
        }
    }
    result
}

pub(crate) fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'A'..=b'F' => Some(b - b'A' + 10),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
    }
}

/// Decode bytes using a named charset. `None` if the charset is unknown.
pub fn decode_charset(charset: &str, bytes: &[u8]) -> Option<String> {
    let label = charset.trim().trim_matches('"');
    match label.to_ascii_lowercase().as_str() {
        "utf-8" | "utf8" => Some(String::from_utf8_lossy(bytes).into_owned()),
        _ => {
            let encoding = encoding_rs::Encoding::for_label(label.as_bytes())?;
            let (decoded, _, _) = encoding.decode(bytes);
            Some(decoded.into_owned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_head_decode_hello() {
        assert_eq!(head_decode("=?utf-8?B?SGVsbG8=?="), "Hello");
    }

    #[test]
    fn test_decode_q_encoded_word() {
        assert_eq!(head_decode("=?ISO-8859-1?Q?caf=E9?="), "café");
    }

    #[test]
    fn test_adjacent_words_are_joined() {
        let input = "=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?=";
        assert_eq!(head_decode(input), "Hola mundo");
        let folded = "=?UTF-8?Q?a?=\r\n\t =?UTF-8?Q?b?=";
        assert_eq!(head_decode(folded), "ab");
    }

    #[test]
    fn test_plain_text_space_is_kept() {
        assert_eq!(head_decode("=?UTF-8?Q?a?= b"), "a b");
        assert_eq!(head_decode("Re: =?UTF-8?B?SG9sYQ==?= there"), "Re: Hola there");
    }

    #[test]
    fn test_multibyte_split_across_words() {
        // 山田 split as 山 | 田
        let input = "=?UTF-8?B?5bGx?= =?UTF-8?B?55Sw?=";
        assert_eq!(head_decode(input), "山田");
    }

    #[test]
    fn test_unknown_charset_returns_original() {
        let input = "Hi =?x-no-such-charset?Q?abc?= there";
        assert_eq!(head_decode(input), input);
    }

    #[test]
    fn test_not_an_encoded_word_is_literal() {
        assert_eq!(head_decode("price =? unknown"), "price =? unknown");
        assert_eq!(head_decode("=?utf-8?X?abc?="), "=?utf-8?X?abc?=");
    }

    #[test]
    fn test_decode_windows1252_encoded_word() {
        assert_eq!(head_decode("=?Windows-1252?Q?M=FCller?="), "Müller");
    }

    #[test]
    fn test_parse_header_block_unfolds() {
        let data = b"Subject: This is a long\r\n\tsubject line\r\nFrom: user@example.com\r\n\r\nBody";
        let block = parse_header_block(data, MAX_HEADER_BYTES).unwrap();
        assert_eq!(
            block.header.get("subject"),
            Some("This is a long subject line")
        );
        assert_eq!(&data[block.body_offset..], b"Body");
    }

    #[test]
    fn test_parse_header_block_empty_headers() {
        let data = b"\nonly body\n";
        let block = parse_header_block(data, MAX_HEADER_BYTES).unwrap();
        assert!(block.header.is_empty());
        assert_eq!(&data[block.body_offset..], b"only body\n");
    }

    #[test]
    fn test_parse_header_block_without_body() {
        let data = b"Subject: x\n";
        let block = parse_header_block(data, MAX_HEADER_BYTES).unwrap();
        assert_eq!(block.header.get("Subject"), Some("x"));
        assert_eq!(block.body_offset, data.len());
    }

    #[test]
    fn test_parse_header_block_errors() {
        assert!(matches!(
            parse_header_block(b"", MAX_HEADER_BYTES),
            Err(MailError::UnterminatedHeader)
        ));
        assert!(matches!(
            parse_header_block(b"this is not a header\n\nbody", MAX_HEADER_BYTES),
            Err(MailError::MalformedHeader(_))
        ));
        let big = format!("X-Big: {}\n\n", "a".repeat(200));
        assert!(matches!(
            parse_header_block(big.as_bytes(), 64),
            Err(MailError::HeaderTooLarge { limit: 64 })
        ));
    }

    #[test]
    fn test_latin1_header_bytes() {
        let data = b"Subject: caf\xe9\n\n";
        let block = parse_header_block(data, MAX_HEADER_BYTES).unwrap();
        assert_eq!(block.header.get("Subject"), Some("café"));
    }

    #[test]
    fn test_skip_from_line() {
        let data = b"From user@example.com Thu Jan 01 00:00:00 2024\nSubject: Test\n\nBody\n";
        assert!(skip_from_line(data).starts_with(b"Subject:"));
        let plain = b"Subject: Test\n\nBody\n";
        assert_eq!(skip_from_line(plain), plain);
    }
}
