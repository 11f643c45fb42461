//! `Content-Type` / `Content-Disposition` values (RFC 2045, RFC 2183, RFC 2231).

use std::collections::BTreeMap;

use percent_encoding::percent_decode_str;
use tracing::warn;

use crate::error::{MailError, Result};
use crate::parser::header::decode_charset;

/// Parameter map with lower-cased names.
pub type Params = BTreeMap<String, String>;

/// Parse a media type such as `multipart/mixed; boundary="xyz"`.
///
/// Returns the lower-cased `type/subtype` and its parameters. A missing or
/// malformed `type/subtype` is an error; unparsable parameters are skipped
/// with a warning, as mail in the wild is full of them.
pub fn parse_media_type(value: &str) -> Result<(String, Params)> {
    let (type_part, params_part) = split_value(value);
    let Some((primary, sub)) = type_part.split_once('/') else {
        return Err(invalid(value, "missing '/'"));
    };
    let (primary, sub) = (primary.trim(), sub.trim());
    if !is_token(primary) || !is_token(sub) {
        return Err(invalid(value, "type and subtype must be tokens"));
    }
    let essence = format!("{}/{}", primary.to_ascii_lowercase(), sub.to_ascii_lowercase());
    Ok((essence, parse_params(params_part)))
}

/// Parse a disposition such as `attachment; filename="a.txt"`.
pub fn parse_disposition(value: &str) -> Result<(String, Params)> {
    let (kind, params_part) = split_value(value);
    if !is_token(kind) {
        return Err(invalid(value, "disposition type must be a token"));
    }
    Ok((kind.to_ascii_lowercase(), parse_params(params_part)))
}

fn split_value(value: &str) -> (&str, &str) {
    match value.find(';') {
        Some(i) => (value[..i].trim(), &value[i + 1..]),
        None => (value.trim(), ""),
    }
}

fn invalid(value: &str, reason: &'static str) -> MailError {
    MailError::InvalidMediaType {
        value: value.to_string(),
        reason,
    }
}

/// RFC 2045 token: printable ASCII except SPACE and tspecials.
fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_graphic() && !b"()<>@,;:\\\"/[]?=".contains(&b)
        })
}

/// Parse a semicolon-separated parameter list, folding RFC 2231
/// continuations (`name*0`, `name*1*`) and extended values (`name*`).
fn parse_params(input: &str) -> Params {
    let mut simple = Params::new();
    // name → (section index, is-extended, raw value)
    let mut sections: BTreeMap<String, Vec<(u32, bool, String)>> = BTreeMap::new();

    for (name, value) in raw_params(input) {
        let name = name.to_ascii_lowercase();
        match name.split_once('*') {
            None => {
                if simple.contains_key(&name) {
                    warn!(param = %name, "Duplicate media type parameter, keeping first");
                    continue;
                }
                simple.insert(name, value);
            }
            Some((base, rest)) => {
                let (index, extended) = match rest {
                    "" => (0, true),
                    _ => {
                        let (num, extended) = match rest.strip_suffix('*') {
                            Some(n) => (n, true),
                            None => (rest, false),
                        };
                        match num.parse::<u32>() {
                            Ok(n) => (n, extended),
                            Err(_) => {
                                warn!(param = %name, "Bad RFC 2231 section number");
                                continue;
                            }
                        }
                    }
                };
                sections
                    .entry(base.to_string())
                    .or_default()
                    .push((index, extended, value));
            }
        }
    }

    for (base, mut parts) in sections {
        parts.sort_by_key(|(index, _, _)| *index);
        if let Some(value) = join_sections(&parts) {
            simple.insert(base, value);
        }
    }
    simple
}

/// Reassemble RFC 2231 sections into one decoded value.
fn join_sections(parts: &[(u32, bool, String)]) -> Option<String> {
    let mut charset: Option<String> = None;
    let mut bytes = Vec::new();
    for (i, (_, extended, raw)) in parts.iter().enumerate() {
        if *extended {
            let mut encoded = raw.as_str();
            if i == 0 {
                // charset'language'value
                let mut pieces = raw.splitn(3, '\'');
                if let (Some(cs), Some(_lang), Some(rest)) =
                    (pieces.next(), pieces.next(), pieces.next())
                {
                    if !cs.is_empty() {
                        charset = Some(cs.to_string());
                    }
                    encoded = rest;
                }
            }
            bytes.extend(percent_decode_str(encoded));
        } else {
            bytes.extend_from_slice(raw.as_bytes());
        }
    }
    match charset {
        Some(cs) => decode_charset(&cs, &bytes).or_else(|| {
            warn!(charset = %cs, "Unknown charset in RFC 2231 parameter");
            Some(String::from_utf8_lossy(&bytes).into_owned())
        }),
        None => Some(String::from_utf8_lossy(&bytes).into_owned()),
    }
}

/// Split `name=value; name="quoted value"` pairs, skipping malformed ones.
fn raw_params(input: &str) -> Vec<(String, String)> {
    let bytes = input.as_bytes();
    let len = bytes.len();
    let mut pos = 0;
    let mut out = Vec::new();

    while pos < len {
        while pos < len && (bytes[pos] == b';' || bytes[pos].is_ascii_whitespace()) {
            pos += 1;
        }
        if pos >= len {
            break;
        }
        let next_semi = bytes[pos..]
            .iter()
            .position(|&b| b == b';')
            .map(|i| pos + i)
            .unwrap_or(len);
        let Some(eq) = bytes[pos..next_semi].iter().position(|&b| b == b'=') else {
            warn!(param = %&input[pos..next_semi], "Media type parameter without '='");
            pos = next_semi;
            continue;
        };
        let eq = pos + eq;
        let name = input[pos..eq].trim();
        pos = eq + 1;
        while pos < len && (bytes[pos] == b' ' || bytes[pos] == b'\t') {
            pos += 1;
        }

        let value = if pos < len && bytes[pos] == b'"' {
            pos += 1;
            let mut v = Vec::new();
            while pos < len {
                match bytes[pos] {
                    b'\\' if pos + 1 < len => {
                        v.push(bytes[pos + 1]);
                        pos += 2;
                    }
                    b'"' => {
                        pos += 1;
                        break;
                    }
                    c => {
                        v.push(c);
                        pos += 1;
                    }
                }
            }
            // Skip anything between the closing quote and the next ';'
            while pos < len && bytes[pos] != b';' {
                pos += 1;
            }
            String::from_utf8_lossy(&v).into_owned()
        } else {
            let end = bytes[pos..]
                .iter()
                .position(|&b| b == b';')
                .map(|i| pos + i)
                .unwrap_or(len);
            let v = input[pos..end].trim().to_string();
            pos = end;
            v
        };

        if !is_token(name.trim_end_matches('*')) {
            warn!(param = %name, "Invalid media type parameter name");
            continue;
        }
        out.push((name.to_string(), value));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let (ct, params) = parse_media_type("Multipart/Mixed; boundary=\"xyz\"").unwrap();
        assert_eq!(ct, "multipart/mixed");
        assert_eq!(params.get("boundary").map(String::as_str), Some("xyz"));
    }

    #[test]
    fn test_parse_trailing_semicolon_and_case() {
        let (ct, params) = parse_media_type("text/plain; CHARSET=utf-8; format=flowed;").unwrap();
        assert_eq!(ct, "text/plain");
        assert_eq!(params["charset"], "utf-8");
        assert_eq!(params["format"], "flowed");
    }

    #[test]
    fn test_invalid_media_type() {
        assert!(parse_media_type("text").is_err());
        assert!(parse_media_type("").is_err());
        assert!(parse_media_type("text/pl ain").is_err());
        assert!(parse_media_type("/plain").is_err());
    }

    #[test]
    fn test_bad_params_are_skipped() {
        let (_, params) = parse_media_type("text/plain; junk; charset=us-ascii").unwrap();
        assert_eq!(params.len(), 1);
        assert_eq!(params["charset"], "us-ascii");
    }

    #[test]
    fn test_quoted_escapes() {
        let (_, params) =
            parse_disposition(r#"attachment; filename="we \"quote\"; here.txt""#).unwrap();
        assert_eq!(params["filename"], "we \"quote\"; here.txt");
    }

    #[test]
    fn test_rfc2231_extended_value() {
        let (kind, params) =
            parse_disposition("attachment; filename*=UTF-8''%E2%82%AC%20rates.txt").unwrap();
        assert_eq!(kind, "attachment");
        assert_eq!(params["filename"], "€ rates.txt");
    }

    #[test]
    fn test_rfc2231_continuations() {
        let (_, params) = parse_disposition(
            "attachment; filename*1=\"part two.txt\"; filename*0*=iso-8859-1'en'caf%E9_",
        )
        .unwrap();
        assert_eq!(params["filename"], "café_part two.txt");
    }
}
