//! Names for leaf parts.

use crate::model::MailPart;

/// Extension used when the media type is not in [`EXTENSIONS`].
pub const FALLBACK_EXTENSION: &str = ".dat";

static EXTENSIONS: &[(&str, &str)] = &[
    ("text/plain", ".txt"),
    ("text/html", ".html"),
    ("text/calendar", ".ics"),
    ("text/csv", ".csv"),
    ("text/xml", ".xml"),
    ("image/jpeg", ".jpg"),
    ("image/png", ".png"),
    ("image/gif", ".gif"),
    ("image/tiff", ".tif"),
    ("application/pdf", ".pdf"),
    ("application/zip", ".zip"),
    ("application/xml", ".xml"),
    ("application/json", ".json"),
    ("application/msword", ".doc"),
    ("application/vnd.ms-excel", ".xls"),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        ".docx",
    ),
    (
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        ".xlsx",
    ),
    ("application/pkcs7-mime", ".p7m"),
    ("application/x-pkcs7-mime", ".p7m"),
    ("application/pkcs7-signature", ".p7s"),
    ("application/x-pkcs7-signature", ".p7s"),
    ("message/rfc822", ".eml"),
    ("message/delivery-status", ".txt"),
];

/// File extension (with the dot) for a lower-cased media type.
pub fn extension_for(content_type: &str) -> &'static str {
    EXTENSIONS
        .iter()
        .find(|(ct, _)| *ct == content_type)
        .map_or(FALLBACK_EXTENSION, |(_, ext)| ext)
}

/// The name a leaf is known by: its `Content-Disposition` filename, or
/// `{level}.{seq}{ext}` when it has none. Separators and `%` are escaped.
pub fn leaf_name(part: &MailPart) -> String {
    let name = part.file_name();
    let name = if name.is_empty() {
        format!(
            "{}.{}{}",
            part.level(),
            part.seq(),
            extension_for(part.content_type())
        )
    } else {
        name
    };
    escape_name(&name)
}

/// Percent-escape path separators and `%` itself; everything else is kept.
fn escape_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '/' | '\\' | '%' => out.push_str(&format!("%{:02X}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::walk::session::Session;

    #[test]
    fn test_extension_lookup() {
        assert_eq!(extension_for("text/plain"), ".txt");
        assert_eq!(extension_for("image/jpeg"), ".jpg");
        assert_eq!(extension_for("application/x-unknown"), ".dat");
    }

    #[test]
    fn test_synthesized_name() {
        let session = Session::new();
        let part = MailPart::parse(&session, &b"Content-Type: text/html\n\n<p>"[..], None).unwrap();
        assert_eq!(leaf_name(&part), format!("1.{}.html", part.seq()));
        assert_eq!(part.file_name(), "");
    }

    #[test]
    fn test_escape_keeps_non_ascii() {
        assert_eq!(escape_name("résumé.pdf"), "résumé.pdf");
        assert_eq!(escape_name("a/b"), "a%2Fb");
    }

    #[test]
    fn test_filename_separators_escaped() {
        let session = Session::new();
        let raw = b"Content-Disposition: attachment; filename=\"..\\\\etc/100%.txt\"\n\nx";
        let part = MailPart::parse(&session, &raw[..], None).unwrap();
        assert_eq!(leaf_name(&part), "..%5Cetc%2F100%25.txt");
    }
}
