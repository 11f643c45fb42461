//! Email address parsing (RFC 5322 §3.4).
//!
//! The grammar is delegated to `mail-parser`; this module adds the repairs
//! needed for the broken address headers found in real mail.

use mail_parser::{Address, MessageParser};

use crate::parser::header::head_decode;

/// A parsed email address.
///
/// # Examples
/// - `"Juan García <juan@ejemplo.com>"` → `display_name = "Juan García"`, `address = "juan@ejemplo.com"`
/// - `"user@example.com"` → `display_name = ""`, `address = "user@example.com"`
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct EmailAddress {
    /// Human-readable display name (may be empty), RFC 2047 decoded.
    pub display_name: String,
    /// The bare email address (`user@domain`).
    pub address: String,
}

impl EmailAddress {
    /// Parse a single address from a header value.
    ///
    /// If the value has no proper angle address, parsing is retried on the
    /// text starting at the last `<`; as a last resort the raw text is kept
    /// as `address`.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self {
                display_name: String::new(),
                address: String::new(),
            };
        }

        if let Some(addr) = grammar_parse(trimmed).into_iter().find(Self::is_valid) {
            return addr;
        }

        if let Some(angle_start) = trimmed.rfind('<') {
            let name = strip_quotes(&head_decode(trimmed[..angle_start].trim()));
            let tail = &trimmed[angle_start..];
            if let Some(mut addr) = grammar_parse(tail).into_iter().find(Self::is_valid) {
                if addr.display_name.is_empty() {
                    addr.display_name = name;
                }
                return addr;
            }
            let bare = tail.trim_start_matches('<');
            let bare = bare.split('>').next().unwrap_or(bare).trim();
            return Self {
                display_name: name,
                address: bare.to_string(),
            };
        }

        Self {
            display_name: String::new(),
            address: trimmed.to_string(),
        }
    }

    /// Parse a comma-separated list of addresses.
    ///
    /// Handles quoted commas: `"Last, First" <a@b.com>, other@c.com`.
    /// Group syntax (`team: a@b.com, c@d.com;`) is flattened.
    pub fn parse_list(raw: &str) -> Vec<Self> {
        let parsed = grammar_parse(raw);
        if !parsed.is_empty() && parsed.iter().all(Self::is_valid) {
            return parsed;
        }

        split_list(raw)
            .iter()
            .map(|segment| Self::parse(segment))
            .filter(|addr| !addr.address.is_empty())
            .collect()
    }

    fn is_valid(addr: &Self) -> bool {
        addr.address.contains('@')
            && !addr
                .address
                .contains(|c: char| c.is_whitespace() || c == '<' || c == '>')
    }

    /// Format for display: `"Display Name <address>"` or just `"address"`.
    pub fn display(&self) -> String {
        if self.display_name.is_empty() {
            self.address.clone()
        } else {
            format!("{} <{}>", self.display_name, self.address)
        }
    }
}

/// Parse a `From`/`To`/`Cc` style value into its addresses.
pub fn parse_address_list(value: &str) -> Vec<EmailAddress> {
    EmailAddress::parse_list(value)
}

/// Run `mail-parser`'s address grammar over a header value.
fn grammar_parse(value: &str) -> Vec<EmailAddress> {
    // mail-parser only parses whole messages; wrap the value in a minimal one.
    let fake_msg = format!("To: {value}\r\n\r\n");
    let Some(msg) = MessageParser::default().parse(fake_msg.as_bytes()) else {
        return Vec::new();
    };
    let convert = |addr: &mail_parser::Addr<'_>| EmailAddress {
        display_name: addr
            .name
            .as_deref()
            .map(|n| n.trim().to_string())
            .unwrap_or_default(),
        address: addr
            .address
            .as_deref()
            .map(|a| a.trim().to_string())
            .unwrap_or_default(),
    };
    match msg.to() {
        Some(Address::List(list)) => list.iter().map(convert).collect(),
        Some(Address::Group(groups)) => groups
            .iter()
            .flat_map(|g| g.addresses.iter().map(convert))
            .collect(),
        None => Vec::new(),
    }
}

/// Split on commas outside quotes and angle brackets.
fn split_list(raw: &str) -> Vec<String> {
    let mut results = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut in_angle = false;

    for ch in raw.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            '<' if !in_quotes => {
                in_angle = true;
                current.push(ch);
            }
            '>' if !in_quotes => {
                in_angle = false;
                current.push(ch);
            }
            ',' if !in_quotes && !in_angle => {
                results.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    results.push(current);
    results
}

/// Strip surrounding double-quotes and trim whitespace.
fn strip_quotes(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        trimmed[1..trimmed.len() - 1].trim().to_string()
    } else {
        trimmed.to_string()
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}
