//! Ordered, case-insensitive multi-map of header fields.

/// Header fields keyed by canonical name (`content-type` → `Content-Type`).
///
/// Keys are canonicalized once on insertion; field order and the order of
/// repeated values are preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct HeaderMap {
    entries: Vec<(String, Vec<String>)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value under `name`, keeping earlier values.
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        let key = canonical_key(name);
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value.into()),
            None => self.entries.push((key, vec![value.into()])),
        }
    }

    /// Replace every value of `name` with `value`.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let key = canonical_key(name);
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => *values = vec![value.into()],
            None => self.entries.push((key, vec![value.into()])),
        }
    }

    /// First value of `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).first().map(String::as_str)
    }

    /// All values of `name` in source order (empty if absent).
    pub fn get_all(&self, name: &str) -> &[String] {
        let key = canonical_key(name);
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn contains(&self, name: &str) -> bool {
        !self.get_all(name).is_empty()
    }

    /// Remove `name`, returning its values.
    pub fn remove(&mut self, name: &str) -> Vec<String> {
        let key = canonical_key(name);
        match self.entries.iter().position(|(k, _)| *k == key) {
            Some(pos) => self.entries.remove(pos).1,
            None => Vec::new(),
        }
    }

    /// Iterate `(name, values)` in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Number of distinct field names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> FromIterator<(&'a str, String)> for HeaderMap {
    fn from_iter<I: IntoIterator<Item = (&'a str, String)>>(iter: I) -> Self {
        let mut map = HeaderMap::new();
        for (name, value) in iter {
            map.append(name, value);
        }
        map
    }
}

/// Fields whose conventional spelling is not the mechanical one.
const WELL_KNOWN: &[&str] = &[
    "X-HashOfFullMessage",
    "Message-ID",
    "MIME-Version",
    "Content-ID",
];

/// Canonical MIME header key: first letter and letters after `-` upper-cased,
/// the rest lower-cased, except for the spellings in [`WELL_KNOWN`]. Keys
/// with spaces or non-token bytes are left as-is.
pub fn canonical_key(name: &str) -> String {
    let name = name.trim();
    if let Some(known) = WELL_KNOWN.iter().find(|k| k.eq_ignore_ascii_case(name)) {
        return known.to_string();
    }
    if name
        .bytes()
        .any(|b| b == b' ' || b == b':' || !b.is_ascii_graphic())
    {
        return name.to_string();
    }
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for ch in name.chars() {
        if upper {
            out.push(ch.to_ascii_uppercase());
        } else {
            out.push(ch.to_ascii_lowercase());
        }
        upper = ch == '-';
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_key() {
        assert_eq!(canonical_key("content-type"), "Content-Type");
        assert_eq!(canonical_key("x-mailer"), "X-Mailer");
        assert_eq!(canonical_key("MIME-VERSION"), "MIME-Version");
        assert_eq!(canonical_key("message-id"), "Message-ID");
        assert_eq!(canonical_key("x-hashoffullmessage"), "X-HashOfFullMessage");
        assert_eq!(canonical_key("bad key"), "bad key");
    }

    #[test]
    fn test_multi_values_keep_order() {
        let mut map = HeaderMap::new();
        map.append("Received", "first");
        map.append("subject", "hi");
        map.append("RECEIVED", "second");
        assert_eq!(map.get_all("received"), ["first", "second"]);
        assert_eq!(map.get("Subject"), Some("hi"));
        let names: Vec<&str> = map.iter().map(|(k, _)| k).collect();
        assert_eq!(names, ["Received", "Subject"]);
    }

    #[test]
    fn test_set_and_remove() {
        let mut map = HeaderMap::new();
        map.append("To", "a@b.com");
        map.append("To", "c@d.com");
        map.set("to", "e@f.com");
        assert_eq!(map.get_all("To"), ["e@f.com"]);
        assert_eq!(map.remove("TO"), vec!["e@f.com".to_string()]);
        assert!(!map.contains("to"));
        assert!(map.get_all("to").is_empty());
    }
}
