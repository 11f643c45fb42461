//! Depth-first traversal of a MIME tree.
//!
//! The [`Walker`] wraps a raw message as a root `message/rfc822` part and
//! descends into `multipart/*` containers (one sub-part at a time, in
//! document order) and `message/*` bodies (parsed as fresh messages, after
//! an S/MIME unwrap where needed). Every leaf is handed to the caller's
//! callback as a fully materialized [`MailPart`].

pub mod naming;
pub mod session;

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{MailError, Result};
use crate::model::part::{DEFAULT_CONTENT_TYPE, PLAIN_CONTENT_TYPE};
use crate::model::MailPart;
use crate::parser::header::skip_from_line;
use crate::parser::multipart::MultipartReader;
use crate::section::Materializer;
use crate::smime::{self, SmimeUnwrapper};

pub use naming::leaf_name;
pub use session::{CancelToken, Session};

/// Deepest container nesting the walker follows by default.
pub const MAX_WALK_DEPTH: usize = 32;

/// How many leading body bytes a descent error carries.
const ERROR_HEAD_BYTES: usize = 128;

/// What the callback wants the walker to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Continue,
    /// End the walk now; `walk` still returns `Ok(())`.
    Stop,
}

/// Recursive MIME walker.
#[derive(Debug)]
pub struct Walker {
    session: Arc<Session>,
    dont_descend: bool,
    max_depth: usize,
    smime: Option<SmimeUnwrapper>,
    cancel: CancelToken,
}

impl Default for Walker {
    fn default() -> Self {
        Self::new()
    }
}

impl Walker {
    pub fn new() -> Self {
        Self {
            session: Arc::new(Session::new()),
            dont_descend: false,
            max_depth: MAX_WALK_DEPTH,
            smime: Some(SmimeUnwrapper::default()),
            cancel: CancelToken::new(),
        }
    }

    /// Build a walker from the `[walk]` and `[smime]` configuration sections.
    pub fn from_config(config: &Config) -> Self {
        let mut materializer = Materializer::new(config.walk.materialize_threshold);
        if let Some(dir) = &config.walk.temp_dir {
            materializer = materializer.with_temp_dir(dir);
        }
        let session = Session::new()
            .with_materializer(materializer)
            .with_max_header_bytes(config.walk.max_header_bytes);
        let smime = config.smime.enabled.then(|| {
            SmimeUnwrapper::new(&config.smime.openssl)
                .with_timeout(Duration::from_secs(config.smime.timeout_secs))
        });
        Self {
            session: Arc::new(session),
            dont_descend: config.walk.dont_descend,
            max_depth: config.walk.max_depth,
            smime,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_session(mut self, session: Arc<Session>) -> Self {
        self.session = session;
        self
    }

    /// Treat every part below the top-level entity as a leaf.
    pub fn dont_descend(mut self, yes: bool) -> Self {
        self.dont_descend = yes;
        self
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Replace (or with `None`, disable) the S/MIME unwrap step.
    pub fn smime(mut self, smime: Option<SmimeUnwrapper>) -> Self {
        self.smime = smime;
        self
    }

    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn cancel(&self) -> &CancelToken {
        &self.cancel
    }

    /// Walk the message read from `reader`, calling `todo` for every leaf.
    ///
    /// A leading mbox `From ` line and UTF-8 BOM are skipped.
    pub fn walk<R, F>(&self, reader: R, mut todo: F) -> Result<()>
    where
        R: Read,
        F: FnMut(MailPart) -> anyhow::Result<Visit>,
    {
        let root = MailPart::from_reader(&self.session, reader)?;
        finish(self.visit(root, 0, &mut todo))
    }

    /// Walk an already constructed part.
    pub fn walk_part<F>(&self, part: MailPart, mut todo: F) -> Result<()>
    where
        F: FnMut(MailPart) -> anyhow::Result<Visit>,
    {
        finish(self.visit(part, 1, &mut todo))
    }

    fn visit<F>(&self, part: MailPart, depth: usize, todo: &mut F) -> Result<()>
    where
        F: FnMut(MailPart) -> anyhow::Result<Visit>,
    {
        if self.cancel.is_cancelled() {
            return Err(MailError::Cancelled);
        }
        debug!(
            level = part.level(),
            seq = part.seq(),
            content_type = part.content_type(),
            size = part.body().len(),
            "Visiting part"
        );

        if !self.expands(&part, depth) {
            return self.leaf(part, todo);
        }
        if depth >= self.max_depth {
            return Err(MailError::MaxDepthExceeded(self.max_depth));
        }

        let part = Arc::new(part);
        if part.is_multipart() {
            self.walk_multipart(&part, depth, todo)
        } else {
            self.walk_message(&part, depth, todo)
        }
    }

    fn expands(&self, part: &MailPart, depth: usize) -> bool {
        let container = part.is_multipart()
            || part.is_message()
            || (self.smime.is_some() && smime::is_smime(part.content_type()));
        // With dont_descend only the top-level message and its own
        // multipart body are opened.
        container && (!self.dont_descend || depth < 2)
    }

    fn walk_multipart<F>(&self, part: &Arc<MailPart>, depth: usize, todo: &mut F) -> Result<()>
    where
        F: FnMut(MailPart) -> anyhow::Result<Visit>,
    {
        let body = part.body().as_bytes();
        let Some(boundary) = part.media_type().get("boundary").filter(|b| !b.is_empty()) else {
            let err = MailError::MissingBoundary(part.content_type().to_string());
            return self.descend_failed(part, err, body);
        };
        let default_type = if part.content_type() == "multipart/digest" {
            DEFAULT_CONTENT_TYPE
        } else {
            PLAIN_CONTENT_TYPE
        };

        let mut parts = MultipartReader::new(body, boundary);
        while let Some(raw) = parts.next_part() {
            if self.cancel.is_cancelled() {
                return Err(MailError::Cancelled);
            }
            let child = match MailPart::from_entity_bytes(
                &self.session,
                Some(Arc::clone(part)),
                raw,
                default_type,
            ) {
                Ok(child) => child,
                Err(err) => {
                    self.descend_failed(part, err, raw)?;
                    continue;
                }
            };
            self.visit(child, depth + 1, todo)?;
        }
        if !parts.found_delimiter() {
            let err = MailError::NoDelimiter(boundary.to_string());
            return self.descend_failed(part, err, body);
        }
        Ok(())
    }

    fn walk_message<F>(&self, part: &Arc<MailPart>, depth: usize, todo: &mut F) -> Result<()>
    where
        F: FnMut(MailPart) -> anyhow::Result<Visit>,
    {
        let unwrapped;
        let body = match &self.smime {
            Some(unwrapper) if smime::is_smime(part.content_type()) => {
                unwrapped = unwrapper.unwrap_part(part, self.session.materializer(), &self.cancel)?;
                unwrapped.as_bytes()
            }
            _ => part.body().as_bytes(),
        };
        let raw = skip_from_line(body);

        match MailPart::from_entity_bytes(
            &self.session,
            Some(Arc::clone(part)),
            raw,
            PLAIN_CONTENT_TYPE,
        ) {
            Ok(child) => self.visit(child, depth + 1, todo),
            Err(err) => self.descend_failed(part, err, raw),
        }
    }

    /// Suppress a parse error over an empty remainder, otherwise attach context.
    fn descend_failed(&self, parent: &MailPart, err: MailError, raw: &[u8]) -> Result<()> {
        if !err.is_parse() {
            return Err(err);
        }
        if raw.iter().all(u8::is_ascii_whitespace) {
            warn!(
                level = parent.level(),
                seq = parent.seq(),
                error = %err,
                "Ignoring parse error on empty sub-part"
            );
            return Ok(());
        }
        let head = &raw[..raw.len().min(ERROR_HEAD_BYTES)];
        Err(MailError::Descend {
            seq: parent.seq(),
            level: parent.level(),
            head: String::from_utf8_lossy(head).into_owned(),
            source: Box::new(err),
        })
    }

    fn leaf<F>(&self, part: MailPart, todo: &mut F) -> Result<()>
    where
        F: FnMut(MailPart) -> anyhow::Result<Visit>,
    {
        let name = leaf_name(&part);
        match todo(part) {
            Ok(Visit::Continue) => Ok(()),
            Ok(Visit::Stop) => Err(MailError::Stop),
            Err(err) if matches!(err.downcast_ref::<MailError>(), Some(MailError::Stop)) => {
                Err(MailError::Stop)
            }
            Err(source) => Err(MailError::Callback { name, source }),
        }
    }
}

fn finish(result: Result<()>) -> Result<()> {
    match result {
        Err(MailError::Stop) => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIXED: &[u8] = b"From sender@example.com Mon Jan  1 00:00:00 2024\n\
Subject: test\n\
Content-Type: multipart/mixed; boundary=\"b1\"\n\
\n\
preamble\n\
--b1\n\
Content-Type: text/plain\n\
\n\
hello\n\
--b1\n\
Content-Type: text/plain\n\
Content-Disposition: attachment; filename=\"a.txt\"\n\
\n\
attached\n\
--b1--\n";

    fn collect(walker: &Walker, data: &[u8]) -> Result<Vec<(usize, String, String)>> {
        let mut seen = Vec::new();
        walker.walk(data, |part| {
            seen.push((part.level(), part.content_type().to_string(), part.file_name()));
            Ok(Visit::Continue)
        })?;
        Ok(seen)
    }

    #[test]
    fn test_two_leaves_in_order() {
        let seen = collect(&Walker::new(), MIXED).unwrap();
        assert_eq!(
            seen,
            vec![
                (3, "text/plain".to_string(), String::new()),
                (3, "text/plain".to_string(), "a.txt".to_string()),
            ]
        );
    }

    #[test]
    fn test_dont_descend_stops_below_top_multipart() {
        let nested = b"Content-Type: multipart/mixed; boundary=outer\n\n\
--outer\n\
Content-Type: multipart/alternative; boundary=inner\n\n\
--inner\n\
Content-Type: text/plain\n\nx\n\
--inner--\n\
--outer--\n";
        let seen = collect(&Walker::new().dont_descend(true), nested).unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1, "multipart/alternative");

        let seen = collect(&Walker::new(), nested).unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1, "text/plain");
    }

    #[test]
    fn test_stop_sentinel_ends_walk_ok() {
        let mut calls = 0;
        Walker::new()
            .walk(MIXED, |_| {
                calls += 1;
                Err(MailError::Stop.into())
            })
            .unwrap();
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_callback_error_carries_name() {
        let err = Walker::new()
            .walk(MIXED, |part| {
                if part.file_name() == "a.txt" {
                    anyhow::bail!("disk full");
                }
                Ok(Visit::Continue)
            })
            .unwrap_err();
        match err {
            MailError::Callback { name, source } => {
                assert_eq!(name, "a.txt");
                assert_eq!(source.to_string(), "disk full");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_boundary_is_descend_error() {
        let data = b"Content-Type: multipart/mixed\n\nsome body\n";
        let err = collect(&Walker::new(), data).unwrap_err();
        assert!(matches!(err, MailError::Descend { .. }), "{err}");
    }

    #[test]
    fn test_unmatched_boundary_is_descend_error() {
        let data = b"Content-Type: multipart/mixed; boundary=right\n\n\
--wrong\n\
Content-Type: text/plain\n\n\
lost\n\
--wrong--\n";
        let err = collect(&Walker::new(), data).unwrap_err();
        match err {
            MailError::Descend { head, source, .. } => {
                assert!(head.starts_with("--wrong"), "{head}");
                assert!(matches!(*source, MailError::NoDelimiter(ref b) if b == "right"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unmatched_boundary_over_blank_body_is_ignored() {
        let data = b"Content-Type: multipart/mixed; boundary=right\n\n \n\n";
        assert!(collect(&Walker::new(), data).unwrap().is_empty());
    }

    #[test]
    fn test_empty_multipart_body_is_ignored() {
        let data = b"Content-Type: multipart/mixed\n\n  \n";
        assert!(collect(&Walker::new(), data).unwrap().is_empty());
    }

    #[test]
    fn test_digest_parts_default_to_messages() {
        let data = b"Content-Type: multipart/digest; boundary=d\n\n\
--d\n\
\n\
Subject: inner\n\
\n\
digest body\n\
--d--\n";
        let seen = collect(&Walker::new(), data).unwrap();
        assert_eq!(seen, vec![(4, "text/plain".to_string(), String::new())]);
    }

    #[test]
    fn test_cancelled_before_walk() {
        let token = CancelToken::new();
        token.cancel();
        let err = collect(&Walker::new().cancel_token(token), MIXED).unwrap_err();
        assert!(matches!(err, MailError::Cancelled));
    }

    #[test]
    fn test_depth_limit() {
        let err = collect(&Walker::new().max_depth(1), MIXED).unwrap_err();
        assert!(matches!(err, MailError::MaxDepthExceeded(1)));
    }
}
