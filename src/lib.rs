//! `i18nmail` — recursive MIME walking for real-world mail.
//!
//! This crate decomposes RFC 5322 / MIME messages into a tree of typed
//! parts: it follows nested multipart and message boundaries, undoes
//! transfer encodings, decodes RFC 2047 headers, hashes every body, unwraps
//! opaque S/MIME through `openssl`, and hands each leaf to a callback with a
//! re-readable body.

pub mod config;
pub mod error;
pub mod export;
pub mod model;
pub mod msgid;
pub mod parser;
pub mod section;
pub mod smime;
pub mod walk;

pub use error::{MailError, Result};
pub use model::{EmailAddress, HeaderMap, MailPart};
pub use walk::{CancelToken, Session, Visit, Walker, MAX_WALK_DEPTH};
