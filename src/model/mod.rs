//! Core data model types: MIME parts, header maps, and addresses.

pub mod address;
pub mod header_map;
pub mod part;

pub use address::EmailAddress;
pub use header_map::HeaderMap;
pub use part::MailPart;
