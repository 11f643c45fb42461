//! MIME parsing: header blocks and encoded-words, media types, multipart
//! boundaries, and transfer-encoding decoders.

pub mod header;
pub mod media_type;
pub mod multipart;
pub mod transfer;
