//! Export functionality: writing walked parts to disk.

pub mod parts;
