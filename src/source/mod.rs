//! # Source File Decoding
//!
//! Everything that reads the damaged database: the read-only mapping
//! (`file`), the zero-copy page view (`page`), and payload reassembly
//! across overflow chains (`payload`).
//!
//! The decoding layer is permissive by policy: a broken cell yields a
//! typed skip reason, a broken page header yields an error the driver
//! logs and steps over, and only the engine-facing side of the tool
//! treats surprises as fatal.

mod file;
mod page;
mod payload;

pub use file::SourceFile;
pub use page::{CellOffsets, SourcePage};
pub use payload::{extract_payload, CellSkip};
