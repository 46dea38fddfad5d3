//! Mach-O load-command patching.
//!
//! Parsing is done with goblin; edits are applied to the raw bytes and the
//! file is swapped in atomically.

pub mod parser;
pub mod patcher;
pub mod writer;

#[cfg(test)]
pub(crate) mod testutil;

pub use parser::{ArchSlice, LibraryCommand, MachOFile};
pub use patcher::{
    insert_library_reference, list_library_references, remove_library_references,
    rewrite_library_path, LibraryReference,
};
