// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use thiserror::Error;

/// Primary crate error type.
#[derive(Debug, Error)]
pub enum DebInspectError {
    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("integer parsing error: {0:?}")]
    ParseInt(#[from] std::num::ParseIntError),

    #[error("ar archive global header is corrupted")]
    ArBadMagic,

    #[error("ar archive member not found: {0}")]
    ArMemberNotFound(String),

    #[error("unknown compression in archive member name: {0}")]
    UnknownCompression(String),

    #[error("tar header checksum mismatch for entry {0}")]
    TarBadChecksum(String),

    #[error("not an ELF object")]
    NotElf,

    #[error("unsupported ELF machine: {0}")]
    UnsupportedElfMachine(u16),

    #[error("DYNAMIC section does not link to a string table")]
    BadDynamicLink,

    #[error("seeking relative to the end of a forward stream is not supported")]
    UnsupportedSeek,

    #[error("seek target at offset {0} is no longer buffered")]
    LookBack(u64),

    #[error("control file field missing: {0}")]
    MissingControlField(&'static str),

    #[error("control file not found in archive")]
    ControlFileNotFound,
}

/// Result wrapper for this crate.
pub type Result<T> = std::result::Result<T, DebInspectError>;
