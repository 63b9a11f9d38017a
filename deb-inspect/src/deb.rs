// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian binary package access.

Composes the ar, compression, and tar layers to pull the deb822 control
paragraph and the data member descriptor out of a `.deb` file.
*/

use {
    crate::{
        ar, compression,
        error::{DebInspectError, Result},
        tar::TarReader,
    },
    once_cell::sync::Lazy,
    regex::Regex,
    std::io::{Read, Seek},
};

/// Ar member name prefix of the payload tarball.
pub const DATA_MEMBER_PREFIX: &str = "data.tar.";

/// Ar member name prefix of the control tarball.
pub const CONTROL_MEMBER_PREFIX: &str = "control.tar.";

/// Tar entry holding the deb822 package paragraph.
pub const CONTROL_ENTRY_NAME: &str = "./control";

/// Upper bound on control fields retained per package.
const MAX_CONTROL_FIELDS: usize = 20;

static FIELD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?P<key>[^: \t\n\r\f\v]+)\s*:\s*(?P<value>.*)").unwrap());

/// Control metadata and data member facts read from a deb.
#[derive(Clone, Debug, Default)]
pub struct DebMetadata {
    /// Ordered deb822 fields from `./control`.
    pub fields: Vec<(String, String)>,
    /// Size of the `data.tar.*` member as declared by its ar header.
    pub data_size: u64,
}

impl DebMetadata {
    /// Look up a control field by exact key.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Resolve a field that a well-formed package must carry.
    pub fn required_field(&self, key: &'static str) -> Result<&str> {
        self.field(key)
            .ok_or(DebInspectError::MissingControlField(key))
    }
}

/// Read control metadata out of a deb.
///
/// Locates `data.tar.*` for its declared size, then decompresses
/// `control.tar.*` and parses the `./control` entry.
pub fn read_metadata<R: Read + Seek>(input: &mut R) -> Result<DebMetadata> {
    let data_size = match ar::find_member(input, DATA_MEMBER_PREFIX)? {
        Some((header, _)) => header.size,
        None => {
            return Err(DebInspectError::ArMemberNotFound(
                DATA_MEMBER_PREFIX.to_string(),
            ))
        }
    };

    let (header, member) = ar::find_member(input, CONTROL_MEMBER_PREFIX)?.ok_or_else(|| {
        DebInspectError::ArMemberNotFound(CONTROL_MEMBER_PREFIX.to_string())
    })?;

    let decoded = compression::decompress_member(&header.name, member)?;
    let mut entries = TarReader::new(decoded);
    if entries.find(CONTROL_ENTRY_NAME)?.is_none() {
        return Err(DebInspectError::ControlFileNotFound);
    }

    let mut raw = Vec::new();
    entries.read_to_end(&mut raw)?;
    let control = String::from_utf8_lossy(&raw);

    Ok(DebMetadata {
        fields: parse_control_fields(&control),
        data_size,
    })
}

/// Extract up to [MAX_CONTROL_FIELDS] `key: value` pairs from a control
/// paragraph, in order of appearance.
pub fn parse_control_fields(control: &str) -> Vec<(String, String)> {
    FIELD_RE
        .captures_iter(control)
        .take(MAX_CONTROL_FIELDS)
        .map(|captures| (captures["key"].to_string(), captures["value"].to_string()))
        .collect()
}
