// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Unix ar archive member location.

A `.deb` file is an ar archive of `debian-binary`, `control.tar.*`, and
`data.tar.*`. This module knows just enough of the format to walk member
headers and hand out a bounded reader for one member's payload.
*/

use {
    crate::error::{DebInspectError, Result},
    std::io::{ErrorKind, Read, Seek, SeekFrom, Take},
};

/// Global header every ar archive starts with.
pub const AR_MAGIC: &[u8; 8] = b"!<arch>\n";

const MEMBER_HEADER_LEN: usize = 60;
const HEADER_TERMINATOR: &[u8; 2] = b"`\n";

/// Parsed 60-byte ar member header.
#[derive(Clone, Debug)]
pub struct MemberHeader {
    pub name: String,
    pub mtime: u64,
    pub uid: u64,
    pub gid: u64,
    pub mode: u32,
    pub size: u64,
}

/// Locate the first member whose name starts with `prefix`.
///
/// The input is rewound to the archive start first, so repeated lookups on
/// the same handle are fine. On a match the returned reader is limited to
/// the member's payload.
///
/// A wrong global magic fails with [DebInspectError::ArBadMagic]. A
/// malformed member header terminator ends the walk as if no member
/// matched. Member payloads are padded to even length when skipping.
pub fn find_member<'a, R: Read + Seek>(
    input: &'a mut R,
    prefix: &str,
) -> Result<Option<(MemberHeader, Take<&'a mut R>)>> {
    input.seek(SeekFrom::Start(0))?;

    let mut magic = [0u8; AR_MAGIC.len()];
    match input.read_exact(&mut magic) {
        Ok(()) if &magic == AR_MAGIC => {}
        Ok(()) => return Err(DebInspectError::ArBadMagic),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
            return Err(DebInspectError::ArBadMagic)
        }
        Err(e) => return Err(e.into()),
    }

    loop {
        let mut raw = [0u8; MEMBER_HEADER_LEN];
        match input.read_exact(&mut raw) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let header = match parse_member_header(&raw)? {
            Some(header) => header,
            None => return Ok(None),
        };

        if header.name.starts_with(prefix) {
            let size = header.size;
            return Ok(Some((header, input.take(size))));
        }

        // Payloads are padded to an even number of bytes.
        let skip = header.size + (header.size & 1);
        input.seek(SeekFrom::Current(skip as i64))?;
    }
}

fn parse_member_header(raw: &[u8; MEMBER_HEADER_LEN]) -> Result<Option<MemberHeader>> {
    if &raw[58..60] != HEADER_TERMINATOR {
        return Ok(None);
    }

    // GNU ar terminates names with a slash; classic and BSD pad with
    // spaces. Deb member names never contain a slash of their own.
    let name = field_str(&raw[0..16]).trim_end_matches('/').to_string();

    Ok(Some(MemberHeader {
        name,
        mtime: parse_decimal(field_str(&raw[16..28]))?,
        uid: parse_decimal(field_str(&raw[28..34]))?,
        gid: parse_decimal(field_str(&raw[34..40]))?,
        mode: parse_octal(field_str(&raw[40..48]))?,
        size: parse_decimal(field_str(&raw[48..58]))?,
    }))
}

fn field_str(raw: &[u8]) -> &str {
    std::str::from_utf8(raw).unwrap_or("").trim()
}

fn parse_decimal(field: &str) -> Result<u64> {
    if field.is_empty() {
        Ok(0)
    } else {
        Ok(field.parse()?)
    }
}

fn parse_octal(field: &str) -> Result<u32> {
    if field.is_empty() {
        Ok(0)
    } else {
        Ok(u32::from_str_radix(field, 8)?)
    }
}
