// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! POSIX tar entry iteration.

A thin streaming reader: headers are yielded one at a time and the reader
itself serves the current entry's payload, bounded to its declared size.
Advancing to the next entry skips whatever payload the caller left
unconsumed, so partial reads (a failed ELF probe, say) are harmless.
*/

use {
    crate::error::{DebInspectError, Result},
    std::io::{ErrorKind, Read},
};

const BLOCK_SIZE: usize = 512;

/// Typeflag byte of a regular file entry.
pub const TYPEFLAG_REGULAR: u8 = b'0';

/// Header of a single tar entry.
///
/// `name` is the entry path exactly as stored (ustar prefix joined when
/// present); deb data tarballs use `./`-anchored paths and those are
/// preserved verbatim.
#[derive(Clone, Debug)]
pub struct EntryHeader {
    pub name: String,
    pub size: u64,
    pub typeflag: u8,
}

/// Streaming reader over the entries of a tar archive.
pub struct TarReader<R> {
    source: R,
    remaining: u64,
    padding: u64,
    finished: bool,
}

impl<R: Read> TarReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            source,
            remaining: 0,
            padding: 0,
            finished: false,
        }
    }

    /// Advance to the next entry and return its header.
    ///
    /// Returns `None` once the end-of-archive marker (a zero block) is
    /// reached.
    pub fn next_entry(&mut self) -> Result<Option<EntryHeader>> {
        if self.finished {
            return Ok(None);
        }

        self.skip_current()?;

        let mut block = [0u8; BLOCK_SIZE];
        self.source.read_exact(&mut block)?;

        if block.iter().all(|&b| b == 0) {
            // End of archive; a second zero block conventionally follows but
            // its absence is not an error.
            self.finished = true;
            return Ok(None);
        }

        let header = parse_header(&block)?;
        self.remaining = header.size;
        self.padding = (BLOCK_SIZE as u64 - header.size % BLOCK_SIZE as u64) % BLOCK_SIZE as u64;

        Ok(Some(header))
    }

    /// Consume entries until one matches `name` exactly.
    pub fn find(&mut self, name: &str) -> Result<Option<EntryHeader>> {
        while let Some(header) = self.next_entry()? {
            if header.name == name {
                return Ok(Some(header));
            }
        }
        Ok(None)
    }

    fn skip_current(&mut self) -> Result<()> {
        let mut leftover = self.remaining + self.padding;
        let mut scratch = [0u8; BLOCK_SIZE];

        while leftover > 0 {
            let want = leftover.min(BLOCK_SIZE as u64) as usize;
            let n = self.source.read(&mut scratch[..want])?;
            if n == 0 {
                return Err(DebInspectError::Io(std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "tar entry payload truncated",
                )));
            }
            leftover -= n as u64;
        }

        self.remaining = 0;
        self.padding = 0;
        Ok(())
    }
}

impl<R: Read> Read for TarReader<R> {
    /// Reads the current entry's payload; returns 0 at the entry boundary.
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }

        let want = (buf.len() as u64).min(self.remaining) as usize;
        let n = self.source.read(&mut buf[..want])?;
        if n == 0 {
            return Err(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                "tar entry payload truncated",
            ));
        }
        self.remaining -= n as u64;

        Ok(n)
    }
}

fn parse_header(block: &[u8; BLOCK_SIZE]) -> Result<EntryHeader> {
    let name = {
        let base = cstr(&block[0..100]);

        // POSIX ustar splits long paths into a prefix field.
        let prefix = if &block[257..262] == b"ustar" && block[262] == 0 {
            cstr(&block[345..500])
        } else {
            ""
        };

        if prefix.is_empty() {
            base.to_string()
        } else {
            format!("{}/{}", prefix, base)
        }
    };

    let stored = parse_octal(&block[148..156])?;
    if checksum(block) != stored {
        return Err(DebInspectError::TarBadChecksum(name));
    }

    Ok(EntryHeader {
        name,
        size: parse_octal(&block[124..136])?,
        typeflag: block[156],
    })
}

/// Unsigned header checksum: every byte summed with the checksum field
/// itself treated as spaces.
fn checksum(block: &[u8; BLOCK_SIZE]) -> u64 {
    block
        .iter()
        .enumerate()
        .map(|(i, &b)| {
            if (148..156).contains(&i) {
                b' ' as u64
            } else {
                b as u64
            }
        })
        .sum()
}

fn cstr(raw: &[u8]) -> &str {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    std::str::from_utf8(&raw[..end]).unwrap_or("").trim_end()
}

fn parse_octal(raw: &[u8]) -> Result<u64> {
    let s = cstr(raw).trim_start();
    if s.is_empty() {
        Ok(0)
    } else {
        Ok(u64::from_str_radix(s, 8)?)
    }
}
