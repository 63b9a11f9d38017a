// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! ELF64 dynamic section analysis.

A single-pass reader that extracts `DT_SONAME` and `DT_NEEDED` from an
ELF64 object. The input arrives over a [ForwardReader] because the usual
source is a tar entry inside a decompression stream: section and dynamic
tables are addressed by absolute file offset, so the parser seeks, and the
adapter replays already-consumed ranges for the backward hops.

Only x86-64 little-endian objects are in scope. Everything that is not an
ELF object at all reports [DebInspectError::NotElf] so callers can treat
arbitrary package files as "no dynamic info" without inspecting them
first.
*/

use {
    crate::{
        error::{DebInspectError, Result},
        io::ForwardReader,
    },
    std::io::{ErrorKind, Read, SeekFrom},
};

pub const ELF_MAGIC: &[u8; 4] = b"\x7fELF";

const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;

pub const EM_X86_64: u16 = 62;
pub const ET_EXEC: u16 = 2;
pub const ET_DYN: u16 = 3;
pub const SHT_STRTAB: u32 = 3;
pub const SHT_DYNAMIC: u32 = 6;
pub const DT_NEEDED: i64 = 1;
pub const DT_SONAME: i64 = 14;

const EHDR_LEN: usize = 64;
const SHDR_LEN: usize = 64;
const DYN_LEN: usize = 16;

/// Shared library linkage recorded in an object's dynamic section.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ElfDynamicInfo {
    /// Canonical external name declared via `DT_SONAME`.
    pub soname: Option<String>,
    /// Objects required at load time via `DT_NEEDED`, in table order.
    pub needed: Vec<String>,
}

impl ElfDynamicInfo {
    /// Whether the object declared no dynamic linkage at all.
    pub fn is_empty(&self) -> bool {
        self.soname.is_none() && self.needed.is_empty()
    }
}

/// Fields of a section header this analysis cares about.
struct SectionHeader {
    sh_type: u32,
    sh_offset: u64,
    sh_size: u64,
    sh_link: u32,
}

/// Extract dynamic linkage info from an ELF64 object.
///
/// The reader must be positioned at the start of the candidate object.
/// Objects that are neither `ET_EXEC` nor `ET_DYN`, have no sections, or
/// have no (or an empty) `SHT_DYNAMIC` section yield an empty
/// [ElfDynamicInfo] rather than an error: a statically linked executable
/// is a perfectly fine ELF with nothing to say.
pub fn analyze_dynamic<R: Read>(reader: &mut ForwardReader<R>) -> Result<ElfDynamicInfo> {
    let mut ehdr = [0u8; EHDR_LEN];
    match reader.read_exact(&mut ehdr) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Err(DebInspectError::NotElf),
        Err(e) => return Err(e.into()),
    }

    if &ehdr[0..4] != ELF_MAGIC {
        return Err(DebInspectError::NotElf);
    }
    if ehdr[4] != ELFCLASS64 || ehdr[5] != ELFDATA2LSB {
        return Err(DebInspectError::NotElf);
    }

    let e_machine = u16_le(&ehdr[18..20]);
    if e_machine != EM_X86_64 {
        return Err(DebInspectError::UnsupportedElfMachine(e_machine));
    }

    let e_type = u16_le(&ehdr[16..18]);
    let e_shoff = u64_le(&ehdr[40..48]);
    let e_shnum = u16_le(&ehdr[60..62]);

    if (e_type != ET_EXEC && e_type != ET_DYN) || e_shnum == 0 {
        return Ok(ElfDynamicInfo::default());
    }

    // The section header table sits near the end of the file; buffer the
    // seek so the section bodies it points back into stay addressable.
    reader.seek(SeekFrom::Start(e_shoff), true)?;

    let mut sections = Vec::with_capacity(e_shnum as usize);
    for _ in 0..e_shnum {
        let mut raw = [0u8; SHDR_LEN];
        reader.read_exact(&mut raw)?;
        sections.push(SectionHeader {
            sh_type: u32_le(&raw[4..8]),
            sh_offset: u64_le(&raw[24..32]),
            sh_size: u64_le(&raw[32..40]),
            sh_link: u32_le(&raw[40..44]),
        });
    }

    let dynamic = match sections.iter().find(|s| s.sh_type == SHT_DYNAMIC) {
        Some(section) => section,
        None => return Ok(ElfDynamicInfo::default()),
    };

    // The link is validated as soon as a dynamic section is found, even
    // when the table turns out to be empty.
    let strtab = sections
        .get(dynamic.sh_link as usize)
        .ok_or(DebInspectError::BadDynamicLink)?;
    if strtab.sh_type != SHT_STRTAB {
        return Err(DebInspectError::BadDynamicLink);
    }

    if dynamic.sh_size == 0 {
        return Ok(ElfDynamicInfo::default());
    }

    // Read the lower-offset table first so the stream never has to seek
    // forward across unconsumed territory more than once.
    let (strtab_bytes, dyn_bytes) = if strtab.sh_offset <= dynamic.sh_offset {
        let s = read_table(reader, strtab.sh_offset, strtab.sh_size)?;
        let d = read_table(reader, dynamic.sh_offset, dynamic.sh_size)?;
        (s, d)
    } else {
        let d = read_table(reader, dynamic.sh_offset, dynamic.sh_size)?;
        let s = read_table(reader, strtab.sh_offset, strtab.sh_size)?;
        (s, d)
    };

    let mut info = ElfDynamicInfo::default();

    // The table size bounds the walk; a DT_NULL terminator is not required.
    for entry in dyn_bytes.chunks_exact(DYN_LEN) {
        let d_tag = i64_le(&entry[0..8]);
        let d_val = u64_le(&entry[8..16]);

        match d_tag {
            DT_NEEDED => info.needed.push(table_string(&strtab_bytes, d_val)),
            DT_SONAME => info.soname = Some(table_string(&strtab_bytes, d_val)),
            _ => {}
        }
    }

    Ok(info)
}

fn read_table<R: Read>(reader: &mut ForwardReader<R>, offset: u64, size: u64) -> Result<Vec<u8>> {
    reader.seek(SeekFrom::Start(offset), true)?;
    let mut table = vec![0u8; size as usize];
    reader.read_exact(&mut table)?;
    Ok(table)
}

/// NUL-terminated string at `index` of a string table. Out-of-range
/// indices resolve to the empty string.
fn table_string(table: &[u8], index: u64) -> String {
    let start = index as usize;
    if start >= table.len() {
        return String::new();
    }

    let end = table[start..]
        .iter()
        .position(|&b| b == 0)
        .map(|p| start + p)
        .unwrap_or(table.len());

    String::from_utf8_lossy(&table[start..end]).to_string()
}

fn u16_le(raw: &[u8]) -> u16 {
    u16::from_le_bytes([raw[0], raw[1]])
}

fn u32_le(raw: &[u8]) -> u32 {
    u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])
}

fn u64_le(raw: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&raw[..8]);
    u64::from_le_bytes(bytes)
}

fn i64_le(raw: &[u8]) -> i64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&raw[..8]);
    i64::from_le_bytes(bytes)
}
