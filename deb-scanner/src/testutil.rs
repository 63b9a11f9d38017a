// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Test fixtures: synthesized ELF objects and deb archives. */

use {
    flate2::{write::GzEncoder, Compression},
    std::{
        io::Write,
        path::{Path, PathBuf},
    },
    xz2::write::XzEncoder,
};

const DT_NEEDED: u64 = 1;
const DT_SONAME: u64 = 14;

fn push_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn section_header(out: &mut Vec<u8>, sh_type: u32, offset: u64, size: u64, link: u32) {
    push_u32(out, 0);
    push_u32(out, sh_type);
    push_u64(out, 0);
    push_u64(out, 0);
    push_u64(out, offset);
    push_u64(out, size);
    push_u32(out, link);
    push_u32(out, 0);
    push_u64(out, 0);
    push_u64(out, 0);
}

/// Synthesize a minimal ET_DYN x86-64 object carrying the given dynamic
/// linkage: ELF header, string table, dynamic table, then three section
/// headers (null, strtab, dynamic).
pub(crate) fn shared_object(soname: Option<&str>, needed: &[&str]) -> Vec<u8> {
    let mut strtab = vec![0u8];
    let mut name_offsets = Vec::new();
    for name in needed {
        name_offsets.push(strtab.len() as u64);
        strtab.extend_from_slice(name.as_bytes());
        strtab.push(0);
    }
    let soname_offset = soname.map(|name| {
        let offset = strtab.len() as u64;
        strtab.extend_from_slice(name.as_bytes());
        strtab.push(0);
        offset
    });

    let mut dynamic = Vec::new();
    for offset in &name_offsets {
        push_u64(&mut dynamic, DT_NEEDED);
        push_u64(&mut dynamic, *offset);
    }
    if let Some(offset) = soname_offset {
        push_u64(&mut dynamic, DT_SONAME);
        push_u64(&mut dynamic, offset);
    }
    push_u64(&mut dynamic, 0);
    push_u64(&mut dynamic, 0);

    let strtab_offset = 64u64;
    let dynamic_offset = strtab_offset + strtab.len() as u64;
    let e_shoff = dynamic_offset + dynamic.len() as u64;

    let mut out = Vec::new();
    out.extend_from_slice(b"\x7fELF");
    out.push(2); // ELFCLASS64
    out.push(1); // ELFDATA2LSB
    out.push(1); // EI_VERSION
    out.resize(16, 0);
    push_u16(&mut out, 3); // ET_DYN
    push_u16(&mut out, 62); // EM_X86_64
    push_u32(&mut out, 1); // e_version
    push_u64(&mut out, 0); // e_entry
    push_u64(&mut out, 0); // e_phoff
    push_u64(&mut out, e_shoff);
    push_u32(&mut out, 0); // e_flags
    push_u16(&mut out, 64); // e_ehsize
    push_u16(&mut out, 0); // e_phentsize
    push_u16(&mut out, 0); // e_phnum
    push_u16(&mut out, 64); // e_shentsize
    push_u16(&mut out, 3); // e_shnum
    push_u16(&mut out, 0); // e_shstrndx

    out.extend_from_slice(&strtab);
    out.extend_from_slice(&dynamic);

    section_header(&mut out, 0, 0, 0, 0);
    section_header(&mut out, 3, strtab_offset, strtab.len() as u64, 0); // SHT_STRTAB
    section_header(&mut out, 6, dynamic_offset, dynamic.len() as u64, 1); // SHT_DYNAMIC

    out
}

/// Builder for complete deb fixtures.
pub(crate) struct DebFixture {
    control: String,
    files: Vec<(String, Vec<u8>)>,
}

impl DebFixture {
    pub(crate) fn new(package: &str, version: &str) -> Self {
        Self::raw_control(&format!(
            "Package: {}\nVersion: {}\nArchitecture: amd64\n",
            package, version
        ))
    }

    /// Start from a verbatim control paragraph, however incomplete.
    pub(crate) fn raw_control(control: &str) -> Self {
        Self {
            control: control.to_string(),
            files: Vec::new(),
        }
    }

    pub(crate) fn file(mut self, name: &str, data: Vec<u8>) -> Self {
        self.files.push((name.to_string(), data));
        self
    }

    pub(crate) fn build_xz(&self) -> Vec<u8> {
        let data_tar = self.data_tar();
        let mut encoder = XzEncoder::new(Vec::new(), 6);
        encoder.write_all(&data_tar).unwrap();
        self.assemble("data.tar.xz", encoder.finish().unwrap())
    }

    pub(crate) fn build_gz(&self) -> Vec<u8> {
        let data_tar = self.data_tar();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&data_tar).unwrap();
        self.assemble("data.tar.gz", encoder.finish().unwrap())
    }

    fn data_tar(&self) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut out);
            for (name, data) in &self.files {
                tar_entry(&mut builder, name, data);
            }
            builder.finish().unwrap();
        }
        out
    }

    fn control_tar_gz(&self) -> Vec<u8> {
        let mut tarball = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut tarball);
            tar_entry(&mut builder, "./control", self.control.as_bytes());
            builder.finish().unwrap();
        }

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tarball).unwrap();
        encoder.finish().unwrap()
    }

    fn assemble(&self, data_member: &str, data: Vec<u8>) -> Vec<u8> {
        let mut builder = ar::Builder::new(Vec::new());

        for (name, payload) in [
            ("debian-binary", b"2.0\n".to_vec()),
            ("control.tar.gz", self.control_tar_gz()),
            (data_member, data),
        ] {
            let mut header = ar::Header::new(name.as_bytes().to_vec(), payload.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(1_600_000_000);
            builder.append(&header, &payload[..]).unwrap();
        }

        builder.into_inner().unwrap()
    }
}

fn tar_entry(builder: &mut tar::Builder<&mut Vec<u8>>, name: &str, data: &[u8]) {
    let mut header = tar::Header::new_gnu();
    // set_path() normalizes away the leading `./`, so write the name field
    // directly.
    header.as_old_mut().name[..name.len()].copy_from_slice(name.as_bytes());
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_entry_type(tar::EntryType::Regular);
    header.set_cksum();
    builder.append(&header, data).unwrap();
}

pub(crate) fn write_deb(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}
