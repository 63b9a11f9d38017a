// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian binary package inspection primitives.

This crate defines the low-level plumbing needed to look inside `.deb`
files without materializing their contents: locating members of the outer
Unix `ar` archive ([ar]), iterating the POSIX tar payloads within ([tar]),
dispatching decompression from member names ([compression]), and reading
the deb822 control paragraph ([deb]).

The [elf] module extracts shared-library linkage (`DT_SONAME` and
`DT_NEEDED`) from ELF64 objects. Because the objects arrive over a
decompression stream that cannot rewind, the parser runs on top of
[io::ForwardReader], a limited-seek adapter that retains consumed data in
fixed-size frames and replays it for backward seeks.

[io::MeterReader] is a transparent byte-counting adapter used by consumers
to observe throughput of a read pipeline.
*/

pub mod ar;
pub mod compression;
pub mod deb;
pub mod elf;
pub mod error;
pub mod io;
pub mod tar;
