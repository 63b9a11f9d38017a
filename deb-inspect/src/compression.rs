// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Suffix-dispatched stream decompression. */

use {
    crate::error::{DebInspectError, Result},
    flate2::read::GzDecoder,
    std::io::Read,
    xz2::read::XzDecoder,
};

/// Wrap `input` with a decoder chosen from the trailing extension of
/// `name`.
///
/// Deb archive members advertise their compression in the member name
/// (`data.tar.gz`, `control.tar.xz`). `.gz` and `.xz` are supported; any
/// other suffix is [DebInspectError::UnknownCompression].
pub fn decompress_member<'a, R: Read + 'a>(name: &str, input: R) -> Result<Box<dyn Read + 'a>> {
    if name.ends_with(".gz") {
        Ok(Box::new(GzDecoder::new(input)))
    } else if name.ends_with(".xz") {
        Ok(Box::new(XzDecoder::new(input)))
    } else {
        Err(DebInspectError::UnknownCompression(name.to_string()))
    }
}
