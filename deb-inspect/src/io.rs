// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Stream adapters.

[ForwardReader] grafts limited seek semantics onto a forward-only byte
source so that formats addressed by absolute file offset (ELF) can be
parsed straight off a decompression stream. [MeterReader] counts bytes
flowing through a read pipeline into a shared atomic, for progress
reporting.
*/

use {
    crate::error::{DebInspectError, Result},
    std::{
        collections::HashMap,
        io::{ErrorKind, Read, SeekFrom},
        sync::atomic::{AtomicU64, Ordering},
    },
};

/// Size of the frames retained by [ForwardReader].
pub const FRAME_SIZE: u64 = 4096;

/// A limited-seek adapter over a forward-only byte source.
///
/// Consumed data is partitioned into fixed-size frames kept in a frame map.
/// Reads at the high-water mark (`edge`) pull from the underlying source
/// into the current frame; reads below it are served from retained frames.
///
/// Seeks may move backward only into frames that are still resident, and
/// may move forward past the edge either by reading through the gap
/// (retaining the traversed frames for later look-back) or by discarding
/// the skipped bytes, in which case the region becomes unreachable.
///
/// Memory use is bounded by the length of the consumed stream, which for
/// the intended workload is a single archive entry.
pub struct ForwardReader<R> {
    source: R,
    frames: HashMap<u64, Vec<u8>>,
    cursor: u64,
    edge: u64,
    eof: bool,
}

impl<R: Read> ForwardReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            source,
            frames: HashMap::new(),
            cursor: 0,
            edge: 0,
            eof: false,
        }
    }

    /// The current logical position.
    pub fn position(&self) -> u64 {
        self.cursor
    }

    /// Pull bytes from the source into the frame at the edge.
    ///
    /// Returns the number of bytes added; 0 means end of stream.
    fn pull(&mut self) -> std::io::Result<usize> {
        if self.eof {
            return Ok(0);
        }

        let index = self.edge / FRAME_SIZE;
        let offset = (self.edge % FRAME_SIZE) as usize;
        let frame = self
            .frames
            .entry(index)
            .or_insert_with(|| vec![0; FRAME_SIZE as usize]);

        let n = self.source.read(&mut frame[offset..])?;
        if n == 0 {
            self.eof = true;
        } else {
            self.edge += n as u64;
        }

        Ok(n)
    }

    /// Advance the underlying source by up to `count` bytes without
    /// retaining what was read.
    fn discard(&mut self, mut count: u64) -> std::io::Result<u64> {
        let mut scratch = [0u8; FRAME_SIZE as usize];
        let mut discarded = 0u64;

        while count > 0 && !self.eof {
            let want = count.min(FRAME_SIZE) as usize;
            let n = self.source.read(&mut scratch[..want])?;
            if n == 0 {
                self.eof = true;
                break;
            }
            count -= n as u64;
            discarded += n as u64;
        }

        Ok(discarded)
    }

    /// Reposition the stream.
    ///
    /// [SeekFrom::Start] is normalized to a relative move. [SeekFrom::End]
    /// fails with [DebInspectError::UnsupportedSeek]: the length of a
    /// forward stream is unknowable until it is drained.
    ///
    /// Targets at or below the high-water mark are pure cursor moves and
    /// require the destination frame to still be resident, otherwise
    /// [DebInspectError::LookBack] is returned. Targets beyond it consume
    /// the underlying source through the gap: with `retain` the traversed
    /// bytes land in frames and stay addressable, without it they are
    /// dropped. Running out of source before reaching the target is an
    /// [ErrorKind::UnexpectedEof] I/O error.
    pub fn seek(&mut self, pos: SeekFrom, retain: bool) -> Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::End(_) => return Err(DebInspectError::UnsupportedSeek),
            SeekFrom::Current(delta) => self.cursor as i128 + delta as i128,
        };

        if target < 0 {
            return Err(DebInspectError::LookBack(0));
        }
        let target = target as u64;

        if target <= self.edge {
            if target < self.edge && !self.frames.contains_key(&(target / FRAME_SIZE)) {
                return Err(DebInspectError::LookBack(target));
            }
            self.cursor = target;
            return Ok(self.cursor);
        }

        if retain {
            while self.edge < target {
                if self.pull()? == 0 {
                    self.cursor = self.edge;
                    return Err(DebInspectError::Io(std::io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "seek ran past the end of the stream",
                    )));
                }
            }
            self.cursor = target;
        } else {
            let gap = target - self.edge;
            let skipped = self.discard(gap)?;
            self.edge += skipped;
            self.cursor = self.edge;
            if skipped < gap {
                return Err(DebInspectError::Io(std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "seek ran past the end of the stream",
                )));
            }
        }

        Ok(self.cursor)
    }
}

impl<R: Read> Read for ForwardReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut filled = 0;

        while filled < buf.len() {
            if self.cursor == self.edge {
                if self.eof || self.pull()? == 0 {
                    break;
                }
                continue;
            }

            let index = self.cursor / FRAME_SIZE;
            let offset = (self.cursor % FRAME_SIZE) as usize;
            let frame = self.frames.get(&index).ok_or_else(|| {
                std::io::Error::new(
                    ErrorKind::InvalidInput,
                    "read from a region that is no longer buffered",
                )
            })?;

            let available = (((index + 1) * FRAME_SIZE).min(self.edge) - index * FRAME_SIZE) as usize;
            let n = (available - offset).min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&frame[offset..offset + n]);
            filled += n;
            self.cursor += n as u64;
        }

        Ok(filled)
    }
}

/// A transparent byte-counting read adapter.
///
/// Every byte successfully read is added to the shared counter, which a
/// progress reporter polls concurrently.
pub struct MeterReader<'a, R> {
    source: R,
    counter: &'a AtomicU64,
}

impl<'a, R> MeterReader<'a, R> {
    pub fn new(source: R, counter: &'a AtomicU64) -> Self {
        Self { source, counter }
    }
}

impl<'a, R: Read> Read for MeterReader<'a, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.source.read(buf)?;
        self.counter.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}
