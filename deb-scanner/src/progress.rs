// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Scan progress counters and terminal rendering.

Workers bump the counters with relaxed atomic adds; the reporter task
polls them every half second and repaints a three-line status block in
place using cursor-up escapes. No ordering beyond the atomicity of each
counter is assumed. Logging goes to stderr; the status block owns stdout.
*/

use std::{
    io::Write,
    sync::atomic::{AtomicU64, Ordering},
};

const BAR_WIDTH: usize = 60;
const MEGABYTE: f64 = 1024.0 * 1024.0;

/// Shared counters mutated by scan workers and read by the reporter.
#[derive(Debug, Default)]
pub struct ScanCounters {
    pub hash_total: AtomicU64,
    pub hash_current: AtomicU64,
    pub decompress_total: AtomicU64,
    pub decompress_current: AtomicU64,
    pub packages_total: AtomicU64,
    pub packages_current: AtomicU64,
    pub files_current: AtomicU64,
    pub elfs_current: AtomicU64,
}

/// Repaints the three-line status block.
pub struct StatusRenderer {
    previous_hash: u64,
    previous_decompress: u64,
}

impl StatusRenderer {
    pub fn new() -> Self {
        Self {
            previous_hash: 0,
            previous_decompress: 0,
        }
    }

    /// Reserve the three output lines the renderer repaints.
    pub fn reserve(&self) {
        print!("\n\n\n");
        let _ = std::io::stdout().flush();
    }

    /// Repaint accumulated totals while the metadata walk is running.
    pub fn render_totals(&self, counters: &ScanCounters) {
        print!("\u{1b}[A\u{1b}[A\u{1b}[A");
        println!(
            "\u{1b}[2KPackages: {}",
            counters.packages_total.load(Ordering::Relaxed)
        );
        println!(
            "\u{1b}[2KTotal hash size: {:.2} MB",
            counters.hash_total.load(Ordering::Relaxed) as f64 / MEGABYTE
        );
        println!(
            "\u{1b}[2KTotal decompress size: {:.2} MB",
            counters.decompress_total.load(Ordering::Relaxed) as f64 / MEGABYTE
        );
        let _ = std::io::stdout().flush();
    }

    /// Repaint the two progress bars and the counts line.
    pub fn render_status(&mut self, counters: &ScanCounters, interval_ms: u64) {
        let hash = counters.hash_current.load(Ordering::Relaxed);
        let decompress = counters.decompress_current.load(Ordering::Relaxed);

        print!("\u{1b}[A\u{1b}[A\u{1b}[A");
        println!(
            "{}",
            bar_line(
                "Hash      ",
                self.previous_hash,
                hash,
                counters.hash_total.load(Ordering::Relaxed),
                interval_ms,
            )
        );
        println!(
            "{}",
            bar_line(
                "Decompress",
                self.previous_decompress,
                decompress,
                counters.decompress_total.load(Ordering::Relaxed),
                interval_ms,
            )
        );
        println!(
            "\u{1b}[0G\u{1b}[2KPackages: {} / {}\tFiles: {}\tELF: {}",
            counters.packages_current.load(Ordering::Relaxed),
            counters.packages_total.load(Ordering::Relaxed),
            counters.files_current.load(Ordering::Relaxed),
            counters.elfs_current.load(Ordering::Relaxed),
        );
        let _ = std::io::stdout().flush();

        self.previous_hash = hash;
        self.previous_decompress = decompress;
    }
}

fn bar_line(label: &str, previous: u64, current: u64, total: u64, interval_ms: u64) -> String {
    let fraction = if total == 0 {
        0.0
    } else {
        (current as f64 / total as f64).min(1.0)
    };
    let filled = ((BAR_WIDTH as f64 * fraction) as usize).min(BAR_WIDTH);
    let rate =
        current.saturating_sub(previous) as f64 / MEGABYTE / (interval_ms as f64 / 1000.0);

    format!(
        "\u{1b}[0G\u{1b}[2K{} [{}{}] {:.3}%, {:.2} MB/s",
        label,
        "#".repeat(filled),
        " ".repeat(BAR_WIDTH - filled),
        100.0 * fraction,
        rate,
    )
}
