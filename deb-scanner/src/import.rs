// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Package enumeration and the bounded-parallel scan.

One metadata pass walks the tree and prepares a [PackageRecord] per deb.
Analysis jobs then run under a bounded pool: each job hashes its deb,
streams the data tarball through decompression, probes every entry for
ELF dynamic linkage, reduces self-satisfied dependencies, and persists
the result. Failures inside a single package are logged and skipped;
only store errors abort the run, since a half-written store would
undermine the idempotence check of later runs.
*/

use {
    crate::{
        db::SharedStore,
        progress::{ScanCounters, StatusRenderer},
    },
    anyhow::{Context, Result},
    deb_inspect::{
        ar, compression, deb, elf,
        error::DebInspectError,
        io::{ForwardReader, MeterReader},
        tar::TarReader,
    },
    futures::StreamExt,
    sha2::{Digest, Sha256},
    std::{
        collections::BTreeSet,
        fs::File,
        io::Read,
        path::{Path, PathBuf},
        sync::{atomic::Ordering, Arc},
        time::{Duration, UNIX_EPOCH},
    },
    tracing::{info, warn},
    walkdir::WalkDir,
};

/// Library locations whose shared objects advertise their SONAME as a
/// capability of the package.
pub const DEFAULT_LIBRARY_PREFIXES: &[&str] =
    &["./lib/", "./lib64/", "./usr/lib/", "./usr/lib64/"];

const HASH_BLOCK_SIZE: usize = 64 * 1024;
const REPORT_INTERVAL_MS: u64 = 500;

/// A fully described package, frozen before persistence.
#[derive(Clone, Debug, Default)]
pub struct PackageRecord {
    pub package: String,
    pub version: String,
    pub filename: String,
    pub mtime: i64,
    pub size: u64,
    /// Declared size of the `data.tar.*` ar member.
    pub data_size: u64,
    /// Lowercase hex SHA-256 of the whole deb.
    pub sha256: String,
    /// Ordered control fields plus synthetic `Filename`/`Size`/`SHA256`.
    pub fields: Vec<(String, String)>,
    /// SONAMEs contributed by shared objects under the library prefixes.
    pub provides: Vec<String>,
    /// NEEDED entries not satisfied within the package itself.
    pub depends: Vec<String>,
    /// Every entry of the data tarball, in archive order.
    pub contents: Vec<FileEntry>,
}

impl PackageRecord {
    /// Look up a control field by exact key.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// A single entry of a package's data tarball.
#[derive(Clone, Debug)]
pub struct FileEntry {
    /// Tar path, retained verbatim.
    pub name: String,
    pub size: u64,
    pub typeflag: u8,
}

/// Read control metadata and file facts for one deb.
pub fn read_package_record(path: &Path) -> std::result::Result<PackageRecord, DebInspectError> {
    let mut file = File::open(path)?;
    let metadata = deb::read_metadata(&mut file)?;

    let stat = file.metadata()?;
    let mtime = stat
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let filename = path.to_string_lossy().to_string();

    let mut record = PackageRecord {
        filename: filename.clone(),
        mtime,
        size: stat.len(),
        data_size: metadata.data_size,
        fields: metadata.fields,
        ..Default::default()
    };
    record
        .fields
        .push(("Filename".to_string(), filename));
    record
        .fields
        .push(("Size".to_string(), stat.len().to_string()));

    record.package = record
        .field("Package")
        .ok_or(DebInspectError::MissingControlField("Package"))?
        .to_string();
    record.version = record
        .field("Version")
        .ok_or(DebInspectError::MissingControlField("Version"))?
        .to_string();

    Ok(record)
}

/// Whether a provided SONAME satisfies a needed one.
///
/// `have` satisfies `want` when equal, or when `have` refines it with
/// further version components: `libfoo.so.1.2` satisfies `libfoo.so.1`.
/// The explicit dot separator keeps `libfoo.so.1` away from
/// `libfoo.so.10`.
fn soname_satisfies(have: &str, want: &str) -> bool {
    match have.strip_prefix(want) {
        Some("") => true,
        Some(rest) => rest.starts_with('.'),
        None => false,
    }
}

/// Whether a tar path sits under one of the canonical library directories.
fn in_library_path(name: &str, prefixes: &[String]) -> bool {
    prefixes.iter().any(|prefix| name.starts_with(prefix.as_str()))
}

/// Stream the deb end-to-end through SHA-256, crediting the hash meter.
fn checksum_package(
    record: &mut PackageRecord,
    counters: &ScanCounters,
) -> std::result::Result<(), DebInspectError> {
    let mut file = File::open(&record.filename)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BLOCK_SIZE];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        counters.hash_current.fetch_add(n as u64, Ordering::Relaxed);
        hasher.update(&buffer[..n]);
    }

    record.sha256 = hex::encode(hasher.finalize());
    record
        .fields
        .push(("SHA256".to_string(), record.sha256.clone()));
    Ok(())
}

/// Inventory the data member of one package: contents, provided SONAMEs,
/// and remaining external dependencies.
fn analyze_package(
    record: &mut PackageRecord,
    counters: &ScanCounters,
    prefixes: &[String],
) -> std::result::Result<(), DebInspectError> {
    checksum_package(record, counters)?;

    let mut file = File::open(&record.filename)?;
    let (member, reader) = ar::find_member(&mut file, deb::DATA_MEMBER_PREFIX)?.ok_or_else(|| {
        DebInspectError::ArMemberNotFound(deb::DATA_MEMBER_PREFIX.to_string())
    })?;

    let metered = MeterReader::new(reader, &counters.decompress_current);
    let decoded = compression::decompress_member(&member.name, metered)?;
    let mut entries = TarReader::new(decoded);

    let mut provides = BTreeSet::new();
    let mut needs = BTreeSet::new();

    while let Some(entry) = entries.next_entry()? {
        record.contents.push(FileEntry {
            name: entry.name.clone(),
            size: entry.size,
            typeflag: entry.typeflag,
        });

        let mut candidate = ForwardReader::new(&mut entries);
        match elf::analyze_dynamic(&mut candidate) {
            Ok(info) => {
                if let Some(soname) = info.soname {
                    if in_library_path(&entry.name, prefixes) {
                        provides.insert(soname);
                    }
                }
                needs.extend(info.needed);
                counters.elfs_current.fetch_add(1, Ordering::Relaxed);
            }
            // Anything that does not parse as a dynamic x86-64 object
            // simply carries no linkage info.
            Err(_) => {}
        }

        counters.files_current.fetch_add(1, Ordering::Relaxed);
    }

    record.depends = needs
        .into_iter()
        .filter(|needed| !provides.iter().any(|have| soname_satisfies(have, needed)))
        .collect();
    record.provides = provides.into_iter().collect();
    Ok(())
}

/// Run the full pipeline for one package.
///
/// Per-package failures are logged and swallowed. The returned error is
/// reserved for store failures, which must abort the whole run.
fn package_job(
    mut record: PackageRecord,
    store: SharedStore,
    counters: Arc<ScanCounters>,
    prefixes: Arc<Vec<String>>,
) -> Result<()> {
    let outcome = (|| -> Result<()> {
        if store
            .exists(&record.filename, record.mtime)
            .context("querying repository")?
        {
            // Already indexed in this exact state: credit the meters so the
            // bars still converge, skip the work.
            counters
                .hash_current
                .fetch_add(record.size, Ordering::Relaxed);
            counters
                .decompress_current
                .fetch_add(record.data_size, Ordering::Relaxed);
            return Ok(());
        }

        match analyze_package(&mut record, &counters, &prefixes) {
            Ok(()) => store
                .insert(&record)
                .with_context(|| format!("storing package {}", record.package))?,
            Err(e) => {
                warn!(
                    package = %record.package,
                    path = %record.filename,
                    "skipping package: {e}"
                );
            }
        }

        Ok(())
    })();

    counters.packages_current.fetch_add(1, Ordering::Relaxed);
    outcome
}

/// Walk `root` and prepare a record for every `.deb` underneath it,
/// accumulating progress totals as they are discovered.
fn collect_packages(
    root: &Path,
    counters: &ScanCounters,
    renderer: &StatusRenderer,
) -> Vec<PackageRecord> {
    let mut packages = Vec::new();

    for entry in WalkDir::new(root) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("walk error: {e}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if !entry.file_name().to_string_lossy().ends_with(".deb") {
            continue;
        }

        match read_package_record(entry.path()) {
            Ok(record) => {
                counters
                    .hash_total
                    .fetch_add(record.size, Ordering::Relaxed);
                counters
                    .decompress_total
                    .fetch_add(record.data_size, Ordering::Relaxed);
                counters.packages_total.fetch_add(1, Ordering::Relaxed);
                renderer.render_totals(counters);
                packages.push(record);
            }
            Err(e) => {
                warn!(path = %entry.path().display(), "skipping deb: {e}");
            }
        }
    }

    packages
}

/// Scan every deb under `root`, persisting analysis results through
/// `store` with `threads` concurrent workers.
pub async fn scan_tree(
    root: PathBuf,
    store: SharedStore,
    threads: usize,
    prefixes: Vec<String>,
) -> Result<()> {
    let counters = Arc::new(ScanCounters::default());
    let prefixes = Arc::new(prefixes);

    let renderer = StatusRenderer::new();
    renderer.reserve();
    let packages = collect_packages(&root, &counters, &renderer);
    println!();
    info!(packages = packages.len(), "metadata scan complete");

    let reporter = tokio::spawn({
        let counters = Arc::clone(&counters);
        async move {
            let mut renderer = StatusRenderer::new();
            renderer.reserve();
            let mut tick = tokio::time::interval(Duration::from_millis(REPORT_INTERVAL_MS));
            loop {
                tick.tick().await;
                renderer.render_status(&counters, REPORT_INTERVAL_MS);
            }
        }
    });

    let jobs = packages.into_iter().map(|record| {
        let store = store.clone();
        let counters = Arc::clone(&counters);
        let prefixes = Arc::clone(&prefixes);
        async move {
            tokio::task::spawn_blocking(move || package_job(record, store, counters, prefixes))
                .await
        }
    });

    let mut stream = futures::stream::iter(jobs).buffer_unordered(threads.max(1));
    while let Some(joined) = stream.next().await {
        joined.context("analysis worker panicked")??;
    }

    reporter.abort();

    info!(
        packages = counters.packages_current.load(Ordering::Relaxed),
        files = counters.files_current.load(Ordering::Relaxed),
        elfs = counters.elfs_current.load(Ordering::Relaxed),
        "scan complete"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            db::{DatabaseConnection, SharedStore},
            testutil,
        },
        std::sync::atomic::Ordering,
    };

    fn default_prefixes() -> Vec<String> {
        DEFAULT_LIBRARY_PREFIXES
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn analyzed_record(path: &Path) -> PackageRecord {
        let mut record = read_package_record(path).expect("metadata");
        let counters = ScanCounters::default();
        analyze_package(&mut record, &counters, &default_prefixes()).expect("analysis");
        record
    }

    #[test]
    fn soname_family_matching() {
        assert!(soname_satisfies("libfoo.so.1", "libfoo.so.1"));
        assert!(soname_satisfies("libfoo.so.1.2", "libfoo.so.1"));
        assert!(!soname_satisfies("libfoo.so.10", "libfoo.so.1"));
        assert!(!soname_satisfies("libfoo.so.1", "libfoo.so.1.2"));
        assert!(!soname_satisfies("libbar.so.1", "libfoo.so.1"));
    }

    #[test]
    fn library_path_gating() {
        let prefixes = default_prefixes();
        assert!(in_library_path("./usr/lib/libz.so.1", &prefixes));
        assert!(in_library_path("./lib64/ld-linux-x86-64.so.2", &prefixes));
        assert!(!in_library_path("./opt/app/bin/tool", &prefixes));
        assert!(!in_library_path("./usr/libexec/helper", &prefixes));
    }

    #[test]
    fn single_library_package() {
        // One shared object under a canonical prefix: its SONAME is
        // provided, its NEEDED list survives as external dependencies.
        let dir = tempfile::tempdir().unwrap();
        let object = testutil::shared_object(Some("libz.so.1"), &["libc.so.6"]);
        let deb = testutil::DebFixture::new("zlib", "1.2.11-1")
            .file("./usr/lib/libz.so.1.2.11", object)
            .build_xz();
        let path = testutil::write_deb(dir.path(), "zlib.deb", &deb);

        let record = analyzed_record(&path);
        assert_eq!(record.package, "zlib");
        assert_eq!(record.provides, vec!["libz.so.1"]);
        assert_eq!(record.depends, vec!["libc.so.6"]);
        assert_eq!(record.contents.len(), 1);
        assert_eq!(record.contents[0].name, "./usr/lib/libz.so.1.2.11");
        assert_eq!(record.sha256.len(), 64);
        assert_eq!(record.field("SHA256"), Some(record.sha256.as_str()));
    }

    #[test]
    fn intra_package_dependency_is_reduced() {
        let dir = tempfile::tempdir().unwrap();
        let liba = testutil::shared_object(Some("liba.so.2"), &["libb.so.1"]);
        let libb = testutil::shared_object(Some("libb.so.1"), &["libc.so.6"]);
        let deb = testutil::DebFixture::new("ab", "2.0-1")
            .file("./usr/lib/liba.so.2", liba)
            .file("./usr/lib/libb.so.1", libb)
            .build_xz();
        let path = testutil::write_deb(dir.path(), "ab.deb", &deb);

        let record = analyzed_record(&path);
        assert_eq!(record.provides, vec!["liba.so.2", "libb.so.1"]);
        assert_eq!(record.depends, vec!["libc.so.6"]);
    }

    #[test]
    fn refined_soname_satisfies_family_request() {
        // Providing libx.so.1.2 self-satisfies a NEEDED libx.so.1.
        let dir = tempfile::tempdir().unwrap();
        let libx = testutil::shared_object(Some("libx.so.1.2"), &[]);
        let tool = testutil::shared_object(None, &["libx.so.1", "libc.so.6"]);
        let deb = testutil::DebFixture::new("x", "1.2-1")
            .file("./usr/lib/libx.so.1.2", libx)
            .file("./usr/lib/x-tool", tool)
            .build_xz();
        let path = testutil::write_deb(dir.path(), "x.deb", &deb);

        let record = analyzed_record(&path);
        assert_eq!(record.provides, vec!["libx.so.1.2"]);
        assert_eq!(record.depends, vec!["libc.so.6"]);
    }

    #[test]
    fn soname_outside_library_prefixes_is_not_provided() {
        let dir = tempfile::tempdir().unwrap();
        let object = testutil::shared_object(Some("libtool.so.1"), &["libm.so.6"]);
        let deb = testutil::DebFixture::new("tool", "0.1-1")
            .file("./opt/app/bin/tool", object)
            .build_xz();
        let path = testutil::write_deb(dir.path(), "tool.deb", &deb);

        let record = analyzed_record(&path);
        assert!(record.provides.is_empty());
        assert_eq!(record.depends, vec!["libm.so.6"]);
    }

    #[test]
    fn non_elf_payload_yields_no_linkage() {
        let dir = tempfile::tempdir().unwrap();
        let deb = testutil::DebFixture::new("conf", "1.0-1")
            .file("./etc/config", b"key = value\n".to_vec())
            .build_xz();
        let path = testutil::write_deb(dir.path(), "conf.deb", &deb);

        let mut record = read_package_record(&path).expect("metadata");
        let counters = ScanCounters::default();
        analyze_package(&mut record, &counters, &default_prefixes()).expect("analysis");

        assert_eq!(record.contents.len(), 1);
        assert!(record.provides.is_empty());
        assert!(record.depends.is_empty());
        assert_eq!(counters.files_current.load(Ordering::Relaxed), 1);
        assert_eq!(counters.elfs_current.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn gzip_data_member_is_supported() {
        let dir = tempfile::tempdir().unwrap();
        let object = testutil::shared_object(Some("libgz.so.3"), &[]);
        let deb = testutil::DebFixture::new("gz", "3.0-1")
            .file("./lib/libgz.so.3", object)
            .build_gz();
        let path = testutil::write_deb(dir.path(), "gz.deb", &deb);

        let record = analyzed_record(&path);
        assert_eq!(record.provides, vec!["libgz.so.3"]);
    }

    #[test]
    fn corrupt_deb_is_skipped_during_collection() {
        let dir = tempfile::tempdir().unwrap();

        let good = testutil::DebFixture::new("good", "1.0-1")
            .file("./etc/a", b"a".to_vec())
            .build_xz();
        testutil::write_deb(dir.path(), "good.deb", &good);
        testutil::write_deb(dir.path(), "bad.deb", b"this is not an ar archive");

        let counters = ScanCounters::default();
        let renderer = StatusRenderer::new();
        let packages = collect_packages(dir.path(), &counters, &renderer);

        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].package, "good");
        assert_eq!(counters.packages_total.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn control_without_version_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let deb = testutil::DebFixture::raw_control("Package: incomplete\n")
            .file("./etc/a", b"a".to_vec())
            .build_xz();
        let path = testutil::write_deb(dir.path(), "incomplete.deb", &deb);

        assert!(matches!(
            read_package_record(&path),
            Err(DebInspectError::MissingControlField("Version"))
        ));
    }

    #[test]
    fn job_persists_and_rescan_is_credited_without_hashing() {
        let dir = tempfile::tempdir().unwrap();
        let object = testutil::shared_object(Some("libz.so.1"), &["libc.so.6"]);
        let deb = testutil::DebFixture::new("zlib", "1.2.11-1")
            .file("./usr/lib/libz.so.1.2.11", object)
            .build_xz();
        let path = testutil::write_deb(dir.path(), "zlib.deb", &deb);

        let store = SharedStore::new(DatabaseConnection::new_memory().unwrap());
        let counters = Arc::new(ScanCounters::default());
        let prefixes = Arc::new(default_prefixes());

        let record = read_package_record(&path).expect("metadata");
        let size = record.size;
        let data_size = record.data_size;

        package_job(
            record.clone(),
            store.clone(),
            Arc::clone(&counters),
            Arc::clone(&prefixes),
        )
        .expect("first run");

        let hashed = counters.hash_current.load(Ordering::Relaxed);
        assert_eq!(hashed, size);
        let decompressed = counters.decompress_current.load(Ordering::Relaxed);
        let files_after_first = counters.files_current.load(Ordering::Relaxed);
        assert_eq!(files_after_first, 1);
        assert_eq!(counters.packages_current.load(Ordering::Relaxed), 1);

        // Second run: the (filename, mtime) row exists, so the meters are
        // credited without re-reading the package.
        package_job(record, store, Arc::clone(&counters), prefixes).expect("second run");
        assert_eq!(counters.hash_current.load(Ordering::Relaxed), hashed + size);
        assert_eq!(
            counters.decompress_current.load(Ordering::Relaxed),
            decompressed + data_size
        );
        assert_eq!(
            counters.files_current.load(Ordering::Relaxed),
            files_after_first
        );
        assert_eq!(counters.packages_current.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn job_skips_broken_package_without_persisting() {
        let dir = tempfile::tempdir().unwrap();
        // Valid control metadata, but the data member is truncated: the
        // analysis fails mid-tar and nothing must be stored.
        let good = testutil::DebFixture::new("trunc", "1.0-1")
            .file("./usr/lib/libt.so.1", testutil::shared_object(Some("libt.so.1"), &[]))
            .build_xz();
        let path = testutil::write_deb(dir.path(), "trunc.deb", &good);
        let record = read_package_record(&path).expect("metadata");

        let truncated = &good[..good.len() - 40];
        std::fs::write(&path, truncated).unwrap();

        let store = SharedStore::new(DatabaseConnection::new_memory().unwrap());
        let counters = Arc::new(ScanCounters::default());

        package_job(
            record.clone(),
            store.clone(),
            Arc::clone(&counters),
            Arc::new(default_prefixes()),
        )
        .expect("job swallows package errors");

        assert!(!store.exists(&record.filename, record.mtime).unwrap());
        assert_eq!(counters.packages_current.load(Ordering::Relaxed), 1);
    }
}
