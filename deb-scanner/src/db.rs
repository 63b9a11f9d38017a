// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! SQLite persistence for scanned packages. */

use {
    crate::import::PackageRecord,
    anyhow::{anyhow, Context, Result},
    indoc::indoc,
    rusqlite::{params, Connection},
    std::{
        path::Path,
        sync::{Arc, Mutex, MutexGuard},
    },
};

const SCHEMA: &[&str] = &[
    indoc! {"
        CREATE TABLE IF NOT EXISTS repository (
            filename TEXT PRIMARY KEY,
            package TEXT,
            version TEXT,
            hash TEXT,
            size INTEGER,
            mtime INTEGER
        )
    "},
    indoc! {"
        CREATE TABLE IF NOT EXISTS elf_provides (
            package TEXT,
            version TEXT,
            provides TEXT,
            sover TEXT
        )
    "},
    "CREATE INDEX IF NOT EXISTS idx_elf_provides_pkg ON elf_provides (package, version)",
    "CREATE INDEX IF NOT EXISTS idx_elf_provides ON elf_provides (provides)",
    indoc! {"
        CREATE TABLE IF NOT EXISTS elf_depends (
            package TEXT,
            version TEXT,
            depends TEXT,
            sover TEXT
        )
    "},
    "CREATE INDEX IF NOT EXISTS idx_elf_depends_pkg ON elf_depends (package, version)",
    "CREATE INDEX IF NOT EXISTS idx_elf_depends ON elf_depends (depends)",
    indoc! {"
        CREATE TABLE IF NOT EXISTS package_files (
            package TEXT,
            version TEXT,
            filename TEXT,
            size INTEGER,
            type INTEGER
        )
    "},
    "CREATE INDEX IF NOT EXISTS idx_package_files ON package_files (package, version)",
];

/// A connection to the SQLite database holding scan results.
pub struct DatabaseConnection {
    conn: Connection,
}

impl DatabaseConnection {
    /// Open a new connection to a SQLite database in memory.
    pub fn new_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;

        let slf = Self { conn };
        slf.init()?;

        Ok(slf)
    }

    /// Open a new connection to a SQLite database in a filesystem path.
    pub fn new_path(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).context("opening SQLite connection")?;

        let slf = Self { conn };
        slf.init()?;

        Ok(slf)
    }

    fn init(&self) -> Result<()> {
        // WAL keeps readers out of the writers' way across worker threads.
        self.conn.pragma_update(None, "journal_mode", "WAL")?;

        for statement in SCHEMA {
            self.conn
                .execute(statement, [])
                .with_context(|| format!("initializing schema: {}", statement))?;
        }

        Ok(())
    }

    /// Whether a repository row exists for this exact file state.
    pub fn exists(&self, filename: &str, mtime: i64) -> Result<bool> {
        let mut statement = self
            .conn
            .prepare_cached("SELECT 1 FROM repository WHERE filename = ? AND mtime = ? LIMIT 1")
            .context("preparing repository existence query")?;

        Ok(statement.exists(params![filename, mtime])?)
    }

    /// Store a fully analyzed package.
    ///
    /// The repository row is upserted and all dependent rows (provides,
    /// depends, contents) are replaced, in a single transaction.
    pub fn insert(&mut self, package: &PackageRecord) -> Result<()> {
        let txn = self.conn.transaction()?;

        txn.execute(
            "INSERT OR REPLACE INTO repository VALUES (?, ?, ?, ?, ?, ?)",
            params![
                package.filename,
                package.package,
                package.version,
                package.sha256,
                package.size as i64,
                package.mtime,
            ],
        )?;

        txn.execute(
            "DELETE FROM elf_provides WHERE package = ? AND version = ?",
            params![package.package, package.version],
        )?;
        {
            let mut statement =
                txn.prepare_cached("INSERT INTO elf_provides VALUES (?, ?, ?, ?)")?;
            for provides in &package.provides {
                let (name, sover) = split_soname(provides);
                statement.execute(params![package.package, package.version, name, sover])?;
            }
        }

        txn.execute(
            "DELETE FROM elf_depends WHERE package = ? AND version = ?",
            params![package.package, package.version],
        )?;
        {
            let mut statement =
                txn.prepare_cached("INSERT INTO elf_depends VALUES (?, ?, ?, ?)")?;
            for depends in &package.depends {
                let (name, sover) = split_soname(depends);
                statement.execute(params![package.package, package.version, name, sover])?;
            }
        }

        txn.execute(
            "DELETE FROM package_files WHERE package = ? AND version = ?",
            params![package.package, package.version],
        )?;
        {
            let mut statement =
                txn.prepare_cached("INSERT INTO package_files VALUES (?, ?, ?, ?, ?)")?;
            for file in &package.contents {
                statement.execute(params![
                    package.package,
                    package.version,
                    file.name,
                    file.size as i64,
                    file.typeflag as i64,
                ])?;
            }
        }

        txn.commit()?;
        Ok(())
    }

    /// Close the connection, flushing the WAL.
    pub fn close(self) {
        let _ = self.conn.close();
    }
}

/// Cloneable handle sharing one store across analysis workers.
///
/// Writes are serialized by the interior mutex. `close` detaches the
/// connection so the signal handler can shut the store down mid-run;
/// workers racing past that point observe an error instead of a partial
/// write.
#[derive(Clone)]
pub struct SharedStore {
    inner: Arc<Mutex<Option<DatabaseConnection>>>,
}

impl SharedStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(db))),
        }
    }

    pub fn exists(&self, filename: &str, mtime: i64) -> Result<bool> {
        let guard = self.lock();
        let db = guard.as_ref().ok_or_else(|| anyhow!("store is closed"))?;
        db.exists(filename, mtime)
    }

    pub fn insert(&self, package: &PackageRecord) -> Result<()> {
        let mut guard = self.lock();
        let db = guard.as_mut().ok_or_else(|| anyhow!("store is closed"))?;
        db.insert(package)
    }

    pub fn close(&self) {
        if let Some(db) = self.lock().take() {
            db.close();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<DatabaseConnection>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Split a SONAME at the last `.so` anchor into (name, sover).
///
/// `libfoo.so.1.2` splits into `("libfoo.so", ".1.2")`; a string without
/// the anchor keeps an empty sover.
pub fn split_soname(soname: &str) -> (&str, &str) {
    match soname.rfind(".so") {
        Some(index) => soname.split_at(index + 3),
        None => (soname, ""),
    }
}

#[cfg(test)]
impl DatabaseConnection {
    fn rows(
        &self,
        query: &str,
        package: &str,
        version: &str,
    ) -> Result<Vec<(String, String)>> {
        let mut statement = self.conn.prepare(query)?;
        let rows = statement
            .query_map(params![package, version], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn provides_rows(&self, package: &str, version: &str) -> Result<Vec<(String, String)>> {
        self.rows(
            "SELECT provides, sover FROM elf_provides WHERE package = ? AND version = ? ORDER BY provides, sover",
            package,
            version,
        )
    }

    pub fn depends_rows(&self, package: &str, version: &str) -> Result<Vec<(String, String)>> {
        self.rows(
            "SELECT depends, sover FROM elf_depends WHERE package = ? AND version = ? ORDER BY depends, sover",
            package,
            version,
        )
    }

    pub fn file_count(&self, package: &str, version: &str) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM package_files WHERE package = ? AND version = ?",
            params![package, version],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn repository_hash(&self, filename: &str) -> Result<Option<String>> {
        use rusqlite::OptionalExtension;

        Ok(self
            .conn
            .query_row(
                "SELECT hash FROM repository WHERE filename = ?",
                params![filename],
                |row| row.get(0),
            )
            .optional()?)
    }
}
