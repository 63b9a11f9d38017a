// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    anyhow::Result,
    clap::{Arg, Command},
    std::path::PathBuf,
};

const ABOUT: &str = "\
# About

`debscan` walks a directory tree of Debian binary packages, extracts each
package's control metadata, hashes its contents, inventories the files in
its data tarball, and records the shared-library SONAMEs every package
provides and needs. Results land in a SQLite database that can answer
questions like \"which package provides libX.so.3?\" and \"which packages
depend on libY.so.2?\".

Re-running over the same tree is cheap: packages whose file state is
already indexed are skipped.
";

pub async fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        // Progress rendering owns stdout.
        .with_writer(std::io::stderr)
        .init();

    let default_threads = format!("{}", num_cpus::get());

    let app = Command::new("debscan")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Scan a tree of Debian packages into a SQLite inventory")
        .long_about(ABOUT)
        .arg_required_else_help(true)
        .arg(
            Arg::new("threads")
                .short('t')
                .long("threads")
                .takes_value(true)
                .default_value(&default_threads)
                .help("Number of concurrent analysis workers"),
        )
        .arg(
            Arg::new("library_prefix")
                .long("library-prefix")
                .takes_value(true)
                .multiple_occurrences(true)
                .help("Directory prefix under which SONAMEs count as provided (repeatable; replaces the built-in list)"),
        )
        .arg(
            Arg::new("scan_root")
                .required(true)
                .help("Directory tree to scan for .deb files"),
        )
        .arg(
            Arg::new("db_name")
                .required(true)
                .help("Database name; created as <name>.db in the working directory"),
        );

    let matches = app.get_matches();

    let threads = matches.value_of_t::<usize>("threads")?;
    let root = PathBuf::from(matches.value_of("scan_root").expect("scan_root is required"));
    let db_name = matches.value_of("db_name").expect("db_name is required");
    let prefixes: Vec<String> = match matches.values_of("library_prefix") {
        Some(values) => values.map(String::from).collect(),
        None => crate::import::DEFAULT_LIBRARY_PREFIXES
            .iter()
            .map(|s| s.to_string())
            .collect(),
    };

    let db = crate::db::DatabaseConnection::new_path(format!("{}.db", db_name))?;
    let store = crate::db::SharedStore::new(db);

    // SIGINT closes the store before exiting so the next run can trust the
    // idempotence check.
    tokio::spawn({
        let store = store.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                store.close();
                std::process::exit(1);
            }
        }
    });

    crate::import::scan_tree(root, store, threads, prefixes).await
}
