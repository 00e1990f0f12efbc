//! A thin inspection CLI over the four container kinds this workspace
//! reads: NTDS.dit databases, raw LevelDB directories, and Chromium's two
//! disk cache backends.

use std::fs::File;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
struct Opts {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Opens an NTDS.dit file and prints a summary of its schema and objects.
    Ntds {
        db_path: PathBuf,
        /// An LDAP-style filter to restrict the printed objects, e.g. `(objectClass=user)`.
        #[arg(long)]
        filter: Option<String>,
    },
    /// Lists the live/deleted/prior-version records in a LevelDB directory.
    Leveldb { dir_path: PathBuf },
    /// Lists the entries in a Chromium blockfile disk cache directory.
    Blockfile { dir_path: PathBuf },
    /// Lists the entries in a Chromium Simple Cache directory.
    Simplecache { dir_path: PathBuf },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .pretty()
        .init();

    let opts = Opts::parse();
    match opts.command {
        Command::Ntds { db_path, filter } => dump_ntds(&db_path, filter.as_deref()),
        Command::Leveldb { dir_path } => dump_leveldb(&dir_path),
        Command::Blockfile { dir_path } => dump_blockfile(&dir_path),
        Command::Simplecache { dir_path } => dump_simplecache(&dir_path),
    }
}

fn dump_ntds(db_path: &PathBuf, filter: Option<&str>) {
    let file = File::open(db_path).expect("failed to open NTDS.dit file");
    let database = ntds::database::Database::open(file).expect("failed to read NTDS database");

    println!("schema loaded, {} objects total", database.objects().len());

    let objects: Vec<&ntds::object::Object> = match filter {
        Some(f) => database.query(f).expect("failed to evaluate filter"),
        None => database.objects().iter().collect(),
    };

    for object in objects {
        let dn = database.distinguished_name(object);
        let name = object.name().unwrap_or("<unnamed>");
        println!("{dn}  ({name})");
    }
}

fn dump_leveldb(dir_path: &PathBuf) {
    let db = webstorage::LevelDb::open(dir_path).expect("failed to open LevelDB directory");
    println!("{} records", db.records.len());
    for record in &db.records {
        println!(
            "[{:?}] seq={} key={} value_len={}",
            record.state,
            record.sequence,
            String::from_utf8_lossy(&record.key),
            record.value.len(),
        );
    }
}

fn dump_blockfile(dir_path: &PathBuf) {
    let cache = chromecache::DiskCache::open(dir_path).expect("failed to open blockfile cache");
    for entry in cache.entries() {
        match entry {
            Ok(entry) => {
                let data_len = entry.data(&cache).map(|d| d.len()).unwrap_or(0);
                println!("{}  ({} bytes)", entry.key, data_len);
            }
            Err(e) => tracing::warn!("skipping unreadable entry: {e}"),
        }
    }
}

fn dump_simplecache(dir_path: &PathBuf) {
    let cache = chromecache::SimpleDiskCache::open(dir_path).expect("failed to open simple cache");
    for cache_file in &cache.cache_files {
        match cache_file.data() {
            Ok(data) => println!("{} bytes", data.len()),
            Err(e) => tracing::warn!("skipping unreadable simple cache entry: {e}"),
        }
    }
}
