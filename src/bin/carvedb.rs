//! # carvedb CLI Entry Point
//!
//! Binary entry point for the forensic analyzer.
//!
//! ## Usage
//!
//! ```bash
//! # Timeline of every table, WAL auto-detected next to the database
//! carvedb evidence.db
//!
//! # Recover deleted records too
//! carvedb --carve evidence.db
//!
//! # Including freelist pages, for two tables only
//! carvedb --carve --carve-freelists --tables msgs,contacts evidence.db
//!
//! # Tolerate header damage
//! carvedb --no-strict evidence.db
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use eyre::{bail, eyre, Result, WrapErr};
use tracing_subscriber::EnvFilter;

use carvedb::carving::CarvedCellKind;
use carvedb::cli::Options;
use carvedb::format::{JournalHeader, WalIndexHeader};
use carvedb::history::{table_selected, HistoryOptions, TableHistory};
use carvedb::output::{render_commit, render_schema, render_signature};
use carvedb::pages::PageSource;
use carvedb::signatures::TableSignature;
use carvedb::storage::FileSource;
use carvedb::version::VersionChain;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let Some(options) = parse_args()? else {
        return Ok(());
    };

    init_logging(&options)?;

    let wal_path = options.resolved_wal_path();
    let chain = VersionChain::open(options.database_path.clone(), wal_path, options.strict_format_checking)
        .wrap_err_with(|| {
            format!("failed to analyze '{}'", options.database_path.display())
        })?;

    let journal = match options.resolved_journal_path() {
        Some(journal_path) => {
            let journal = FileSource::open(&journal_path)
                .wrap_err_with(|| format!("failed to open journal '{}'", journal_path.display()))?;
            let header_bytes = journal
                .slice(0, carvedb::config::JOURNAL_HEADER_SIZE)
                .map(|b| b.to_vec())
                .unwrap_or_default();
            if header_bytes.len() == carvedb::config::JOURNAL_HEADER_SIZE {
                let header = JournalHeader::parse(&header_bytes)?;
                if header.valid_magic {
                    println!(
                        "hot rollback journal: {} page record(s), page size {}",
                        header
                            .page_record_count
                            .map(|n| n.to_string())
                            .unwrap_or_else(|| "unknown".to_string()),
                        header.page_size
                    );
                } else {
                    println!("rollback journal present but invalidated");
                }
                Some((journal, header))
            } else {
                None
            }
        }
        None => None,
    };

    report_wal_index(&options, &chain);

    let base_schema = chain.base().master_schema();
    if options.print_schema {
        print!("{}", render_schema(base_schema));
    }
    if options.print_schema_history {
        for version in chain.iter() {
            println!("-- schema at version {}", version.number());
            print!("{}", render_schema(version.master_schema()));
        }
    }

    // Signatures are derived once, from the whole chain, and reused for
    // every version the carver touches.
    let mut signatures: Vec<(String, TableSignature)> = Vec::new();
    if options.carve || options.print_signatures {
        for row in base_schema.carvable_tables() {
            if !table_selected(&row.name, &options.tables, &options.exempted_tables) {
                continue;
            }
            match TableSignature::generate(&chain, row) {
                Ok(signature) => {
                    if options.print_signatures {
                        print!("{}", render_signature(&signature));
                    }
                    signatures.push((row.name.clone(), signature));
                }
                Err(error) => {
                    tracing::warn!(table = %row.name, %error, "signature generation skipped");
                }
            }
        }
    }

    let history_options = HistoryOptions {
        carve: options.carve,
        carve_freelists: options.carve_freelists,
    };

    let mut carved_total = 0usize;
    let mut freeblock_carved_total = 0usize;
    let table_names: Vec<String> = base_schema
        .rows
        .iter()
        .filter(|row| row.root_page != 0)
        .filter(|row| table_selected(&row.name, &options.tables, &options.exempted_tables))
        .map(|row| row.name.clone())
        .collect();

    for name in table_names {
        let signature = signatures
            .iter()
            .find(|(table, _)| *table == name)
            .map(|(_, signature)| signature);
        let history = TableHistory::new(&chain, &name, signature, history_options);
        for commit in history {
            let commit = commit.wrap_err_with(|| format!("history of table '{name}'"))?;
            if commit.updated() {
                carved_total += commit.carved_cells.len();
                freeblock_carved_total += commit
                    .carved_cells
                    .iter()
                    .filter(|cell| cell.kind == CarvedCellKind::Freeblock)
                    .count();
                print!("{}", render_commit(&commit));
            }
        }
    }

    // Journal page images are opaque blocks; carve the table-leaf ones
    // as raw unallocated regions. Only runs when the journal was given
    // explicitly: auto-detected journals are usually invalidated.
    if options.carve && options.journal_path.is_some() {
        if let Some((journal_source, _)) = &journal {
            let base = chain.base();
            let records = carvedb::format::journal_page_records(
                journal_source,
                base.header().page_size,
                carvedb::format::journal::DEFAULT_JOURNAL_SECTOR_SIZE,
            );
            let mut journal_carved = 0usize;
            for record in &records {
                let Ok(image) =
                    journal_source.slice(record.data_offset, record.data_length as usize)
                else {
                    continue;
                };
                if image.first() != Some(&carvedb::config::TABLE_LEAF_PAGE_TYPE) {
                    continue;
                }
                for (name, signature) in &signatures {
                    let carver = carvedb::carving::Carver::new(signature);
                    for cell in carver.carve_unallocated(
                        record.page_number,
                        0,
                        image,
                        base.text_encoding(),
                    ) {
                        journal_carved += 1;
                        println!(
                            "journal page {} table {name}: {}",
                            record.page_number,
                            carvedb::output::render_carved_cell(&cell)
                        );
                    }
                }
            }
            println!("carved {journal_carved} candidate record(s) from the journal");
            carved_total += journal_carved;
        }
    }

    if options.carve {
        println!(
            "carved {carved_total} record(s) ({freeblock_carved_total} from freeblocks)"
        );
    }

    let warnings = chain.warnings.snapshot();
    if !warnings.is_empty() {
        println!("{} format warning(s):", warnings.len());
        for warning in &warnings {
            match warning.offset {
                Some(offset) => println!("  [offset {offset}] {}", warning.detail),
                None => println!("  {}", warning.detail),
            }
        }
    }

    Ok(())
}

/// Cross-checks the advisory `-shm` file against the parsed WAL, when
/// both exist. The WAL-index is never trusted for correctness; a
/// disagreement is worth a line because it means the file pair was not
/// captured atomically.
fn report_wal_index(options: &Options, chain: &VersionChain) {
    if options.no_journal {
        return;
    }
    let shm_path = {
        let mut name = options
            .database_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        name.push_str("-shm");
        options.database_path.with_file_name(name)
    };
    if !shm_path.exists() {
        return;
    }
    let Ok(shm) = FileSource::open(&shm_path) else {
        return;
    };
    let Ok(bytes) = shm.slice(0, shm.len().min(200) as usize) else {
        return;
    };
    match WalIndexHeader::parse(bytes) {
        Ok(index) => {
            if !index.copies_consistent() {
                tracing::warn!("WAL-index header copies disagree; ignoring the index");
                return;
            }
            let mx_frame = index.copies[0].mx_frame as usize;
            if let Some(wal) = &chain.wal {
                if mx_frame != wal.frames.len() {
                    println!(
                        "note: WAL-index says {mx_frame} valid frame(s), the WAL scan found {}",
                        wal.frames.len()
                    );
                }
            }
        }
        Err(error) => tracing::debug!(%error, "unusable WAL-index file"),
    }
}

fn init_logging(options: &Options) -> Result<()> {
    let filter = EnvFilter::try_new(&options.log_level)
        .or_else(|_| EnvFilter::try_new("warn"))
        .map_err(|e| eyre!("invalid log filter: {e}"))?;

    match &options.log_file {
        Some(path) => {
            let file = std::fs::File::create(path)
                .wrap_err_with(|| format!("failed to create log file '{}'", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::sync::Arc::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

/// Hand-rolled argument loop; returns `None` after `--help`/`--version`.
fn parse_args() -> Result<Option<Options>> {
    let args: Vec<String> = std::env::args().collect();

    let mut database_path: Option<PathBuf> = None;
    let mut options = Options::new(PathBuf::new());

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_usage();
                return Ok(None);
            }
            "--version" | "-v" => {
                println!("carvedb {}", env!("CARGO_PKG_VERSION"));
                return Ok(None);
            }
            "--carve" => options.carve = true,
            "--carve-freelists" => {
                options.carve = true;
                options.carve_freelists = true;
            }
            "--no-strict" => options.strict_format_checking = false,
            "--no-journal" => options.no_journal = true,
            "--schema" => options.print_schema = true,
            "--schema-history" => options.print_schema_history = true,
            "--signatures" => options.print_signatures = true,
            "--wal" => options.wal_path = Some(take_value(&args, &mut i, "--wal")?.into()),
            "--journal" => {
                options.journal_path = Some(take_value(&args, &mut i, "--journal")?.into())
            }
            "--tables" => {
                options.tables = take_value(&args, &mut i, "--tables")?
                    .split(',')
                    .map(str::to_string)
                    .collect();
            }
            "--exempt-tables" => {
                options.exempted_tables = take_value(&args, &mut i, "--exempt-tables")?
                    .split(',')
                    .map(str::to_string)
                    .collect();
            }
            "--log-level" => options.log_level = take_value(&args, &mut i, "--log-level")?,
            "--log-file" => {
                options.log_file = Some(take_value(&args, &mut i, "--log-file")?.into())
            }
            arg if arg.starts_with('-') => bail!("unknown option: {arg}"),
            arg => {
                if database_path.is_some() {
                    bail!("more than one database path given");
                }
                database_path = Some(PathBuf::from(arg));
            }
        }
        i += 1;
    }

    let Some(database_path) = database_path else {
        print_usage();
        bail!("no database path given");
    };
    options.database_path = database_path;
    Ok(Some(options))
}

fn take_value(args: &[String], i: &mut usize, flag: &str) -> Result<String> {
    *i += 1;
    args.get(*i)
        .cloned()
        .ok_or_else(|| eyre!("{flag} needs a value"))
}

fn print_usage() {
    println!(
        "carvedb - forensic SQLite timeline and deleted-record carver

USAGE:
    carvedb [OPTIONS] <database>

OPTIONS:
    --wal <path>             Use this WAL instead of auto-detecting
    --journal <path>         Use this rollback journal instead of auto-detecting
    --no-journal             Disable companion file auto-detection
    --carve                  Recover deleted records from dead page space
    --carve-freelists        Also carve freelist leaf pages (implies --carve)
    --tables <a,b>           Only analyze these tables
    --exempt-tables <a,b>    Skip these tables
    --schema                 Print the base version's schema
    --schema-history         Print the schema of every version
    --signatures             Print generated table signatures
    --no-strict              Downgrade header format errors to warnings
    --log-level <filter>     Tracing filter (default: warn)
    --log-file <path>        Write logs to a file instead of stderr
    -h, --help               Show this help
    -v, --version            Show the version"
    );
}
