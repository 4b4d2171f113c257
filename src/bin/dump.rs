//! tabletkv Fragment Dump
//!
//! Merges one or more fragment files and prints the resulting cells.

use std::ops::Bound;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use clap::Parser;
use tabletkv::fragment::{DiskFragment, Fragment};
use tabletkv::{
    BlockCache, Cell, CellValue, Config, FragmentMerge, MergeOptions, RowRange, ScanPredicate,
};
use tracing_subscriber::{fmt, EnvFilter};

/// Fragment dump
#[derive(Parser, Debug)]
#[command(name = "tabletkv-dump")]
#[command(about = "Print the merged contents of tabletkv fragment files")]
#[command(version)]
struct Args {
    /// Fragment files, newest first
    #[arg(required = true)]
    fragments: Vec<PathBuf>,

    /// First row to print (inclusive)
    #[arg(long)]
    start_row: Option<String>,

    /// Row to stop before (exclusive)
    #[arg(long)]
    end_row: Option<String>,

    /// Only print these column families (repeatable)
    #[arg(short, long)]
    family: Vec<String>,

    /// Keep at most this many versions per column (0 keeps all)
    #[arg(long, default_value = "0")]
    history: usize,

    /// Print erasure markers instead of applying them
    #[arg(long)]
    raw: bool,

    /// Stop after this many cells
    #[arg(short, long)]
    limit: Option<usize>,

    /// Block cache size in MB
    #[arg(long, default_value = "16")]
    cache_mb: usize,
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();
    if let Err(e) = run(&args) {
        tracing::error!("Dump failed: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> tabletkv::Result<()> {
    let mut chain: Vec<Arc<dyn Fragment>> = Vec::with_capacity(args.fragments.len());
    for path in &args.fragments {
        let fragment = DiskFragment::open(path)?;
        tracing::info!(
            "Opened {} ({} cells, {} blocks)",
            path.display(),
            fragment.cell_count(),
            fragment.block_count()
        );
        chain.push(Arc::new(fragment));
    }

    let lower = args
        .start_row
        .as_ref()
        .map_or(Bound::Unbounded, |r| Bound::Included(Bytes::from(r.clone())));
    let upper = args
        .end_row
        .as_ref()
        .map_or(Bound::Unbounded, |r| Bound::Excluded(Bytes::from(r.clone())));
    let mut predicate = ScanPredicate::new().with_row_range(RowRange::new(lower, upper));
    if !args.family.is_empty() {
        predicate = predicate.with_families(args.family.iter().map(|f| Bytes::from(f.clone())));
    }

    let config = Config::builder()
        .block_cache_bytes(args.cache_mb * 1024 * 1024)
        .build();
    config.validate()?;

    let cache = Arc::new(BlockCache::new(config.block_cache_bytes));
    let options = MergeOptions {
        filter_erasures: !args.raw,
        block_quota: config.max_blocks_per_call,
    };
    let mut merge = FragmentMerge::new(&chain, cache, predicate, None, options)?;

    let limit = args.limit.unwrap_or(usize::MAX);
    let mut printed = 0;
    let mut column: Option<(Bytes, Bytes)> = None;
    let mut versions = 0;
    loop {
        let mut batch: Vec<Cell> = Vec::new();
        let more = merge.copy_merged(1024, usize::MAX, &mut batch)?;
        for cell in batch {
            let key = (cell.key.row.clone(), cell.key.column.clone());
            if column.as_ref() == Some(&key) {
                versions += 1;
            } else {
                column = Some(key);
                versions = 1;
            }
            if args.history > 0 && versions > args.history {
                continue;
            }
            if printed == limit {
                return Ok(());
            }
            print_cell(&cell);
            printed += 1;
        }
        if !more {
            break;
        }
    }

    tracing::info!("Printed {} cells", printed);
    Ok(())
}

fn print_cell(cell: &Cell) {
    let value = match &cell.value {
        CellValue::Value(v) => String::from_utf8_lossy(v).into_owned(),
        CellValue::Erasure => "<erased>".to_string(),
    };
    println!("{}\t{}", cell.key, value);
}
