//! Benchmarks for fragment merging and paged scans

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tabletkv::cell::{Cell, RowRange};
use tabletkv::fragment::{DiscardSink, Fragment, MemFragment};
use tabletkv::{
    BlockCache, Config, FragmentMerge, MergeOptions, ScanMode, ScanPredicate, Scanner, Table,
    TableSchema,
};

const ROWS: usize = 10_000;

/// `fragments` overlapping fragments, newest first, each rewriting every
/// `fragments`-th row
fn chain(fragments: usize) -> Vec<Arc<dyn Fragment>> {
    (0..fragments)
        .map(|f| {
            let cells = (0..ROWS)
                .filter(|r| r % fragments == f || f == fragments - 1)
                .map(|r| Cell::new(format!("row{:06}", r), "f:q", 1, format!("v{}", f)))
                .collect();
            Arc::new(MemFragment::new(format!("frag{}", f), cells, 128)) as Arc<dyn Fragment>
        })
        .collect()
}

fn merge_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");
    for fragments in [1, 4, 16] {
        let chain = chain(fragments);
        let cache = Arc::new(BlockCache::new(256 << 20));
        let options = MergeOptions {
            block_quota: usize::MAX,
            ..MergeOptions::default()
        };
        group.bench_with_input(BenchmarkId::new("copy_all", fragments), &chain, |b, chain| {
            b.iter(|| {
                let mut merge = FragmentMerge::new(
                    chain,
                    Arc::clone(&cache),
                    ScanPredicate::new(),
                    None,
                    options,
                )
                .unwrap();
                merge.copy_all(&mut DiscardSink).unwrap();
                black_box(merge.has_more())
            })
        });
    }
    group.finish();
}

fn scan_benchmarks(c: &mut Criterion) {
    let table = Table::new(TableSchema::new("bench"), Config::default());
    table
        .load_tablet(RowRange::before_row("row005000"), vec![("default", chain(4))])
        .unwrap();
    table
        .load_tablet(RowRange::from_row("row005000"), vec![("default", chain(4))])
        .unwrap();
    let table = Arc::new(table);
    let cache = Arc::new(BlockCache::new(256 << 20));

    c.bench_function("scan/page_1000", |b| {
        b.iter(|| {
            let mut scanner = Scanner::new(
                Arc::clone(&table),
                Arc::clone(&cache),
                ScanPredicate::new(),
                ScanMode::AnyTxn,
                &Config::default(),
            )
            .unwrap();
            let mut total = 0;
            loop {
                let batch = scanner.scan(1000, usize::MAX).unwrap();
                total += batch.cells.len();
                if !batch.has_more {
                    break;
                }
            }
            black_box(total)
        })
    });
}

criterion_group!(benches, merge_benchmarks, scan_benchmarks);
criterion_main!(benches);
