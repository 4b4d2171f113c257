//! Scanner and scanner manager tests
//!
//! Tests verify:
//! - Paging through a table returns every cell exactly once, in order
//! - Tablet boundaries are invisible to the client
//! - Fragment replacement, split and merge mid-scan lose and repeat nothing
//! - Merging tablets after a one-sided compaction keeps deleted rows deleted
//! - A dropped tablet fails the scan with a retryable error
//! - A corrupt block fails the call without moving the cursor
//! - Invalid configurations are rejected on open
//! - LatestTxn scans pick up new commits, AnyTxn scans keep their snapshot
//! - History limits hold across batches
//! - Manager open/scan/close and idle reaping

use std::ops::Bound;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tabletkv::cell::{Cell, RowRange};
use tabletkv::fragment::{DiskFragment, Fragment, FragmentWriter, MemFragment};
use tabletkv::table::ColumnGroup;
use tempfile::TempDir;
use tabletkv::{
    BlockCache, Config, FragmentMerge, MergeOptions, ScanMode, ScanPredicate, Scanner,
    ScannerManager, Table, TableSchema, TabletError,
};

// =============================================================================
// Helper Functions
// =============================================================================

const BLOCK_CELLS: usize = 4;

fn mem(name: &str, cells: Vec<Cell>) -> Arc<dyn Fragment> {
    Arc::new(MemFragment::new(name, cells, BLOCK_CELLS))
}

fn cache() -> Arc<BlockCache> {
    Arc::new(BlockCache::new(1 << 20))
}

/// `rows` rows with two columns and two versions each, keys all distinct
fn table_cells(rows: usize) -> Vec<Cell> {
    let mut cells = Vec::new();
    for r in 0..rows {
        for column in ["f:a", "f:b"] {
            for ts in [2, 1] {
                let row = format!("row{:03}", r);
                let value = format!("{}/{}/{}", row, column, ts);
                cells.push(Cell::new(row, column, ts, value));
            }
        }
    }
    cells
}

fn sorted(mut cells: Vec<Cell>) -> Vec<Cell> {
    cells.sort_by(|a, b| a.key.cmp(&b.key));
    cells
}

/// Tablet row ranges cut at `splits`
fn tablet_ranges(splits: &[&str]) -> Vec<RowRange> {
    let mut bounds: Vec<Bound<Bytes>> = vec![Bound::Unbounded];
    bounds.extend(splits.iter().map(|s| Bound::Included(Bytes::copy_from_slice(s.as_bytes()))));
    bounds.push(Bound::Unbounded);

    bounds
        .windows(2)
        .map(|pair| {
            let upper = match &pair[1] {
                Bound::Included(row) => Bound::Excluded(row.clone()),
                other => other.clone(),
            };
            RowRange::new(pair[0].clone(), upper)
        })
        .collect()
}

/// Fragments for one tablet: cells split over a newer and an older fragment
fn tablet_chain(index: usize, range: &RowRange, cells: &[Cell]) -> Vec<Arc<dyn Fragment>> {
    let mut newer = Vec::new();
    let mut older = Vec::new();
    for (i, cell) in cells.iter().filter(|c| range.contains(&c.key.row)).enumerate() {
        if i % 2 == 0 {
            newer.push(cell.clone());
        } else {
            older.push(cell.clone());
        }
    }
    vec![
        mem(&format!("t{}-new", index), newer),
        mem(&format!("t{}-old", index), older),
    ]
}

fn load_table(splits: &[&str], cells: &[Cell], config: Config) -> Arc<Table> {
    let table = Table::new(TableSchema::new("t"), config);
    for (i, range) in tablet_ranges(splits).into_iter().enumerate() {
        let chain = tablet_chain(i, &range, cells);
        table.load_tablet(range, vec![("default", chain)]).unwrap();
    }
    Arc::new(table)
}

fn scanner(table: &Arc<Table>, predicate: ScanPredicate, mode: ScanMode) -> Scanner {
    Scanner::new(Arc::clone(table), cache(), predicate, mode, &Config::default()).unwrap()
}

/// Page through the rest of a scan
fn drain(scanner: &mut Scanner, page: usize) -> Vec<Cell> {
    let mut out = Vec::new();
    for _ in 0..10_000 {
        let batch = scanner.scan(page, usize::MAX).unwrap();
        assert!(batch.cells.len() <= page);
        out.extend(batch.cells);
        if !batch.has_more {
            return out;
        }
    }
    panic!("scan never finished");
}

fn assert_strictly_increasing(cells: &[Cell]) {
    for pair in cells.windows(2) {
        assert!(pair[0].key < pair[1].key, "{} !< {}", pair[0].key, pair[1].key);
    }
}

// =============================================================================
// Pagination Tests
// =============================================================================

#[test]
fn test_single_batch_returns_everything() {
    let cells = table_cells(10);
    let table = load_table(&[], &cells, Config::default());
    let mut scanner = scanner(&table, ScanPredicate::new(), ScanMode::AnyTxn);

    let batch = scanner.scan(1000, usize::MAX).unwrap();
    assert_eq!(batch.cells, sorted(cells));
    assert!(!batch.has_more);
    assert!(!scanner.scan_continues());

    // Finished scans keep returning empty batches
    let batch = scanner.scan(1000, usize::MAX).unwrap();
    assert!(batch.cells.is_empty());
    assert!(!batch.has_more);
}

#[test]
fn test_pagination_is_complete() {
    let cells = table_cells(25);
    let expected = sorted(cells.clone());

    for page in [1, 3, 7, 64] {
        let table = load_table(&[], &cells, Config::default());
        let mut scanner = scanner(&table, ScanPredicate::new(), ScanMode::AnyTxn);
        let out = drain(&mut scanner, page);
        assert_eq!(out, expected, "page size {}", page);
    }
}

#[test]
fn test_last_key_tracks_returned_cells() {
    let cells = table_cells(5);
    let table = load_table(&[], &cells, Config::default());
    let mut scanner = scanner(&table, ScanPredicate::new(), ScanMode::AnyTxn);
    assert!(scanner.last_key().is_none());

    let batch = scanner.scan(3, usize::MAX).unwrap();
    assert_eq!(scanner.last_key(), Some(&batch.cells[2].key));
    assert!(batch.has_more);
}

#[test]
fn test_size_limit_bounds_batches() {
    let cells = table_cells(10);
    let table = load_table(&[], &cells, Config::default());
    let mut scanner = scanner(&table, ScanPredicate::new(), ScanMode::AnyTxn);

    let one = cells[0].data_size();
    let batch = scanner.scan(1000, 3 * one).unwrap();
    assert_eq!(batch.cells.len(), 3);

    let mut out = batch.cells;
    out.extend(drain(&mut scanner, 1000));
    assert_eq!(out, sorted(cells));
}

#[test]
fn test_predicate_filters_scan() {
    let cells = table_cells(20);
    let table = load_table(&["row010"], &cells, Config::default());
    let predicate = ScanPredicate::new()
        .with_row_range(RowRange::half_open("row005", "row015"))
        .with_time_range(2, 2);
    let mut scanner = scanner(&table, predicate.clone(), ScanMode::AnyTxn);

    let out = drain(&mut scanner, 4);
    let expected: Vec<Cell> = sorted(cells)
        .into_iter()
        .filter(|c| predicate.matches(&c.key))
        .collect();
    assert_eq!(out.len(), 20);
    assert_eq!(out, expected);
}

#[test]
fn test_empty_row_predicate_ends_immediately() {
    let table = load_table(&[], &table_cells(3), Config::default());
    let predicate = ScanPredicate::new().with_row_range(RowRange::half_open("b", "b"));
    let mut scanner = scanner(&table, predicate, ScanMode::AnyTxn);

    assert!(!scanner.scan_continues());
    let batch = scanner.scan(10, usize::MAX).unwrap();
    assert!(batch.cells.is_empty());
    assert!(!batch.has_more);
}

// =============================================================================
// Tablet Boundary Tests
// =============================================================================

#[test]
fn test_tablet_boundaries_are_transparent() {
    let cells = table_cells(30);
    let single = load_table(&[], &cells, Config::default());
    let split = load_table(&["row007", "row008", "row020"], &cells, Config::default());

    let mut a = scanner(&single, ScanPredicate::new(), ScanMode::AnyTxn);
    let mut b = scanner(&split, ScanPredicate::new(), ScanMode::AnyTxn);
    assert_eq!(drain(&mut a, 5), drain(&mut b, 5));
}

#[test]
fn test_batch_spans_several_tablets() {
    let cells = table_cells(12);
    let table = load_table(&["row004", "row008"], &cells, Config::default());
    let mut scanner = scanner(&table, ScanPredicate::new(), ScanMode::AnyTxn);

    let batch = scanner.scan(1000, usize::MAX).unwrap();
    assert_eq!(batch.cells.len(), cells.len());
    assert!(!batch.has_more);
}

#[test]
fn test_empty_tablet_is_skipped() {
    let cells: Vec<Cell> = table_cells(20)
        .into_iter()
        .filter(|c| &c.key.row[..] < &b"row005"[..] || &c.key.row[..] >= &b"row010"[..])
        .collect();
    let table = load_table(&["row005", "row010"], &cells, Config::default());
    let mut scanner = scanner(&table, ScanPredicate::new(), ScanMode::AnyTxn);

    assert_eq!(drain(&mut scanner, 6), sorted(cells));
}

#[test]
fn test_unloaded_start_row_is_not_loaded() {
    let table = Table::new(TableSchema::new("t"), Config::default());
    table
        .load_tablet(RowRange::from_row("m"), vec![("default", vec![mem("m", table_cells(1))])])
        .unwrap();
    let table = Arc::new(table);

    let mut scanner = scanner(&table, ScanPredicate::new(), ScanMode::AnyTxn);
    let err = scanner.scan(10, usize::MAX).unwrap_err();
    assert!(matches!(err, TabletError::NotLoaded(_)));
    assert!(scanner.scan_continues());
}

// =============================================================================
// Invalidation Tests
// =============================================================================

#[test]
fn test_fragment_replacement_mid_scan() {
    let cells = table_cells(20);
    let table = load_table(&[], &cells, Config::default());
    let cache = cache();
    let mut scanner = Scanner::new(
        Arc::clone(&table),
        Arc::clone(&cache),
        ScanPredicate::new(),
        ScanMode::AnyTxn,
        &Config::default(),
    )
    .unwrap();

    let pinned = |name: &str| (0..10).map(|b| cache.pin_count(name, b)).sum::<usize>();
    let mut out = scanner.scan(10, usize::MAX).unwrap().cells;
    assert!(pinned("t0-new") + pinned("t0-old") > 0);

    // Compaction: both fragments become one
    let compacted = mem("t0-compact", cells.clone());
    table
        .replace_fragments(&RowRange::all(), "default", &["t0-new", "t0-old"], Some(compacted))
        .unwrap();

    out.extend(drain(&mut scanner, 10));
    assert_eq!(out, sorted(cells));
    assert_strictly_increasing(&out);
    assert_eq!(pinned("t0-new") + pinned("t0-old"), 0);
}

#[test]
fn test_replacement_outside_open_tablet_keeps_merge() {
    let cells = table_cells(20);
    let table = load_table(&["row010"], &cells, Config::default());
    let mut scanner = scanner(&table, ScanPredicate::new(), ScanMode::AnyTxn);

    let mut out = scanner.scan(5, usize::MAX).unwrap().cells;
    let right: Vec<Cell> = cells.iter().filter(|c| &c.key.row[..] >= &b"row010"[..]).cloned().collect();
    table
        .replace_fragments(
            &RowRange::from_row("row010"),
            "default",
            &["t1-new", "t1-old"],
            Some(mem("t1-compact", right)),
        )
        .unwrap();

    out.extend(drain(&mut scanner, 5));
    assert_eq!(out, sorted(cells));
}

#[test]
fn test_split_mid_scan() {
    let cells = table_cells(20);
    let table = load_table(&[], &cells, Config::default());
    let mut scanner = scanner(&table, ScanPredicate::new(), ScanMode::AnyTxn);

    let mut out = scanner.scan(9, usize::MAX).unwrap().cells;
    table.split_tablet(b"row010").unwrap();
    out.extend(drain(&mut scanner, 9));

    assert_eq!(out, sorted(cells));
}

#[test]
fn test_merge_mid_scan() {
    let cells = table_cells(20);
    let table = load_table(&["row010"], &cells, Config::default());
    let mut scanner = scanner(&table, ScanPredicate::new(), ScanMode::AnyTxn);

    let mut out = scanner.scan(9, usize::MAX).unwrap().cells;
    table.merge_tablets(b"row000").unwrap();
    assert_eq!(table.tablet_count(), 1);
    out.extend(drain(&mut scanner, 9));

    assert_eq!(out, sorted(cells));
}

/// One tablet over every row holding "b" and "m" in fragment "s1"
fn shared_fragment_table() -> Arc<Table> {
    let table = Table::new(TableSchema::new("t"), Config::default());
    let s1 = mem(
        "s1",
        vec![Cell::new("b", "f:q", 1, "old"), Cell::new("m", "f:q", 1, "kept")],
    );
    table.load_tablet(RowRange::all(), vec![("default", vec![s1])]).unwrap();
    Arc::new(table)
}

fn rows_of(cells: &[Cell]) -> Vec<Bytes> {
    cells.iter().map(|c| c.key.row.clone()).collect()
}

#[test]
fn test_merge_after_one_sided_compaction_keeps_deletes() {
    let table = shared_fragment_table();
    table.split_tablet(b"k").unwrap();

    // Delete "b" on the left half and flush the delete
    table
        .commit(vec![Cell::erasure("b", "f:q", 2)], table.max_commit())
        .unwrap();
    let flushed = table.chain_names(b"b", "default").unwrap();
    table
        .replace_fragments(
            &RowRange::before_row("k"),
            "default",
            &[flushed[0].as_str()],
            Some(mem("d", vec![Cell::erasure("b", "f:q", 2)])),
        )
        .unwrap();

    // Compact the left half only; the right half still reads "s1"
    table
        .replace_fragments(
            &RowRange::before_row("k"),
            "default",
            &["d", "s1"],
            Some(mem("c_left", vec![])),
        )
        .unwrap();
    assert_eq!(table.chain_names(b"b", "default").unwrap(), vec!["c_left"]);
    assert_eq!(table.chain_names(b"m", "default").unwrap(), vec!["s1"]);

    let before = drain(&mut scanner(&table, ScanPredicate::new(), ScanMode::AnyTxn), 10);
    assert_eq!(rows_of(&before), vec![Bytes::from("m")]);

    table.merge_tablets(b"b").unwrap();
    assert_eq!(table.tablet_count(), 1);
    assert_eq!(
        table.chain_names(b"b", "default").unwrap(),
        vec!["c_left", "s1"]
    );

    let after = drain(&mut scanner(&table, ScanPredicate::new(), ScanMode::AnyTxn), 10);
    assert_eq!(after, before);

    // Reading only the deleted row must not find it either
    let predicate = ScanPredicate::new().with_row_range(RowRange::single("b"));
    assert!(drain(&mut scanner(&table, predicate, ScanMode::AnyTxn), 10).is_empty());
}

#[test]
fn test_split_then_merge_serves_shared_fragment_everywhere() {
    let table = shared_fragment_table();
    let all = drain(&mut scanner(&table, ScanPredicate::new(), ScanMode::AnyTxn), 10);

    table.split_tablet(b"k").unwrap();
    let split = drain(&mut scanner(&table, ScanPredicate::new(), ScanMode::AnyTxn), 10);
    assert_eq!(split, all);

    table.merge_tablets(b"b").unwrap();
    let joined = drain(&mut scanner(&table, ScanPredicate::new(), ScanMode::AnyTxn), 10);
    assert_eq!(joined, all);
    assert_eq!(rows_of(&joined), vec![Bytes::from("b"), Bytes::from("m")]);
}

#[test]
fn test_split_halves_read_only_their_rows() {
    let table = shared_fragment_table();
    table.split_tablet(b"k").unwrap();

    // Each half sees "s1" limited to its own rows
    let left = ScanPredicate::new().with_row_range(RowRange::before_row("k"));
    let snapshot = table.get_first_fragment_chain(&left).unwrap().unwrap();
    let cache = cache();
    let mut merge = FragmentMerge::new(
        &snapshot.chain,
        cache,
        ScanPredicate::new(),
        None,
        MergeOptions::default(),
    )
    .unwrap();
    let mut out: Vec<Cell> = Vec::new();
    merge.copy_all(&mut out).unwrap();
    assert_eq!(rows_of(&out), vec![Bytes::from("b")]);
}

#[test]
fn test_dropped_tablet_fails_scan_until_reloaded() {
    let cells = table_cells(20);
    let table = load_table(&["row010"], &cells, Config::default());
    let mut scanner = scanner(&table, ScanPredicate::new(), ScanMode::AnyTxn);

    let mut out = scanner.scan(3, usize::MAX).unwrap().cells;
    let last = scanner.last_key().cloned();
    let dropped = table.drop_tablet(b"row000").unwrap();

    let err = scanner.scan(3, usize::MAX).unwrap_err();
    assert!(matches!(err, TabletError::NotLoaded(_)));
    assert!(err.is_retryable());
    assert_eq!(scanner.last_key().cloned(), last);

    // Still gone on retry
    assert!(matches!(scanner.scan(3, usize::MAX), Err(TabletError::NotLoaded(_))));

    let chain = tablet_chain(0, &dropped, &cells);
    table.load_tablet(dropped, vec![("default", chain)]).unwrap();
    out.extend(drain(&mut scanner, 3));
    assert_eq!(out, sorted(cells));
}

/// Write `cells` to a fragment file of small blocks and damage the block
/// holding `marker`
fn corrupt_disk_fragment(temp: &TempDir, cells: &[Cell], marker: &str) -> Arc<dyn Fragment> {
    let path = temp.path().join("damaged.tkv");
    let mut writer = FragmentWriter::new(&path, 100).unwrap();
    for cell in cells {
        writer.add(cell).unwrap();
    }
    assert!(writer.finish().unwrap().block_count > 3);

    let mut bytes = std::fs::read(&path).unwrap();
    let at = bytes
        .windows(marker.len())
        .position(|w| w == marker.as_bytes())
        .unwrap();
    bytes[at] ^= 0xff;
    std::fs::write(&path, &bytes).unwrap();

    Arc::new(DiskFragment::open(&path).unwrap())
}

#[test]
fn test_corrupt_block_fails_call_without_moving_cursor() {
    let temp = TempDir::new().unwrap();
    let cells = sorted(table_cells(20));
    let (left, right): (Vec<Cell>, Vec<Cell>) = cells
        .iter()
        .cloned()
        .partition(|c| &c.key.row[..] < &b"row010"[..]);

    let table = Table::new(TableSchema::new("t"), Config::default());
    let ranges = tablet_ranges(&["row010"]);
    table
        .load_tablet(ranges[0].clone(), vec![("default", tablet_chain(0, &ranges[0], &left))])
        .unwrap();
    let damaged = corrupt_disk_fragment(&temp, &right, "row017/f:a/2");
    let damaged_name = damaged.name().to_string();
    table
        .load_tablet(ranges[1].clone(), vec![("default", vec![damaged])])
        .unwrap();
    let table = Arc::new(table);

    let mut scanner = scanner(&table, ScanPredicate::new(), ScanMode::AnyTxn);
    let mut out = scanner.scan(5, usize::MAX).unwrap().cells;
    let last = scanner.last_key().cloned();
    assert_eq!(last.as_ref(), out.last().map(|c| &c.key));

    // Finishes the first tablet and reaches the damaged block in one call
    let result = scanner.scan(1000, usize::MAX);
    assert!(matches!(result, Err(TabletError::MalformedData(_))));
    assert_eq!(scanner.last_key().cloned(), last);
    assert!(scanner.scan_continues());

    // Other tablets stay readable
    let predicate = ScanPredicate::new().with_row_range(RowRange::before_row("row010"));
    let mut other = Scanner::new(
        Arc::clone(&table),
        cache(),
        predicate,
        ScanMode::AnyTxn,
        &Config::default(),
    )
    .unwrap();
    assert_eq!(drain(&mut other, 7), left);

    // A rewritten fragment lets the first scan resume where it stopped
    table
        .replace_fragments(
            &RowRange::from_row("row010"),
            "default",
            &[damaged_name.as_str()],
            Some(mem("repaired", right.clone())),
        )
        .unwrap();
    out.extend(drain(&mut scanner, 1000));

    assert_eq!(out, cells);
    assert_strictly_increasing(&out);
}

#[test]
fn test_scanner_rejects_invalid_config() {
    let table = load_table(&[], &table_cells(4), Config::default());
    let config = Config::builder().max_blocks_per_call(0).build();

    let result = Scanner::new(
        Arc::clone(&table),
        cache(),
        ScanPredicate::new(),
        ScanMode::AnyTxn,
        &config,
    );
    assert!(matches!(result, Err(TabletError::Config(ref m)) if m.contains("max_blocks_per_call")));

    let manager = manager(config);
    let result = manager.open(table, ScanPredicate::new(), ScanMode::AnyTxn);
    assert!(matches!(result, Err(TabletError::Config(_))));
    assert_eq!(manager.len(), 0);
}

#[test]
fn test_drop_of_other_tablet_does_not_fail_scan() {
    let cells = table_cells(20);
    let table = load_table(&["row010"], &cells, Config::default());
    let predicate = ScanPredicate::new().with_row_range(RowRange::before_row("row010"));
    let mut scanner = scanner(&table, predicate, ScanMode::AnyTxn);

    let mut out = scanner.scan(3, usize::MAX).unwrap().cells;
    table.drop_tablet(b"row015").unwrap();
    out.extend(drain(&mut scanner, 3));
    assert_eq!(out.len(), 40);
}

#[test]
fn test_concurrent_replacement_while_scanning() {
    let cells = table_cells(40);
    let expected = sorted(cells.clone());
    let table = load_table(&["row020"], &cells, Config::default());

    let scanners: Vec<_> = (0..4)
        .map(|t| {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                let mut scanner = scanner(&table, ScanPredicate::new(), ScanMode::AnyTxn);
                drain(&mut scanner, 3 + t)
            })
        })
        .collect();

    // Keep swapping the left tablet's chain for an identical copy
    let left: Vec<Cell> = cells.iter().filter(|c| &c.key.row[..] < &b"row020"[..]).cloned().collect();
    let mut current = vec!["t0-new".to_string(), "t0-old".to_string()];
    for generation in 0..50 {
        let name = format!("t0-gen{}", generation);
        let old: Vec<&str> = current.iter().map(String::as_str).collect();
        table
            .replace_fragments(
                &RowRange::before_row("row020"),
                "default",
                &old,
                Some(mem(&name, left.clone())),
            )
            .unwrap();
        current = vec![name];
    }

    for handle in scanners {
        assert_eq!(handle.join().unwrap(), expected);
    }
}

// =============================================================================
// Scan Mode Tests
// =============================================================================

#[test]
fn test_any_txn_keeps_snapshot() {
    let cells = table_cells(10);
    let table = load_table(&[], &cells, Config::default());
    let mut scanner = scanner(&table, ScanPredicate::new(), ScanMode::AnyTxn);

    let mut out = scanner.scan(4, usize::MAX).unwrap().cells;
    let txn = table.commit(vec![Cell::new("row008", "f:z", 1, "late")], 0).unwrap();
    assert_eq!(txn, 1);

    out.extend(drain(&mut scanner, 4));
    assert_eq!(out, sorted(cells));
    assert_eq!(scanner.scan_transaction(), 0);
}

#[test]
fn test_latest_txn_sees_new_commits() {
    let cells = table_cells(10);
    let table = load_table(&[], &cells, Config::default());
    let mut scanner = scanner(&table, ScanPredicate::new(), ScanMode::LatestTxn);

    let first = scanner.scan(4, usize::MAX).unwrap();
    assert_eq!(first.scan_txn, 0);
    table.commit(vec![Cell::new("row008", "f:z", 1, "late")], 0).unwrap();

    let second = scanner.scan(4, usize::MAX).unwrap();
    assert_eq!(second.scan_txn, 1);

    let mut out = first.cells;
    out.extend(second.cells);
    out.extend(drain(&mut scanner, 4));

    let mut expected = cells;
    expected.push(Cell::new("row008", "f:z", 1, "late"));
    assert_eq!(out, sorted(expected));
}

#[test]
fn test_scan_txn_reports_commits_before_open() {
    let cells = table_cells(3);
    let table = load_table(&[], &cells, Config::default());
    table.commit(vec![Cell::new("row000", "f:z", 1, "x")], 0).unwrap();
    table.commit(vec![Cell::new("row001", "f:z", 1, "y")], 1).unwrap();

    let mut scanner = scanner(&table, ScanPredicate::new(), ScanMode::AnyTxn);
    let batch = scanner.scan(100, usize::MAX).unwrap();
    assert_eq!(batch.scan_txn, 2);
    assert_eq!(scanner.scan_transaction(), 2);
    assert_eq!(batch.cells.len(), cells.len() + 2);
}

#[test]
fn test_commit_overrides_older_value() {
    let cells = table_cells(3);
    let table = load_table(&[], &cells, Config::default());
    table.commit(vec![Cell::new("row001", "f:a", 2, "rewritten")], 0).unwrap();
    table.commit(vec![Cell::erasure("row002", "f:b", 1)], 1).unwrap();

    let mut scanner = scanner(&table, ScanPredicate::new(), ScanMode::AnyTxn);
    let out = drain(&mut scanner, 100);

    let rewritten = out
        .iter()
        .find(|c| c.key.row == "row001" && c.key.column == "f:a" && c.key.timestamp == 2)
        .unwrap();
    assert_eq!(rewritten.value().unwrap(), "rewritten");
    assert!(!out
        .iter()
        .any(|c| c.key.row == "row002" && c.key.column == "f:b" && c.key.timestamp == 1));
    assert_eq!(out.len(), cells.len() - 1);
}

// =============================================================================
// History and Column Tests
// =============================================================================

#[test]
fn test_max_history_across_batches() {
    let mut cells = Vec::new();
    for row in ["r0", "r1", "r2"] {
        for ts in 1..=5 {
            cells.push(Cell::new(row, "f:a", ts, format!("v{}", ts)));
        }
    }
    let table = load_table(&[], &cells, Config::default());
    let predicate = ScanPredicate::new().with_max_history(2);

    for page in [1, 2, 100] {
        let mut scanner = scanner(&table, predicate.clone(), ScanMode::AnyTxn);
        let out = drain(&mut scanner, page);
        let versions: Vec<(&[u8], i64)> =
            out.iter().map(|c| (&c.key.row[..], c.key.timestamp)).collect();
        assert_eq!(
            versions,
            vec![
                (&b"r0"[..], 5),
                (&b"r0"[..], 4),
                (&b"r1"[..], 5),
                (&b"r1"[..], 4),
                (&b"r2"[..], 5),
                (&b"r2"[..], 4),
            ],
            "page size {}",
            page
        );
    }
}

#[test]
fn test_column_groups_scanned_together() {
    let schema = TableSchema::with_groups(
        "t",
        vec![
            ColumnGroup::new("small", ["info"]),
            ColumnGroup::new("big", ["blob"]),
        ],
    );
    let table = Table::new(schema, Config::default());
    let info = vec![Cell::new("a", "info:x", 1, "1"), Cell::new("c", "info:x", 1, "3")];
    let blob = vec![Cell::new("b", "blob:y", 1, "2")];
    table
        .load_tablet(
            RowRange::all(),
            vec![("small", vec![mem("s", info.clone())]), ("big", vec![mem("b", blob.clone())])],
        )
        .unwrap();
    let table = Arc::new(table);

    let mut all = scanner(&table, ScanPredicate::new(), ScanMode::AnyTxn);
    let mut expected = info.clone();
    expected.extend(blob);
    assert_eq!(drain(&mut all, 2), sorted(expected));

    let mut info_only = scanner(&table, ScanPredicate::new().with_families(["info"]), ScanMode::AnyTxn);
    assert_eq!(drain(&mut info_only, 2), info);
}

#[test]
fn test_unknown_family_rejected_on_open() {
    let schema = TableSchema::with_groups("t", vec![ColumnGroup::new("g", ["info"])]);
    let table = Arc::new(Table::new(schema, Config::default()));

    let result = Scanner::new(
        table,
        cache(),
        ScanPredicate::new().with_families(["nope"]),
        ScanMode::AnyTxn,
        &Config::default(),
    );
    assert!(matches!(result, Err(TabletError::UnknownColumnFamily(_))));
}

#[test]
fn test_dropped_scanner_stops_listening() {
    let cells = table_cells(10);
    let table = load_table(&[], &cells, Config::default());
    {
        let mut scanner = scanner(&table, ScanPredicate::new(), ScanMode::AnyTxn);
        scanner.scan(3, usize::MAX).unwrap();
    }
    // Structural changes after the scanner is gone reach nobody
    table.split_tablet(b"row005").unwrap();
    table.drop_tablet(b"row000").unwrap();
    assert_eq!(table.tablet_count(), 1);
}

// =============================================================================
// Scanner Manager Tests
// =============================================================================

fn manager(config: Config) -> ScannerManager {
    ScannerManager::new(config, cache())
}

#[test]
fn test_manager_open_scan_close() {
    let config = Config::builder().default_max_cells(5).build();
    let table = load_table(&[], &table_cells(10), Config::default());
    let manager = manager(config);

    let id = manager.open(Arc::clone(&table), ScanPredicate::new(), ScanMode::AnyTxn).unwrap();
    assert_eq!(manager.len(), 1);

    let batch = manager.scan(id, None, None).unwrap();
    assert_eq!(batch.cells.len(), 5);
    let batch = manager.scan(id, Some(2), None).unwrap();
    assert_eq!(batch.cells.len(), 2);

    assert!(manager.close(id));
    assert!(!manager.close(id));
    assert!(manager.is_empty());
    assert!(matches!(manager.scan(id, None, None), Err(TabletError::UnknownScanner(i)) if i == id));
}

#[test]
fn test_manager_ids_are_unique() {
    let table = load_table(&[], &table_cells(1), Config::default());
    let manager = manager(Config::default());

    let a = manager.open(Arc::clone(&table), ScanPredicate::new(), ScanMode::AnyTxn).unwrap();
    let b = manager.open(Arc::clone(&table), ScanPredicate::new(), ScanMode::LatestTxn).unwrap();
    assert_ne!(a, b);
    assert_eq!(manager.get(b).unwrap().lock().mode(), ScanMode::LatestTxn);
}

#[test]
fn test_manager_rejects_bad_open() {
    let schema = TableSchema::with_groups("t", vec![ColumnGroup::new("g", ["info"])]);
    let table = Arc::new(Table::new(schema, Config::default()));
    let manager = manager(Config::default());

    let mode: ScanMode = "latest_txn".parse().unwrap();
    let result = manager.open(table, ScanPredicate::new().with_families(["x"]), mode);
    assert!(matches!(result, Err(TabletError::UnknownColumnFamily(_))));
    assert!(manager.is_empty());
    assert!(matches!("snapshot".parse::<ScanMode>(), Err(TabletError::BadScanMode(_))));
}

#[test]
fn test_reap_idle_scanners() {
    let config = Config::builder().scanner_idle_timeout_ms(1_000).build();
    let table = load_table(&[], &table_cells(5), Config::default());
    let manager = manager(config);

    let a = manager.open(Arc::clone(&table), ScanPredicate::new(), ScanMode::AnyTxn).unwrap();
    manager.open(Arc::clone(&table), ScanPredicate::new(), ScanMode::AnyTxn).unwrap();

    assert_eq!(manager.reap_idle(), 0);
    assert_eq!(manager.len(), 2);

    // A scanner in use is never reaped
    let busy = manager.get(a).unwrap();
    let guard = busy.lock();
    let later = Instant::now() + Duration::from_millis(1_001);
    assert_eq!(manager.reap_idle_at(later), 1);
    drop(guard);

    assert_eq!(manager.reap_idle_at(later), 1);
    assert!(manager.is_empty());
}

#[test]
fn test_closed_scanner_releases_pins() {
    let cells = table_cells(20);
    let table = load_table(&[], &cells, Config::default());
    let cache = cache();
    let manager = ScannerManager::new(Config::default(), Arc::clone(&cache));

    let id = manager.open(Arc::clone(&table), ScanPredicate::new(), ScanMode::AnyTxn).unwrap();
    manager.scan(id, Some(3), None).unwrap();
    assert!(cache.pin_count("t0-new", 0) + cache.pin_count("t0-old", 0) > 0);

    manager.close(id);
    for block in 0..10 {
        assert_eq!(cache.pin_count("t0-new", block), 0);
        assert_eq!(cache.pin_count("t0-old", block), 0);
    }
}
