//! Storage backend benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use segidx_storage::{FileBackend, FileConfig, InMemoryBackend, SideTable, StorageBackend};
use tempfile::TempDir;

/// A 10-byte list row pointing at side row 1.
const LIST_ROW: [u8; 10] = [0, 0, 0, 0, 0, 2, 0, 0, 0, 1];

/// Writes `rows` index rows in one transaction.
fn write_rows<B: StorageBackend>(backend: &mut B, rows: u32) {
    backend.begin_transaction().unwrap();
    for segment in 0..rows {
        backend
            .put_row("bench/colour", b"red", segment, black_box(&LIST_ROW))
            .unwrap();
    }
    backend.commit().unwrap();
}

/// Benchmark InMemoryBackend transactions.
fn bench_inmemory_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("inmemory_commit");

    for rows in [1u32, 100, 1000].iter() {
        group.throughput(Throughput::Elements(u64::from(*rows)));
        group.bench_with_input(BenchmarkId::from_parameter(rows), rows, |b, &rows| {
            let mut backend = InMemoryBackend::new();
            b.iter(|| write_rows(&mut backend, rows));
        });
    }

    group.finish();
}

/// Benchmark FileBackend commits, with and without sync.
fn bench_file_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_commit");

    // Use smaller sample size for file operations
    group.sample_size(20);

    for sync in [false, true] {
        for rows in [1u32, 100].iter() {
            let id = BenchmarkId::new(if sync { "sync" } else { "nosync" }, rows);
            group.bench_with_input(id, rows, |b, &rows| {
                let temp_dir = TempDir::new().unwrap();
                let path = temp_dir.path().join("bench.sgj");
                let mut backend =
                    FileBackend::open_with_config(&path, FileConfig::default().sync_on_commit(sync))
                        .unwrap();
                b.iter(|| write_rows(&mut backend, rows));
            });
        }
    }

    group.finish();
}

/// Benchmark side-table allocation and recycling.
fn bench_side_table(c: &mut Criterion) {
    let mut group = c.benchmark_group("side_table");
    let bits = vec![0xA5u8; 4096];

    group.bench_function("put_delete_4kb", |b| {
        let mut backend = InMemoryBackend::new();
        b.iter(|| {
            backend.begin_transaction().unwrap();
            let id = backend
                .put_side_table(SideTable::Bits, None, black_box(&bits))
                .unwrap();
            backend.delete_side_table(SideTable::Bits, id).unwrap();
            backend.commit().unwrap();
        });
    });

    group.finish();
}

/// Benchmark replaying a journal on open.
fn bench_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay");
    group.sample_size(10);

    for commits in [100u32, 1000].iter() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bench.sgj");
        {
            let mut backend =
                FileBackend::open_with_config(&path, FileConfig::default().sync_on_commit(false))
                    .unwrap();
            for _ in 0..*commits {
                write_rows(&mut backend, 10);
            }
        }

        group.throughput(Throughput::Elements(u64::from(*commits)));
        group.bench_with_input(BenchmarkId::from_parameter(commits), &path, |b, path| {
            b.iter(|| black_box(FileBackend::open(path).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_inmemory_commit,
    bench_file_commit,
    bench_side_table,
    bench_replay,
);

criterion_main!(benches);
