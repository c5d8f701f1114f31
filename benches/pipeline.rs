//! Pipeline Benchmarks
//!
//! Full host-backend runs: directory read → invert → directory write.
//!
//! Run with: cargo bench --bench pipeline

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use hologram_pipeline::{
    run_job, DataAccess, DataItem, DataSource, ExecutionMode, HostBackend, JobSpec, MergedConfig, ProgramItem,
};
use std::fs;
use tempfile::TempDir;

const FRAMES: usize = 16;

fn setup(frame_size: usize) -> (TempDir, JobSpec) {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("input");
    let output = dir.path().join("output");
    fs::create_dir(&input).unwrap();
    fs::create_dir(&output).unwrap();
    for k in 0..FRAMES {
        let data: Vec<u8> = (0..frame_size).map(|i| ((i + k) % 256) as u8).collect();
        fs::write(input.join(format!("frame{:04}.bin", k)), data).unwrap();
    }
    let kernel = dir.path().join("invert.wgsl");
    fs::write(&kernel, "").unwrap();

    let job = JobSpec::new(FRAMES)
        .with_data(DataItem::backed(
            "frames",
            DataSource::Directory,
            DataAccess::Read,
            &input,
            frame_size as u64,
        ))
        .with_data(DataItem::backed(
            "inverted",
            DataSource::Directory,
            DataAccess::Write,
            &output,
            frame_size as u64,
        ))
        .with_program(ProgramItem::new("invert", kernel, [1, 1, 1]));
    (dir, job)
}

/// Benchmark whole runs across frame sizes
fn benchmark_streaming(c: &mut Criterion) {
    let mut group = c.benchmark_group("streaming");
    group.sample_size(20);

    let sizes = vec![(4 * 1024, "4KB"), (64 * 1024, "64KB"), (1024 * 1024, "1MB")];
    let settings = MergedConfig::default();

    for (size, label) in sizes {
        group.throughput(Throughput::Bytes((size * FRAMES) as u64));
        let (_dir, job) = setup(size);

        group.bench_with_input(BenchmarkId::from_parameter(label), &job, |b, job| {
            b.iter(|| {
                let mut backend = HostBackend::new();
                let report = run_job(job, &mut backend, &settings).unwrap();
                black_box(report);
            });
        });
    }

    group.finish();
}

/// Benchmark immediate vs deferred host execution
fn benchmark_execution_modes(c: &mut Criterion) {
    let mut group = c.benchmark_group("execution_modes");
    group.sample_size(20);

    let (_dir, job) = setup(64 * 1024);
    let settings = MergedConfig::default();

    for (mode, label) in [(ExecutionMode::Immediate, "immediate"), (ExecutionMode::Deferred, "deferred")] {
        group.bench_function(label, |b| {
            b.iter(|| {
                let mut backend = HostBackend::new().with_mode(mode);
                black_box(run_job(&job, &mut backend, &settings).unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_streaming, benchmark_execution_modes);
criterion_main!(benches);
