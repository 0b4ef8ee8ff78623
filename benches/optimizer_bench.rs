// Benchmark for job placement across a randomly generated fleet
// Run with: cargo bench

use chrono::Duration;
use criterion::{Criterion, criterion_group, criterion_main};
use krusty_farm::optimizer::{DEFAULT_TIME_HORIZON_HOURS, FarmOptimizer, OptimizationGoal};
use krusty_farm::print_job::PrintJob;
use krusty_farm::printer::{BuildVolume, PrinterCapability, PrinterProfile};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const MATERIALS: [&str; 4] = ["pla", "petg", "abs", "tpu"];

fn fleet(rng: &mut StdRng, size: usize) -> Vec<PrinterProfile> {
    (0..size)
        .map(|i| {
            let edge = rng.random_range(180.0..350.0);
            let materials: Vec<&str> = MATERIALS.iter().copied().filter(|_| rng.random_bool(0.6)).collect();
            let mut profile = PrinterProfile::new(format!("printer-{:03}", i), "bench")
                .with_build_volume(edge, edge, edge)
                .with_materials(materials)
                .with_speed(rng.random_range(60.0..300.0))
                .with_costs(rng.random_range(2.0..12.0), 1.0);
            if rng.random_bool(0.3) {
                profile = profile.with_capability(PrinterCapability::MultiColor);
            }
            profile
        })
        .collect()
}

fn jobs(rng: &mut StdRng, count: usize) -> Vec<PrintJob> {
    (0..count)
        .map(|i| {
            let size = BuildVolume::new(
                rng.random_range(10.0..250.0),
                rng.random_range(10.0..250.0),
                rng.random_range(5.0..200.0),
            );
            let mut job = PrintJob::new(format!("job-{}", i), size)
                .with_material(MATERIALS[rng.random_range(0..MATERIALS.len())])
                .with_priority(rng.random_range(0..10));
            if rng.random_bool(0.1) {
                job = job.with_capability(PrinterCapability::MultiColor);
            }
            job
        })
        .collect()
}

fn bench_optimize(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut rng = StdRng::seed_from_u64(42);
    let optimizer = FarmOptimizer::new();
    rt.block_on(async {
        for profile in fleet(&mut rng, 50) {
            optimizer.register_printer(profile).await;
        }
    });
    let batch = jobs(&mut rng, 500);
    let horizon = Duration::hours(DEFAULT_TIME_HORIZON_HOURS);

    for goal in [OptimizationGoal::MinimizeTime, OptimizationGoal::Balanced] {
        c.bench_function(&format!("optimize 500 jobs on 50 printers ({})", goal), |b| {
            b.iter(|| {
                rt.block_on(async {
                    let result = optimizer.optimize(&batch, goal, horizon).await;
                    assert_eq!(result.assignments.len() + result.unassigned_jobs.len(), 500);
                });
            });
        });
    }
}

fn bench_rebalance(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut rng = StdRng::seed_from_u64(7);
    let optimizer = FarmOptimizer::new();
    rt.block_on(async {
        for profile in fleet(&mut rng, 200) {
            let id = profile.printer_id.clone();
            optimizer.register_printer(profile).await;
            let hours = rng.random_range(0..48);
            optimizer.reserve(&id, chrono::Utc::now() + Duration::hours(hours)).await;
        }
    });
    c.bench_function("rebalance 200 printers", |b| {
        b.iter(|| rt.block_on(optimizer.rebalance(10)));
    });
}

criterion_group!(benches, bench_optimize, bench_rebalance);
criterion_main!(benches);
