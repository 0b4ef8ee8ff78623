use chrono::{Duration, TimeZone, Utc};
use krusty_farm::clock::{Clock, ManualClock};
use krusty_farm::optimizer::{DEFAULT_TIME_HORIZON_HOURS, FarmOptimizer, OptimizationGoal};
use krusty_farm::print_job::PrintJob;
use krusty_farm::printer::{BuildVolume, PrinterCapability, PrinterProfile};
use std::sync::Arc;

const ALL_GOALS: [OptimizationGoal; 4] = [
    OptimizationGoal::MinimizeTime,
    OptimizationGoal::MinimizeCost,
    OptimizationGoal::MaximizeUtilization,
    OptimizationGoal::Balanced,
];

fn horizon() -> Duration {
    Duration::hours(DEFAULT_TIME_HORIZON_HOURS)
}

fn fixed_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap()))
}

fn p1() -> PrinterProfile {
    PrinterProfile::new("P1", "generic").with_build_volume(256.0, 256.0, 256.0).with_materials(["pla"])
}

fn job(id: &str, x: f64, y: f64, z: f64) -> PrintJob {
    PrintJob::new(id, BuildVolume::new(x, y, z)).with_id(id)
}

#[tokio::test]
async fn test_single_job_lands_on_only_printer_now() {
    let clock = fixed_clock();
    let optimizer = FarmOptimizer::with_clock(clock.clone());
    optimizer.register_printer(p1()).await;

    let j1 = job("J1", 50.0, 50.0, 50.0).with_material("pla").with_priority(5);
    let result = optimizer.optimize(&[j1], OptimizationGoal::MinimizeTime, horizon()).await;

    assert_eq!(result.assignments.len(), 1);
    let assignment = &result.assignments[0];
    assert_eq!(assignment.printer_id, "P1");
    assert_eq!(assignment.start_time, clock.now());
    assert!(assignment.end_time > assignment.start_time);
    assert!(result.unassigned_jobs.is_empty());
    assert_eq!(result.optimization_goal, OptimizationGoal::MinimizeTime);
}

#[tokio::test]
async fn test_oversize_job_is_never_assigned() {
    let optimizer = FarmOptimizer::with_clock(fixed_clock());
    optimizer.register_printer(p1()).await;
    optimizer
        .register_printer(PrinterProfile::new("P2", "tall").with_build_volume(200.0, 200.0, 400.0))
        .await;

    let j2 = job("J2", 300.0, 50.0, 50.0);
    assert!(optimizer.find_compatible_printers(&j2).await.is_empty());
    for goal in ALL_GOALS {
        let result = optimizer.optimize(std::slice::from_ref(&j2), goal, horizon()).await;
        assert!(result.assignments.is_empty());
        assert_eq!(result.unassigned_jobs, vec!["J2".to_string()]);
    }

    // A job that only fits the tall printer is never placed on P1.
    let tall = job("tall", 100.0, 100.0, 300.0);
    let compatible: Vec<String> = optimizer
        .find_compatible_printers(&tall)
        .await
        .into_iter()
        .map(|p| p.printer_id)
        .collect();
    assert_eq!(compatible, vec!["P2".to_string()]);
}

#[tokio::test]
async fn test_unsupported_material_unassigned_for_every_goal() {
    let optimizer = FarmOptimizer::with_clock(fixed_clock());
    optimizer.register_printer(p1()).await;
    optimizer
        .register_printer(PrinterProfile::new("P2", "generic").with_materials(["petg", "abs"]))
        .await;

    let nylon = job("nylon", 20.0, 20.0, 20.0).with_material("pa12");
    let fits = job("fits", 20.0, 20.0, 20.0).with_material("pla");
    for goal in ALL_GOALS {
        let result = optimizer.optimize(&[nylon.clone(), fits.clone()], goal, horizon()).await;
        assert_eq!(result.unassigned_jobs, vec!["nylon".to_string()], "goal {}", goal);
        assert_eq!(result.assignments.len(), 1);
    }
}

#[tokio::test]
async fn test_missing_capability_excludes_printer() {
    let optimizer = FarmOptimizer::with_clock(fixed_clock());
    optimizer.register_printer(p1()).await;
    optimizer
        .register_printer(p1_named("P2").with_capability(PrinterCapability::MultiColor))
        .await;

    let multi = job("multi", 20.0, 20.0, 20.0).with_capability(PrinterCapability::MultiColor);
    let result = optimizer.optimize(&[multi], OptimizationGoal::Balanced, horizon()).await;
    assert_eq!(result.assignments[0].printer_id, "P2");
}

fn p1_named(id: &str) -> PrinterProfile {
    PrinterProfile { printer_id: id.to_string(), name: id.to_string(), ..p1() }
}

#[tokio::test]
async fn test_arrival_order_wins_ties_under_minimize_time() {
    let optimizer = FarmOptimizer::with_clock(fixed_clock());
    optimizer.register_printer(p1()).await;

    let first = job("first", 40.0, 40.0, 40.0);
    let second = job("second", 40.0, 40.0, 40.0);
    let result = optimizer
        .optimize(&[first, second], OptimizationGoal::MinimizeTime, horizon())
        .await;

    let a = result.assignment_for("first").unwrap();
    let b = result.assignment_for("second").unwrap();
    assert!(a.score <= b.score);
    assert_eq!(b.start_time, a.end_time);
}

#[tokio::test]
async fn test_priority_then_deadline_ordering() {
    let clock = fixed_clock();
    let optimizer = FarmOptimizer::with_clock(clock.clone());
    optimizer.register_printer(p1()).await;
    let now = clock.now();

    let low = job("low", 40.0, 40.0, 40.0).with_priority(1);
    let late = job("late", 40.0, 40.0, 40.0).with_priority(5).with_deadline(now + Duration::hours(72));
    let soon = job("soon", 40.0, 40.0, 40.0).with_priority(5).with_deadline(now + Duration::hours(10));
    let result = optimizer
        .optimize(&[low, late, soon], OptimizationGoal::MinimizeTime, horizon())
        .await;

    let order: Vec<&str> = result.assignments.iter().map(|a| a.job_id.as_str()).collect();
    assert_eq!(order, vec!["soon", "late", "low"]);
}

#[tokio::test]
async fn test_later_jobs_see_earlier_assignments() {
    let optimizer = FarmOptimizer::with_clock(fixed_clock());
    optimizer.register_printer(p1()).await;
    optimizer.register_printer(p1_named("P2")).await;

    let jobs: Vec<PrintJob> = (0..4).map(|i| job(&format!("j{}", i), 60.0, 60.0, 60.0)).collect();
    let result = optimizer.optimize(&jobs, OptimizationGoal::MinimizeTime, horizon()).await;

    let on_p1 = result.assignments.iter().filter(|a| a.printer_id == "P1").count();
    let on_p2 = result.assignments.iter().filter(|a| a.printer_id == "P2").count();
    assert_eq!((on_p1, on_p2), (2, 2));
    for printer in ["P1", "P2"] {
        let mut slots: Vec<_> = result.assignments.iter().filter(|a| a.printer_id == printer).collect();
        slots.sort_by_key(|a| a.start_time);
        assert!(slots[0].end_time <= slots[1].start_time);
    }
    assert!(result.utilization_percent > 99.0);
}

#[tokio::test]
async fn test_minimize_cost_prefers_cheaper_printer() {
    let optimizer = FarmOptimizer::with_clock(fixed_clock());
    optimizer.register_printer(p1().with_costs(10.0, 1.0)).await;
    optimizer.register_printer(p1_named("cheap").with_costs(2.0, 1.0)).await;

    let result = optimizer
        .optimize(&[job("j", 50.0, 50.0, 50.0)], OptimizationGoal::MinimizeCost, horizon())
        .await;
    assert_eq!(result.assignments[0].printer_id, "cheap");
    assert!(result.total_cost > 0.0);
}

#[tokio::test]
async fn test_busy_printer_starts_when_free() {
    let clock = fixed_clock();
    let optimizer = FarmOptimizer::with_clock(clock.clone());
    optimizer.register_printer(p1()).await;
    let busy_until = clock.now() + Duration::hours(3);
    assert!(optimizer.reserve("P1", busy_until).await);
    // Reservations never move backwards.
    assert!(optimizer.reserve("P1", busy_until - Duration::hours(1)).await);
    assert_eq!(optimizer.get_printer("P1").await.unwrap().estimated_free_at, Some(busy_until));

    let result = optimizer
        .optimize(&[job("j", 10.0, 10.0, 10.0)], OptimizationGoal::Balanced, horizon())
        .await;
    assert_eq!(result.assignments[0].start_time, busy_until);

    // A horizon shorter than the wait does not drop the job.
    let short = optimizer
        .optimize(&[job("k", 10.0, 10.0, 10.0)], OptimizationGoal::Balanced, Duration::hours(1))
        .await;
    assert!(short.unassigned_jobs.is_empty());
    assert_eq!(short.assignments[0].start_time, busy_until);
}

#[tokio::test]
async fn test_compatible_jobs_assigned_past_horizon() {
    let optimizer = FarmOptimizer::with_clock(fixed_clock());
    optimizer.register_printer(p1()).await;
    let jobs: Vec<PrintJob> = (0..45).map(|i| job(&format!("big-{}", i), 250.0, 250.0, 250.0)).collect();

    for goal in ALL_GOALS {
        let result = optimizer.optimize(&jobs, goal, horizon()).await;
        assert_eq!(result.assignments.len(), 45, "goal {}", goal);
        assert!(result.unassigned_jobs.is_empty());
        let last = result.assignments.iter().map(|a| a.start_time).max().unwrap();
        assert!(last > fixed_clock().now() + horizon());
    }
}

#[tokio::test]
async fn test_unavailable_and_maintenance_printers_excluded() {
    let optimizer = FarmOptimizer::with_clock(fixed_clock());
    optimizer.register_printer(p1()).await;
    optimizer.register_printer(p1_named("P2")).await;
    optimizer.register_printer(p1_named("P3")).await;

    assert!(optimizer.set_availability("P1", false).await);
    assert!(optimizer.set_maintenance_due("P2", true).await);
    assert!(!optimizer.set_availability("ghost", false).await);

    let ids: Vec<String> = optimizer.available_printers().await.into_iter().map(|p| p.printer_id).collect();
    assert_eq!(ids, vec!["P3".to_string()]);
    let result = optimizer
        .optimize(&[job("j", 10.0, 10.0, 10.0)], OptimizationGoal::Balanced, horizon())
        .await;
    assert_eq!(result.assignments[0].printer_id, "P3");
}

#[tokio::test]
async fn test_remove_unknown_printer_is_noop() {
    let optimizer = FarmOptimizer::with_clock(fixed_clock());
    optimizer.register_printer(p1()).await;
    assert!(optimizer.remove_printer("ghost").await.is_none());
    assert!(optimizer.remove_printer("P1").await.is_some());
    assert_eq!(optimizer.printer_count().await, 0);
}

#[tokio::test]
async fn test_rebalance_identifies_candidates_only() {
    let clock = fixed_clock();
    let optimizer = FarmOptimizer::with_clock(clock.clone());
    let now = clock.now();
    for id in ["a", "b", "c", "d"] {
        optimizer.register_printer(p1_named(id)).await;
    }
    optimizer.reserve("a", now + Duration::hours(20)).await;
    optimizer.reserve("b", now + Duration::hours(4)).await;
    optimizer.reserve("c", now + Duration::hours(4)).await;

    let candidates = optimizer.rebalance(5).await;
    assert!((candidates.average_workload_hours - 7.0).abs() < 1e-6);
    assert_eq!(candidates.overloaded, vec!["a".to_string()]);
    assert_eq!(candidates.underloaded, vec!["d".to_string()]);
    assert!(candidates.migrations.is_empty());
}
