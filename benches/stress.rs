use std::sync::Arc;
use std::time::{Duration, Instant};

use roombook::lifecycle::{LifecyclePolicy, LifecycleService};
use roombook::model::*;
use roombook::permission::PermissionResolver;
use roombook::store::InMemoryStore;
use roombook::sweeper::sweep_once;
use ulid::Ulid;

// 2026-01-01 10:00 UTC
const T0: Ms = 1_767_261_600_000;

type Service = LifecycleService<InMemoryStore>;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}us, p50={:.2}us, p95={:.2}us, p99={:.2}us, max={:.2}us",
        latencies.len(),
        avg.as_secs_f64() * 1e6,
        percentile(latencies, 50.0).as_secs_f64() * 1e6,
        percentile(latencies, 95.0).as_secs_f64() * 1e6,
        percentile(latencies, 99.0).as_secs_f64() * 1e6,
        latencies[latencies.len() - 1].as_secs_f64() * 1e6,
    );
}

fn service(store: InMemoryStore) -> Arc<Service> {
    Arc::new(LifecycleService::new(store, PermissionResolver::default(), LifecyclePolicy::default()))
}

/// One confirmed reservation per owner, each in its own room.
fn populate(svc: &Service, n: usize) -> Vec<(Actor, ReservationId)> {
    (0..n)
        .map(|i| {
            let owner = Actor::new(Ulid::new(), Role::Student);
            let start = T0 + (i as Ms) * HOUR;
            let req = NewReservation {
                room_id: Ulid::new(),
                title: format!("slot {i}"),
                span: Span::new(start, start + HOUR),
                requires_approval: false,
            };
            let r = svc.create(&owner, req, T0 - DAY).expect("populate");
            (owner, r.id)
        })
        .collect()
}

fn phase1_sequential_creates(n: usize) {
    let svc = service(InMemoryStore::new());
    let owner = Actor::new(Ulid::new(), Role::Student);
    let room = Ulid::new();
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();
    for i in 0..n {
        let s = T0 + (i as Ms) * HOUR;
        let req = NewReservation {
            room_id: room,
            title: "bench".into(),
            span: Span::new(s, s + HOUR),
            requires_approval: false,
        };
        let t = Instant::now();
        svc.create(&owner, req, T0 - DAY).expect("create");
        latencies.push(t.elapsed());
    }
    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} creates in {:.3}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("create latency", &mut latencies);
}

/// Owners check in while the system actor races to flag them.
fn phase2_check_in_vs_no_show(n: usize) {
    let svc = service(InMemoryStore::new());
    let slots = populate(&svc, n);

    let start = Instant::now();
    let owners = {
        let svc = svc.clone();
        let slots = slots.clone();
        std::thread::spawn(move || {
            let mut won = 0;
            let mut latencies = Vec::with_capacity(slots.len());
            for (i, (owner, id)) in slots.iter().enumerate() {
                let now = T0 + (i as Ms) * HOUR + 5 * MINUTE;
                let t = Instant::now();
                if svc.attempt(owner, *id, Action::CheckIn, now).is_ok() {
                    won += 1;
                }
                latencies.push(t.elapsed());
            }
            (won, latencies)
        })
    };
    let detector = {
        let svc = svc.clone();
        std::thread::spawn(move || {
            let system = Actor::system();
            let mut won = 0;
            for (i, (_, id)) in slots.iter().enumerate() {
                let now = T0 + (i as Ms) * HOUR + 5 * MINUTE;
                if svc.attempt(&system, *id, Action::DetectNoShow, now).is_ok() {
                    won += 1;
                }
            }
            won
        })
    };
    let (checked_in, mut latencies) = owners.join().expect("owner thread");
    let flagged = detector.join().expect("detector thread");
    let elapsed = start.elapsed();

    println!(
        "  {n} races in {:.3}s: {checked_in} check-ins, {flagged} no-shows",
        elapsed.as_secs_f64()
    );
    assert_eq!(checked_in + flagged, n, "every race must have exactly one winner");
    print_latency("check-in latency", &mut latencies);
}

fn phase3_sweep(n: usize) {
    let svc = service(InMemoryStore::new());
    populate(&svc, n);
    let t = Instant::now();
    let report = sweep_once(&svc, T0 + (n as Ms) * HOUR + HOUR);
    println!(
        "  sweep of {} live: {} no-shows, {} finished in {:.3}s",
        report.scanned,
        report.no_shows,
        report.finished,
        t.elapsed().as_secs_f64()
    );
}

fn phase4_durable_writes(n: usize) {
    let dir = std::env::temp_dir().join(format!("roombook_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).expect("bench dir");
    let path = dir.join("bench.wal");
    let store = InMemoryStore::open(&path).expect("open WAL");
    let svc = service(store);

    let slots = populate(&svc, n);
    let mut latencies = Vec::with_capacity(n);
    for (i, (owner, id)) in slots.iter().enumerate() {
        let now = T0 + (i as Ms) * HOUR;
        let t = Instant::now();
        svc.attempt(owner, *id, Action::CheckIn, now).expect("check in");
        latencies.push(t.elapsed());
    }
    print_latency("fsynced check-in latency", &mut latencies);

    let t = Instant::now();
    svc.store().compact().expect("compact");
    println!("  compaction of {n} rows in {:.3}s", t.elapsed().as_secs_f64());
    let _ = std::fs::remove_dir_all(&dir);
}

fn main() {
    let n: usize = std::env::var("ROOMBOOK_BENCH_N")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(5_000);

    println!("=== roombook stress benchmark ===");
    println!("n = {n}\n");

    println!("[phase 1] sequential creates");
    phase1_sequential_creates(n);

    println!("\n[phase 2] check-in racing no-show detection");
    phase2_check_in_vs_no_show(n);

    println!("\n[phase 3] scheduler sweep");
    phase3_sweep(n);

    println!("\n[phase 4] durable writes");
    phase4_durable_writes(n.min(1_000));

    println!("\n=== benchmark complete ===");
}
