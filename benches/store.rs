//! Benchmarks for record storage operations.
//!
//! Run with: cargo bench --bench store

use chrono::{TimeDelta, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use trickled::messages::{BatchId, ScheduleId, ScheduleMessage, SmsPayload};
use trickled::schedule::ScheduledMessage;
use trickled::store::{MemoryStorage, Storage};

fn create_schedule(seq: u32) -> ScheduledMessage {
    let now = Utc::now();
    let cmd = ScheduleMessage {
        schedule_id: ScheduleId::new(),
        batch_id: BatchId::new(),
        payload: SmsPayload {
            target_address: format!("+2588{:08}", seq),
            body: format!("Test message {}", seq),
            metadata: Default::default(),
        },
        send_at_utc: now + TimeDelta::seconds(seq as i64),
    };
    ScheduledMessage::create(&cmd, now).0
}

fn bench_save_new(c: &mut Criterion) {
    let store = MemoryStorage::new();

    c.bench_function("store/save_new_schedule", |b| {
        let mut seq = 0;
        b.iter(|| {
            seq += 1;
            let schedule = create_schedule(seq);
            black_box(store.save_schedule(&schedule, None))
        })
    });
}

fn bench_load_save_cycle(c: &mut Criterion) {
    let store = MemoryStorage::new();
    let schedule = create_schedule(1);
    store.save_schedule(&schedule, None).unwrap();

    c.bench_function("store/load_save_cycle", |b| {
        b.iter(|| {
            let loaded = store.load_schedule(schedule.schedule_id).unwrap().unwrap();
            black_box(store.save_schedule(&loaded.record, Some(loaded.version)))
        })
    });
}

fn bench_armed_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("store/armed_schedules");

    for total in [1_000u32, 10_000].iter() {
        let store = MemoryStorage::new();
        for i in 0..*total {
            let mut schedule = create_schedule(i);
            schedule.paused = i % 4 == 0;
            schedule.terminal = i % 4 == 1;
            store.save_schedule(&schedule, None).unwrap();
        }

        group.bench_with_input(BenchmarkId::from_parameter(total), total, |b, _| {
            b.iter(|| black_box(store.armed_schedules()))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_save_new, bench_load_save_cycle, bench_armed_scan);
criterion_main!(benches);
