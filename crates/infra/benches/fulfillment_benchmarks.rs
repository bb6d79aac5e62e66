use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;

use chrono::{Days, NaiveDate, Utc};

use rxflow_core::{BatchId, OrgId};
use rxflow_events::{EventBus, EventEnvelope, InMemoryEventBus};
use rxflow_infra::command_dispatcher::CommandDispatcher;
use rxflow_infra::event_store::InMemoryEventStore;
use rxflow_infra::fulfillment::FulfillmentService;
use rxflow_infra::projections::CatalogProjection;
use rxflow_orders::RequesterKind;
use rxflow_stock::{Batch, allocate};

type Bus = Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>>;

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn in_days(days: u64) -> NaiveDate {
    today().checked_add_days(Days::new(days)).unwrap()
}

fn make_batches(count: usize) -> Vec<Batch> {
    (0..count)
        .map(|i| Batch {
            batch_id: BatchId::new(),
            batch_number: format!("LOT-{i}"),
            manufacturing_date: today(),
            expiry_date: in_days(30 + (i as u64 * 7) % 365),
            quantity_on_hand: 100,
            unit_price: 10 + (i as u64 % 5),
            list_price: 60,
        })
        .collect()
}

/// Pure allocation cost over growing batch lists.
fn bench_allocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocation");

    for batch_count in [4usize, 32, 256] {
        let batches = make_batches(batch_count);
        // Draw across roughly half the batches.
        let requested = (batch_count as i64) * 50;

        group.throughput(Throughput::Elements(batch_count as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_count),
            &batches,
            |b, batches| {
                b.iter(|| {
                    allocate(black_box(batches), black_box(requested), today()).unwrap();
                });
            },
        );
    }

    group.finish();
}

/// End-to-end dispatch latency: place → request → allocate+commit → record.
fn bench_dispatch_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_pipeline");
    group.sample_size(100);

    group.bench_function("place_and_dispatch_order", |b| {
        let store = InMemoryEventStore::new();
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let subscription = bus.subscribe();
        let catalog = Arc::new(CatalogProjection::new());
        let dispatcher = CommandDispatcher::new(store, bus.clone());
        let service = FulfillmentService::new(dispatcher, catalog.clone());

        let vendor = OrgId::new();
        let medicine = service
            .register_medicine(vendor, "Amoxil", "Amoxicillin", 20, 80)
            .unwrap();
        service
            .register_batch(
                vendor,
                medicine,
                "LOT-0",
                1_000_000_000,
                20,
                80,
                today(),
                in_days(365),
            )
            .unwrap();

        // Feed the catalog synchronously (benchmarks run single-threaded),
        // then drop the subscription so the bus stops buffering for us.
        while let Ok(env) = subscription.try_recv() {
            let _ = catalog.apply_envelope(&env);
        }
        drop(subscription);

        b.iter(|| {
            let requester = OrgId::new();
            let order_id = service
                .place_order(
                    requester,
                    RequesterKind::Pharmacy,
                    black_box("Greenfield Pharmacy"),
                    medicine,
                    10,
                    in_days(14),
                )
                .unwrap();
            service.request_delivery(requester, order_id).unwrap();
            service.dispatch_order(requester, order_id).unwrap();
        });
    });

    group.finish();
}

criterion_group!(benches, bench_allocation, bench_dispatch_pipeline);
criterion_main!(benches);
