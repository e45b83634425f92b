use criterion::{Criterion, criterion_group, criterion_main};
use log_store::{
    AppendOptions, Fields, GroupStart, InMemoryLogStore, LogStore, ReadCursor, ReadGroup, Trim,
};

fn order_fields(order_id: u64) -> Fields {
    Fields::from([
        ("order_id".to_string(), order_id.to_string()),
        ("user_id".to_string(), "1".to_string()),
        ("total_amount".to_string(), "150000".to_string()),
        (
            "items".to_string(),
            r#"[{"product_id":7,"quantity":2}]"#.to_string(),
        ),
    ])
}

fn bench_append(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryLogStore::new();
    let mut order_id = 0;

    c.bench_function("log_store/append", |b| {
        b.iter(|| {
            order_id += 1;
            rt.block_on(async {
                store
                    .append("bench:append", &order_fields(order_id), AppendOptions::new())
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_append_capped(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryLogStore::new();
    let mut order_id = 0;

    c.bench_function("log_store/append_approx_capped_1000", |b| {
        b.iter(|| {
            order_id += 1;
            rt.block_on(async {
                store
                    .append(
                        "bench:capped",
                        &order_fields(order_id),
                        AppendOptions::capped(Trim::ApproxMaxLen(1000)),
                    )
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_read_and_ack_100(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("log_store/read_and_ack_100", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryLogStore::new();
                store
                    .create_group("bench:read", "bench-group", GroupStart::Beginning)
                    .await
                    .unwrap();
                for order_id in 0..100 {
                    store
                        .append("bench:read", &order_fields(order_id), AppendOptions::new())
                        .await
                        .unwrap();
                }
                let request = ReadGroup {
                    stream: "bench:read",
                    group: "bench-group",
                    consumer: "bench-worker-1",
                    count: 10,
                    block: None,
                };
                loop {
                    let entries = store.read_group(&request, ReadCursor::New).await.unwrap();
                    if entries.is_empty() {
                        break;
                    }
                    let ids: Vec<_> = entries.iter().map(|e| e.id).collect();
                    store.ack("bench:read", "bench-group", &ids).await.unwrap();
                }
            });
        });
    });
}

criterion_group!(
    benches,
    bench_append,
    bench_append_capped,
    bench_read_and_ack_100
);
criterion_main!(benches);
