use criterion::{Criterion, black_box, criterion_group, criterion_main};
use rand::Rng;

use price_scout::pricing::UnitKind;
use price_scout::{ObservationDraft, PriceObservation, compare, compare_unit_price, detect_anomaly};

fn synthetic_history(n: usize) -> Vec<PriceObservation> {
    let mut rng = rand::thread_rng();
    (0..n)
        .map(|i| {
            let draft = ObservationDraft {
                barcode: Some("4710000000001".to_string()),
                product_name: "Fresh Milk".to_string(),
                store_name: Some(format!("store-{}", i % 7)),
                original_price: Some(rng.gen_range(60.0..120.0)),
                quantity: if rng.gen_bool(0.9) { Some(936.0) } else { None },
                unit_kind: UnitKind::Milliliters,
                ..Default::default()
            };
            PriceObservation::from_draft(&draft, "bench", i as u64)
        })
        .collect()
}

fn bench_compare(c: &mut Criterion) {
    let history = synthetic_history(1_000);
    let candidate = history[0].clone();
    c.bench_function("compare_total_1k", |b| b.iter(|| compare(black_box(&candidate), black_box(&history[1..]))));
    c.bench_function("compare_unit_1k", |b| {
        b.iter(|| compare_unit_price(black_box(&candidate), black_box(&history[1..]), black_box(&history[..10])))
    });
}

fn bench_anomaly(c: &mut Criterion) {
    let prices: Vec<f64> = synthetic_history(1_000).iter().map(|o| o.total_price).collect();
    c.bench_function("detect_anomaly_1k", |b| b.iter(|| detect_anomaly(black_box(150.0), black_box(&prices))));
}

criterion_group!(benches, bench_compare, bench_anomaly);
criterion_main!(benches);
