#[macro_use]
extern crate criterion;

extern crate fairrec;
extern crate rand;
extern crate rand_xorshift;

use criterion::Criterion;
use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;

use fairrec::data::{Interaction, Interactions};
use fairrec::evaluation::{Evaluator, Rankings};
use fairrec::groups::ItemGroup;
use fairrec::models::factorization::Hyperparameters;
use fairrec::models::ProtectedAttribute;
use fairrec::rerank::{rerank, XQuadParameters};
use fairrec::RankingModel;

const NUM_USERS: usize = 500;
const NUM_ITEMS: usize = 1000;

fn synthetic(num_interactions: usize) -> Interactions {
    let mut rng = XorShiftRng::seed_from_u64(42);

    let interactions = (0..num_interactions)
        .map(|timestamp| {
            let user_id = rng.gen_range(0..NUM_USERS);
            // Skewed towards low item ids.
            let item_id = (rng.gen::<f32>().powi(3) * NUM_ITEMS as f32) as usize;

            Interaction::new(user_id, item_id.min(NUM_ITEMS - 1), 1.0, timestamp)
        })
        .collect();

    Interactions::from_parts(NUM_USERS, NUM_ITEMS, interactions)
}

fn groups() -> Vec<ItemGroup> {
    (0..NUM_ITEMS)
        .map(|item_id| {
            if item_id % 3 == 0 {
                ItemGroup::Minority
            } else {
                ItemGroup::Majority
            }
        })
        .collect()
}

fn bench_fit(c: &mut Criterion) {
    let data = synthetic(10_000);

    c.bench_function("fit", |b| {
        let mut model = Hyperparameters::new()
            .embedding_dim(32)
            .num_negatives(4)
            .num_epochs(1)
            .build();

        b.iter(|| model.fit(&data).unwrap())
    });

    c.bench_function("fit_regularized", |b| {
        let mut model = Hyperparameters::new()
            .embedding_dim(32)
            .num_negatives(4)
            .num_epochs(1)
            .regularization_weight(0.5)
            .protected_attribute(ProtectedAttribute::Popularity)
            .build();

        b.iter(|| model.fit(&data).unwrap())
    });
}

fn bench_evaluate(c: &mut Criterion) {
    let data = synthetic(10_000);
    let mut model = Hyperparameters::new().embedding_dim(32).num_epochs(1).build();
    model.fit(&data).unwrap();
    let predictions = model.predict().unwrap().clone();

    let groups = groups();

    c.bench_function("evaluate", |b| {
        let evaluator = Evaluator::new(&data, &data, vec![5, 10, 20]).with_groups(groups.clone());

        b.iter(|| evaluator.evaluate(&predictions).unwrap())
    });

    c.bench_function("rerank", |b| {
        let rankings = Rankings::from_scores(&predictions, &data, 100).unwrap();
        let params = XQuadParameters::new().lambda(0.5).rmax(100);

        b.iter(|| rerank(&rankings, &groups, &data, &params).unwrap())
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = bench_fit, bench_evaluate
}
criterion_main!(benches);
