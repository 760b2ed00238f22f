//! Test data generation for benchmarks.
//!
//! Generators are seeded so every run measures the same data.

use std::sync::Arc;

use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use recset_core::{Column, Header, MemoryIndex, MemorySource, Provider};
use recset_tuple::{FieldType, PackedTuple, Tuple, Value, ValueType};

const SEED: u64 = 701;

/// Scale factor for benchmark data generation.
#[derive(Clone, Copy, Debug)]
pub enum Scale {
    /// ~100 users, for quick iteration.
    Small,
    /// ~2,000 users.
    Medium,
    /// ~20,000 users.
    Large,
}

impl Scale {
    /// Number of users at this scale.
    pub fn users(&self) -> usize {
        match self {
            Scale::Small => 100,
            Scale::Medium => 2_000,
            Scale::Large => 20_000,
        }
    }

    /// Orders per user at this scale.
    pub fn orders_per_user(&self) -> usize {
        match self {
            Scale::Small => 3,
            Scale::Medium => 5,
            Scale::Large => 5,
        }
    }
}

fn users_header() -> Header {
    Header::new(vec![
        Column::new("id", FieldType::scalar(ValueType::Int32)),
        Column::new("name", FieldType::scalar(ValueType::Str)),
        Column::new("age", FieldType::optional(ValueType::Int32)),
    ])
}

fn user_rows(scale: Scale) -> Vec<PackedTuple> {
    let header = users_header();
    let mut rng = StdRng::seed_from_u64(SEED);
    let mut rows: Vec<PackedTuple> = (0..scale.users() as i32)
        .map(|id| {
            let name: String = (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(8)
                .map(char::from)
                .collect();
            let age = if rng.gen_bool(0.9) {
                Some(Value::Int32(rng.gen_range(18..90)))
            } else {
                None
            };
            let mut row = PackedTuple::new(header.descriptor().clone());
            row.set(0, Some(Value::Int32(id))).unwrap();
            row.set(1, Some(Value::Str(name.into()))).unwrap();
            row.set(2, age).unwrap();
            row
        })
        .collect();
    rows.shuffle(&mut rng);
    rows
}

/// Users behind an index ordered by id.
pub fn users_index(scale: Scale) -> Arc<Provider> {
    let index = MemoryIndex::new(users_header(), 0, user_rows(scale)).unwrap();
    Arc::new(Provider::index_scan("users", index.into_source()))
}

/// Users behind a plain unordered scan.
pub fn users_scan(scale: Scale) -> Arc<Provider> {
    let source = MemorySource::new(users_header(), user_rows(scale)).unwrap();
    Arc::new(Provider::scan("users", source.into_source()))
}

fn orders_header() -> Header {
    Header::new(vec![
        Column::new("order_id", FieldType::scalar(ValueType::Int32)),
        Column::new("user_id", FieldType::scalar(ValueType::Int32)),
        Column::new("total", FieldType::scalar(ValueType::Int64)),
    ])
}

/// Orders behind an index ordered by user id.
pub fn orders_index(scale: Scale) -> Arc<Provider> {
    let header = orders_header();
    let mut rng = StdRng::seed_from_u64(SEED + 1);
    let per_user = scale.orders_per_user();
    let mut rows: Vec<PackedTuple> = (0..scale.users() as i32)
        .flat_map(|user| {
            let rng = &mut rng;
            (0..per_user as i32)
                .map(|offset| {
                    let mut row = PackedTuple::new(header.descriptor().clone());
                    row.set(0, Some(Value::Int32(user * 100 + offset))).unwrap();
                    row.set(1, Some(Value::Int32(user))).unwrap();
                    row.set(2, Some(Value::Int64(rng.gen_range(1..10_000))))
                        .unwrap();
                    row
                })
                .collect::<Vec<_>>()
        })
        .collect();
    rows.shuffle(&mut rng);
    let index = MemoryIndex::new(header, 1, rows).unwrap();
    Arc::new(Provider::index_scan("orders", index.into_source()))
}
