//! JSON route vector loader shared by route tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::fs;

use aihub_core::BackendCategory;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct RouteVector {
    pub description: String,
    pub path: String,
    pub expect: BackendCategory,
}

pub fn load(name: &str) -> Vec<RouteVector> {
    let s = fs::read_to_string(format!("tests/vectors/{name}")).expect("missing vector file");
    serde_json::from_str(&s).expect("invalid vector json")
}
