mod steps;
mod world;

pub use world::{LedgerWorld, TestSystem};
