//! PostgreSQL persistence

pub mod audit;
pub mod ledger;
mod pool;
#[cfg(test)]
pub mod testing;

pub use ledger::PgLedger;
pub use pool::{create_pool, run_migrations};
