// Repository layer — each domain lives in its own file with `impl RelayRepository`.

use sqlx::sqlite::SqlitePool;

mod beams;
mod identities;
mod notes;

#[cfg(test)]
pub(crate) mod test_helpers;

#[derive(Clone)]
pub struct RelayRepository {
    pub(crate) pool: SqlitePool,
}

impl RelayRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}
