pub mod embeddings;
pub mod migrations;
pub mod pool;

pub use embeddings::PgEmbeddingStore;
pub use migrations::{MigrationError, run_migrations};
pub use pool::{DbPoolError, PgPool, create_pool_from_url};
