pub mod directory;
pub mod likes;

use thiserror::Error;

pub use directory::{PgDirectory, UserDirectory, VideoCatalog};
pub use likes::{transition, ApplyOutcome, LikeStore, PgLikeStore, StoreReconcile};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
