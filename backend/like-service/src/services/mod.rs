pub mod like_coordinator;
pub mod like_queries;
pub mod reconciliation;

pub use like_coordinator::LikeCoordinator;
pub use like_queries::LikeQueries;
pub use reconciliation::Reconciler;
