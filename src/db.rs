pub mod error;
pub mod models;
pub mod observation_repository;
pub mod pool;

pub use error::StoreError;
pub use models::*;
pub use observation_repository::{
    MonthGroup, ObservationFilter, ObservationRepository, UpsertFailure, UpsertStats, YearScope,
};
pub use pool::DbPool;
