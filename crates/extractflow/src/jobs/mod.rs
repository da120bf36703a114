pub mod error_codes;
pub mod memory;
pub mod model;
pub mod repo;
pub mod retry;
pub mod store;

pub use memory::InMemoryJobStore;
pub use model::{Job, JobFailure, JobStatus, JobView, NewJob, TransitionFields};
pub use repo::JobsRepo;
pub use store::{JobStore, StoreError};
