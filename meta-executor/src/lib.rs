//! Permit-based Executor: admission, worker lifecycle, pause/resume/stop,
//! quota revocation, and graceful shutdown.

mod executor;
mod quota;

pub use executor::PermitExecutor;
pub use quota::{LocalQuotaSource, QuotaSource};
