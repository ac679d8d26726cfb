use async_trait::async_trait;
use std::sync::Mutex;

/// Admits providers to run under a global concurrency budget.
///
/// A real deployment asks the supervising broker over RPC; `LocalQuotaSource`
/// is the in-process default used when the core runs standalone or in tests.
#[async_trait]
pub trait QuotaSource: Send + Sync {
    /// Ask for up to `requested` permits. Returns the number actually
    /// granted, which may be zero or less than requested but never more.
    async fn request(&self, provider_id: &str, requested: u32) -> u32;

    /// Return `n` permits to the pool. Idempotent: releasing more than is
    /// outstanding just saturates at the global cap, it never panics or
    /// goes negative.
    async fn release(&self, provider_id: &str, n: u32);

    /// Total permits currently granted across every provider, for
    /// conservation checks: `outstanding() <= budget` must always hold.
    fn outstanding(&self) -> u32;
}

/// In-process `QuotaSource` bounded by a single global cap. Arithmetic is
/// guarded by a plain `std::sync::Mutex` rather than an atomic-heavy
/// lock-free design.
pub struct LocalQuotaSource {
    remaining: Mutex<u32>,
    budget: u32,
}

impl LocalQuotaSource {
    pub fn new(global_budget: u32) -> Self {
        LocalQuotaSource {
            remaining: Mutex::new(global_budget),
            budget: global_budget,
        }
    }
}

#[async_trait]
impl QuotaSource for LocalQuotaSource {
    async fn request(&self, _provider_id: &str, requested: u32) -> u32 {
        let mut remaining = self.remaining.lock().expect("quota mutex poisoned");
        let granted = requested.min(*remaining);
        *remaining -= granted;
        granted
    }

    async fn release(&self, _provider_id: &str, n: u32) {
        let mut remaining = self.remaining.lock().expect("quota mutex poisoned");
        *remaining = (*remaining + n).min(self.budget);
    }

    fn outstanding(&self) -> u32 {
        let remaining = self.remaining.lock().expect("quota mutex poisoned");
        self.budget - *remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn grants_up_to_the_remaining_budget() {
        let quota = LocalQuotaSource::new(5);
        assert_eq!(quota.request("cve", 3).await, 3);
        assert_eq!(quota.request("cwe", 3).await, 2);
        assert_eq!(quota.outstanding(), 5);
    }

    #[tokio::test]
    async fn release_never_exceeds_the_global_cap() {
        let quota = LocalQuotaSource::new(5);
        quota.release("cve", 100).await;
        assert_eq!(quota.outstanding(), 0);
        assert_eq!(quota.request("cve", 5).await, 5);
    }

    #[tokio::test]
    async fn exhausted_budget_grants_zero() {
        let quota = LocalQuotaSource::new(2);
        assert_eq!(quota.request("cve", 2).await, 2);
        assert_eq!(quota.request("cwe", 1).await, 0);
    }
}
