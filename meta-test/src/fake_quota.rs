use async_trait::async_trait;
use meta_executor::QuotaSource;
use std::sync::Mutex;

/// A `QuotaSource` double that grants a scripted sequence of amounts,
/// one per call to `request`, regardless of what's asked for. Falls back
/// to granting zero once the script is exhausted.
///
/// Useful for exercising admission paths like "no permits available"
/// without wiring up `LocalQuotaSource`'s real arithmetic.
pub struct ScriptedQuotaSource {
    grants: Mutex<Vec<u32>>,
    outstanding: Mutex<u32>,
}

impl ScriptedQuotaSource {
    pub fn new(grants: impl IntoIterator<Item = u32>) -> Self {
        let mut grants: Vec<u32> = grants.into_iter().collect();
        grants.reverse();
        ScriptedQuotaSource {
            grants: Mutex::new(grants),
            outstanding: Mutex::new(0),
        }
    }

    pub fn always_zero() -> Self {
        ScriptedQuotaSource::new(std::iter::empty())
    }
}

#[async_trait]
impl QuotaSource for ScriptedQuotaSource {
    async fn request(&self, _provider_id: &str, _requested: u32) -> u32 {
        let granted = self.grants.lock().expect("grants mutex poisoned").pop().unwrap_or(0);
        *self.outstanding.lock().expect("outstanding mutex poisoned") += granted;
        granted
    }

    async fn release(&self, _provider_id: &str, n: u32) {
        let mut outstanding = self.outstanding.lock().expect("outstanding mutex poisoned");
        *outstanding = outstanding.saturating_sub(n);
    }

    fn outstanding(&self) -> u32 {
        *self.outstanding.lock().expect("outstanding mutex poisoned")
    }
}
