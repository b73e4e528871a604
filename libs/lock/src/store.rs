use async_trait::async_trait;

use crate::StoreError;

/// Remote key-value store shared by every lock claimant.
///
/// `compare_and_set` is the only mutation. `expected = None` means "key
/// absent"; `new = None` deletes. Implementations must apply the write
/// atomically with the comparison.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write `new` only if the key currently holds `expected`. Returns whether
    /// the write happened.
    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        new: Option<&str>,
    ) -> Result<bool, StoreError>;
}
