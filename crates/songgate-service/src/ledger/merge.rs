//! Identity merge at login.

use chrono::Utc;

use songgate_core::{AccountId, GuestId, MergeResult, Result};

use super::Ledger;

impl Ledger {
    /// Fold a guest's usage into an account.
    ///
    /// Counts are summed. The guest's row is deleted and the guest is linked
    /// to the account in the same store transaction, so a repeated call finds
    /// nothing to merge and returns `merged: false`.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::StoreUnavailable` if the store cannot be reached
    /// or the merge lost a uniqueness race twice. Nothing is merged in that
    /// case; the next login retries.
    pub async fn merge(
        &self,
        guest: &GuestId,
        account_id: AccountId,
        last_known_address: Option<&str>,
    ) -> Result<MergeResult> {
        let now = Utc::now();
        let result = self
            .call_retrying("merge_guest", || {
                self.store
                    .merge_guest(guest, account_id, last_known_address, now)
            })
            .await?;

        if result.merged {
            tracing::info!(
                guest_id = %guest,
                account_id = %account_id,
                combined_free_credits_used = result.combined_free_credits_used,
                "Guest usage merged into account"
            );
        } else {
            tracing::debug!(
                guest_id = %guest,
                account_id = %account_id,
                "No guest usage to merge"
            );
        }

        Ok(result)
    }
}
