//! Startup sequence shared by the binary and the integration tests

use super::service::{ReconcileReport, SyncService};
use crate::auth::UserStore;
use anyhow::Result;
use tracing::{error, info};

/// Pull the realtime tree, then bootstrap the admin account.
///
/// Reconciling first means an admin created by another node is already in
/// the local store, so no second admin with the same email is minted.
/// A failed reconciliation is logged and startup continues from the local
/// store.
pub async fn boot(
    sync: &SyncService,
    users: &UserStore,
    admin_email: &str,
    admin_password: &str,
    reconcile: bool,
) -> Result<Option<ReconcileReport>> {
    let report = if reconcile {
        match sync.reconcile_all().await {
            Ok(report) => {
                info!(
                    applied = report.total_applied(),
                    pushed = report.total_pushed(),
                    "🔄 Boot reconciliation complete"
                );
                Some(report)
            }
            Err(e) => {
                error!("Boot reconciliation failed: {:#}", e);
                None
            }
        }
    } else {
        None
    };

    if let Some(admin) = users.ensure_admin(admin_email, admin_password)? {
        sync.publish(&admin).await;
    }

    Ok(report)
}
