//! Audit sink interface.
//!
//! The core stamps each admin mutation with a caller identity but does not
//! authenticate or persist audit trails itself; deployments plug in their own
//! sink. The default writes structured `tracing` events.

use async_trait::async_trait;
use tracing::info;

#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub caller: String,
    pub action: &'static str,
    pub detail: String,
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: AuditRecord);
}

#[derive(Debug, Default)]
pub struct LogAuditSink;

#[async_trait]
impl AuditSink for LogAuditSink {
    async fn record(&self, record: AuditRecord) {
        info!(
            target: "terracache::audit",
            caller = %record.caller,
            action = record.action,
            detail = %record.detail,
            "Admin action"
        );
    }
}
