//! Outbound mail seam. SMTP transport is plugged in by the deployment.

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: &OutboundMail) -> Result<()>;
}

/// Logs each message instead of delivering it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: &OutboundMail) -> Result<()> {
        info!(to = %mail.to, subject = %mail.subject, "outreach mail queued");
        Ok(())
    }
}
