use axum::async_trait;
use tracing::info;

/// Outbound email boundary. Delivery itself belongs to an external relay;
/// implementations only have to hand the message off.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()>;
}

/// Records the hand-off in the log instead of talking to a relay.
pub struct LogMailer {
    pub from: String,
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, _body: &str) -> anyhow::Result<()> {
        info!(from = %self.from, to = %to, subject = %subject, "outbound email");
        Ok(())
    }
}
