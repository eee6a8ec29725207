//! Logging interceptor for update observation.

use ferrogram_core::{BoxError, Disposition, HookResult, Interceptor, Outcome, Update};

/// Logs every update on arrival and its outcome after handling.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingInterceptor;

impl Interceptor for LoggingInterceptor {
    async fn pre_handle(&self, update: &Update) -> Result<HookResult, BoxError> {
        tracing::debug!(
            update_id = update.id,
            kind = %update.update_type(),
            key = ?update.affinity_key(),
            "update received"
        );
        Ok(HookResult::Next)
    }

    async fn post_handle(&self, update: &Update, outcome: &Outcome) -> Result<(), BoxError> {
        match (outcome.error(), outcome.disposition()) {
            (Some(error), _) => {
                tracing::warn!(update_id = update.id, %error, "update failed");
            }
            (None, Some(Disposition::RateLimited { retry_after })) => {
                tracing::info!(update_id = update.id, ?retry_after, "update rate limited");
            }
            (None, disposition) => {
                tracing::info!(update_id = update.id, ?disposition, "update handled");
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "logging"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrogram_core::{HandlerError, Message, UpdateKind, User};

    #[tokio::test]
    async fn never_stops_or_fails() {
        let update = Update::new(1, UpdateKind::Message(Message::text(1, User::new(1), "hi")));
        let interceptor = LoggingInterceptor;
        assert_eq!(interceptor.pre_handle(&update).await.unwrap(), HookResult::Next);

        let failed = Outcome::failed(HandlerError::Panicked("boom".into()));
        assert!(interceptor.post_handle(&update, &failed).await.is_ok());
        let handled = Outcome::handled(Disposition::Unrouted);
        assert!(interceptor.post_handle(&update, &handled).await.is_ok());
    }
}
