use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;

use crate::protocol::{META_DEADLINE, META_ONE_WAY};
use crate::{AppError, AppResult};

/// Per-call metadata: an optional absolute deadline, the one-way marker
/// and a cancellation token.
///
/// On the client it travels into request meta (`deadline` as Unix millis,
/// `one-way` as `"true"`); on the server it is reconstructed from meta and
/// handed to the business handler. The deadline is kept as wall-clock
/// time because it crosses the wire.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<SystemTime>,
    one_way: bool,
    token: CancellationToken,
}

impl CallContext {
    pub fn new() -> CallContext {
        CallContext::default()
    }

    pub fn with_deadline(mut self, deadline: SystemTime) -> CallContext {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> CallContext {
        self.with_deadline(SystemTime::now() + timeout)
    }

    pub fn one_way(mut self) -> CallContext {
        self.one_way = true;
        self
    }

    pub fn is_one_way(&self) -> bool {
        self.one_way
    }

    pub fn deadline(&self) -> Option<SystemTime> {
        self.deadline
    }

    pub fn deadline_millis(&self) -> Option<u64> {
        self.deadline.map(|deadline| {
            deadline
                .duration_since(UNIX_EPOCH)
                .unwrap_or(Duration::ZERO)
                .as_millis() as u64
        })
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Fails fast when the context is already cancelled or past its
    /// deadline.
    pub fn check(&self) -> AppResult<()> {
        if self.token.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if SystemTime::now() >= deadline {
                return Err(AppError::DeadlineExceeded);
            }
        }
        Ok(())
    }

    /// Resolves with the matching error once the context is cancelled or
    /// the deadline passes; pends forever otherwise.
    pub async fn done(&self) -> AppError {
        let remaining = match self.deadline {
            Some(deadline) => match deadline.duration_since(SystemTime::now()) {
                Ok(remaining) => Some(remaining),
                Err(_) => return AppError::DeadlineExceeded,
            },
            None => None,
        };
        match remaining {
            Some(remaining) => {
                tokio::select! {
                    _ = self.token.cancelled() => AppError::Cancelled,
                    _ = tokio::time::sleep(remaining) => AppError::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                AppError::Cancelled
            }
        }
    }

    /// Writes the well-known meta keys for the wire.
    pub fn write_meta(&self, meta: &mut HashMap<String, String>) {
        if let Some(millis) = self.deadline_millis() {
            meta.insert(META_DEADLINE.to_string(), millis.to_string());
        }
        if self.one_way {
            meta.insert(META_ONE_WAY.to_string(), "true".to_string());
        }
    }

    /// Rebuilds a context from request meta. An unparsable deadline is
    /// ignored rather than failing the call.
    pub fn from_meta(meta: &HashMap<String, String>) -> CallContext {
        let mut ctx = CallContext::new();
        if let Some(millis) = meta
            .get(META_DEADLINE)
            .and_then(|value| value.parse::<u64>().ok())
        {
            ctx.deadline = Some(UNIX_EPOCH + Duration::from_millis(millis));
        }
        if meta.get(META_ONE_WAY).map(String::as_str) == Some("true") {
            ctx.one_way = true;
        }
        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_roundtrip() {
        let ctx = CallContext::new()
            .with_timeout(Duration::from_millis(50))
            .one_way();
        let mut meta = HashMap::new();
        ctx.write_meta(&mut meta);

        let rebuilt = CallContext::from_meta(&meta);
        assert!(rebuilt.is_one_way());
        assert_eq!(rebuilt.deadline_millis(), ctx.deadline_millis());
    }

    #[test]
    fn test_invalid_deadline_meta_ignored() {
        let mut meta = HashMap::new();
        meta.insert(META_DEADLINE.to_string(), "not-a-number".to_string());
        let ctx = CallContext::from_meta(&meta);
        assert!(ctx.deadline().is_none());
    }

    #[test]
    fn test_check_reports_cancellation_and_deadline() {
        let ctx = CallContext::new();
        assert!(ctx.check().is_ok());
        ctx.cancel();
        assert!(matches!(ctx.check(), Err(AppError::Cancelled)));

        let expired = CallContext::new().with_deadline(UNIX_EPOCH);
        assert!(matches!(expired.check(), Err(AppError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn test_done_resolves_on_deadline() {
        let ctx = CallContext::new().with_timeout(Duration::from_millis(20));
        assert!(matches!(ctx.done().await, AppError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_done_resolves_on_cancel() {
        let ctx = CallContext::new();
        let waiter = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waiter.cancel();
        });
        assert!(matches!(ctx.done().await, AppError::Cancelled));
    }
}
