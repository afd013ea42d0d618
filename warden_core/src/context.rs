//! Cancellation and deadline handling for engine calls.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Per-call context supplied by the caller.
///
/// Cancellation is observed before each round trip starts and while it is
/// in flight. Statements that already reached the server are not rolled
/// back.
#[derive(Clone, Debug, Default)]
pub struct CallContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context that never cancels.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context tied to an existing cancellation token.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Cancel once `timeout` has elapsed from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Cancel at `deadline`. An earlier deadline already set wins.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    /// The underlying token, for callers that want to cancel from elsewhere.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancel every call sharing this context.
    pub fn cancel(&self) {
        self.token.cancel()
    }

    /// True once the token fired or the deadline passed.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
            || self
                .deadline
                .map(|d| Instant::now() >= d)
                .unwrap_or(false)
    }

    /// Fail fast if cancellation was already observed.
    pub fn check(&self, operation: &'static str) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::cancelled(operation))
        } else {
            Ok(())
        }
    }

    /// Drive `fut` unless the context is cancelled first.
    pub async fn run<F, T>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check(operation)?;
        let deadline = async {
            match self.deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Error::cancelled(operation)),
            _ = deadline => Err(Error::cancelled(operation)),
            res = fut => res,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[tokio::test]
    async fn run_passes_through_results() {
        let ctx = CallContext::new();
        let res = ctx.run("get", async { Ok(7) }).await.unwrap();
        assert_eq!(res, 7);
    }

    #[tokio::test]
    async fn cancelled_context_does_no_work() {
        let ctx = CallContext::new();
        ctx.cancel();
        let mut touched = false;
        let res = ctx
            .run("create", async {
                touched = true;
                Ok(())
            })
            .await;
        assert_eq!(res.unwrap_err().kind(), ErrorKind::Cancelled);
        assert!(!touched);
    }

    #[tokio::test]
    async fn deadline_interrupts_slow_calls() {
        let ctx = CallContext::new().with_timeout(Duration::from_millis(10));
        let res = ctx
            .run("exec", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert_eq!(res.unwrap_err().kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn earlier_deadline_wins() {
        let now = Instant::now();
        let ctx = CallContext::new()
            .with_deadline(now + Duration::from_secs(1))
            .with_deadline(now + Duration::from_secs(60));
        assert_eq!(ctx.deadline, Some(now + Duration::from_secs(1)));
    }
}
