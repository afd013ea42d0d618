//! Script batches on one session.
//!
//! Every batch of a script runs on the same connection, so `#temp` tables
//! and `SET` options carry from one `GO` batch to the next. A batch may
//! `USE` another database; the session is switched back to the target
//! database before the connection returns to its pool.

use async_trait::async_trait;
use futures::{AsyncRead, AsyncWrite};
use tiberius::error::Error as TdsError;
use tiberius::Client;
use tracing::error;
use warden_core::script::ScriptOutcome;
use warden_core::{log_runtime, CallContext, EntityKind, Result, Scope};

use crate::decode::Target;
use crate::statement::bracket;

/// One server session that runs raw batches.
#[async_trait]
pub(crate) trait Session: Send {
    /// Run `sql` and drain every result set it produces.
    async fn run(&mut self, sql: &str) -> std::result::Result<(), TdsError>;
}

#[async_trait]
impl<S> Session for Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn run(&mut self, sql: &str) -> std::result::Result<(), TdsError> {
        self.simple_query(sql).await?.into_results().await?;
        Ok(())
    }
}

/// Run `batches` in order on `session`, stopping at the first failure,
/// then point the session back at `database`.
///
/// A failing batch is reported as `batch N`, counting from 1.
pub(crate) async fn run_script<S: Session>(
    session: &mut S,
    ctx: &CallContext,
    scope: &Scope,
    database: &str,
    batches: &[String],
) -> Result<ScriptOutcome> {
    let outcome = run_batches(session, ctx, scope, batches).await;

    let restore = Target::new("exec", EntityKind::Script, "database context", scope.clone());
    let restored = session
        .run(&format!("USE {};", bracket(database)))
        .await
        .map_err(|e| restore.error(e));
    match (outcome, restored) {
        (Ok(outcome), Ok(())) => Ok(outcome),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(restore_err)) => {
            error!("could not restore {scope} after a failed script: {restore_err}");
            Err(e)
        }
    }
}

async fn run_batches<S: Session>(
    session: &mut S,
    ctx: &CallContext,
    scope: &Scope,
    batches: &[String],
) -> Result<ScriptOutcome> {
    for (i, batch) in batches.iter().enumerate() {
        let name = format!("batch {}", i + 1);
        let target = Target::new("exec", EntityKind::Script, &name, scope.clone());
        let res = log_runtime!(
            format!("exec {name} of {} on {scope}", batches.len()),
            ctx.run("exec script", async {
                session.run(batch).await.map_err(|e| target.error(e))
            })
            .await
        );
        if let Err(e) = res {
            let e = e.in_scope(scope);
            error!("script failed at {name}: {e}");
            return Err(e);
        }
    }
    Ok(ScriptOutcome {
        batches: batches.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::script::split_batches;
    use warden_core::{Error, ErrorKind};

    #[derive(Default)]
    struct RecordingSession {
        ran: Vec<String>,
        fail_containing: Option<&'static str>,
    }

    #[async_trait]
    impl Session for RecordingSession {
        async fn run(&mut self, sql: &str) -> std::result::Result<(), TdsError> {
            self.ran.push(sql.to_owned());
            match self.fail_containing {
                Some(marker) if sql.contains(marker) => {
                    Err(TdsError::Protocol(format!("failed on {marker}").into()))
                }
                _ => Ok(()),
            }
        }
    }

    fn scope() -> Scope {
        Scope::database("sql1:1433", "db1")
    }

    #[tokio::test]
    async fn batches_share_one_session_and_restore_the_database() {
        let mut session = RecordingSession::default();
        let batches = split_batches("CREATE TABLE #t (id int)\nGO\nUSE master\nGO\nSELECT * FROM #t");
        let outcome = run_script(&mut session, &CallContext::new(), &scope(), "db1", &batches)
            .await
            .unwrap();
        assert_eq!(outcome.batches, 3);
        assert_eq!(
            session.ran,
            vec![
                "CREATE TABLE #t (id int)",
                "USE master",
                "SELECT * FROM #t",
                "USE [db1];"
            ]
        );
    }

    #[tokio::test]
    async fn failing_batch_is_reported_by_index() {
        let mut session = RecordingSession {
            fail_containing: Some("second"),
            ..Default::default()
        };
        let batches = split_batches("SELECT 'first'\nGO\nSELECT 'second'\nGO\nSELECT 'third'");
        let err = run_script(&mut session, &CallContext::new(), &scope(), "db1", &batches)
            .await
            .unwrap_err();
        match &err {
            Error::EngineRejected { entity, name, .. } => {
                assert_eq!(*entity, EntityKind::Script);
                assert_eq!(name, "batch 2");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(err.scope().database.as_deref(), Some("db1"));
        assert_eq!(
            session.ran,
            vec!["SELECT 'first'", "SELECT 'second'", "USE [db1];"]
        );
    }

    #[tokio::test]
    async fn failed_restore_fails_the_script() {
        let mut session = RecordingSession {
            fail_containing: Some("USE [db1]"),
            ..Default::default()
        };
        let batches = split_batches("SELECT 1");
        let err = run_script(&mut session, &CallContext::new(), &scope(), "db1", &batches)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EngineRejected);
        assert_eq!(session.ran.len(), 2);
    }

    #[tokio::test]
    async fn cancelled_scripts_run_no_batches() {
        let mut session = RecordingSession::default();
        let ctx = CallContext::new();
        ctx.cancel();
        let batches = split_batches("SELECT 1\nGO\nSELECT 2");
        let err = run_script(&mut session, &ctx, &scope(), "we]ird", &batches)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(session.ran, vec!["USE [we]]ird];"]);
    }
}
