//! Account supervisor
//!
//! One background task per running account: an immediate poll cycle, then
//! one cycle per interval tick until stopped. Stopping cancels the token,
//! which also aborts network operations of a cycle in flight.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::state::AccountHandle;
use crate::sync::cycle::{run_poll_cycle, MonitorContext};
use crate::types::error::MonitorError;
use crate::types::StatusEvent;

/// Running monitor of a single account
pub struct AccountSupervisor {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl AccountSupervisor {
    /// Spawn the monitor loop; the first cycle starts right away
    pub fn start(
        handle: Arc<AccountHandle>,
        ctx: Arc<MonitorContext>,
        token: CancellationToken,
    ) -> Self {
        let task = tokio::spawn(run_monitor(handle, ctx, token.clone()));
        Self { token, task }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the loop to stop and wait until it has
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            warn!("Monitor task ended abnormally: {}", e);
        }
    }
}

async fn run_monitor(handle: Arc<AccountHandle>, ctx: Arc<MonitorContext>, token: CancellationToken) {
    let email = handle.email().to_string();
    let interval = Duration::from_secs(handle.config().await.check_interval.max(1));

    info!(account = %email, "Starting monitor (interval: {:?})", interval);
    ctx.emit(StatusEvent::MonitorStarted {
        email: email.clone(),
    });

    // The first tick completes immediately
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut cycles = 0u64;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        cycles += 1;
        debug!(account = %email, "Poll tick #{}", cycles);
        match run_poll_cycle(&handle, &ctx, &token).await {
            Ok(_) => {}
            Err(MonitorError::Cancelled) => break,
            // Already logged and recorded by the cycle
            Err(_) => {}
        }
    }

    info!(account = %email, "Monitor stopped after {} cycles", cycles);
    ctx.emit(StatusEvent::MonitorStopped { email });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use tokio::time::Instant;

    async fn next_completed(fixture: &Fixture) -> Instant {
        loop {
            match fixture.events.recv_async().await.unwrap() {
                StatusEvent::CycleCompleted { .. } | StatusEvent::CycleFailed { .. } => {
                    return Instant::now()
                }
                _ => {}
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_immediately_then_every_interval() {
        let fixture = Fixture::imap_with(vec![FakeFolder::new("INBOX")], |account| {
            account.check_interval = 60
        });
        let started = Instant::now();
        let supervisor = fixture.start();

        let first = next_completed(&fixture).await;
        assert_eq!(first - started, Duration::ZERO);
        assert!(!supervisor.is_finished());

        let second = next_completed(&fixture).await;
        assert_eq!(second - first, Duration::from_secs(60));
        assert_eq!(fixture.connector.connects(), 2);

        supervisor.stop().await;
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(fixture.connector.connects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_retry_next_interval() {
        let fixture = Fixture::imap_with(vec![FakeFolder::new("INBOX")], |account| {
            account.check_interval = 30
        });
        fixture
            .connector
            .update(|server| server.connect_error = Some(MonitorError::Auth("bad login".into())));
        let supervisor = fixture.start();

        next_completed(&fixture).await;
        fixture.connector.update(|server| server.connect_error = None);
        next_completed(&fixture).await;

        let status = fixture.handle.status().await;
        assert_eq!(status.last_error, None);
        assert!(status.last_check.is_some());
        supervisor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_emits_event_and_can_restart() {
        let fixture = Fixture::imap(vec![FakeFolder::new("INBOX")]);
        let supervisor = fixture.start();
        next_completed(&fixture).await;
        supervisor.stop().await;

        let events: Vec<StatusEvent> = fixture.events.drain().collect();
        assert!(events.contains(&StatusEvent::MonitorStopped {
            email: "me@example.com".into()
        }));

        let supervisor = fixture.start();
        next_completed(&fixture).await;
        assert_eq!(fixture.connector.connects(), 2);
        supervisor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_aborts_hung_connection() {
        let fixture = Fixture::imap(vec![FakeFolder::new("INBOX")]);
        fixture.connector.update(|server| server.hang_connect = true);
        let supervisor = fixture.start();

        // Let the first cycle reach the hung connect
        tokio::time::sleep(Duration::from_secs(1)).await;
        let before = Instant::now();
        supervisor.stop().await;
        assert_eq!(Instant::now() - before, Duration::ZERO);
        assert_eq!(fixture.handle.status().await.last_error, None);
    }
}
