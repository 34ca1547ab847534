use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::collaborators::{
    ApplicationGateway, ApplicationStatusUpdate, AuditAction, AuditEvent, AuditSink,
    CollaboratorError, Notifier,
};
use super::domain::{ApplicationId, Decision, RunId};

/// How a relay attempt sequence ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Delivered { attempts: usize },
    Abandoned { attempts: usize },
}

/// Best-effort follow-up after a completed run: move the application to the
/// matching status, then tell the applicant. Never touches the run itself.
///
/// Retries sleep inside the process, so a delivery still pending at exit is
/// lost. Callers should [`drain`](Self::drain) before shutting down.
#[derive(Clone)]
pub struct NotificationRelay {
    gateway: Arc<dyn ApplicationGateway>,
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditSink>,
    retry_delays: Arc<[Duration]>,
    in_flight: Arc<watch::Sender<usize>>,
}

/// Counts a spawned delivery until its task ends, panics included.
struct InFlight(Arc<watch::Sender<usize>>);

impl InFlight {
    fn enter(counter: Arc<watch::Sender<usize>>) -> Self {
        counter.send_modify(|count| *count += 1);
        Self(counter)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.send_modify(|count| *count = count.saturating_sub(1));
    }
}

impl NotificationRelay {
    pub fn new(
        gateway: Arc<dyn ApplicationGateway>,
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditSink>,
        retry_delays: Vec<Duration>,
    ) -> Self {
        Self {
            gateway,
            notifier,
            audit,
            retry_delays: retry_delays.into(),
            in_flight: Arc::new(watch::channel(0).0),
        }
    }

    /// Schedule delivery on its own task; the caller does not wait for it.
    pub fn relay(
        &self,
        run_id: RunId,
        application_id: ApplicationId,
        decision: Decision,
    ) -> JoinHandle<RelayOutcome> {
        let relay = self.clone();
        let guard = InFlight::enter(Arc::clone(&self.in_flight));
        tokio::spawn(async move {
            let _guard = guard;
            relay.deliver(run_id, application_id, decision).await
        })
    }

    /// Deliveries spawned and not yet finished.
    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Wait up to `within` for pending deliveries. Returns how many are still
    /// running afterwards.
    pub async fn drain(&self, within: Duration) -> usize {
        let mut pending = self.in_flight.subscribe();
        let drained = tokio::time::timeout(within, pending.wait_for(|count| *count == 0))
            .await
            .is_ok();
        if drained {
            return 0;
        }
        let remaining = self.in_flight();
        warn!(remaining, "notification deliveries still pending after drain");
        remaining
    }

    async fn deliver(
        &self,
        run_id: RunId,
        application_id: ApplicationId,
        decision: Decision,
    ) -> RelayOutcome {
        let mut transitioned = false;
        let mut attempts = 0;

        loop {
            attempts += 1;
            match self
                .attempt(application_id, decision, &mut transitioned)
                .await
            {
                Ok(()) => {
                    info!(
                        run_id = %run_id,
                        application_id = %application_id,
                        decision = decision.label(),
                        attempts,
                        "verification outcome delivered"
                    );
                    return RelayOutcome::Delivered { attempts };
                }
                Err(err) => match self.retry_delays.get(attempts - 1) {
                    Some(delay) => {
                        warn!(
                            run_id = %run_id,
                            application_id = %application_id,
                            attempts,
                            retry_in_ms = delay.as_millis() as u64,
                            error = %err,
                            "outcome delivery failed, retrying"
                        );
                        tokio::time::sleep(*delay).await;
                    }
                    None => {
                        error!(
                            run_id = %run_id,
                            application_id = %application_id,
                            attempts,
                            error = %err,
                            "outcome delivery abandoned"
                        );
                        let event = AuditEvent::for_run(AuditAction::NotificationAbandoned, run_id)
                            .failed()
                            .detail("application_id", application_id.to_string())
                            .detail("decision", decision.label())
                            .detail("attempts", attempts as u64)
                            .detail("error", err.to_string());
                        if let Err(audit_err) = self.audit.log(event).await {
                            warn!(run_id = %run_id, error = %audit_err, "audit log unavailable");
                        }
                        return RelayOutcome::Abandoned { attempts };
                    }
                },
            }
        }
    }

    async fn attempt(
        &self,
        application_id: ApplicationId,
        decision: Decision,
        transitioned: &mut bool,
    ) -> Result<(), CollaboratorError> {
        if !*transitioned {
            self.gateway
                .transition(application_id, ApplicationStatusUpdate::from(decision))
                .await?;
            *transitioned = true;
        }
        self.notifier
            .notify_verification_complete(application_id, decision)
            .await
    }
}
