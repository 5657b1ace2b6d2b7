use crate::buildkit::{Container, Process, Signal, StartRequest};
use crate::error::SessionError;
use crate::protocol::ClientRequest;
use crate::proxy::AppProxy;
use crate::session::Inbound;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Escalation ladder for repeated cancel requests against one process
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CancellationState {
    attempts: u32,
}

impl CancellationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Signal the next cancel request maps to, `None` once exhausted
    pub fn next_signal(&self) -> Option<Signal> {
        match self.attempts {
            0 => Some(Signal::Interrupt),
            1 => Some(Signal::Terminate),
            2 => Some(Signal::Kill),
            _ => None,
        }
    }

    /// Deliver the next signal; the counter only advances once it was sent
    pub async fn escalate(&mut self, process: &dyn Process) -> Result<Signal, SessionError> {
        let signal = self
            .next_signal()
            .ok_or_else(|| SessionError::msg("more than 3 cancel attempts"))?;

        process
            .signal(signal)
            .await
            .map_err(|e| SessionError::internal("process signal", e))?;
        self.attempts += 1;
        Ok(signal)
    }
}

/// Start a process in `container` and drive it to completion
///
/// Races process exit against client messages until the process is gone.
/// Cancel requests escalate through [`CancellationState`]; anything else the
/// client sends while the process runs ends the session. Once started, the
/// app is routed through `proxy` when there is one.
pub async fn run_in_container(
    container: &dyn Container,
    request: StartRequest,
    inbound: &mut Inbound,
    proxy: Option<&AppProxy>,
) -> Result<(), SessionError> {
    debug!("Starting {:?} in {}", request.args, request.cwd);
    let process: Arc<dyn Process> = container
        .start(request)
        .await
        .map_err(|e| SessionError::internal("start process", e))?;

    if let Some(proxy) = proxy {
        match container.endpoint(proxy.app_port()).await {
            Ok(target) => proxy.route_to(target),
            Err(e) => warn!("proxy route: {:#}", e),
        }
    }

    let (exit_tx, mut exit_rx) = oneshot::channel();
    let waiter = Arc::clone(&process);
    tokio::spawn(async move {
        let _ = exit_tx.send(waiter.wait().await);
    });

    let mut cancellation = CancellationState::new();
    loop {
        tokio::select! {
            biased;

            exit = &mut exit_rx => {
                return match exit {
                    Ok(Ok(())) => {
                        debug!("Process exited cleanly");
                        Ok(())
                    }
                    Ok(Err(e)) => Err(SessionError::internal("process wait", e)),
                    Err(_) => Err(SessionError::msg("process wait: waiter dropped")),
                };
            }
            request = inbound.next() => match request? {
                ClientRequest::Cancel => {
                    let signal = cancellation.escalate(process.as_ref()).await?;
                    info!(attempt = cancellation.attempts(), "Cancel requested, sent {}", signal);
                }
                other => {
                    return Err(SessionError::msg(format!(
                        "unexpected message while process runs: {:?}",
                        other
                    )));
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingProcess {
        signals: Mutex<Vec<Signal>>,
    }

    #[async_trait]
    impl Process for RecordingProcess {
        async fn signal(&self, signal: Signal) -> Result<()> {
            self.signals.lock().unwrap().push(signal);
            Ok(())
        }

        async fn wait(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_signal_ladder() {
        let mut state = CancellationState::new();
        assert_eq!(state.next_signal(), Some(Signal::Interrupt));
        state.attempts = 1;
        assert_eq!(state.next_signal(), Some(Signal::Terminate));
        state.attempts = 2;
        assert_eq!(state.next_signal(), Some(Signal::Kill));
        state.attempts = 3;
        assert_eq!(state.next_signal(), None);
    }

    #[tokio::test]
    async fn test_fourth_cancel_fails() {
        let process = RecordingProcess::default();
        let mut state = CancellationState::new();

        for _ in 0..3 {
            state.escalate(&process).await.unwrap();
        }
        let err = state.escalate(&process).await.unwrap_err();
        assert!(!err.is_user());
        assert!(err.to_string().contains("more than 3 cancel attempts"));

        assert_eq!(
            *process.signals.lock().unwrap(),
            vec![Signal::Interrupt, Signal::Terminate, Signal::Kill]
        );
    }

    struct FailingProcess;

    #[async_trait]
    impl Process for FailingProcess {
        async fn signal(&self, _signal: Signal) -> Result<()> {
            anyhow::bail!("no such container")
        }

        async fn wait(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_signal_does_not_advance() {
        let mut state = CancellationState::new();
        assert!(state.escalate(&FailingProcess).await.is_err());
        assert_eq!(state.attempts(), 0);
    }
}
