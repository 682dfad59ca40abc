//! Capability traits the host implements.
//!
//! The agent core never touches the host's world directly: feedback goes
//! through [`Responder`], privileged execution through [`CommandExecutor`],
//! and the hop onto the host's serialized loop through [`HostScheduler`].

use chatwarden_core::Identity;
use thiserror::Error;

/// Per-turn feedback channel back to whoever asked.
///
/// Implementations must be cheap and non-blocking; they are called from
/// worker tasks and from the host's serialized loop.
pub trait Responder: Send + Sync {
    /// Ordinary feedback line (reply text, progress, execution notice).
    fn feedback(&self, text: &str);
    /// Error line (rate-limit rejection, provider failure, gate rejection).
    fn error(&self, text: &str);
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ExecutionError(pub String);

/// Privileged command execution, implemented by the host.
///
/// `identity` carries the calling player's context when available so
/// identity-relative references in the command resolve; `None` runs in the
/// host's own non-identity-bound context (console).
pub trait CommandExecutor: Send + Sync {
    fn execute(&self, identity: Option<Identity>, command: &str) -> Result<(), ExecutionError>;
}

/// The host's serialized loop for privileged, state-mutating work.
///
/// `submit` must enqueue without blocking; jobs run in submission order on
/// whatever context the host reserves for privileged operations.
pub trait HostScheduler: Send + Sync {
    fn submit(&self, job: Box<dyn FnOnce() + Send>);
}

/// Executor that accepts every command and does nothing. Wiring aid.
#[derive(Default)]
pub struct NoopCommandExecutor;

impl CommandExecutor for NoopCommandExecutor {
    fn execute(&self, _identity: Option<Identity>, _command: &str) -> Result<(), ExecutionError> {
        Ok(())
    }
}

/// Scheduler that runs jobs immediately on the submitting thread. Suitable
/// for tests and for hosts without a dedicated serialized loop.
#[derive(Default)]
pub struct InlineScheduler;

impl HostScheduler for InlineScheduler {
    fn submit(&self, job: Box<dyn FnOnce() + Send>) {
        job();
    }
}

#[cfg(test)]
mod tests {
    use chatwarden_core::Identity;

    use super::{CommandExecutor, HostScheduler, InlineScheduler, NoopCommandExecutor};

    #[test]
    fn noop_executor_accepts_everything() {
        let executor = NoopCommandExecutor;
        assert!(executor.execute(None, "say hi").is_ok());
        assert!(executor.execute(Some(Identity::console()), "kill @s").is_ok());
    }

    #[test]
    fn inline_scheduler_runs_jobs_synchronously() {
        let scheduler = InlineScheduler;
        let ran = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = std::sync::Arc::clone(&ran);
        scheduler.submit(Box::new(move || flag.store(true, std::sync::atomic::Ordering::SeqCst)));
        assert!(ran.load(std::sync::atomic::Ordering::SeqCst));
    }
}
