//! Agent runtime - per-turn orchestration with gated command execution
//!
//! This crate is the part of chatwarden the host talks to. One call to
//! [`turn::TurnDispatcher::ask`] drives a complete turn:
//!
//! ```text
//! ask → RateLimiter → ConversationStore (snapshot) → provider chat
//!                                                        ↓
//!        host serialized loop ← allowlist gate ← history update
//! ```
//!
//! # Scheduling domains
//!
//! Two execution contexts are deliberately visible in the types. The
//! provider call runs on a spawned tokio task so it never stalls the host's
//! serialized loop; the final privileged execution is handed back to that
//! loop through [`host::HostScheduler`]. No lock is held across the network
//! suspension point.
//!
//! # Safety principle
//!
//! The model is a translator, never an authority. Every command it proposes
//! passes the allowlist gate, and execution happens through a capability
//! trait the host implements - this crate cannot run anything by itself.

pub mod bootstrap;
pub mod gate;
pub mod history;
pub mod host;
pub mod limiter;
pub mod turn;

pub use bootstrap::{bootstrap, init_logging, Application, BootstrapError};
pub use gate::{gate_command, normalize_command, GateDecision};
pub use history::ConversationStore;
pub use host::{CommandExecutor, ExecutionError, HostScheduler, Responder};
pub use limiter::RateLimiter;
pub use turn::{HttpProviderFactory, ProviderFactory, ToolRejection, TurnDispatcher, TurnOutcome};
