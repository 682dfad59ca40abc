//! One user turn, end to end.
//!
//! State machine: Admitting → Assembling → AwaitingModel → Updating →
//! Gating → (Executing | Replying), with Rejected out of Admitting and
//! Errored out of anything after Assembling. Every terminal path delivers
//! exactly one primary notice through the [`Responder`]; a rejected tool
//! call may additionally surface the plain reply as a courtesy.

use std::sync::{Arc, RwLock};

use chatwarden_core::config::AppConfig;
use chatwarden_core::Identity;
use chatwarden_llm::provider::{LlmProvider, ProviderError};
use chatwarden_llm::{provider_from_config, ChatMessage, ProviderResult};
use tracing::{debug, warn};

use crate::gate::{gate_command, normalize_command, GateDecision};
use crate::history::ConversationStore;
use crate::host::{CommandExecutor, HostScheduler, Responder};
use crate::limiter::RateLimiter;

/// Builds a provider client for the current config snapshot. A fresh client
/// per turn keeps reloads simple; tests substitute scripted providers here.
pub trait ProviderFactory: Send + Sync {
    fn build(&self, config: &AppConfig) -> Result<Box<dyn LlmProvider>, ProviderError>;
}

/// Production factory: the HTTP client selected by `config.provider`.
#[derive(Default)]
pub struct HttpProviderFactory;

impl ProviderFactory for HttpProviderFactory {
    fn build(&self, config: &AppConfig) -> Result<Box<dyn LlmProvider>, ProviderError> {
        provider_from_config(config)
    }
}

/// How one turn ended. Exactly one of these per `run_turn` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Admission denied; no provider call was made.
    RateLimited { remaining_secs: i64 },
    /// Plain reply delivered (possibly empty).
    Replied,
    /// Command handed to the host's serialized loop for execution.
    Executed { command: String },
    /// Tool intent extracted but not executed.
    ToolRejected { reason: ToolRejection },
    /// Provider construction or call failed; history untouched.
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolRejection {
    EmptyCommand,
    NotAllowed { command: String },
}

struct Shared {
    config: Arc<AppConfig>,
    limiter: Arc<RateLimiter>,
}

pub struct TurnDispatcher {
    // Guards only the snapshot swap; never held across an await.
    shared: RwLock<Shared>,
    history: ConversationStore,
    providers: Arc<dyn ProviderFactory>,
    executor: Arc<dyn CommandExecutor>,
    scheduler: Arc<dyn HostScheduler>,
}

impl TurnDispatcher {
    pub fn new(
        config: Arc<AppConfig>,
        providers: Arc<dyn ProviderFactory>,
        executor: Arc<dyn CommandExecutor>,
        scheduler: Arc<dyn HostScheduler>,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::new(config.chat.cooldown_secs));
        Self {
            shared: RwLock::new(Shared { config, limiter }),
            history: ConversationStore::new(),
            providers,
            executor,
            scheduler,
        }
    }

    /// Swap in a new configuration snapshot. The rate limiter is rebuilt
    /// with the new cooldown; prior admission timestamps are discarded.
    pub fn reload(&self, config: Arc<AppConfig>) {
        let limiter = Arc::new(RateLimiter::new(config.chat.cooldown_secs));
        if let Ok(mut shared) = self.shared.write() {
            shared.config = config;
            shared.limiter = limiter;
        }
    }

    pub fn current_config(&self) -> Arc<AppConfig> {
        self.snapshot().0
    }

    /// Clear this identity's stored history. In-flight turns are unaffected.
    pub fn reset(&self, identity: Identity) {
        debug!(identity = %identity, "conversation history cleared");
        self.history.clear(identity);
    }

    /// Run one turn on a spawned task so the caller is never blocked on
    /// provider latency.
    pub fn ask(
        self: &Arc<Self>,
        identity: Identity,
        user_text: impl Into<String>,
        responder: Arc<dyn Responder>,
    ) -> tokio::task::JoinHandle<TurnOutcome> {
        let dispatcher = Arc::clone(self);
        let user_text = user_text.into();
        tokio::spawn(async move { dispatcher.run_turn(identity, &user_text, responder).await })
    }

    /// The complete turn state machine. Public so hosts and tests can drive
    /// it on a context of their choosing; `ask` is the spawning wrapper.
    pub async fn run_turn(
        &self,
        identity: Identity,
        user_text: &str,
        responder: Arc<dyn Responder>,
    ) -> TurnOutcome {
        let (config, limiter) = self.snapshot();

        // Admitting
        if !limiter.try_acquire(identity) {
            let remaining_secs = limiter.remaining_cooldown(identity);
            debug!(identity = %identity, remaining_secs, "turn rejected by rate limiter");
            responder.error(&format!("You're talking too fast. Try again in {remaining_secs}s."));
            return TurnOutcome::RateLimited { remaining_secs };
        }

        responder.feedback("[AI] Thinking…");

        // Assembling: system prompt + stored history + the new message.
        // Stored history is not mutated until the provider call succeeds.
        let mut messages = Vec::with_capacity(self.history.len(identity) + 2);
        messages.push(ChatMessage::system(&config.chat.system_prompt));
        messages.extend(self.history.snapshot(identity));
        messages.push(ChatMessage::user(user_text));

        let provider = match self.providers.build(&config) {
            Ok(provider) => provider,
            Err(err) => {
                warn!(identity = %identity, error = %err, "provider construction failed");
                responder.error(&format!("AI provider error: {err}"));
                return TurnOutcome::Failed;
            }
        };

        // AwaitingModel - the sole suspension point; no locks held here.
        let result = match provider
            .chat(&messages, config.chat.temperature, config.chat.max_tokens)
            .await
        {
            Ok(result) => result,
            Err(err) => {
                warn!(identity = %identity, error = %err, "chat turn failed");
                responder.error(&format!("AI error: {err}"));
                return TurnOutcome::Failed;
            }
        };

        self.finish_turn(identity, user_text, result, &config, responder)
    }

    /// Updating, Gating, and the terminal states. Synchronous by design so
    /// it can run wherever the awaiting task resumed.
    fn finish_turn(
        &self,
        identity: Identity,
        user_text: &str,
        result: ProviderResult,
        config: &AppConfig,
        responder: Arc<dyn Responder>,
    ) -> TurnOutcome {
        let ProviderResult { text: reply, tool } = result;

        let is_run_command = tool.as_ref().is_some_and(|intent| intent.is_run_command());
        let raw_command = tool.as_ref().and_then(|intent| intent.command.clone());
        let normalized = raw_command.as_deref().map(normalize_command);

        debug!(
            identity = %identity,
            tool = tool.as_ref().map(|intent| intent.kind.as_str()).unwrap_or("none"),
            command = normalized.as_deref().unwrap_or(""),
            reply_len = reply.len(),
            "provider result"
        );

        // Updating: exactly one user and one assistant entry, then trim.
        // A consumed tool call is recorded as a marker, not stale prose, so
        // later turns see that an action was taken.
        let assistant_entry = if is_run_command {
            let recorded = normalized.as_deref().unwrap_or("<missing>");
            ChatMessage::assistant(format!("<tool:run_command /{recorded}>"))
        } else {
            ChatMessage::assistant(reply.clone())
        };
        self.history.append_exchange(
            identity,
            ChatMessage::user(user_text),
            assistant_entry,
            config.chat.max_exchanges,
        );

        // Gating
        if is_run_command && config.chat.allow_run_commands {
            match gate_command(raw_command.as_deref(), &config.chat.command_allowlist) {
                GateDecision::RejectedEmpty => {
                    debug!(identity = %identity, "tool call rejected: empty command");
                    responder.error("AI requested a command, but it was empty.");
                    self.courtesy_reply(&reply, &responder);
                    TurnOutcome::ToolRejected { reason: ToolRejection::EmptyCommand }
                }
                GateDecision::RejectedDenied(command) => {
                    debug!(identity = %identity, command = %command, "tool call rejected by allowlist");
                    responder.error(&format!("Command '/{command}' not allowed."));
                    self.courtesy_reply(&reply, &responder);
                    TurnOutcome::ToolRejected {
                        reason: ToolRejection::NotAllowed { command },
                    }
                }
                GateDecision::Allow(command) => {
                    // Executing: hop onto the host's serialized loop. The
                    // player's context rides along so identity-relative
                    // references resolve; console runs unbound.
                    let context = (!identity.is_console()).then_some(identity);
                    let executor = Arc::clone(&self.executor);
                    let job_command = command.clone();
                    self.scheduler.submit(Box::new(move || {
                        debug!(
                            identity = context.map(|id| id.to_string()).unwrap_or_else(|| "console".to_string()),
                            command = %job_command,
                            "executing model-requested command"
                        );
                        responder.feedback(&format!("[AI] Executing: /{job_command}"));
                        if let Err(err) = executor.execute(context, &job_command) {
                            responder.error(&format!("Command failed: {err}"));
                        }
                    }));
                    TurnOutcome::Executed { command }
                }
            }
        } else {
            // Replying: no tool, unknown kind, or tools globally disabled.
            responder.feedback(&format!("[AI] {reply}"));
            TurnOutcome::Replied
        }
    }

    fn courtesy_reply(&self, reply: &str, responder: &Arc<dyn Responder>) {
        if !reply.trim().is_empty() {
            responder.feedback(&format!("[AI] {reply}"));
        }
    }

    fn snapshot(&self) -> (Arc<AppConfig>, Arc<RateLimiter>) {
        let shared = self.shared.read().expect("config lock poisoned");
        (Arc::clone(&shared.config), Arc::clone(&shared.limiter))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chatwarden_core::config::AppConfig;
    use chatwarden_core::Identity;
    use chatwarden_llm::provider::{LlmProvider, ProviderError};
    use chatwarden_llm::{ChatMessage, ProviderResult, ToolIntent};
    use uuid::Uuid;

    use super::{ProviderFactory, ToolRejection, TurnDispatcher, TurnOutcome};
    use crate::host::{CommandExecutor, ExecutionError, InlineScheduler, Responder};

    type Scripted = Result<ProviderResult, String>;

    struct ScriptedProvider {
        result: Mutex<Option<Scripted>>,
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _temperature: f64,
            _max_tokens: u32,
        ) -> Result<ProviderResult, ProviderError> {
            match self.result.lock().expect("script lock").take().expect("provider reused") {
                Ok(result) => Ok(result),
                Err(message) => Err(ProviderError::Envelope(message)),
            }
        }
    }

    struct ScriptedFactory {
        script: Mutex<VecDeque<Scripted>>,
        builds: AtomicUsize,
    }

    impl ScriptedFactory {
        fn new(script: Vec<Scripted>) -> Arc<Self> {
            Arc::new(Self { script: Mutex::new(script.into()), builds: AtomicUsize::new(0) })
        }

        fn build_count(&self) -> usize {
            self.builds.load(Ordering::SeqCst)
        }
    }

    impl ProviderFactory for ScriptedFactory {
        fn build(&self, _config: &AppConfig) -> Result<Box<dyn LlmProvider>, ProviderError> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().expect("script lock").pop_front().expect("script empty");
            Ok(Box::new(ScriptedProvider { result: Mutex::new(Some(next)) }))
        }
    }

    #[derive(Default)]
    struct RecordingResponder {
        feedbacks: Mutex<Vec<String>>,
        errors: Mutex<Vec<String>>,
    }

    impl RecordingResponder {
        fn feedbacks(&self) -> Vec<String> {
            self.feedbacks.lock().expect("responder lock").clone()
        }

        fn errors(&self) -> Vec<String> {
            self.errors.lock().expect("responder lock").clone()
        }
    }

    impl Responder for RecordingResponder {
        fn feedback(&self, text: &str) {
            self.feedbacks.lock().expect("responder lock").push(text.to_string());
        }

        fn error(&self, text: &str) {
            self.errors.lock().expect("responder lock").push(text.to_string());
        }
    }

    #[derive(Default)]
    struct RecordingExecutor {
        calls: Mutex<Vec<(Option<Identity>, String)>>,
        fail: bool,
    }

    impl RecordingExecutor {
        fn calls(&self) -> Vec<(Option<Identity>, String)> {
            self.calls.lock().expect("executor lock").clone()
        }
    }

    impl CommandExecutor for RecordingExecutor {
        fn execute(
            &self,
            identity: Option<Identity>,
            command: &str,
        ) -> Result<(), ExecutionError> {
            self.calls.lock().expect("executor lock").push((identity, command.to_string()));
            if self.fail {
                Err(ExecutionError("world is read-only".to_string()))
            } else {
                Ok(())
            }
        }
    }

    struct Harness {
        dispatcher: Arc<TurnDispatcher>,
        factory: Arc<ScriptedFactory>,
        executor: Arc<RecordingExecutor>,
        responder: Arc<RecordingResponder>,
    }

    fn harness(config: AppConfig, script: Vec<Scripted>) -> Harness {
        harness_with_executor(config, script, RecordingExecutor::default())
    }

    fn harness_with_executor(
        config: AppConfig,
        script: Vec<Scripted>,
        executor: RecordingExecutor,
    ) -> Harness {
        let factory = ScriptedFactory::new(script);
        let executor = Arc::new(executor);
        let dispatcher = Arc::new(TurnDispatcher::new(
            Arc::new(config),
            Arc::clone(&factory) as Arc<dyn ProviderFactory>,
            Arc::clone(&executor) as Arc<dyn CommandExecutor>,
            Arc::new(InlineScheduler),
        ));
        Harness { dispatcher, factory, executor, responder: Arc::new(RecordingResponder::default()) }
    }

    fn tool_config(allowlist: &[&str]) -> AppConfig {
        let mut config = AppConfig::default();
        config.chat.allow_run_commands = true;
        config.chat.command_allowlist =
            allowlist.iter().map(|prefix| prefix.to_string()).collect();
        config.chat.cooldown_secs = 0;
        config
    }

    fn plain(text: &str) -> Scripted {
        Ok(ProviderResult::plain(text))
    }

    fn tool(command: &str, text: &str) -> Scripted {
        Ok(ProviderResult {
            text: text.to_string(),
            tool: Some(ToolIntent::run_command(Some(command.to_string()))),
        })
    }

    fn player() -> Identity {
        Identity::new(Uuid::new_v4())
    }

    #[tokio::test]
    async fn plain_reply_is_delivered_and_stored() {
        let h = harness(tool_config(&[]), vec![plain("hello!")]);
        let id = player();

        let outcome =
            h.dispatcher.run_turn(id, "hi", h.responder.clone()).await;

        assert_eq!(outcome, TurnOutcome::Replied);
        assert!(h.responder.feedbacks().contains(&"[AI] hello!".to_string()));
        let history: Vec<_> = h
            .dispatcher
            .history
            .snapshot(id)
            .into_iter()
            .map(|message| message.content)
            .collect();
        assert_eq!(history, vec!["hi", "hello!"]);
    }

    #[tokio::test]
    async fn empty_reply_is_still_a_valid_reply() {
        let h = harness(tool_config(&[]), vec![plain("")]);
        let outcome = h
            .dispatcher
            .run_turn(player(), "hi", h.responder.clone())
            .await;
        assert_eq!(outcome, TurnOutcome::Replied);
        assert!(h.responder.feedbacks().contains(&"[AI] ".to_string()));
    }

    #[tokio::test]
    async fn second_turn_within_cooldown_is_rate_limited_without_a_provider_call() {
        let mut config = tool_config(&["say"]);
        config.chat.cooldown_secs = 5;
        let h = harness(config, vec![plain("first")]);
        let id = player();

        let first =
            h.dispatcher.run_turn(id, "say hello", h.responder.clone());
        assert_eq!(first.await, TurnOutcome::Replied);

        let second = h
            .dispatcher
            .run_turn(id, "say hello", h.responder.clone())
            .await;
        match second {
            TurnOutcome::RateLimited { remaining_secs } => {
                assert!((1..=5).contains(&remaining_secs));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
        assert_eq!(h.factory.build_count(), 1);
        assert!(h.responder.errors().iter().any(|line| line.contains("talking too fast")));
    }

    #[tokio::test]
    async fn distinct_identities_are_not_rate_limited_together() {
        let mut config = tool_config(&[]);
        config.chat.cooldown_secs = 60;
        let h = harness(config, vec![plain("a"), plain("b")]);

        let first = h
            .dispatcher
            .run_turn(player(), "one", h.responder.clone())
            .await;
        let second = h
            .dispatcher
            .run_turn(player(), "two", h.responder.clone())
            .await;
        assert_eq!(first, TurnOutcome::Replied);
        assert_eq!(second, TurnOutcome::Replied);
    }

    #[tokio::test]
    async fn allowed_tool_call_executes_with_player_context() {
        let h = harness(tool_config(&["say"]), vec![tool(" /say hello ", "")]);
        let id = player();

        let outcome = h
            .dispatcher
            .run_turn(id, "greet everyone", h.responder.clone())
            .await;

        assert_eq!(outcome, TurnOutcome::Executed { command: "say hello".to_string() });
        assert_eq!(h.executor.calls(), vec![(Some(id), "say hello".to_string())]);
        assert!(h
            .responder
            .feedbacks()
            .contains(&"[AI] Executing: /say hello".to_string()));
        // History records the marker with the normalized command.
        let history = h.dispatcher.history.snapshot(id);
        assert_eq!(history[1].content, "<tool:run_command /say hello>");
    }

    #[tokio::test]
    async fn console_identity_executes_without_player_context() {
        let h = harness(tool_config(&[]), vec![tool("say hi", "")]);
        let outcome = h
            .dispatcher
            .run_turn(
                Identity::console(),
                "greet",
                h.responder.clone(),
            )
            .await;
        assert_eq!(outcome, TurnOutcome::Executed { command: "say hi".to_string() });
        assert_eq!(h.executor.calls(), vec![(None, "say hi".to_string())]);
    }

    #[tokio::test]
    async fn denied_tool_call_is_reported_and_never_executed() {
        let h = harness(tool_config(&["say"]), vec![tool("/kill @s", "removing you now")]);
        let id = player();

        let outcome = h
            .dispatcher
            .run_turn(id, "kill me", h.responder.clone())
            .await;

        assert_eq!(
            outcome,
            TurnOutcome::ToolRejected {
                reason: ToolRejection::NotAllowed { command: "kill @s".to_string() }
            }
        );
        assert!(h.executor.calls().is_empty());
        assert!(h
            .responder
            .errors()
            .contains(&"Command '/kill @s' not allowed.".to_string()));
        // Courtesy reply still surfaces the commentary.
        assert!(h.responder.feedbacks().contains(&"[AI] removing you now".to_string()));
        // The attempt is still recorded in history as a marker.
        let history = h.dispatcher.history.snapshot(id);
        assert_eq!(history[1].content, "<tool:run_command /kill @s>");
    }

    #[tokio::test]
    async fn empty_command_is_rejected_without_execution() {
        let h = harness(tool_config(&[]), vec![tool("  /  ", "")]);
        let outcome = h
            .dispatcher
            .run_turn(player(), "do it", h.responder.clone())
            .await;

        assert_eq!(outcome, TurnOutcome::ToolRejected { reason: ToolRejection::EmptyCommand });
        assert!(h.executor.calls().is_empty());
        assert!(h
            .responder
            .errors()
            .contains(&"AI requested a command, but it was empty.".to_string()));
        // Blank reply means no courtesy message either.
        assert_eq!(h.responder.feedbacks(), vec!["[AI] Thinking…".to_string()]);
    }

    #[tokio::test]
    async fn tools_disabled_ignores_the_intent_but_records_the_marker() {
        let mut config = tool_config(&[]);
        config.chat.allow_run_commands = false;
        let h = harness(config, vec![tool("say hi", "I would run that")]);
        let id = player();

        let outcome = h
            .dispatcher
            .run_turn(id, "greet", h.responder.clone())
            .await;

        assert_eq!(outcome, TurnOutcome::Replied);
        assert!(h.executor.calls().is_empty());
        let history = h.dispatcher.history.snapshot(id);
        assert_eq!(history[1].content, "<tool:run_command /say hi>");
    }

    #[tokio::test]
    async fn provider_failure_leaves_history_untouched() {
        let h = harness(tool_config(&[]), vec![Err("connection refused".to_string())]);
        let id = player();

        let outcome = h
            .dispatcher
            .run_turn(id, "hi", h.responder.clone())
            .await;

        assert_eq!(outcome, TurnOutcome::Failed);
        assert!(h.dispatcher.history.is_empty(id));
        assert!(h.responder.errors().iter().any(|line| line.starts_with("AI error:")));
    }

    #[tokio::test]
    async fn execution_failure_is_reported_but_does_not_rewind_the_turn() {
        let executor = RecordingExecutor { fail: true, ..RecordingExecutor::default() };
        let h = harness_with_executor(tool_config(&[]), vec![tool("say hi", "")], executor);

        let outcome = h
            .dispatcher
            .run_turn(player(), "greet", h.responder.clone())
            .await;

        assert_eq!(outcome, TurnOutcome::Executed { command: "say hi".to_string() });
        assert!(h
            .responder
            .errors()
            .iter()
            .any(|line| line.starts_with("Command failed:")));
    }

    #[tokio::test]
    async fn history_is_bounded_oldest_first() {
        let mut config = tool_config(&[]);
        config.chat.max_exchanges = 2;
        let h = harness(config, vec![plain("a1"), plain("a2"), plain("a3")]);
        let id = player();

        for turn in 1..=3 {
            let outcome = h
                .dispatcher
                .run_turn(
                    id,
                    &format!("u{turn}"),
                    h.responder.clone(),
                )
                .await;
            assert_eq!(outcome, TurnOutcome::Replied);
        }

        let history: Vec<_> = h
            .dispatcher
            .history
            .snapshot(id)
            .into_iter()
            .map(|message| message.content)
            .collect();
        assert_eq!(history, vec!["u2", "a2", "u3", "a3"]);
    }

    #[tokio::test]
    async fn reset_clears_only_that_identity() {
        let h = harness(tool_config(&[]), vec![plain("a"), plain("b")]);
        let first = player();
        let second = player();

        h.dispatcher.run_turn(first, "one", h.responder.clone()).await;
        h.dispatcher.run_turn(second, "two", h.responder.clone()).await;

        h.dispatcher.reset(first);
        assert!(h.dispatcher.history.is_empty(first));
        assert_eq!(h.dispatcher.history.len(second), 2);
    }

    #[tokio::test]
    async fn reload_swaps_cooldown_and_forgets_rate_state() {
        let mut config = tool_config(&[]);
        config.chat.cooldown_secs = 600;
        let h = harness(config, vec![plain("a"), plain("b")]);
        let id = player();

        h.dispatcher.run_turn(id, "one", h.responder.clone()).await;

        let mut relaxed = tool_config(&[]);
        relaxed.chat.cooldown_secs = 0;
        h.dispatcher.reload(Arc::new(relaxed));

        let outcome = h
            .dispatcher
            .run_turn(id, "two", h.responder.clone())
            .await;
        assert_eq!(outcome, TurnOutcome::Replied);
        assert_eq!(h.dispatcher.current_config().chat.cooldown_secs, 0);
    }

    #[tokio::test]
    async fn ask_runs_the_turn_on_a_spawned_task() {
        let h = harness(tool_config(&[]), vec![plain("spawned")]);
        let outcome = h
            .dispatcher
            .ask(player(), "hi", h.responder.clone())
            .await
            .expect("turn task completes");
        assert_eq!(outcome, TurnOutcome::Replied);
        assert!(h.responder.feedbacks().contains(&"[AI] spawned".to_string()));
    }
}
