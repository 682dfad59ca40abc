//! Host-facing assembly: load config, initialize logging, wire the
//! dispatcher.
//!
//! A host embeds chatwarden by calling [`bootstrap`] once at startup with
//! its [`CommandExecutor`] and [`HostScheduler`], then feeding chat input to
//! the returned dispatcher. Config reloads go through [`reload`] so the file
//! and environment layers are re-read the same way as at startup.

use std::sync::Arc;

use chatwarden_core::config::{AppConfig, ConfigError, LoadOptions, LogFormat};
use thiserror::Error;
use tracing::info;

use crate::host::{CommandExecutor, HostScheduler};
use crate::turn::{HttpProviderFactory, TurnDispatcher};

pub struct Application {
    pub config: Arc<AppConfig>,
    pub dispatcher: Arc<TurnDispatcher>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Install the global tracing subscriber per the logging section.
///
/// Call at most once per process, before [`bootstrap`]. Hosts with their own
/// subscriber skip this entirely.
pub fn init_logging(config: &AppConfig) {
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        LogFormat::Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        LogFormat::Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

/// Load configuration and assemble a ready dispatcher around the host's
/// capabilities.
pub fn bootstrap(
    options: LoadOptions,
    executor: Arc<dyn CommandExecutor>,
    scheduler: Arc<dyn HostScheduler>,
) -> Result<Application, BootstrapError> {
    let config = Arc::new(AppConfig::load(options)?);
    info!(
        provider = ?config.provider,
        allow_run_commands = config.chat.allow_run_commands,
        cooldown_secs = config.chat.cooldown_secs,
        "chatwarden configured"
    );

    let dispatcher = Arc::new(TurnDispatcher::new(
        Arc::clone(&config),
        Arc::new(HttpProviderFactory),
        executor,
        scheduler,
    ));

    Ok(Application { config, dispatcher })
}

/// Re-read configuration from all layers and swap it into the dispatcher.
/// On error the dispatcher keeps its current snapshot.
pub fn reload(
    dispatcher: &TurnDispatcher,
    options: LoadOptions,
) -> Result<Arc<AppConfig>, BootstrapError> {
    let config = Arc::new(AppConfig::load(options)?);
    dispatcher.reload(Arc::clone(&config));
    info!(
        provider = ?config.provider,
        allow_run_commands = config.chat.allow_run_commands,
        cooldown_secs = config.chat.cooldown_secs,
        "chatwarden configuration reloaded"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chatwarden_core::config::{ConfigOverrides, LoadOptions, ProviderKind};

    use super::{bootstrap, reload};
    use crate::host::{InlineScheduler, NoopCommandExecutor};

    fn options(overrides: ConfigOverrides) -> LoadOptions {
        LoadOptions {
            // Never pick up a chatwarden.toml from the test working dir.
            config_path: Some("/nonexistent/chatwarden.toml".into()),
            overrides,
            ..LoadOptions::default()
        }
    }

    #[test]
    fn bootstrap_wires_a_dispatcher_from_defaults() {
        let app = bootstrap(
            options(ConfigOverrides::default()),
            Arc::new(NoopCommandExecutor),
            Arc::new(InlineScheduler),
        )
        .expect("defaults should bootstrap");

        assert_eq!(app.config.provider, ProviderKind::OpenAi);
        assert_eq!(app.dispatcher.current_config().chat.cooldown_secs, 5);
    }

    #[test]
    fn reload_applies_the_new_snapshot() {
        let app = bootstrap(
            options(ConfigOverrides::default()),
            Arc::new(NoopCommandExecutor),
            Arc::new(InlineScheduler),
        )
        .expect("defaults should bootstrap");

        let reloaded = reload(
            &app.dispatcher,
            options(ConfigOverrides { cooldown_secs: Some(0), ..ConfigOverrides::default() }),
        )
        .expect("reload should succeed");

        assert_eq!(reloaded.chat.cooldown_secs, 0);
        assert_eq!(app.dispatcher.current_config().chat.cooldown_secs, 0);
    }

    #[test]
    fn bootstrap_surfaces_config_errors() {
        let result = bootstrap(
            options(ConfigOverrides {
                cooldown_secs: Some(5),
                log_level: Some("verbose".to_string()),
                ..ConfigOverrides::default()
            }),
            Arc::new(NoopCommandExecutor),
            Arc::new(InlineScheduler),
        );
        assert!(result.is_err());
    }
}
