use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tdx_links_core::Configuration;

/// Per-session state owned by the host.
///
/// Holds the current configuration snapshot and a one-shot circuit breaker:
/// the first automatic rewrite failure disables automatic rewriting until a
/// manual run succeeds or the configuration is reloaded.
pub struct RewriteSession {
    config: RwLock<Arc<Configuration>>,
    auto_disabled: AtomicBool,
}

impl RewriteSession {
    pub fn new(config: Configuration) -> Self {
        log_config_issues(&config);
        Self {
            config: RwLock::new(Arc::new(config)),
            auto_disabled: AtomicBool::new(false),
        }
    }

    /// Snapshot used for one rewrite pass.
    pub fn configuration(&self) -> Arc<Configuration> {
        self.config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Swap in new settings and re-arm automatic rewriting.
    pub fn reload_configuration(&self, config: Configuration) {
        log_config_issues(&config);
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(config);
        if self.auto_disabled.swap(false, Ordering::SeqCst) {
            tracing::info!("Settings changed, automatic rewriting re-enabled");
        }
    }

    /// Settings allow automatic rewriting and the breaker has not tripped.
    pub fn is_auto_enabled(&self) -> bool {
        self.configuration().auto_replace_enabled && !self.is_tripped()
    }

    pub fn is_tripped(&self) -> bool {
        self.auto_disabled.load(Ordering::SeqCst)
    }

    /// Disable automatic rewriting. Only the call that trips the breaker
    /// logs, and only that call returns `true`.
    pub fn trip(&self, error: &anyhow::Error) -> bool {
        let first = !self.auto_disabled.swap(true, Ordering::SeqCst);
        if first {
            tracing::error!(
                "Automatic rewrite failed, disabling it for this session. \
                 Run the rewrite command manually or change settings to resume: {:#}",
                error
            );
        }
        first
    }

    pub fn reset(&self) {
        if self.auto_disabled.swap(false, Ordering::SeqCst) {
            tracing::info!("Manual rewrite succeeded, automatic rewriting re-enabled");
        }
    }
}

fn log_config_issues(config: &Configuration) {
    for issue in config.validate() {
        tracing::warn!("Settings: {}", issue);
    }
}
