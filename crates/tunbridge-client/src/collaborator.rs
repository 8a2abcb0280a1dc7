//! Boundary to the user-facing layer.

use std::future::Future;

use dialoguer::Confirm;
use tokio::sync::RwLock;
use tracing::{info, warn};

use tunbridge_core::TunnelOptions;

/// What the user is asked to agree to before a start goes ahead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentScope {
    /// Showing the status notification while running.
    Notifications,
    /// Routing traffic through the tunnel.
    Tunnel,
}

impl ConsentScope {
    pub const fn prompt(self) -> &'static str {
        match self {
            Self::Notifications => "Allow tunbridge to show a status notification while running?",
            Self::Tunnel => "Allow tunbridge to route network traffic through the tunnel?",
        }
    }
}

impl std::fmt::Display for ConsentScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Notifications => write!(f, "notifications"),
            Self::Tunnel => write!(f, "tunnel"),
        }
    }
}

/// Services the run-state machine needs from the user-facing layer.
pub trait UiCollaborator: Send + Sync + 'static {
    /// Options for the next start, if the user has supplied any.
    fn tunnel_options(&self) -> impl Future<Output = Option<TunnelOptions>> + Send;

    /// Ask for consent; may wait on the user for as long as it takes.
    fn request_consent(&self, scope: ConsentScope) -> impl Future<Output = bool> + Send;

    /// A message pushed by the worker.
    fn message(&self, payload: String);
}

/// Collaborator for the command line: options come from configuration and
/// consent from an interactive prompt.
pub struct ConfigCollaborator {
    options: RwLock<Option<TunnelOptions>>,
    assume_yes: bool,
}

impl ConfigCollaborator {
    pub fn new(options: Option<TunnelOptions>, assume_yes: bool) -> Self {
        Self {
            options: RwLock::new(options),
            assume_yes,
        }
    }

    pub async fn set_tunnel_options(&self, options: Option<TunnelOptions>) {
        *self.options.write().await = options;
    }
}

impl UiCollaborator for ConfigCollaborator {
    async fn tunnel_options(&self) -> Option<TunnelOptions> {
        self.options.read().await.clone()
    }

    async fn request_consent(&self, scope: ConsentScope) -> bool {
        if self.assume_yes {
            return true;
        }
        let prompt = tokio::task::spawn_blocking(move || {
            Confirm::new()
                .with_prompt(scope.prompt())
                .default(false)
                .interact()
        })
        .await;
        match prompt {
            Ok(Ok(granted)) => {
                info!(%scope, granted, "Consent answered");
                granted
            }
            Ok(Err(e)) => {
                warn!(%scope, error = %e, "Consent prompt failed, treating as denied");
                false
            }
            Err(e) => {
                warn!(%scope, error = %e, "Consent prompt task failed, treating as denied");
                false
            }
        }
    }

    fn message(&self, payload: String) {
        info!(%payload, "Worker message");
    }
}
