//! Activation gate: when a freshly installed generation takes control.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::generation::{ActivationReport, GenerationManager};

/// When an installed generation asks to be activated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandoffMode {
  /// Right after install, pre-empting whatever generation serves clients now
  #[default]
  Eager,
  /// Only once the application confirms with a skip-waiting message
  Deferred,
}

/// Connected application instances, owned by the host runtime.
#[async_trait]
pub trait ClientSet: Send + Sync {
  /// Ask the host to promote this generation without waiting for old clients to close.
  async fn skip_waiting(&self) -> Result<()>;

  /// Take control of every connected client.
  async fn claim(&self) -> Result<()>;
}

/// Client set for a host with no connected clients, e.g. the CLI.
pub struct DetachedClients;

#[async_trait]
impl ClientSet for DetachedClients {
  async fn skip_waiting(&self) -> Result<()> {
    debug!("skip_waiting: no host runtime attached");
    Ok(())
  }

  async fn claim(&self) -> Result<()> {
    debug!("claim: no connected clients");
    Ok(())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  /// Configured, not installed yet
  Parsed,
  Installing,
  /// Installed and waiting to take control
  Installed,
  Activating,
  Activated,
  /// Install failed; this generation will never serve
  Redundant,
}

impl fmt::Display for LifecycleState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::Parsed => "parsed",
      Self::Installing => "installing",
      Self::Installed => "installed",
      Self::Activating => "activating",
      Self::Activated => "activated",
      Self::Redundant => "redundant",
    };
    f.write_str(name)
  }
}

/// Message sent by the hosted application over the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
  /// Confirm a generation waiting in deferred mode
  SkipWaiting,
  /// Ask for the current generation id
  GetVersion,
}

/// Decides when the generation takes control and runs activation exactly once.
pub struct ActivationGate {
  mode: HandoffMode,
  manager: Arc<GenerationManager>,
  clients: Arc<dyn ClientSet>,
  state: watch::Sender<LifecycleState>,
  activation: Mutex<()>,
}

impl ActivationGate {
  pub fn new(mode: HandoffMode, manager: Arc<GenerationManager>, clients: Arc<dyn ClientSet>) -> Self {
    let (state, _) = watch::channel(LifecycleState::Parsed);
    Self {
      mode,
      manager,
      clients,
      state,
      activation: Mutex::new(()),
    }
  }

  pub fn state(&self) -> LifecycleState {
    *self.state.borrow()
  }

  pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
    self.state.subscribe()
  }

  pub(crate) fn transition(&self, next: LifecycleState) {
    let previous = self.state.send_replace(next);
    if previous != next {
      debug!(from = %previous, to = %next, "lifecycle transition");
    }
  }

  /// Move to `Installing` if an install may start from the current state.
  ///
  /// Check and transition happen under the channel's lock, so of two
  /// concurrent install triggers only one gets through.
  pub(crate) fn begin_install(&self) -> Result<()> {
    let mut blocked = None;
    self.state.send_if_modified(|state| match *state {
      LifecycleState::Parsed | LifecycleState::Installed | LifecycleState::Redundant => {
        debug!(from = %state, to = %LifecycleState::Installing, "lifecycle transition");
        *state = LifecycleState::Installing;
        true
      }
      current => {
        blocked = Some(current);
        false
      }
    });

    match blocked {
      Some(state) => Err(eyre!(
        "Cannot install generation {} while {}",
        self.manager.generation().id(),
        state
      )),
      None => Ok(()),
    }
  }

  /// Install finished. In eager mode this immediately activates.
  pub async fn installed(&self) -> Result<Option<ActivationReport>> {
    self.transition(LifecycleState::Installed);
    match self.mode {
      HandoffMode::Eager => self.activate_now().await,
      HandoffMode::Deferred => {
        info!(generation = %self.manager.generation().id(), "installed, waiting for confirmation");
        Ok(None)
      }
    }
  }

  /// The deferred-mode confirmation signal.
  pub async fn confirm(&self) -> Result<Option<ActivationReport>> {
    info!("activation confirmed by client");
    self.activate_now().await
  }

  /// Run activation and claim clients. Returns `None` if already active.
  pub async fn activate_now(&self) -> Result<Option<ActivationReport>> {
    let _guard = self.activation.lock().await;

    match self.state() {
      LifecycleState::Activated => return Ok(None),
      LifecycleState::Installed | LifecycleState::Activating => {}
      state => {
        return Err(eyre!(
          "Cannot activate generation {} while {}",
          self.manager.generation().id(),
          state
        ))
      }
    }

    if let Err(e) = self.clients.skip_waiting().await {
      warn!(error = %e, "skip_waiting rejected by host");
    }

    self.transition(LifecycleState::Activating);
    let report = match self.manager.activate().await {
      Ok(report) => report,
      Err(e) => {
        self.transition(LifecycleState::Installed);
        return Err(e);
      }
    };

    if let Err(e) = self.clients.claim().await {
      warn!(error = %e, "failed to claim clients");
    }

    self.transition(LifecycleState::Activated);
    info!(generation = %self.manager.generation().id(), "generation active");

    Ok(Some(report))
  }
}
