//! The agent as the host runtime sees it: lifecycle events plus request interception.

use color_eyre::Result;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::activation::{ActivationGate, ClientSet, ControlMessage, LifecycleState};
use crate::cache::{CacheStorage, Caches};
use crate::classify::Classifier;
use crate::config::Config;
use crate::generation::{ActivationReport, Generation, GenerationId, GenerationManager, InstallReport};
use crate::network::{Network, Request};
use crate::policy::{FetchMediator, Interception, Served};

/// One generation of the agent, wired to its storage, network and clients.
pub struct Agent {
  manager: Arc<GenerationManager>,
  gate: ActivationGate,
  mediator: FetchMediator,
}

impl Agent {
  pub fn new(
    config: &Config,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    clients: Arc<dyn ClientSet>,
  ) -> Result<Self> {
    let caches = Caches::new(storage);
    let manager = Arc::new(GenerationManager::new(
      caches,
      Arc::clone(&network),
      config.generation(),
      config.manifest(),
      config.origin.clone(),
    ));

    let classifier = Classifier::new(
      &config.origin,
      &config.critical_suffix,
      &config.document_suffix,
    );
    let mut mediator = FetchMediator::new(manager.current_store(), network, classifier)
      .with_strategies(config.strategies);
    if let Some(document) = config.offline_document_url()? {
      mediator = mediator.with_offline_document(&document);
    }

    let gate = ActivationGate::new(config.handoff, Arc::clone(&manager), clients);

    Ok(Self {
      manager,
      gate,
      mediator,
    })
  }

  pub fn generation(&self) -> &Generation {
    self.manager.generation()
  }

  pub fn caches(&self) -> &Caches {
    self.manager.caches()
  }

  pub fn state(&self) -> LifecycleState {
    self.gate.state()
  }

  pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
    self.gate.subscribe()
  }

  /// Pick up where a previous process left off: an existing store means this
  /// generation was installed before.
  pub async fn restore(&self) -> Result<LifecycleState> {
    if self.state() == LifecycleState::Parsed && self.manager.is_installed().await? {
      debug!(store = %self.generation().store_name(), "found installed store");
      self.gate.transition(LifecycleState::Installed);
    }
    Ok(self.state())
  }

  /// Install trigger. Populates the store, then activates or waits per handoff mode.
  pub async fn on_install(&self) -> Result<InstallReport> {
    self.gate.begin_install()?;
    let report = match self.manager.install().await {
      Ok(report) => report,
      Err(e) => {
        self.gate.transition(LifecycleState::Redundant);
        return Err(e);
      }
    };

    if let Err(e) = self.gate.installed().await {
      // The store is in place; activation can still be retried
      warn!(error = %e, "activation after install failed");
    }

    Ok(report)
  }

  /// Activate trigger from the host.
  pub async fn on_activate(&self) -> Result<Option<ActivationReport>> {
    self.gate.activate_now().await
  }

  /// Intercept trigger. Answers synchronously; the response resolves later.
  pub fn on_fetch(&self, request: Request) -> Interception {
    self.mediator.intercept(request)
  }

  /// Intercept and resolve, going to the network for declined requests.
  pub async fn handle(&self, request: Request) -> Result<Served> {
    self.mediator.handle(request).await
  }

  /// Control-channel message from the application.
  pub async fn on_message(
    &self,
    message: ControlMessage,
    reply: Option<oneshot::Sender<GenerationId>>,
  ) -> Result<()> {
    match message {
      ControlMessage::SkipWaiting => {
        info!("forced update requested");
        self.gate.confirm().await?;
      }
      ControlMessage::GetVersion => {
        let id = self.generation().id().clone();
        match reply {
          Some(reply) => {
            if reply.send(id).is_err() {
              debug!("version requester went away");
            }
          }
          None => debug!("version requested without a reply channel"),
        }
      }
    }
    Ok(())
  }
}
