//! Service container
//!
//! Owns the one active service and drives its lifecycle. [`Container::start`]
//! brings the service up and then waits until some other task calls
//! [`Container::stop`]. Status changes are queued and delivered to listeners
//! by a single background dispatcher, never on the task holding the lock.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::{ConfigError, DashConfig};
use crate::service::{Service, ServiceError, ServiceRegistry};

/// Container status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContainerStatus {
    Started,
    Stopped,
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started => f.write_str("STARTED"),
            Self::Stopped => f.write_str("STOPPED"),
        }
    }
}

/// A container status transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChangeEvent {
    /// Run that emitted the event
    pub run_id: Uuid,
    pub status: ContainerStatus,
    pub at: DateTime<Utc>,
}

/// Receives status transitions
///
/// Called from the dispatcher task; implementations should return quickly.
pub trait StatusListener: Send + Sync {
    fn on_change(&self, event: &StatusChangeEvent);
}

impl<F> StatusListener for F
where
    F: Fn(&StatusChangeEvent) + Send + Sync,
{
    fn on_change(&self, event: &StatusChangeEvent) {
        self(event)
    }
}

/// Container errors
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// Configuration rejected before any service was built
    #[error("invalid configuration")]
    Config(#[from] ConfigError),

    /// The service could not be built, created or started
    #[error("service {name} failed to start")]
    Service {
        name: String,
        #[source]
        source: ServiceError,
    },

    /// The container already ran and was stopped
    #[error("container was stopped and cannot be restarted")]
    Finished,
}

type Listeners = Arc<RwLock<Vec<Arc<dyn StatusListener>>>>;

struct State {
    status: ContainerStatus,
    finished: bool,
    services: Vec<Arc<dyn Service>>,
}

struct ContainerInner {
    run_id: Uuid,
    config: DashConfig,
    registry: ServiceRegistry,
    state: tokio::sync::Mutex<State>,
    shutdown: watch::Sender<bool>,
    listeners: Listeners,
    events: Mutex<Option<mpsc::UnboundedSender<StatusChangeEvent>>>,
}

/// Runs one service from start until stop
///
/// Cheap to clone; clones share the same service and state, so a clone can
/// be moved into a signal handler to call [`stop`](Container::stop).
///
/// # Example
///
/// ```ignore
/// let container = Container::with_builtin(config);
///
/// let stopper = container.clone();
/// tokio::spawn(async move {
///     tokio::signal::ctrl_c().await.ok();
///     stopper.stop().await;
/// });
///
/// container.start().await?; // returns after stop
/// ```
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

impl Container {
    pub fn new(config: DashConfig, registry: ServiceRegistry) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(ContainerInner {
                run_id: Uuid::now_v7(),
                config,
                registry,
                state: tokio::sync::Mutex::new(State {
                    status: ContainerStatus::Stopped,
                    finished: false,
                    services: Vec::new(),
                }),
                shutdown,
                listeners: Arc::new(RwLock::new(Vec::new())),
                events: Mutex::new(None),
            }),
        }
    }

    /// Container resolving services from the built-in registry
    pub fn with_builtin(config: DashConfig) -> Self {
        Self::new(config, ServiceRegistry::with_builtin())
    }

    /// Identifier of this run, attached to every status event
    pub fn run_id(&self) -> Uuid {
        self.inner.run_id
    }

    pub fn config(&self) -> &DashConfig {
        &self.inner.config
    }

    pub async fn status(&self) -> ContainerStatus {
        self.inner.state.lock().await.status
    }

    /// The service started by this container, if any
    pub async fn service(&self) -> Option<Arc<dyn Service>> {
        self.inner.state.lock().await.services.first().cloned()
    }

    /// Register a listener for every later transition
    ///
    /// Starts the dispatcher on first use, so it must be called from within
    /// a Tokio runtime.
    pub fn add_status_listener(&self, listener: impl StatusListener + 'static) {
        self.inner.listeners.write().push(Arc::new(listener));

        let mut events = self.inner.events.lock();
        if events.is_none() {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(dispatch(rx, Arc::clone(&self.inner.listeners)));
            *events = Some(tx);
        }
    }

    /// Bring the configured service up, then wait until stopped
    ///
    /// Returns immediately if already started. On failure the partly started
    /// service is torn down and the container stays stopped.
    #[instrument(skip(self), fields(run_id = %self.inner.run_id, service = %self.inner.config.service))]
    pub async fn start(&self) -> Result<(), ContainerError> {
        let mut shutdown = self.inner.shutdown.subscribe();
        {
            let mut state = self.inner.state.lock().await;
            if state.status == ContainerStatus::Started {
                return Ok(());
            }
            if state.finished {
                return Err(ContainerError::Finished);
            }

            self.inner.config.validate()?;
            let name = self.inner.config.service.clone();
            let service = self
                .inner
                .registry
                .create(&name, &self.inner.config)
                .map_err(|source| ContainerError::Service {
                    name: name.clone(),
                    source,
                })?;

            if let Err(source) = bring_up(service.as_ref()).await {
                service.stop().await;
                service.destroy().await;
                return Err(ContainerError::Service { name, source });
            }

            state.services.push(service);
            state.status = ContainerStatus::Started;
            self.publish(ContainerStatus::Started);
            info!("Container started");
        }

        // the sender lives in `inner`, which `self` keeps alive
        let _ = shutdown.wait_for(|stopped| *stopped).await;
        debug!("Container start returning");
        Ok(())
    }

    /// Stop and destroy every service, then release the waiter in `start`
    ///
    /// Idempotent; safe to call from any task.
    #[instrument(skip(self), fields(run_id = %self.inner.run_id))]
    pub async fn stop(&self) {
        let mut state = self.inner.state.lock().await;
        if state.status == ContainerStatus::Stopped {
            return;
        }

        for service in &state.services {
            service.stop().await;
            service.destroy().await;
        }

        state.status = ContainerStatus::Stopped;
        state.finished = true;
        self.inner.shutdown.send_replace(true);
        self.publish(ContainerStatus::Stopped);
        info!("Container stopped");
    }

    fn publish(&self, status: ContainerStatus) {
        if let Some(events) = self.inner.events.lock().as_ref() {
            let event = StatusChangeEvent {
                run_id: self.inner.run_id,
                status,
                at: Utc::now(),
            };
            if events.send(event).is_err() {
                debug!(%status, "Status dispatcher gone, event dropped");
            }
        }
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("run_id", &self.inner.run_id)
            .field("service", &self.inner.config.service)
            .field("listeners", &self.inner.listeners.read().len())
            .finish_non_exhaustive()
    }
}

async fn bring_up(service: &dyn Service) -> Result<(), ServiceError> {
    service.create().await?;
    service.start().await
}

/// Deliver queued events to every listener, in order
async fn dispatch(mut rx: mpsc::UnboundedReceiver<StatusChangeEvent>, listeners: Listeners) {
    while let Some(event) = rx.recv().await {
        let snapshot: Vec<_> = listeners.read().clone();
        for listener in snapshot {
            let delivered =
                std::panic::catch_unwind(AssertUnwindSafe(|| listener.on_change(&event)));
            if delivered.is_err() {
                warn!(status = %event.status, "Status listener panicked");
            }
        }
    }
    debug!("Status dispatcher exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> DashConfig {
        DashConfig::from_properties([
            ("runner.class", "synthetic"),
            ("dash.driver.threads", "2"),
            ("dash.metrics.service.reporters", "none"),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_stop_before_start_is_noop() {
        let container = Container::with_builtin(config());
        container.stop().await;
        assert_eq!(container.status().await, ContainerStatus::Stopped);
        assert!(container.service().await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_service() {
        let mut config = config();
        config.service = "missing".to_string();
        let container = Container::with_builtin(config);

        let err = container.start().await.unwrap_err();
        assert!(matches!(
            err,
            ContainerError::Service {
                source: ServiceError::UnknownService(_),
                ..
            }
        ));
        assert_eq!(container.status().await, ContainerStatus::Stopped);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_before_service() {
        let mut config = config();
        config.driver.threads = 0;
        let container = Container::with_builtin(config);

        assert!(matches!(
            container.start().await,
            Err(ContainerError::Config(_))
        ));
        assert!(container.service().await.is_none());
    }

    #[tokio::test]
    async fn test_no_restart() {
        let container = Container::with_builtin(config());
        let runner = container.clone();
        let handle = tokio::spawn(async move { runner.start().await });

        while container.status().await != ContainerStatus::Started {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        container.stop().await;
        handle.await.unwrap().unwrap();

        assert!(matches!(
            container.start().await,
            Err(ContainerError::Finished)
        ));
    }
}
