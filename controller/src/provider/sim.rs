//! Simulated instance backing the `demo` subcommand: the full control
//! surface runs without any cloud calls, with transitions that settle after
//! a configurable delay.

use alloc::sync::Arc;
use core::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::info;

use super::{InstanceDescription, InstanceStatus, ProviderError};

/// One in-progress simulated transition.
struct SimTransition {
    transient: InstanceStatus,
    settled: InstanceStatus,
    settles_at: Instant,
}

struct SimState {
    status: InstanceStatus,
    transition: Option<SimTransition>,
    operation_counter: u64,
}

/// In-memory stand-in for the provider; starts powered off.
#[derive(Clone)]
pub struct SimClient {
    state: Arc<Mutex<SimState>>,
    transition_delay: Duration,
}

impl SimClient {
    pub fn new(transition_delay: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                status: InstanceStatus::Terminated,
                transition: None,
                operation_counter: 0,
            })),
            transition_delay,
        }
    }

    /// # Errors
    ///
    /// Infallible today; the signature mirrors the provider contract.
    pub async fn start_instance(&self) -> Result<String, ProviderError> {
        self.begin(InstanceStatus::Staging, InstanceStatus::Running, "start")
            .await
    }

    /// # Errors
    ///
    /// Infallible today; the signature mirrors the provider contract.
    pub async fn stop_instance(&self) -> Result<String, ProviderError> {
        self.begin(InstanceStatus::Stopping, InstanceStatus::Terminated, "stop")
            .await
    }

    /// # Errors
    ///
    /// Infallible today; the signature mirrors the provider contract.
    pub async fn describe_instance(&self) -> Result<InstanceDescription, ProviderError> {
        let mut state = self.state.lock().await;
        settle(&mut state);
        let status = state
            .transition
            .as_ref()
            .map_or_else(|| state.status.clone(), |t| t.transient.clone());
        Ok(InstanceDescription {
            name: "demo-instance".to_string(),
            status,
            machine_type: Some("e2-medium".to_string()),
            internal_ip: Some("10.0.0.2".to_string()),
            external_ip: Some("203.0.113.7".to_string()),
        })
    }

    async fn begin(
        &self,
        transient: InstanceStatus,
        settled: InstanceStatus,
        verb: &str,
    ) -> Result<String, ProviderError> {
        let mut state = self.state.lock().await;
        settle(&mut state);

        // The real provider treats start-on-running (and friends) as a no-op
        // that still yields an operation.
        if state.status != settled && state.transition.is_none() {
            state.transition = Some(SimTransition {
                transient,
                settled,
                settles_at: Instant::now() + self.transition_delay,
            });
        }

        state.operation_counter += 1;
        let operation_id = format!("sim-{verb}-{}", state.operation_counter);
        info!(%operation_id, "Simulated {verb} accepted");
        Ok(operation_id)
    }
}

/// Commits a transition whose settle time has passed.
fn settle(state: &mut SimState) {
    if let Some(ref transition) = state.transition
        && Instant::now() >= transition.settles_at
    {
        state.status = transition.settled.clone();
        state.transition = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn start_settles_after_the_configured_delay() {
        let sim = SimClient::new(Duration::from_secs(2));
        assert_eq!(
            sim.describe_instance().await.unwrap().status,
            InstanceStatus::Terminated
        );

        sim.start_instance().await.unwrap();
        assert_eq!(
            sim.describe_instance().await.unwrap().status,
            InstanceStatus::Staging
        );

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(
            sim.describe_instance().await.unwrap().status,
            InstanceStatus::Running
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stop_settles_back_to_terminated() {
        let sim = SimClient::new(Duration::from_millis(100));
        sim.start_instance().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        sim.stop_instance().await.unwrap();
        assert_eq!(
            sim.describe_instance().await.unwrap().status,
            InstanceStatus::Stopping
        );

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(
            sim.describe_instance().await.unwrap().status,
            InstanceStatus::Terminated
        );
    }

    #[tokio::test(start_paused = true)]
    async fn start_on_running_instance_is_a_noop() {
        let sim = SimClient::new(Duration::from_millis(100));
        sim.start_instance().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let operation = sim.start_instance().await.unwrap();
        assert!(operation.starts_with("sim-start-"));
        assert_eq!(
            sim.describe_instance().await.unwrap().status,
            InstanceStatus::Running
        );
    }
}
