//! Built-in backend that fakes a tunnel: useful without a backend process
//! and for demos. Forwarding "succeeds" after a short delay and then emits a
//! transfer sample every tick and a wandering connection count.

use crate::bridge::{BackendEvent, EventChannel, EventSink, EventSource, ListenerId, ListenerRegistry};
use crate::gateway::{BackendError, ForwardBackend, ForwardRequest};
use crate::telemetry::TelemetrySample;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

pub struct SimulatedBackend {
    registry: Arc<ListenerRegistry>,
    running: Mutex<Option<JoinHandle<()>>>,
    connect_delay: Duration,
    tick: Duration,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::with_timing(Duration::from_millis(600), Duration::from_secs(1))
    }
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timing(connect_delay: Duration, tick: Duration) -> Self {
        SimulatedBackend {
            registry: Arc::new(ListenerRegistry::new()),
            running: Mutex::new(None),
            connect_delay,
            tick,
        }
    }

    pub fn is_forwarding(&self) -> bool {
        self.running_slot().is_some()
    }

    fn running_slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SimulatedBackend {
    fn drop(&mut self) {
        if let Some(handle) = self.running_slot().take() {
            handle.abort();
        }
    }
}

impl ForwardBackend for SimulatedBackend {
    async fn forward(&self, request: ForwardRequest) -> Result<(), BackendError> {
        if self.is_forwarding() {
            return Err(BackendError::Rejected("Already forwarding".to_string()));
        }
        tokio::time::sleep(self.connect_delay).await;

        // Port 0 is the simulator's stand-in for an unreachable host.
        if request.remote_port == 0 {
            return Err(BackendError::Rejected(format!(
                "Connect Error: {}:{} refused the connection",
                request.remote_ip, request.remote_port
            )));
        }

        info!(
            "Simulated forward {}:{} -> {}:{}",
            request.local_ip, request.local_port, request.remote_ip, request.remote_port
        );
        let seed = (u64::from(request.local_port) << 16) | u64::from(request.remote_port);
        let handle = tokio::spawn(traffic_loop(self.registry.clone(), self.tick, seed));
        if let Some(previous) = self.running_slot().replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), BackendError> {
        if let Some(handle) = self.running_slot().take() {
            handle.abort();
            self.registry.emit(BackendEvent::ConnectCountChange(0));
            info!("Simulated forward stopped");
        }
        Ok(())
    }
}

impl EventSource for SimulatedBackend {
    fn listen(&self, channel: EventChannel, sink: EventSink) -> ListenerId {
        self.registry.listen(channel, sink)
    }

    fn unlisten(&self, id: ListenerId) {
        self.registry.unlisten(id);
    }
}

async fn traffic_loop(registry: Arc<ListenerRegistry>, tick: Duration, seed: u64) {
    let mut traffic = TrafficModel::new(seed);
    let mut interval = tokio::time::interval(tick);
    interval.tick().await;

    loop {
        interval.tick().await;
        let (count, sample) = traffic.step();
        if let Some(count) = count {
            registry.emit(BackendEvent::ConnectCountChange(count));
        }
        registry.emit(BackendEvent::TransferStatistic(sample));
    }
}

const MAX_SIMULATED_CONNECTIONS: u32 = 4;

/// Connection count wanders one step at a time towards a random target in
/// `0..=MAX_SIMULATED_CONNECTIONS`; traffic scales with the count.
struct TrafficModel {
    rng: StdRng,
    connections: u32,
}

impl TrafficModel {
    fn new(seed: u64) -> Self {
        TrafficModel {
            rng: StdRng::seed_from_u64(seed),
            connections: 0,
        }
    }

    /// Returns the new count when it changed, and this tick's sample.
    fn step(&mut self) -> (Option<u32>, TelemetrySample) {
        let wanted = self.rng.gen_range(0..=MAX_SIMULATED_CONNECTIONS);
        let changed = if wanted > self.connections {
            self.connections += 1;
            Some(self.connections)
        } else if wanted < self.connections {
            self.connections -= 1;
            Some(self.connections)
        } else {
            None
        };

        let per_conn = u64::from(self.connections);
        let sample = TelemetrySample {
            send_bytes: per_conn * self.rng.gen_range(0..48_000u64),
            recv_bytes: per_conn * self.rng.gen_range(0..256_000u64),
        };
        (changed, sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn request(remote_port: u16) -> ForwardRequest {
        ForwardRequest {
            local_ip: "127.0.0.1".to_string(),
            local_port: 5678,
            remote_ip: "10.0.0.5".to_string(),
            remote_port,
            user: "root".to_string(),
            password: "x".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn forward_emits_statistics_until_stopped() {
        let backend = SimulatedBackend::with_timing(Duration::from_millis(10), Duration::from_millis(100));
        let (tx, mut rx) = mpsc::unbounded_channel();
        backend.listen(EventChannel::UpdateTransferStatistic, tx);

        backend.forward(request(22)).await.unwrap();
        assert!(backend.is_forwarding());

        tokio::time::sleep(Duration::from_millis(350)).await;
        let mut samples = 0;
        while let Ok(event) = rx.try_recv() {
            assert!(matches!(event, BackendEvent::TransferStatistic(_)));
            samples += 1;
        }
        assert_eq!(samples, 3);

        backend.stop().await.unwrap();
        assert!(!backend.is_forwarding());
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn port_zero_is_refused() {
        let backend = SimulatedBackend::with_timing(Duration::from_millis(10), Duration::from_millis(100));
        let err = backend.forward(request(0)).await.unwrap_err();
        assert!(err.to_string().contains("refused"));
        assert!(!backend.is_forwarding());
    }

    #[tokio::test(start_paused = true)]
    async fn second_forward_is_rejected_and_stop_is_idempotent() {
        let backend = SimulatedBackend::with_timing(Duration::ZERO, Duration::from_millis(100));
        backend.stop().await.unwrap();
        backend.forward(request(22)).await.unwrap();
        assert!(matches!(
            backend.forward(request(22)).await,
            Err(BackendError::Rejected(_))
        ));
        backend.stop().await.unwrap();
        backend.stop().await.unwrap();
    }

    #[test]
    fn traffic_is_reproducible_and_count_moves_one_step_at_a_time() {
        let mut a = TrafficModel::new(42);
        let mut b = TrafficModel::new(42);
        let mut count = 0;
        for _ in 0..200 {
            let step = a.step();
            assert_eq!(step, b.step());
            if let Some(next) = step.0 {
                assert_eq!(next.abs_diff(count), 1);
                count = next;
            }
            assert!(count <= MAX_SIMULATED_CONNECTIONS);
            if count == 0 {
                assert_eq!(step.1, TelemetrySample::default());
            }
        }
    }
}
