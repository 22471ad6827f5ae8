//! At-least-once job delivery to a pool of worker loops.
//!
//! Deliveries are re-enqueued while the runner reports a redeliverable error;
//! after `max_receives` receives the delivery moves to the dead-letter store
//! and stops consuming capacity.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};

use crate::pipeline::JobRunner;

/// Dispatcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Number of worker loops consuming deliveries.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Maximum receives per delivery before dead-lettering.
    #[serde(default = "default_max_receives")]
    pub max_receives: u32,

    /// Delay before re-enqueueing a failed delivery, in milliseconds.
    #[serde(default = "default_redelivery_delay_ms")]
    pub redelivery_delay_ms: u64,
}

fn default_workers() -> usize {
    2
}

fn default_max_receives() -> u32 {
    5
}

fn default_redelivery_delay_ms() -> u64 {
    500
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_receives: default_max_receives(),
            redelivery_delay_ms: default_redelivery_delay_ms(),
        }
    }
}

/// One in-flight delivery of a job to a worker.
#[derive(Debug, Clone)]
struct Delivery {
    job_id: String,
    receive_count: u32,
}

/// A delivery that exhausted its receives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub job_id: String,
    pub receives: u32,
    pub last_error: String,
    pub dead_lettered_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("dispatcher is not running")]
    NotRunning,
}

/// In-process queue feeding job deliveries to worker loops.
pub struct JobDispatcher {
    config: DispatchConfig,
    tx: mpsc::UnboundedSender<Delivery>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Delivery>>>,
    dead_letters: Arc<RwLock<Vec<DeadLetter>>>,
    shutdown_tx: broadcast::Sender<()>,
    running: Arc<AtomicBool>,
}

impl JobDispatcher {
    pub fn new(config: DispatchConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            tx,
            rx: Arc::new(Mutex::new(rx)),
            dead_letters: Arc::new(RwLock::new(Vec::new())),
            shutdown_tx,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Enqueue a job for processing.
    pub fn enqueue(&self, job_id: impl Into<String>) -> Result<(), DispatchError> {
        self.tx
            .send(Delivery {
                job_id: job_id.into(),
                receive_count: 0,
            })
            .map_err(|_| DispatchError::NotRunning)
    }

    /// Deliveries that exhausted their receive budget.
    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.read().await.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the worker loops. Idempotent.
    pub fn start(&self, runner: Arc<JobRunner>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        for worker_index in 0..self.config.workers.max(1) {
            let worker_id = format!("worker-{}", worker_index);
            let rx = Arc::clone(&self.rx);
            let tx = self.tx.clone();
            let dead_letters = Arc::clone(&self.dead_letters);
            let running = Arc::clone(&self.running);
            let runner = Arc::clone(&runner);
            let config = self.config.clone();
            let mut shutdown_rx = self.shutdown_tx.subscribe();

            tokio::spawn(async move {
                tracing::info!(worker = %worker_id, "dispatch worker started");

                loop {
                    let delivery = {
                        let mut rx = rx.lock().await;
                        tokio::select! {
                            delivery = rx.recv() => match delivery {
                                Some(d) => d,
                                None => break,
                            },
                            _ = shutdown_rx.recv() => break,
                        }
                    };

                    if !running.load(Ordering::SeqCst) {
                        break;
                    }

                    let delivery = Delivery {
                        receive_count: delivery.receive_count + 1,
                        ..delivery
                    };

                    match runner.advance(&delivery.job_id, &worker_id).await {
                        Ok(()) => {}
                        Err(e) if e.is_redeliverable() => {
                            if delivery.receive_count >= config.max_receives {
                                tracing::error!(
                                    job_id = %delivery.job_id,
                                    receives = delivery.receive_count,
                                    error = %e,
                                    "delivery dead-lettered"
                                );
                                crate::metrics::DEAD_LETTERS.inc();
                                dead_letters.write().await.push(DeadLetter {
                                    job_id: delivery.job_id.clone(),
                                    receives: delivery.receive_count,
                                    last_error: e.to_string(),
                                    dead_lettered_at: Utc::now(),
                                });
                            } else {
                                tracing::debug!(
                                    job_id = %delivery.job_id,
                                    receives = delivery.receive_count,
                                    error = %e,
                                    "re-enqueueing delivery"
                                );
                                crate::metrics::REDELIVERIES.inc();
                                let tx = tx.clone();
                                let delay =
                                    std::time::Duration::from_millis(config.redelivery_delay_ms);
                                let delivery = delivery.clone();
                                tokio::spawn(async move {
                                    tokio::time::sleep(delay).await;
                                    let _ = tx.send(delivery);
                                });
                            }
                        }
                        Err(e) => {
                            tracing::error!(
                                job_id = %delivery.job_id,
                                error = %e,
                                "delivery failed permanently, dropping"
                            );
                        }
                    }
                }

                tracing::info!(worker = %worker_id, "dispatch worker stopped");
            });
        }
    }

    /// Signal all worker loops to stop after their current delivery.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
    }
}
