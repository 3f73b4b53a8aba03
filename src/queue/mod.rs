//! Command Queue: per-bead FIFO serialization of mutations
//! that must not run concurrently against the same bead.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{instrument, warn};
use uuid::Uuid;

pub type JobEffect = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
pub type JobFactory = Box<dyn FnOnce() -> JobEffect + Send>;

struct PendingJob {
    id: Uuid,
    label: String,
    factory: JobFactory,
}

#[derive(Debug, Clone)]
pub struct QueueInfo {
    pub running: Option<String>,
    pub queued: usize,
}

#[derive(Default)]
struct BeadQueue {
    running_label: Option<String>,
    pending: VecDeque<PendingJob>,
}

/// `queue[beadId] = { running, pending }`. Jobs for different beads run
/// concurrently; jobs for the same bead never overlap.
#[derive(Clone)]
pub struct CommandQueue {
    queues: Arc<Mutex<HashMap<String, BeadQueue>>>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self {
            queues: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Append a job; if none is running for this bead, start it immediately.
    #[instrument(skip(self, factory), fields(bead_id, label))]
    pub async fn submit(&self, bead_id: &str, label: impl Into<String>, factory: JobFactory) {
        let label = label.into();
        let job = PendingJob {
            id: Uuid::new_v4(),
            label: label.clone(),
            factory,
        };

        let mut queues = self.queues.lock().await;
        let queue = queues.entry(bead_id.to_string()).or_default();

        if queue.running_label.is_some() {
            queue.pending.push_back(job);
            return;
        }

        queue.running_label = Some(label);
        drop(queues);

        self.run_job(bead_id.to_string(), job).await;
    }

    async fn run_job(&self, bead_id: String, job: PendingJob) {
        let effect = (job.factory)();
        let queues = self.queues.clone();
        let bead_id_for_task = bead_id.clone();
        tokio::spawn(async move {
            if let Err(e) = effect.await {
                warn!(bead_id = %bead_id_for_task, job_id = %job.id, error = %e, "queued job failed");
            }
            Self::on_complete(queues, bead_id_for_task).await;
        });
    }

    async fn on_complete(queues: Arc<Mutex<HashMap<String, BeadQueue>>>, bead_id: String) {
        let next = {
            let mut queues = queues.lock().await;
            let Some(queue) = queues.get_mut(&bead_id) else {
                return;
            };
            queue.running_label = None;
            let next = queue.pending.pop_front();
            if let Some(job) = &next {
                queue.running_label = Some(job.label.clone());
            }
            next
        };

        if let Some(job) = next {
            let effect = (job.factory)();
            let bead_id_for_task = bead_id.clone();
            let queues_for_task = queues.clone();
            tokio::spawn(async move {
                if let Err(e) = effect.await {
                    warn!(bead_id = %bead_id_for_task, job_id = %job.id, error = %e, "queued job failed");
                }
                Box::pin(Self::on_complete(queues_for_task, bead_id_for_task)).await;
            });
        }
    }

    /// Consumed by the action UI to disable conflicting actions.
    pub async fn get_info(&self, bead_id: &str) -> QueueInfo {
        let queues = self.queues.lock().await;
        match queues.get(bead_id) {
            Some(queue) => QueueInfo {
                running: queue.running_label.clone(),
                queued: queue.pending.len(),
            },
            None => QueueInfo {
                running: None,
                queued: 0,
            },
        }
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn jobs_for_same_bead_run_in_submission_order() {
        let queue = CommandQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = order.clone();
            queue
                .submit(
                    "az-1",
                    format!("job-{i}"),
                    Box::new(move || {
                        Box::pin(async move {
                            tokio::time::sleep(Duration::from_millis(10)).await;
                            order.lock().await.push(i);
                            Ok(())
                        })
                    }),
                )
                .await;
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(*order.lock().await, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn different_beads_run_concurrently() {
        let queue = CommandQueue::new();
        let counter = Arc::new(AtomicUsize::new(0));

        for bead in ["az-1", "az-2"] {
            let counter = counter.clone();
            queue
                .submit(
                    bead,
                    "job",
                    Box::new(move || {
                        Box::pin(async move {
                            counter.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok(())
                        })
                    }),
                )
                .await;
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
