use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{error, info};
use uuid::Uuid;

use crate::pipeline::Pipeline;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed { error: String },
}

#[derive(Debug)]
struct QueuedJob {
    job_id: String,
    doc_id: String,
}

/// In-process stand-in for the external task substrate: submitted units
/// run on a worker pool with per-unit status readback. A production
/// deployment swaps this for a durable broker.
pub struct JobQueue {
    tx: mpsc::Sender<QueuedJob>,
    statuses: Arc<DashMap<String, JobStatus>>,
}

impl JobQueue {
    pub fn start(pipeline: Arc<Pipeline>, workers: usize, capacity: usize) -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<QueuedJob>(capacity);
        let rx = Arc::new(Mutex::new(rx));
        let statuses: Arc<DashMap<String, JobStatus>> = Arc::new(DashMap::new());

        for worker_id in 0..workers {
            let rx = rx.clone();
            let statuses = statuses.clone();
            let pipeline = pipeline.clone();

            tokio::spawn(async move {
                loop {
                    // Lock only long enough to pull the next job
                    let job = { rx.lock().await.recv().await };
                    let Some(job) = job else { break };

                    statuses.insert(job.job_id.clone(), JobStatus::Running);
                    info!(worker_id, job_id = %job.job_id, doc_id = %job.doc_id, "job started");

                    match pipeline.process_document(&job.doc_id).await {
                        Ok(()) => {
                            statuses.insert(job.job_id, JobStatus::Completed);
                        }
                        Err(e) => {
                            error!(job_id = %job.job_id, error = %e, "job failed");
                            statuses.insert(
                                job.job_id,
                                JobStatus::Failed {
                                    error: e.to_string(),
                                },
                            );
                        }
                    }
                }
            });
        }

        Arc::new(Self { tx, statuses })
    }

    pub async fn enqueue(&self, doc_id: String) -> anyhow::Result<String> {
        let job_id = Uuid::new_v4().to_string();
        self.statuses.insert(job_id.clone(), JobStatus::Queued);
        self.tx
            .send(QueuedJob {
                job_id: job_id.clone(),
                doc_id,
            })
            .await
            .map_err(|_| anyhow::anyhow!("job queue is closed"))?;
        Ok(job_id)
    }

    pub fn status(&self, job_id: &str) -> Option<JobStatus> {
        self.statuses.get(job_id).map(|s| s.clone())
    }
}
