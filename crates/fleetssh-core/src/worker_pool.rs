use crate::config::{Config, ExecContext};
use crate::error::FleetsshError;
use crate::executor;
use crate::job::Job;
use crate::result::{CompletionCounter, HostResult, StreamHandle};
use crate::streamer;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Shared host queue: filled once with every target host, then closed.
/// Workers pull from it until it runs dry.
type HostQueue = Arc<Mutex<mpsc::Receiver<String>>>;

/// Batch entry point: every (host, job) pair runs to completion and exactly
/// |hosts| × |jobs| results come back, in no particular order.
pub(crate) async fn run_batch(config: &Config) -> Result<Vec<HostResult>, FleetsshError> {
    config.check_sanity()?;
    config.check_jobs()?;

    let context = Arc::new(config.exec_context()?);
    let jobs = Arc::new(config.job_list());
    let queue = fill_host_queue(config);
    let total = config.hosts.len() * jobs.len();

    debug!(
        target: "worker_pool::run_batch",
        "Dispatching {} hosts x {} jobs across {} workers",
        config.hosts.len(), jobs.len(), config.worker_pool
    );

    let (result_tx, mut result_rx) = mpsc::channel(total);
    for worker in 0..config.worker_pool {
        tokio::spawn(batch_worker(
            worker,
            Arc::clone(&queue),
            Arc::clone(&jobs),
            Arc::clone(&context),
            result_tx.clone(),
        ));
    }
    drop(result_tx);

    let mut results = Vec::with_capacity(total);
    while let Some(result) = result_rx.recv().await {
        results.push(result);
    }
    Ok(results)
}

/// Stream entry point: launches the work and returns. One envelope per
/// (host, job) pair arrives on `delivery`; completion is tracked by the
/// returned [`StreamHandle`].
pub(crate) async fn run_stream(
    config: &Config,
    delivery: mpsc::Sender<HostResult>,
) -> Result<StreamHandle, FleetsshError> {
    config.check_sanity()?;
    config.check_jobs()?;

    let context = Arc::new(config.exec_context()?);
    let jobs = Arc::new(config.job_list());
    let queue = fill_host_queue(config);
    let total = config.hosts.len() * jobs.len();

    debug!(
        target: "worker_pool::run_stream",
        "Streaming {} hosts x {} jobs across {} workers",
        config.hosts.len(), jobs.len(), config.worker_pool
    );

    let counter = CompletionCounter::new();
    let (done_tx, done_rx) = watch::channel(false);

    let (task_tx, mut task_rx) = mpsc::unbounded_channel::<JoinHandle<()>>();
    for worker in 0..config.worker_pool {
        tokio::spawn(stream_worker(
            worker,
            Arc::clone(&queue),
            Arc::clone(&jobs),
            Arc::clone(&context),
            delivery.clone(),
            counter.clone(),
            task_tx.clone(),
        ));
    }
    drop(task_tx);

    // Supervisor: joins every streaming task, then latches all-done. This is
    // what lets StreamHandle::wait resolve only after every record's data
    // has been handed over.
    tokio::spawn(async move {
        while let Some(task) = task_rx.recv().await {
            if let Err(err) = task.await {
                warn!(target: "worker_pool::run_stream", "Streaming task panicked: {}", err);
            }
        }
        let _ = done_tx.send(true);
    });

    Ok(StreamHandle::new(total, counter.shared(), done_rx))
}

fn fill_host_queue(config: &Config) -> HostQueue {
    let (host_tx, host_rx) = mpsc::channel(config.hosts.len());
    for host in &config.hosts {
        // Capacity equals the host count, so this never blocks.
        let _ = host_tx.try_send(host.clone());
    }
    Arc::new(Mutex::new(host_rx))
}

/// Batch worker: executes each job of each host it pulls synchronously, so
/// the pool size caps in-flight sessions.
async fn batch_worker(
    worker: usize,
    queue: HostQueue,
    jobs: Arc<Vec<Job>>,
    context: Arc<ExecContext>,
    results: mpsc::Sender<HostResult>,
) {
    loop {
        let host = { queue.lock().await.recv().await };
        let Some(host) = host else { break };

        debug!(target: "worker_pool::batch_worker", "Worker {} took host {}", worker, host);
        for job in jobs.iter() {
            let result = executor::execute(&host, job, &context).await;
            if results.send(result).await.is_err() {
                return;
            }
        }
    }
}

/// Stream worker: spawns an independent task per (host, job) pair and moves
/// on, so the pool size caps dispatch, not steady-state in-flight streams.
async fn stream_worker(
    worker: usize,
    queue: HostQueue,
    jobs: Arc<Vec<Job>>,
    context: Arc<ExecContext>,
    delivery: mpsc::Sender<HostResult>,
    counter: CompletionCounter,
    tasks: mpsc::UnboundedSender<JoinHandle<()>>,
) {
    loop {
        let host = { queue.lock().await.recv().await };
        let Some(host) = host else { break };

        debug!(target: "worker_pool::stream_worker", "Worker {} took host {}", worker, host);
        for job in jobs.iter() {
            let task = tokio::spawn(streamer::execute_stream(
                host.clone(),
                job.clone(),
                (*context).clone(),
                delivery.clone(),
                counter.clone(),
            ));
            if tasks.send(task).is_err() {
                return;
            }
        }
    }
}
