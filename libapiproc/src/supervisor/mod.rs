//! Supervisor task. Launches one isolated worker per job and resolves exactly one outcome.
mod error;
mod launcher;

pub use error::Error;
pub use launcher::{Launcher, ProcessLauncher, TaskLauncher, Worker, WORKER_PROGRAM};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::worker::WorkerKind;
use crate::{Connection, JobRequest, JobResult, TestRunEvent, TestRunRequest};

pub type Result<T> = std::result::Result<T, Error>;

/// IDs assigned to jobs
pub type JobId = usize;

/// Settings for [Supervisor]
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorConfig {
    /// Maximum number of workers running at once. Further jobs wait in queue.
    pub max_workers: usize,
    /// Kill workers that have not sent a result within this duration
    pub job_timeout: Option<Duration>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            job_timeout: None,
        }
    }
}

/// State of a submitted job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Waiting for a worker slot
    Queued,
    /// Worker launched
    Running,
}

/// Information about a job in flight
#[derive(Debug, Clone, PartialEq)]
pub struct JobInfo {
    pub id: JobId,
    pub kind: WorkerKind,
    pub state: JobState,
}

/// Result of a test run
#[derive(Debug, Clone, PartialEq)]
pub struct TestRunReport {
    /// Log notifications received before the terminal message
    pub logs: Vec<String>,
    pub outcome: TestRunOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TestRunOutcome {
    /// Test server exited with code
    Exited(i32),
    /// Test run could not complete
    Failed(String),
}

/// A job submitted to the supervisor
#[derive(Debug)]
enum Job {
    Parse(JobRequest),
    TestRun(TestRunRequest),
}

impl Job {
    fn kind(&self) -> WorkerKind {
        match self {
            Job::Parse(_) => WorkerKind::Parse,
            Job::TestRun(_) => WorkerKind::TestRun,
        }
    }
}

#[derive(Debug)]
enum Outcome {
    Parse(JobResult),
    TestRun(TestRunReport),
}

/// Messages for supervisor task
#[derive(Debug)]
enum Event {
    Submit(Job, oneshot::Sender<Result<Outcome>>),
    Started(JobId),
    ListJobs(oneshot::Sender<Vec<JobInfo>>),
}

/// Handle to the supervisor task
#[derive(Debug, Clone)]
pub struct Supervisor {
    ev_tx: mpsc::Sender<Event>,
    cancel: CancellationToken,
}

impl Supervisor {
    /// Start the supervisor task with given launcher
    pub fn start<L: Launcher>(launcher: L, config: SupervisorConfig) -> Self {
        let (ev_tx, mut ev_rx) = mpsc::channel(32);
        let cancel = CancellationToken::new();

        let mut task = SupervisorTask::new(Arc::new(launcher), config, ev_tx.downgrade());
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_clone.cancelled() => {
                        debug!("terminating supervisor...");
                        break;
                    }
                    ev = ev_rx.recv() => match ev {
                        Some(ev) => task.handle_ev(ev),
                        None => {
                            info!("Supervisor handle dropped - terminating");
                            break;
                        }
                    },
                    Some(res) = task.jobs.join_next() => task.handle_exit(res),
                }
            }
            task.shutdown().await;
        });

        Self { ev_tx, cancel }
    }

    /// Run a parse job on a new worker
    pub async fn submit_parse(&self, req: JobRequest) -> Result<JobResult> {
        match self.submit(Job::Parse(req)).await? {
            Outcome::Parse(res) => Ok(res),
            Outcome::TestRun(_) => Err(Error::UnexpectedOutcome),
        }
    }

    /// Run a test-run job on a new worker
    pub async fn submit_test_run(&self, req: TestRunRequest) -> Result<TestRunReport> {
        match self.submit(Job::TestRun(req)).await? {
            Outcome::TestRun(report) => Ok(report),
            Outcome::Parse(_) => Err(Error::UnexpectedOutcome),
        }
    }

    /// Jobs that have been submitted and not yet resolved
    pub async fn jobs(&self) -> Result<Vec<JobInfo>> {
        let (tx, rx) = oneshot::channel();
        self.ev_tx
            .send(Event::ListJobs(tx))
            .await
            .map_err(|_| Error::FailedToMessageSupervisor)?;
        Ok(rx.await?)
    }

    /// Initiate shutdown. Running workers are stopped. The future completes when shutdown is complete.
    pub async fn shutdown(&self) {
        debug!("shutdown - start");
        self.cancel.cancel();
        self.ev_tx.closed().await;
        debug!("shutdown - done");
    }

    async fn submit(&self, job: Job) -> Result<Outcome> {
        let (tx, rx) = oneshot::channel();
        self.ev_tx
            .send(Event::Submit(job, tx))
            .await
            .map_err(|_| Error::FailedToMessageSupervisor)?;
        rx.await?
    }
}

/// State owned by the supervisor task
struct SupervisorTask<L> {
    launcher: Arc<L>,
    permits: Arc<Semaphore>,
    job_timeout: Option<Duration>,
    jobs: JoinSet<JobId>,
    infos: BTreeMap<JobId, JobInfo>,
    next_job_id: JobId,
    weak_tx: mpsc::WeakSender<Event>,
}

impl<L: Launcher> SupervisorTask<L> {
    fn new(launcher: Arc<L>, config: SupervisorConfig, weak_tx: mpsc::WeakSender<Event>) -> Self {
        Self {
            launcher,
            permits: Arc::new(Semaphore::new(config.max_workers.max(1))),
            job_timeout: config.job_timeout,
            jobs: JoinSet::new(),
            infos: BTreeMap::new(),
            next_job_id: 0,
            weak_tx,
        }
    }

    fn handle_ev(&mut self, ev: Event) {
        debug!("handle_ev - {ev:?}");
        match ev {
            Event::Submit(job, tx) => self.spawn(job, tx),
            Event::Started(id) => {
                if let Some(info) = self.infos.get_mut(&id) {
                    info.state = JobState::Running;
                }
            }
            Event::ListJobs(tx) => {
                let _ = tx.send(self.infos.values().cloned().collect());
            }
        }
    }

    fn spawn(&mut self, job: Job, tx: oneshot::Sender<Result<Outcome>>) {
        let id = self.next_job_id();
        self.infos.insert(
            id,
            JobInfo {
                id,
                kind: job.kind(),
                state: JobState::Queued,
            },
        );

        let launcher = self.launcher.clone();
        let permits = self.permits.clone();
        let job_timeout = self.job_timeout;
        let weak_tx = self.weak_tx.clone();
        self.jobs.spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    let _ = tx.send(Err(Error::Shutdown));
                    return id;
                }
            };
            if let Some(ev_tx) = weak_tx.upgrade() {
                let _ = ev_tx.send(Event::Started(id)).await;
            }
            let res = run_job(id, job, launcher.as_ref(), job_timeout).await;
            let _ = tx.send(res);
            id
        });
    }

    fn handle_exit(&mut self, res: std::result::Result<JobId, JoinError>) {
        match res {
            Ok(id) => {
                debug!("job {} resolved", id);
                self.infos.remove(&id);
            }
            Err(e) => error!("job task failed - {}", e),
        }
    }

    async fn shutdown(&mut self) {
        self.permits.close();
        self.jobs.shutdown().await;
        self.infos.clear();
    }

    fn next_job_id(&mut self) -> JobId {
        let id = self.next_job_id;
        self.next_job_id = self.next_job_id.wrapping_add(1);
        id
    }
}

/// Launch a worker, deliver the job, and wait for its terminal message
async fn run_job<L: Launcher>(
    id: JobId,
    job: Job,
    launcher: &L,
    job_timeout: Option<Duration>,
) -> Result<Outcome> {
    let kind = job.kind();
    let mut worker = launcher.launch(kind).map_err(Error::Launch)?;
    info!("job {} launched {} worker", id, kind);

    let res = match job_timeout {
        Some(limit) => match tokio::time::timeout(limit, exchange(id, worker.conn(), job)).await {
            Ok(res) => res,
            Err(_) => Err(Error::Timeout(limit)),
        },
        None => exchange(id, worker.conn(), job).await,
    };

    match &res {
        Ok(_) => worker.reap().await,
        Err(e) => {
            error!("job {} failed - {}", id, e);
            worker.kill().await;
        }
    }
    res
}

/// Deliver one job over the channel and read until the terminal message
async fn exchange(id: JobId, conn: &mut Connection, job: Job) -> Result<Outcome> {
    match job {
        Job::Parse(req) => {
            conn.send(&req).await?;
            let res: JobResult = conn.recv().await.ok_or(Error::WorkerExited)??;
            Ok(Outcome::Parse(res))
        }
        Job::TestRun(req) => {
            conn.send(&req).await?;
            let mut logs = vec![];
            loop {
                let ev: TestRunEvent = conn.recv().await.ok_or(Error::WorkerExited)??;
                let outcome = match ev {
                    TestRunEvent::Log { message } => {
                        info!("job {} - {}", id, message);
                        logs.push(message);
                        continue;
                    }
                    TestRunEvent::Result { result } => TestRunOutcome::Exited(result),
                    TestRunEvent::Error { message } => TestRunOutcome::Failed(message),
                };
                return Ok(Outcome::TestRun(TestRunReport { logs, outcome }));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::FakeProcessor;
    use crate::ApiFormat;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    /// Launcher whose workers never answer
    struct SilentLauncher;

    impl Launcher for SilentLauncher {
        fn launch(&self, _kind: WorkerKind) -> std::io::Result<Worker> {
            let (local, mut remote) = Connection::pair()?;
            let handle = tokio::spawn(async move {
                let _ = remote.recv::<serde_json::Value>().await;
                std::future::pending::<()>().await;
            });
            Ok(Worker::task(local, handle))
        }
    }

    /// Launcher whose workers exit right after reading the request
    struct CrashingLauncher;

    impl Launcher for CrashingLauncher {
        fn launch(&self, _kind: WorkerKind) -> std::io::Result<Worker> {
            let (local, mut remote) = Connection::pair()?;
            let handle = tokio::spawn(async move {
                let _ = remote.recv::<serde_json::Value>().await;
            });
            Ok(Worker::task(local, handle))
        }
    }

    /// Launcher counting worker tasks that are still alive. Workers never answer.
    #[derive(Default)]
    struct CountingLauncher {
        alive: Arc<AtomicUsize>,
    }

    struct AliveGuard(Arc<AtomicUsize>);

    impl Drop for AliveGuard {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl Launcher for CountingLauncher {
        fn launch(&self, _kind: WorkerKind) -> std::io::Result<Worker> {
            let (local, mut remote) = Connection::pair()?;
            self.alive.fetch_add(1, Ordering::SeqCst);
            let guard = AliveGuard(self.alive.clone());
            let handle = tokio::spawn(async move {
                let _guard = guard;
                let _ = remote.recv::<serde_json::Value>().await;
                std::future::pending::<()>().await;
            });
            Ok(Worker::task(local, handle))
        }
    }

    fn fake_launcher() -> impl Launcher {
        TaskLauncher::new(|_req: &JobRequest| FakeProcessor::default())
    }

    #[tokio::test]
    #[traced_test]
    async fn submit_parse() {
        let sv = Supervisor::start(fake_launcher(), SupervisorConfig::default());

        let res = sv
            .submit_parse(JobRequest::new("/srv", "/tmp/api.raml", ApiFormat::Raml10))
            .await
            .expect("job should resolve");

        assert_matches!(res, JobResult::Success { source, .. } if source == "file:///tmp/api.raml");

        let drained = tokio::time::timeout(Duration::from_secs(1), async {
            while !sv.jobs().await.unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(drained.is_ok(), "resolved jobs are removed from the job list");
    }

    #[tokio::test]
    async fn worker_crash_resolves_job() {
        let sv = Supervisor::start(CrashingLauncher, SupervisorConfig::default());

        let res = sv
            .submit_parse(JobRequest::new("/srv", "/tmp/api.raml", ApiFormat::Raml10))
            .await;

        assert_matches!(res, Err(Error::WorkerExited));
    }

    #[tokio::test]
    async fn timeout_resolves_job() {
        let config = SupervisorConfig {
            job_timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let sv = Supervisor::start(SilentLauncher, config);

        let res = sv
            .submit_test_run(TestRunRequest {
                working_dir: "/srv".into(),
            })
            .await;

        assert_matches!(res, Err(Error::Timeout(d)) if d == Duration::from_millis(50));
    }

    #[tokio::test]
    async fn jobs_beyond_limit_are_queued() {
        let config = SupervisorConfig {
            max_workers: 1,
            job_timeout: None,
        };
        let sv = Supervisor::start(SilentLauncher, config);

        for _ in 0..2 {
            let sv = sv.clone();
            tokio::spawn(async move {
                let _ = sv
                    .submit_parse(JobRequest::new("/srv", "/tmp/api.raml", ApiFormat::Raml10))
                    .await;
            });
        }

        let jobs = loop {
            let jobs = sv.jobs().await.unwrap();
            if jobs.len() == 2 && jobs.iter().any(|j| j.state == JobState::Running) {
                break jobs;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        assert_eq!(
            jobs.iter().filter(|j| j.state == JobState::Running).count(),
            1
        );
        assert_eq!(
            jobs.iter().filter(|j| j.state == JobState::Queued).count(),
            1
        );

        sv.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_resolves_pending_jobs() {
        let sv = Supervisor::start(SilentLauncher, SupervisorConfig::default());

        let pending = {
            let sv = sv.clone();
            tokio::spawn(async move {
                sv.submit_parse(JobRequest::new("/srv", "/tmp/api.raml", ApiFormat::Raml10))
                    .await
            })
        };
        while sv.jobs().await.unwrap().is_empty() {
            tokio::task::yield_now().await;
        }

        sv.shutdown().await;

        assert_matches!(
            pending.await.unwrap(),
            Err(Error::FailedToReceiveResponse(_))
        );
        assert_matches!(sv.jobs().await, Err(Error::FailedToMessageSupervisor));
    }

    #[tokio::test]
    async fn shutdown_stops_running_worker_tasks() {
        let launcher = CountingLauncher::default();
        let alive = launcher.alive.clone();
        let sv = Supervisor::start(launcher, SupervisorConfig::default());

        {
            let sv = sv.clone();
            tokio::spawn(async move {
                let _ = sv
                    .submit_test_run(TestRunRequest {
                        working_dir: "/srv".into(),
                    })
                    .await;
            });
        }
        while !sv
            .jobs()
            .await
            .unwrap()
            .iter()
            .any(|j| j.state == JobState::Running)
        {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        while alive.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        sv.shutdown().await;

        let stopped = tokio::time::timeout(Duration::from_secs(1), async {
            while alive.load(Ordering::SeqCst) > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(stopped.is_ok(), "worker tasks are aborted on shutdown");
    }
}
