use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use tokio::task::{AbortHandle, Id, JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::{
    error::{Result, TaskcondError},
    report::{OutputMode, Reporter, RunReport},
    task::{ExecutionBody, Task, TaskRegistry},
    util::default_workers,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Done,
    Skipped,
    Failed,
    FailedPropagated,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskState::Pending | TaskState::Running)
    }

    /// Done and skipped tasks both unblock their dependents.
    pub fn is_satisfied(self) -> bool {
        matches!(self, TaskState::Done | TaskState::Skipped)
    }

    pub fn is_failed(self) -> bool {
        matches!(self, TaskState::Failed | TaskState::FailedPropagated)
    }
}

/// Interval between scheduling passes when none is configured.
pub const DEFAULT_CHECK_FREQ: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Run tasks even when their outputs are up to date.
    pub force: bool,
    /// Maximum concurrently running tasks; `None` uses every available core.
    pub workers: Option<usize>,
    /// Only allow bodies that can run in an isolated worker process.
    pub use_processes: bool,
    /// Interval between scheduling passes.
    pub check_freq: Duration,
    /// Give up once nothing has been runnable for this long; `None` waits forever.
    pub stall_timeout: Option<Duration>,
    pub output: OutputMode,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            force: false,
            workers: None,
            use_processes: false,
            check_freq: DEFAULT_CHECK_FREQ,
            stall_timeout: None,
            output: OutputMode::Group,
        }
    }
}

type Finished = (String, std::result::Result<Result<()>, JoinError>);

/// Mutable state of a single `run_tasks` call.
struct RunState<'a> {
    order: Vec<&'a Task>,
    states: HashMap<String, TaskState>,
    failures: Vec<(String, String)>,
    running: HashMap<Id, String>,
}

impl<'a> RunState<'a> {
    fn new(order: Vec<&'a Task>) -> Self {
        let states = order
            .iter()
            .map(|task| (task.name().to_string(), TaskState::Pending))
            .collect();
        Self {
            order,
            states,
            failures: Vec::new(),
            running: HashMap::new(),
        }
    }

    fn state(&self, name: &str) -> TaskState {
        self.states.get(name).copied().unwrap_or(TaskState::Pending)
    }

    fn set(&mut self, name: &str, state: TaskState) {
        if let Some(current) = self.states.get_mut(name) {
            *current = state;
        }
    }

    fn start(&mut self, name: &str, handle: AbortHandle) {
        self.running.insert(handle.id(), name.to_string());
        self.set(name, TaskState::Running);
    }

    fn all_terminal(&self) -> bool {
        self.states.values().all(|state| state.is_terminal())
    }

    fn pending(&self) -> Vec<String> {
        self.order
            .iter()
            .map(|task| task.name())
            .filter(|name| self.state(name) == TaskState::Pending)
            .map(str::to_string)
            .collect()
    }

    fn finish(
        &mut self,
        joined: std::result::Result<Finished, JoinError>,
        reporter: &mut dyn Reporter,
    ) {
        let (name, outcome) = match joined {
            Ok((name, outcome)) => {
                self.running.retain(|_, running| *running != name);
                (name, outcome)
            }
            // Only the wrapper future was lost, e.g. aborted during shutdown.
            Err(e) => match self.running.remove(&e.id()) {
                Some(name) => (name, Err(e)),
                None => {
                    error!("worker pool lost an untracked task: {}", e);
                    return;
                }
            },
        };

        let reason = match outcome {
            Ok(Ok(())) => {
                info!(task = %name, "task finished");
                self.set(&name, TaskState::Done);
                reporter.task_done(&name);
                return;
            }
            Ok(Err(e)) => e.to_string(),
            Err(e) if e.is_panic() => format!("worker panicked: {}", e),
            Err(e) => format!("worker lost: {}", e),
        };

        error!(task = %name, %reason, "task failed");
        self.set(&name, TaskState::Failed);
        reporter.task_failed(&name, &reason);
        self.failures.push((name, reason));
    }

    fn into_report(self, stalled: Vec<String>) -> RunReport {
        let states = self
            .order
            .iter()
            .map(|task| (task.name().to_string(), self.state(task.name())))
            .collect();
        RunReport {
            states,
            failures: self.failures,
            stalled,
        }
    }
}

/// Drives a registry's tasks to completion for a set of targets.
///
/// One coordinator owns all run state; only `Task::execute` runs on workers.
pub struct Orchestrator<'a> {
    registry: &'a TaskRegistry,
    options: RunOptions,
}

impl<'a> Orchestrator<'a> {
    pub fn new(registry: &'a TaskRegistry, options: RunOptions) -> Self {
        Self { registry, options }
    }

    fn worker_slots(&self) -> usize {
        self.options.workers.unwrap_or_else(default_workers).max(1)
    }

    pub async fn run_tasks(
        &self,
        targets: &[String],
        reporter: &mut dyn Reporter,
    ) -> Result<RunReport> {
        if targets.is_empty() {
            return Err(TaskcondError::NoTargets);
        }
        if let Some(missing) = targets.iter().find(|t| !self.registry.contains(t)) {
            return Err(TaskcondError::TargetNotFound(missing.clone()));
        }

        self.registry.validate()?;

        let order = self.registry.execution_order(targets)?;
        let tasks = order
            .iter()
            .map(|name| self.registry.get(name))
            .collect::<Result<Vec<_>>>()?;

        if self.options.use_processes {
            if let Some(task) = tasks
                .iter()
                .find(|task| matches!(task.body(), ExecutionBody::Function(_)))
            {
                return Err(TaskcondError::NotTransferable(task.name().to_string()));
            }
        }

        let slots = self.worker_slots();
        let check_freq = self.options.check_freq;
        info!(
            tasks = tasks.len(),
            workers = slots,
            force = self.options.force,
            "starting run: {}",
            order.join(" -> ")
        );

        let mut run = RunState::new(tasks);
        let mut workers: JoinSet<Finished> = JoinSet::new();
        let mut stall_since: Option<Instant> = None;
        let mut stalled = Vec::new();

        reporter.run_started(run.order.len());

        loop {
            while let Some(joined) = workers.try_join_next() {
                run.finish(joined, reporter);
            }

            let progressed = self.schedule(&mut run, &mut workers, slots, reporter);

            if run.all_terminal() {
                break;
            }

            if workers.is_empty() && !progressed {
                let since = match stall_since {
                    Some(since) => since,
                    None => {
                        let pending = run.pending();
                        warn!(?pending, "no runnable tasks are currently submitted");
                        reporter.stalled(&pending);
                        *stall_since.insert(Instant::now())
                    }
                };

                if let Some(limit) = self.options.stall_timeout {
                    if since.elapsed() >= limit {
                        stalled = run.pending();
                        warn!(?stalled, "giving up on tasks that never became runnable");
                        break;
                    }
                }

                tokio::time::sleep(check_freq).await;
                continue;
            }

            stall_since = None;

            if !workers.is_empty() {
                let next = tokio::time::timeout(check_freq, workers.join_next()).await;
                if let Ok(Some(joined)) = next {
                    run.finish(joined, reporter);
                }
            }
        }

        let report = run.into_report(stalled);
        info!(success = report.is_success(), "{}", report.summary_line());
        reporter.finished(&report);
        Ok(report)
    }

    /// Moves every ready task forward until a pass changes nothing.
    ///
    /// Skips and propagated failures are applied in place, so dependents see
    /// them within the same call.
    fn schedule(
        &self,
        run: &mut RunState<'a>,
        workers: &mut JoinSet<Finished>,
        slots: usize,
        reporter: &mut dyn Reporter,
    ) -> bool {
        let mut progressed = false;

        loop {
            let mut changed = false;

            for i in 0..run.order.len() {
                let task = run.order[i];
                let name = task.name();

                if run.state(name) != TaskState::Pending {
                    continue;
                }

                if let Some(failed) = task.depends().iter().find(|dep| run.state(dep).is_failed()) {
                    warn!(task = %name, dependency = %failed, "dependency failed, not running");
                    run.set(name, TaskState::FailedPropagated);
                    reporter.task_propagated(name, failed);
                    changed = true;
                    continue;
                }

                if !task.depends().iter().all(|dep| run.state(dep).is_satisfied()) {
                    continue;
                }

                if !task.inputs_present() {
                    debug!(task = %name, "waiting for input files");
                    continue;
                }

                if !self.options.force && !task.should_run() {
                    info!(task = %name, "outputs up to date, skipping");
                    run.set(name, TaskState::Skipped);
                    reporter.task_skipped(name);
                    changed = true;
                    continue;
                }

                if workers.len() >= slots {
                    continue;
                }

                info!(task = %name, "submitting task");
                let handle = self.submit(task, workers);
                run.start(name, handle);
                reporter.task_started(name);
                changed = true;
            }

            if !changed {
                break;
            }
            progressed = true;
        }

        progressed
    }

    fn submit(&self, task: &Task, workers: &mut JoinSet<Finished>) -> AbortHandle {
        let name = task.name().to_string();
        let task = task.clone();
        let output = self.options.output;

        // The inner spawn isolates panics so the outcome is always attributed.
        workers.spawn(async move {
            let outcome = tokio::spawn(async move { task.execute(output).await }).await;
            (name, outcome)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{FileTime, set_file_mtime};
    use std::{
        fs,
        path::Path,
        sync::{
            Arc, Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        thread,
    };
    use tempfile::TempDir;

    use crate::report::{FAILURE_LINE, SUCCESS_LINE};

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Started(String),
        Skipped(String),
        Done(String),
        Failed(String, String),
        Propagated(String, String),
        Stalled(Vec<String>),
        Finished(&'static str),
    }

    #[derive(Default)]
    struct Recorder {
        events: Vec<Event>,
    }

    impl Recorder {
        fn count(&self, matcher: impl Fn(&Event) -> bool) -> usize {
            self.events.iter().filter(|&e| matcher(e)).count()
        }
    }

    impl Reporter for Recorder {
        fn task_started(&mut self, name: &str) {
            self.events.push(Event::Started(name.to_string()));
        }
        fn task_skipped(&mut self, name: &str) {
            self.events.push(Event::Skipped(name.to_string()));
        }
        fn task_done(&mut self, name: &str) {
            self.events.push(Event::Done(name.to_string()));
        }
        fn task_failed(&mut self, name: &str, reason: &str) {
            self.events
                .push(Event::Failed(name.to_string(), reason.to_string()));
        }
        fn task_propagated(&mut self, name: &str, failed_dependency: &str) {
            self.events.push(Event::Propagated(
                name.to_string(),
                failed_dependency.to_string(),
            ));
        }
        fn stalled(&mut self, pending: &[String]) {
            self.events.push(Event::Stalled(pending.to_vec()));
        }
        fn finished(&mut self, report: &RunReport) {
            self.events.push(Event::Finished(report.summary_line()));
        }
    }

    type Log = Arc<Mutex<Vec<String>>>;

    fn logging_task(name: &str, depends: &[&str], log: &Log) -> Task {
        let log = Arc::clone(log);
        let entry = name.to_string();
        Task::builder(name)
            .depends(depends.iter().copied())
            .function(format!("record_{}", name), move || {
                log.lock().unwrap().push(entry.clone());
                Ok(())
            })
            .build()
            .unwrap()
    }

    fn failing_task(name: &str, depends: &[&str]) -> Task {
        Task::builder(name)
            .depends(depends.iter().copied())
            .function("failing_func", || {
                anyhow::bail!("This task was designed to fail.")
            })
            .build()
            .unwrap()
    }

    fn registry(tasks: Vec<Task>) -> TaskRegistry {
        let mut registry = TaskRegistry::new();
        for task in tasks {
            registry.register(task).unwrap();
        }
        registry
    }

    fn fast() -> RunOptions {
        RunOptions {
            check_freq: Duration::from_millis(10),
            ..RunOptions::default()
        }
    }

    fn targets(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn touch(path: &Path, unix_secs: i64) {
        fs::write(path, b"").unwrap();
        set_file_mtime(path, FileTime::from_unix_time(unix_secs, 0)).unwrap();
    }

    #[tokio::test]
    async fn runs_dependencies_first() {
        let log: Log = Arc::default();
        let registry = registry(vec![
            logging_task("A", &[], &log),
            logging_task("B", &["A"], &log),
        ]);

        let mut recorder = Recorder::default();
        let report = Orchestrator::new(&registry, fast())
            .run_tasks(&targets(&["B"]), &mut recorder)
            .await
            .unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["A", "B"]);
        assert!(report.is_success());
        assert_eq!(report.state("A"), Some(TaskState::Done));
        assert_eq!(report.state("B"), Some(TaskState::Done));
        assert_eq!(recorder.events.last(), Some(&Event::Finished(SUCCESS_LINE)));
    }

    #[tokio::test]
    async fn deep_chain_runs_in_causal_order() {
        let log: Log = Arc::default();
        let registry = registry(vec![
            logging_task("package", &["test", "docs"], &log),
            logging_task("test", &["build"], &log),
            logging_task("docs", &["build"], &log),
            logging_task("build", &["codegen"], &log),
            logging_task("codegen", &[], &log),
        ]);

        Orchestrator::new(&registry, fast())
            .run_tasks(&targets(&["package"]), &mut Recorder::default())
            .await
            .unwrap();

        let log = log.lock().unwrap();
        let position = |name: &str| log.iter().position(|n| n == name).unwrap();
        assert_eq!(log.len(), 5);
        assert!(position("codegen") < position("build"));
        assert!(position("build") < position("test"));
        assert!(position("build") < position("docs"));
        assert!(position("test") < position("package"));
        assert!(position("docs") < position("package"));
    }

    #[tokio::test]
    async fn ignores_tasks_outside_the_closure() {
        let log: Log = Arc::default();
        let registry = registry(vec![
            logging_task("A", &[], &log),
            logging_task("B", &["A"], &log),
            logging_task("unrelated", &[], &log),
        ]);

        let report = Orchestrator::new(&registry, fast())
            .run_tasks(&targets(&["B"]), &mut Recorder::default())
            .await
            .unwrap();

        assert_eq!(report.states.len(), 2);
        assert_eq!(report.state("unrelated"), None);
        assert!(!log.lock().unwrap().contains(&"unrelated".to_string()));
    }

    #[tokio::test]
    async fn failure_propagates_to_dependents_only() {
        let log: Log = Arc::default();
        let registry = registry(vec![
            logging_task("A", &[], &log),
            failing_task("B", &["A"]),
            logging_task("C", &["B"], &log),
            logging_task("D", &["C"], &log),
            logging_task("independent", &[], &log),
        ]);

        let mut recorder = Recorder::default();
        let report = Orchestrator::new(&registry, fast())
            .run_tasks(&targets(&["D", "independent"]), &mut recorder)
            .await
            .unwrap();

        let log = log.lock().unwrap();
        assert!(log.contains(&"A".to_string()));
        assert!(log.contains(&"independent".to_string()));
        assert!(!log.contains(&"C".to_string()));
        assert!(!log.contains(&"D".to_string()));

        assert_eq!(report.state("B"), Some(TaskState::Failed));
        assert_eq!(report.state("C"), Some(TaskState::FailedPropagated));
        assert_eq!(report.state("D"), Some(TaskState::FailedPropagated));
        assert_eq!(report.state("independent"), Some(TaskState::Done));
        assert_eq!(report.summary_line(), FAILURE_LINE);

        assert_eq!(
            report.failures,
            vec![(
                "B".to_string(),
                "Function 'failing_func' failed: This task was designed to fail.".to_string()
            )]
        );
        assert!(recorder.events.contains(&Event::Propagated("C".into(), "B".into())));
        assert!(recorder.events.contains(&Event::Propagated("D".into(), "C".into())));
        assert_eq!(recorder.count(|e| matches!(e, Event::Started(n) if n == "C")), 0);
        assert_eq!(recorder.events.last(), Some(&Event::Finished(FAILURE_LINE)));
    }

    #[tokio::test]
    async fn shell_failure_is_contained() {
        let registry = registry(vec![
            Task::builder("broken").shell("exit 2").build().unwrap(),
            Task::builder("fine").shell("true").build().unwrap(),
            Task::builder("after")
                .depends(["broken"])
                .shell("true")
                .build()
                .unwrap(),
        ]);

        let mut recorder = Recorder::default();
        let report = Orchestrator::new(&registry, fast())
            .run_tasks(&targets(&["after", "fine"]), &mut recorder)
            .await
            .unwrap();

        assert_eq!(report.state("fine"), Some(TaskState::Done));
        assert_eq!(report.state("after"), Some(TaskState::FailedPropagated));
        let failed = recorder.events.iter().find_map(|e| match e {
            Event::Failed(name, reason) if name == "broken" => Some(reason.clone()),
            _ => None,
        });
        assert_eq!(
            failed.as_deref(),
            Some("Shell command failed (exit code 2): exit 2")
        );
    }

    #[tokio::test]
    async fn skipped_task_unblocks_dependents() {
        let dir = TempDir::new().unwrap();
        let file_a = dir.path().join("a.txt");
        let file_b = dir.path().join("b.txt");
        touch(&file_a, 1_000);

        let produced = file_b.clone();
        let registry = registry(vec![
            Task::builder("A")
                .function("noop", || Ok(()))
                .outputs([file_a.clone()])
                .build()
                .unwrap(),
            Task::builder("B")
                .depends(["A"])
                .function("create_file", move || {
                    fs::write(&produced, b"b")?;
                    Ok(())
                })
                .outputs([file_b.clone()])
                .build()
                .unwrap(),
        ]);

        let mut recorder = Recorder::default();
        let report = Orchestrator::new(&registry, fast())
            .run_tasks(&targets(&["B"]), &mut recorder)
            .await
            .unwrap();

        assert!(file_b.is_file());
        assert_eq!(report.state("A"), Some(TaskState::Skipped));
        assert_eq!(report.state("B"), Some(TaskState::Done));
        assert!(recorder.events.contains(&Event::Skipped("A".into())));
        assert_eq!(recorder.count(|e| matches!(e, Event::Stalled(_))), 0);
    }

    #[tokio::test]
    async fn force_reruns_up_to_date_tasks() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.txt");
        let output = dir.path().join("out.txt");
        touch(&input, 1_000);
        touch(&output, 2_000);

        let log: Log = Arc::default();
        let recorded = Arc::clone(&log);
        let registry = registry(vec![
            Task::builder("A")
                .function("record", move || {
                    recorded.lock().unwrap().push("A".to_string());
                    Ok(())
                })
                .inputs([input])
                .outputs([output])
                .build()
                .unwrap(),
        ]);

        let report = Orchestrator::new(&registry, fast())
            .run_tasks(&targets(&["A"]), &mut Recorder::default())
            .await
            .unwrap();
        assert_eq!(report.state("A"), Some(TaskState::Skipped));
        assert!(log.lock().unwrap().is_empty());

        let forced = RunOptions {
            force: true,
            ..fast()
        };
        let report = Orchestrator::new(&registry, forced)
            .run_tasks(&targets(&["A"]), &mut Recorder::default())
            .await
            .unwrap();
        assert_eq!(report.state("A"), Some(TaskState::Done));
        assert_eq!(*log.lock().unwrap(), vec!["A"]);
    }

    #[tokio::test]
    async fn independent_tasks_run_in_parallel() {
        let sleep_time = Duration::from_millis(300);
        let registry = registry(
            ["A", "B", "C"]
                .into_iter()
                .map(|name| {
                    Task::builder(name)
                        .function("sleep", move || {
                            thread::sleep(sleep_time);
                            Ok(())
                        })
                        .build()
                        .unwrap()
                })
                .collect(),
        );

        let options = RunOptions {
            workers: Some(3),
            ..fast()
        };
        let start = Instant::now();
        let report = Orchestrator::new(&registry, options)
            .run_tasks(&targets(&["A", "B", "C"]), &mut Recorder::default())
            .await
            .unwrap();
        let elapsed = start.elapsed();

        assert!(report.is_success());
        assert!(elapsed < sleep_time * 2, "took {:?}", elapsed);
    }

    #[tokio::test]
    async fn never_exceeds_worker_limit() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let tasks = (0..6)
            .map(|i| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                Task::builder(format!("t{}", i))
                    .function("tracked", move || {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(30));
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .build()
                    .unwrap()
            })
            .collect();
        let registry = registry(tasks);
        let names: Vec<String> = registry.task_names().map(str::to_string).collect();

        let options = RunOptions {
            workers: Some(2),
            ..fast()
        };
        let report = Orchestrator::new(&registry, options)
            .run_tasks(&names, &mut Recorder::default())
            .await
            .unwrap();

        assert!(report.is_success());
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn rejects_empty_and_unknown_targets() {
        let log: Log = Arc::default();
        let registry = registry(vec![logging_task("A", &[], &log)]);
        let orchestrator = Orchestrator::new(&registry, fast());

        let err = orchestrator
            .run_tasks(&[], &mut Recorder::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TaskcondError::NoTargets));
        assert_eq!(err.to_string(), "No target tasks specified");

        let err = orchestrator
            .run_tasks(&targets(&["Z"]), &mut Recorder::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Task 'Z' not found");
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_graph_fails_before_running_anything() {
        let log: Log = Arc::default();
        let registry = registry(vec![
            logging_task("ok", &[], &log),
            logging_task("C", &["D"], &log),
            logging_task("D", &["C"], &log),
        ]);

        let mut recorder = Recorder::default();
        let err = Orchestrator::new(&registry, fast())
            .run_tasks(&targets(&["ok"]), &mut recorder)
            .await
            .unwrap_err();

        assert!(matches!(err, TaskcondError::CyclicDependency(_)));
        assert!(log.lock().unwrap().is_empty());
        assert!(recorder.events.is_empty());
    }

    #[tokio::test]
    async fn missing_input_warns_about_stall() {
        let dir = TempDir::new().unwrap();
        let registry = registry(vec![
            Task::builder("A")
                .function("noop", || Ok(()))
                .inputs([dir.path().join("non_existent_input.txt")])
                .outputs([dir.path().join("a.txt")])
                .build()
                .unwrap(),
        ]);

        let options = RunOptions {
            check_freq: Duration::from_millis(5),
            stall_timeout: Some(Duration::from_millis(60)),
            ..RunOptions::default()
        };
        let mut recorder = Recorder::default();
        let report = Orchestrator::new(&registry, options)
            .run_tasks(&targets(&["A"]), &mut recorder)
            .await
            .unwrap();

        assert_eq!(
            recorder.count(|e| matches!(e, Event::Stalled(_))),
            1,
            "one warning per stall episode"
        );
        assert!(recorder.events.contains(&Event::Stalled(vec!["A".to_string()])));
        assert_eq!(report.stalled, vec!["A".to_string()]);
        assert_eq!(report.state("A"), Some(TaskState::Pending));
        assert_eq!(report.summary_line(), FAILURE_LINE);
    }

    #[tokio::test]
    async fn external_input_resumes_a_stalled_run() {
        let dir = TempDir::new().unwrap();
        let input_a = dir.path().join("a.in");
        let input_b = dir.path().join("b.in");
        let registry = registry(vec![
            Task::builder("A")
                .function("noop", || Ok(()))
                .inputs([input_a.clone()])
                .build()
                .unwrap(),
            Task::builder("B")
                .depends(["A"])
                .function("noop", || Ok(()))
                .inputs([input_b.clone()])
                .build()
                .unwrap(),
        ]);

        let supplier = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            fs::write(&input_a, b"a").unwrap();
            tokio::time::sleep(Duration::from_millis(150)).await;
            fs::write(&input_b, b"b").unwrap();
        });

        let options = RunOptions {
            check_freq: Duration::from_millis(5),
            ..RunOptions::default()
        };
        let mut recorder = Recorder::default();
        let orchestrator = Orchestrator::new(&registry, options);
        let target_list = targets(&["B"]);
        let run = orchestrator.run_tasks(&target_list, &mut recorder);
        let report = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("run finishes once its inputs exist")
            .unwrap();
        supplier.await.unwrap();

        assert!(report.is_success());
        assert!(report.stalled.is_empty());

        let stalls: Vec<&Event> = recorder
            .events
            .iter()
            .filter(|e| matches!(e, Event::Stalled(_)))
            .collect();
        assert_eq!(
            stalls,
            vec![
                &Event::Stalled(vec!["A".to_string(), "B".to_string()]),
                &Event::Stalled(vec!["B".to_string()]),
            ],
            "a new stall after progress warns again"
        );

        let position = |event: &Event| recorder.events.iter().position(|e| e == event).unwrap();
        assert!(position(&Event::Done("A".into())) < position(&Event::Stalled(vec!["B".into()])));
        assert_eq!(recorder.events.last(), Some(&Event::Finished(SUCCESS_LINE)));
    }

    #[tokio::test]
    async fn lost_worker_fails_its_task() {
        let registry = registry(vec![Task::builder("A").build().unwrap()]);
        let mut run = RunState::new(vec![registry.get("A").unwrap()]);
        let mut workers: JoinSet<Finished> = JoinSet::new();

        let handle = workers.spawn(std::future::pending::<Finished>());
        run.start("A", handle);
        workers.abort_all();
        let joined = workers.join_next().await.unwrap();

        let mut recorder = Recorder::default();
        run.finish(joined, &mut recorder);

        assert_eq!(run.state("A"), TaskState::Failed);
        assert!(run.all_terminal());
        assert!(run.running.is_empty());
        assert_eq!(run.failures.len(), 1);
        assert!(matches!(
            &recorder.events[..],
            [Event::Failed(name, reason)] if name == "A" && reason.contains("cancelled")
        ));
    }

    #[tokio::test]
    async fn input_produced_by_dependency_is_awaited() {
        let dir = TempDir::new().unwrap();
        let generated = dir.path().join("generated.txt");
        let consumed = dir.path().join("consumed.txt");

        let target = generated.clone();
        let copy_from = generated.clone();
        let copy_to = consumed.clone();
        let registry = registry(vec![
            Task::builder("generate")
                .function("write", move || {
                    fs::write(&target, b"data")?;
                    Ok(())
                })
                .outputs([generated.clone()])
                .build()
                .unwrap(),
            Task::builder("consume")
                .depends(["generate"])
                .function("copy", move || {
                    fs::copy(&copy_from, &copy_to)?;
                    Ok(())
                })
                .inputs([generated.clone()])
                .outputs([consumed.clone()])
                .build()
                .unwrap(),
        ]);

        let report = Orchestrator::new(&registry, fast())
            .run_tasks(&targets(&["consume"]), &mut Recorder::default())
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(fs::read(&consumed).unwrap(), b"data");
    }

    #[tokio::test]
    async fn process_workers_reject_in_process_functions() {
        let log: Log = Arc::default();
        let registry = registry(vec![
            Task::builder("shell").shell("true").build().unwrap(),
            logging_task("func", &["shell"], &log),
        ]);
        let options = RunOptions {
            use_processes: true,
            ..fast()
        };
        let orchestrator = Orchestrator::new(&registry, options);

        let err = orchestrator
            .run_tasks(&targets(&["func"]), &mut Recorder::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TaskcondError::NotTransferable(name) if name == "func"));

        let report = orchestrator
            .run_tasks(&targets(&["shell"]), &mut Recorder::default())
            .await
            .unwrap();
        assert!(report.is_success());
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn repeated_runs_start_from_fresh_state() {
        let log: Log = Arc::default();
        let registry = registry(vec![
            logging_task("A", &[], &log),
            failing_task("B", &[]),
        ]);
        let orchestrator = Orchestrator::new(&registry, fast());

        for _ in 0..2 {
            let report = orchestrator
                .run_tasks(&targets(&["A", "B"]), &mut Recorder::default())
                .await
                .unwrap();
            assert_eq!(report.state("A"), Some(TaskState::Done));
            assert_eq!(report.state("B"), Some(TaskState::Failed));
            assert_eq!(report.failures.len(), 1);
        }

        assert_eq!(*log.lock().unwrap(), vec!["A", "A"]);
    }

    #[test]
    fn state_classification() {
        assert!(TaskState::Done.is_satisfied());
        assert!(TaskState::Skipped.is_satisfied());
        assert!(!TaskState::Failed.is_satisfied());
        assert!(TaskState::FailedPropagated.is_failed());
        assert!(!TaskState::Running.is_terminal());
        assert!(!TaskState::Pending.is_terminal());
        assert!(TaskState::Skipped.is_terminal());
    }
}
