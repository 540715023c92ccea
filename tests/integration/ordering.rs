//! Dependency-order and concurrency properties.
//!
//! The core ordering guarantee: a task is never submitted before every
//! data/ordering predecessor has reached a successful terminal state.
//! Checked against the backend's own event sequence across repeated
//! concurrent runs with varied per-task delays.

use std::time::Duration;

use stratus::backend::{JobBackend, JobHandle, JobRequest, JobState};
use stratus::core::task::{ExecSpec, InputBinding, TaskName, TaskSpec};

use crate::fixtures::{fast_params, stub_run, BackendEvent, StubBackend, TaskPlan};

fn mk(name: &str) -> TaskSpec {
    TaskSpec::new(name, ExecSpec::new("{image}", vec!["run".to_string()], vec![]))
}

/// Cross-shaped DAG: a -> c, b -> c, c -> d, b -> e.
fn cross_specs() -> Vec<TaskSpec> {
    vec![
        mk("a").with_output("out"),
        mk("b").with_output("out"),
        mk("c")
            .with_input(InputBinding::from_task("left", "a", "out"))
            .with_input(InputBinding::from_task("right", "b", "out"))
            .with_output("out"),
        mk("d").with_input(InputBinding::from_task("in", "c", "out")),
        mk("e").with_input(InputBinding::from_task("in", "b", "out")),
    ]
}

const CROSS_EDGES: [(&str, &str); 4] = [("a", "c"), ("b", "c"), ("c", "d"), ("b", "e")];

/// Index of the first matching event, if any.
fn position(events: &[BackendEvent], wanted: &BackendEvent) -> Option<usize> {
    events.iter().position(|event| event == wanted)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_predecessors_always_finish_before_submission() {
    // Vary per-task delays across iterations to shake out interleavings.
    for iteration in 0..10u64 {
        let plans: Vec<(&str, TaskPlan)> = ["a", "b", "c", "d", "e"]
            .iter()
            .enumerate()
            .map(|(index, name)| {
                let delay = Duration::from_millis((iteration * 7 + index as u64 * 3) % 20);
                (*name, TaskPlan::Succeed { delay })
            })
            .collect();

        let (run, backend) = stub_run(cross_specs(), plans, fast_params("file:///root"));
        let report = run.execute().await.unwrap();
        assert!(report.succeeded(), "iteration {}: {:?}", iteration, report);

        let events = backend.events();
        for (from, to) in CROSS_EDGES {
            let finished = position(
                &events,
                &BackendEvent::Finished(TaskName::new(from), true),
            )
            .unwrap_or_else(|| panic!("iteration {}: {} never finished", iteration, from));
            let submitted = position(&events, &BackendEvent::Submitted(TaskName::new(to)))
                .unwrap_or_else(|| panic!("iteration {}: {} never submitted", iteration, to));
            assert!(
                finished < submitted,
                "iteration {}: {} submitted at {} before {} finished at {}",
                iteration,
                to,
                submitted,
                from,
                finished
            );
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_independent_tasks_overlap() {
    // Two roots with real delays should actually run concurrently.
    let plans = vec![
        ("a", TaskPlan::Succeed { delay: Duration::from_millis(50) }),
        ("b", TaskPlan::Succeed { delay: Duration::from_millis(50) }),
    ];
    let (run, backend) = stub_run(
        vec![mk("a"), mk("b")],
        plans,
        fast_params("file:///root"),
    );
    run.execute().await.unwrap();
    assert_eq!(backend.max_running(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrency_limit_holds_under_load() {
    let names = ["t1", "t2", "t3", "t4", "t5", "t6"];
    let specs: Vec<TaskSpec> = names.iter().map(|n| mk(n)).collect();
    let plans: Vec<(&str, TaskPlan)> = names
        .iter()
        .map(|n| (*n, TaskPlan::Succeed { delay: Duration::from_millis(20) }))
        .collect();

    let mut params = fast_params("file:///root");
    params.max_concurrency = 2;
    let (run, backend) = stub_run(specs, plans, params);
    run.execute().await.unwrap();

    assert!(
        backend.max_running() <= 2,
        "in-flight high-water mark was {}",
        backend.max_running()
    );
}

#[tokio::test]
async fn test_simultaneously_ready_tasks_launch_in_name_order() {
    let mut params = fast_params("file:///root");
    params.max_concurrency = 1;
    let (run, backend) = stub_run(
        vec![mk("zeta"), mk("alpha"), mk("mid")],
        vec![],
        params,
    );
    run.execute().await.unwrap();

    assert_eq!(
        backend.submitted_order(),
        vec![
            TaskName::new("alpha"),
            TaskName::new("mid"),
            TaskName::new("zeta"),
        ]
    );
}

#[tokio::test]
async fn test_terminal_handle_repolls_identically() {
    let backend = StubBackend::new(vec![("solo", TaskPlan::succeed())]);
    let handle = backend
        .submit(JobRequest {
            task: TaskName::new("solo"),
            image: "image:latest".to_string(),
            command: vec!["run".to_string()],
            args: vec![],
        })
        .await
        .unwrap();

    let first = backend.status(&handle).await.unwrap();
    assert_eq!(first, JobState::Succeeded);
    for _ in 0..5 {
        assert_eq!(backend.status(&handle).await.unwrap(), first);
    }
    // Cancelling an already-terminal handle is a no-op.
    backend.cancel(&handle).await.unwrap();
    assert_eq!(backend.status(&handle).await.unwrap(), first);
}

#[tokio::test]
async fn test_unknown_handle_is_an_error() {
    let backend = StubBackend::new(vec![]);
    assert!(backend.status(&JobHandle::new()).await.is_err());
}
