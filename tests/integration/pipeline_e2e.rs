//! Full pipeline execution tests.
//!
//! The first group runs the churn-shaped chain against the scripted
//! backend and checks the report and artifact handoff. The second group
//! loads a definition file and runs real local processes end to end.

use std::path::Path;
use std::sync::Arc;

use stratus::backend::LocalBackend;
use stratus::core::task::{TaskName, TaskRunState};
use stratus::storage::FsStorage;
use stratus::{PipelineDefinition, PipelineRun, RunStatus};

use crate::fixtures::{churn_specs, fast_params, stub_run};

#[tokio::test]
async fn test_churn_chain_all_succeed() {
    let (run, backend) = stub_run(churn_specs(), vec![], fast_params("file:///pipeline-root"));
    let report = run.execute().await.unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    assert!(report.root_cause.is_none());
    for name in ["preprocess", "train", "register"] {
        assert_eq!(
            report.tasks[&TaskName::new(name)].state,
            TaskRunState::Succeeded,
            "{} should have succeeded",
            name
        );
    }
    assert_eq!(
        backend.submitted_order(),
        vec![
            TaskName::new("preprocess"),
            TaskName::new("train"),
            TaskName::new("register"),
        ]
    );
}

#[tokio::test]
async fn test_register_receives_trains_model_location() {
    let (run, backend) = stub_run(churn_specs(), vec![], fast_params("file:///pipeline-root"));
    let report = run.execute().await.unwrap();
    assert!(report.succeeded());

    // register's input resolves to exactly the location train wrote.
    let request = backend.request_for(&TaskName::new("register")).unwrap();
    let model_uri = "file:///pipeline-root/train/model";
    let pos = request
        .args
        .iter()
        .position(|arg| arg == "--model")
        .expect("register gets a --model argument");
    assert_eq!(request.args[pos + 1], model_uri);

    // The report agrees on where the model ended up.
    let train_report = &report.tasks[&TaskName::new("train")];
    assert_eq!(train_report.outputs.len(), 1);
    assert_eq!(train_report.outputs[0].uri, model_uri);
}

#[tokio::test]
async fn test_run_parameters_substituted_into_requests() {
    let (run, backend) = stub_run(churn_specs(), vec![], fast_params("file:///pipeline-root"));
    run.execute().await.unwrap();

    let preprocess = backend.request_for(&TaskName::new("preprocess")).unwrap();
    assert_eq!(preprocess.image, "trainer:v1");
    assert_eq!(preprocess.args[0], "--project_id");
    assert_eq!(preprocess.args[1], "demo-project");

    let register = backend.request_for(&TaskName::new("register")).unwrap();
    assert!(register.args.contains(&"local".to_string()));
}

#[tokio::test]
async fn test_preprocess_outputs_handed_to_it_before_it_runs() {
    let (run, backend) = stub_run(churn_specs(), vec![], fast_params("file:///pipeline-root"));
    run.execute().await.unwrap();

    // The producing job is told where to write, rather than choosing.
    let request = backend.request_for(&TaskName::new("preprocess")).unwrap();
    assert!(request
        .args
        .contains(&"file:///pipeline-root/preprocess/train".to_string()));
    assert!(request
        .args
        .contains(&"file:///pipeline-root/preprocess/test".to_string()));
}

// Definition-driven runs against the local process backend.

const LOCAL_DEMO: &str = r#"
[pipeline]
name = "local-demo"
description = "Producer/consumer pair exercising the local backend"

[tasks.produce]
command = ["sh", "-c", 'mkdir -p "$(dirname "$2")" && echo data > "$2"', "produce"]
outputs = ["out"]

[tasks.consume]
command = ["sh", "-c", 'test -s "$2"', "consume"]
inputs = { data = "produce/out" }
"#;

#[tokio::test]
async fn test_definition_runs_local_processes_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().display().to_string();

    let definition = PipelineDefinition::from_toml_str(LOCAL_DEMO).unwrap();
    let dag = definition.build_dag().unwrap();
    let run = PipelineRun::new(
        definition.pipeline.name.clone(),
        dag,
        fast_params(&root),
        Arc::new(LocalBackend::new()),
        Arc::new(FsStorage::new()),
    )
    .unwrap();

    let report = run.execute().await.unwrap();
    assert!(report.succeeded(), "report: {:?}", report);

    // The artifact is on disk where the report says.
    let produce = &report.tasks[&TaskName::new("produce")];
    assert_eq!(produce.outputs[0].uri, format!("{}/produce/out", root));
    assert!(Path::new(&produce.outputs[0].uri).exists());
}

#[tokio::test]
async fn test_consumer_fails_when_producer_lies() {
    // The producer exits 0 without writing its artifact; the consumer's
    // own check then fails, and the failure is the consumer's.
    let toml = r#"
[pipeline]
name = "liar"

[tasks.produce]
command = ["true"]
outputs = ["out"]

[tasks.consume]
command = ["sh", "-c", 'test -s "$2"', "consume"]
inputs = { data = "produce/out" }
"#;
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().display().to_string();

    let definition = PipelineDefinition::from_toml_str(toml).unwrap();
    let run = PipelineRun::new(
        "liar",
        definition.build_dag().unwrap(),
        fast_params(&root),
        Arc::new(LocalBackend::new()),
        Arc::new(FsStorage::new()),
    )
    .unwrap();

    let report = run.execute().await.unwrap();
    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(
        report.root_cause.unwrap().task,
        Some(TaskName::new("consume"))
    );
}

// Demo definition file.

#[test]
fn test_demo_definition_validates_and_compiles() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/churn.toml");
    let definition = PipelineDefinition::load(&path).unwrap();
    assert_eq!(definition.pipeline.name, "churn-prediction");

    let dag = definition.build_dag().unwrap();
    dag.validate().unwrap();
    assert_eq!(dag.task_count(), 4);

    // ingest -> preprocess -> train -> register
    assert_eq!(
        dag.predecessors(&TaskName::new("train")),
        vec![TaskName::new("preprocess")]
    );
    assert_eq!(
        dag.predecessors(&TaskName::new("register")),
        vec![TaskName::new("train")]
    );

    let json = definition.compile_json().unwrap();
    let parsed = PipelineDefinition::from_json_str(&json).unwrap();
    assert_eq!(parsed, definition);
}
