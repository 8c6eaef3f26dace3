use startosis_engine::backend::MockContainerBackend;
use startosis_engine::context::Context;
use startosis_engine::engine::{RunError, StartosisInterpreter, StartosisRunner, StartosisValidator};
use startosis_engine::instructions::Collaborators;
use startosis_engine::modules::archive::pack_directory;
use startosis_engine::modules::InMemoryModuleProvider;
use startosis_engine::network::mock::NetworkCall;
use startosis_engine::network::{RecordingServiceNetwork, StaticFactsEngine};
use startosis_engine::ServiceId;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

const DATASTORE_SCRIPT: &str = r#"
print("Adding datastore")
datastore = add_service(
    service_id = "datastore",
    service_config = struct(
        container_image_name = "kurtosistech/example-datastore-server",
        used_ports = {"grpc": struct(number = 1323, protocol = "TCP")},
    ),
)
exec(service_id = "datastore", command = ["echo", datastore.ip_address])
stop_service("datastore")
"#;

struct Harness {
    network: Arc<RecordingServiceNetwork>,
    backend: Arc<MockContainerBackend>,
    provider: Arc<InMemoryModuleProvider>,
    runner: StartosisRunner,
}

fn harness_with(network: RecordingServiceNetwork, backend: MockContainerBackend) -> Harness {
    let network = Arc::new(network);
    let backend = Arc::new(backend);
    let provider = Arc::new(InMemoryModuleProvider::new());
    let collaborators = Collaborators::new(network.clone(), Arc::new(StaticFactsEngine::new()));
    let interpreter = StartosisInterpreter::new(collaborators, provider.clone());
    let runner = StartosisRunner::new(interpreter, StartosisValidator::new(backend.clone()));
    Harness {
        network,
        backend,
        provider,
        runner,
    }
}

fn harness() -> Harness {
    harness_with(RecordingServiceNetwork::new(), MockContainerBackend::new())
}

#[tokio::test]
async fn test_script_runs_end_to_end() {
    let harness = harness();
    let mut sink = Vec::new();

    let response = harness
        .runner
        .run_script(&Context::background(), DATASTORE_SCRIPT, false, &mut sink)
        .await;

    assert!(response.is_success(), "{:?}", response.error);
    assert_eq!(response.output, "Adding datastore\n");
    assert_eq!(response.instructions.len(), 3);
    assert_eq!(
        response.instructions[0].result.as_deref(),
        Some("service 'datastore' added with IP 172.16.0.1")
    );
    assert_eq!(
        harness.network.calls(),
        vec![
            NetworkCall::AddService(ServiceId::new("datastore")),
            NetworkCall::Exec(
                ServiceId::new("datastore"),
                vec!["echo".to_string(), "172.16.0.1".to_string()],
            ),
            NetworkCall::StopService(ServiceId::new("datastore")),
        ]
    );
    assert_eq!(
        harness
            .backend
            .fetch_count("kurtosistech/example-datastore-server"),
        1
    );

    let streamed = String::from_utf8(sink).unwrap();
    let logged: String = response
        .instructions
        .iter()
        .map(|entry| format!("{}\n", entry.canonical_instruction))
        .collect();
    assert_eq!(streamed, logged);
}

#[tokio::test]
async fn test_dry_run_is_deterministic_and_touches_nothing() {
    let harness = harness();
    let ctx = Context::background();

    let mut first = Vec::new();
    let mut second = Vec::new();
    let a = harness
        .runner
        .run_script(&ctx, DATASTORE_SCRIPT, true, &mut first)
        .await;
    let b = harness
        .runner
        .run_script(&ctx, DATASTORE_SCRIPT, true, &mut second)
        .await;

    assert!(a.is_success() && b.is_success());
    assert!(a.dry_run);
    assert_eq!(first, second);
    assert_eq!(a.instructions, b.instructions);
    assert_ne!(a.run_id, b.run_id);
    assert!(harness.network.calls().is_empty());
    assert!(String::from_utf8(first)
        .unwrap()
        .starts_with("# from: startosis_script[3:24]\nadd_service(\n"));
}

#[tokio::test]
async fn test_interpretation_error_stops_the_run() {
    let harness = harness();
    let mut sink = Vec::new();

    let response = harness
        .runner
        .run_script(&Context::background(), "print(\"x\")\nundefined_call()\n", false, &mut sink)
        .await;

    let Some(RunError::Interpretation(err)) = &response.error else {
        panic!("expected interpretation error, got {:?}", response.error);
    };
    assert_eq!(err.frames.len(), 1);
    assert_eq!(err.frames[0].description, "undefined: undefined_call");
    assert!(response.output.is_empty());
    assert!(response.instructions.is_empty());
    assert!(sink.is_empty());
}

#[tokio::test]
async fn test_missing_image_fails_validation_before_execution() {
    let harness = harness_with(
        RecordingServiceNetwork::new(),
        MockContainerBackend::with_missing_images(["kurtosistech/example-datastore-server"]),
    );
    let mut sink = Vec::new();

    let response = harness
        .runner
        .run_script(&Context::background(), DATASTORE_SCRIPT, false, &mut sink)
        .await;

    let Some(RunError::Validation { errors }) = &response.error else {
        panic!("expected validation error, got {:?}", response.error);
    };
    assert_eq!(errors.len(), 1);
    assert!(errors[0]
        .to_string()
        .starts_with("Failed fetching the required image 'kurtosistech/example-datastore-server'"));
    assert_eq!(response.output, "Adding datastore\n");
    assert!(harness.network.calls().is_empty());
    assert!(sink.is_empty());
}

#[tokio::test]
async fn test_failed_instruction_reports_partial_log() {
    let harness = harness_with(
        RecordingServiceNetwork::new().with_exec_result("datastore", 3, "no such file"),
        MockContainerBackend::new(),
    );
    let mut sink = Vec::new();

    let response = harness
        .runner
        .run_script(&Context::background(), DATASTORE_SCRIPT, false, &mut sink)
        .await;

    let Some(RunError::Execution(err)) = &response.error else {
        panic!("expected execution error, got {:?}", response.error);
    };
    assert_eq!(err.instruction.as_ref().map(|i| i.number), Some(2));
    assert!(err
        .to_string()
        .starts_with("An error occurred executing instruction (number 2): \n# from: startosis_script[10:5]\nexec("));
    assert_eq!(response.instructions.len(), 1);
    assert!(!harness
        .network
        .calls()
        .contains(&NetworkCall::StopService(ServiceId::new("datastore"))));
}

#[tokio::test]
async fn test_uploaded_module_main_receives_params() {
    let harness = harness();
    let package = TempDir::new().unwrap();
    fs::write(
        package.path().join("main.star"),
        r#"
load("github.com/acme/datastore/lib/config.star", "datastore_config")

def main(args):
    print("Deploying " + args.name)
    add_service(service_id = args.name, service_config = datastore_config)
"#,
    )
    .unwrap();
    fs::create_dir_all(package.path().join("lib")).unwrap();
    fs::write(
        package.path().join("lib/config.star"),
        "datastore_config = struct(container_image_name = \"kurtosistech/example-datastore-server\")\n",
    )
    .unwrap();
    let archive = pack_directory(package.path()).unwrap();
    let mut sink = Vec::new();

    let response = harness
        .runner
        .run_local_module(
            &Context::background(),
            "github.com/acme/datastore",
            archive,
            r#"{"name": "primary"}"#,
            false,
            &mut sink,
        )
        .await;

    assert!(response.is_success(), "{:?}", response.error);
    assert_eq!(response.output, "Deploying primary\n");
    assert_eq!(harness.network.service_ids(), vec![ServiceId::new("primary")]);
    assert!(response.instructions[0]
        .canonical_instruction
        .starts_with("# from: github.com/acme/datastore/main.star[6:16]\n"));
    assert!(!harness.provider.is_empty());
}

#[tokio::test]
async fn test_remote_module_without_main_file_fails() {
    let harness = harness();
    harness
        .provider
        .add("github.com/acme/empty/lib.star", "x = 1\n");
    let mut sink = Vec::new();

    let response = harness
        .runner
        .run_remote_module(&Context::background(), "github.com/acme/empty", "", false, &mut sink)
        .await;

    let Some(RunError::Interpretation(err)) = &response.error else {
        panic!("expected interpretation error, got {:?}", response.error);
    };
    assert!(err.message.starts_with("Cannot load module 'github.com/acme/empty'"));
}

#[tokio::test]
async fn test_service_added_by_an_earlier_run_can_be_used() {
    let harness = harness();
    let ctx = Context::background();
    let add = "add_service(service_id = \"db\", service_config = struct(container_image_name = \"postgres\"))\n";

    let first = harness.runner.run_script(&ctx, add, false, &mut Vec::<u8>::new()).await;
    assert!(first.is_success(), "{:?}", first.error);

    let second = harness
        .runner
        .run_script(
            &ctx,
            "exec(\"db\", [\"ping\", \"{{kurtosis:db.ip_address}}\"])\nstop_service(\"db\")\n",
            false,
            &mut Vec::<u8>::new(),
        )
        .await;
    assert!(second.is_success(), "{:?}", second.error);
    assert_eq!(
        harness.network.calls()[1..],
        [
            NetworkCall::Exec(
                ServiceId::new("db"),
                vec!["ping".to_string(), "172.16.0.1".to_string()],
            ),
            NetworkCall::StopService(ServiceId::new("db")),
        ]
    );
}

#[tokio::test]
async fn test_run_response_serializes_error_kind() {
    let harness = harness();
    let mut sink = Vec::new();
    let response = harness
        .runner
        .run_script(
            &Context::background(),
            "remove_service(\"ghost\")\nstop_service(\"ghost\")\n",
            false,
            &mut sink,
        )
        .await;

    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["error"]["kind"], "validation");
    assert_eq!(json["dry_run"], false);
}

#[tokio::test]
async fn test_cancelled_run_reports_interruption() {
    let harness = harness();
    let (ctx, handle) = Context::with_cancel();
    handle.cancel();
    let mut sink = Vec::new();

    let response = harness
        .runner
        .run_script(&ctx, DATASTORE_SCRIPT, false, &mut sink)
        .await;

    assert!(matches!(response.error, Some(RunError::Interpretation(_))));
    assert!(harness.network.calls().is_empty());
}
