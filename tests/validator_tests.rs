use async_trait::async_trait;
use startosis_engine::backend::{BackendError, ContainerBackend, MockContainerBackend};
use startosis_engine::context::Context;
use startosis_engine::engine::{StartosisInterpreter, StartosisValidator};
use startosis_engine::instructions::{Collaborators, KurtosisInstruction};
use startosis_engine::modules::InMemoryModuleProvider;
use startosis_engine::network::{RecordingServiceNetwork, StaticFactsEngine};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn instructions(script: &str) -> Vec<Box<dyn KurtosisInstruction>> {
    let interpreter = StartosisInterpreter::new(
        Collaborators::new(
            Arc::new(RecordingServiceNetwork::new()),
            Arc::new(StaticFactsEngine::new()),
        ),
        Arc::new(InMemoryModuleProvider::new()),
    );
    interpreter
        .interpret(&Context::background(), script)
        .unwrap()
        .instructions
}

fn services_script(count: usize) -> String {
    (0..count)
        .map(|i| {
            format!(
                "add_service(service_id = \"svc-{i}\", service_config = struct(container_image_name = \"org/image-{i}\"))\n"
            )
        })
        .collect()
}

#[tokio::test]
async fn test_valid_instructions_fetch_every_image_once() {
    let backend = Arc::new(MockContainerBackend::new());
    let validator = StartosisValidator::new(backend.clone());
    let script = format!(
        "{}add_service(service_id = \"again\", service_config = struct(container_image_name = \"org/image-0\"))\n",
        services_script(3)
    );

    validator
        .validate(&Context::background(), &instructions(&script))
        .await
        .unwrap();

    assert_eq!(backend.total_fetches(), 3);
    assert_eq!(backend.fetch_count("org/image-0"), 1);
}

#[tokio::test]
async fn test_every_missing_image_is_reported_sorted() {
    let backend = Arc::new(MockContainerBackend::with_missing_images([
        "org/image-3",
        "org/image-1",
    ]));
    let validator = StartosisValidator::new(backend.clone());

    let errors = validator
        .validate(&Context::background(), &instructions(&services_script(4)))
        .await
        .unwrap_err();

    let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
    assert_eq!(
        messages,
        vec![
            "Failed fetching the required image 'org/image-1': Image 'org/image-1' could not be fetched: manifest unknown",
            "Failed fetching the required image 'org/image-3': Image 'org/image-3' could not be fetched: manifest unknown",
        ]
    );
    assert_eq!(backend.total_fetches(), 4);
}

#[tokio::test]
async fn test_service_from_an_earlier_run_passes_validation() {
    let backend = Arc::new(MockContainerBackend::new());
    let validator = StartosisValidator::new(backend.clone());
    let script = format!("{}stop_service(\"db\")\nexec(\"db\", [\"ls\"])\n", services_script(1));

    validator
        .validate(&Context::background(), &instructions(&script))
        .await
        .unwrap();
    assert_eq!(backend.total_fetches(), 1);
}

#[tokio::test]
async fn test_removed_service_stops_validation_before_images() {
    let backend = Arc::new(MockContainerBackend::new());
    let validator = StartosisValidator::new(backend.clone());
    let script = format!(
        "{}remove_service(\"svc-0\")\nstart_service(\"svc-0\")\n",
        services_script(1)
    );

    let errors = validator
        .validate(&Context::background(), &instructions(&script))
        .await
        .unwrap_err();

    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].instruction.as_ref().map(|i| i.number), Some(3));
    assert_eq!(
        errors[0].to_string(),
        "Error while validating instruction (number 3) start_service(service_id=\"svc-0\"): Service 'svc-0' is removed by an earlier instruction"
    );
    assert_eq!(backend.total_fetches(), 0);
}

/// Backend that records how many fetches overlap
#[derive(Default)]
struct GaugeBackend {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl ContainerBackend for GaugeBackend {
    fn name(&self) -> &str {
        "gauge"
    }

    async fn fetch_image(&self, _image: &str) -> Result<(), BackendError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_image_checks_respect_limit() {
    let backend = Arc::new(GaugeBackend::default());
    let validator =
        StartosisValidator::new(backend.clone()).with_max_concurrent_image_checks(Some(2));

    validator
        .validate(&Context::background(), &instructions(&services_script(6)))
        .await
        .unwrap();

    let peak = backend.peak.load(Ordering::SeqCst);
    assert!((1..=2).contains(&peak), "peak concurrency was {peak}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unbounded_image_checks_overlap() {
    let backend = Arc::new(GaugeBackend::default());
    let validator = StartosisValidator::new(backend.clone());

    validator
        .validate(&Context::background(), &instructions(&services_script(4)))
        .await
        .unwrap();

    assert!(backend.peak.load(Ordering::SeqCst) > 1);
}

#[tokio::test]
async fn test_cancelled_context_fails_image_checks() {
    let backend = Arc::new(MockContainerBackend::new().with_fetch_delay(Duration::from_secs(5)));
    let validator = StartosisValidator::new(backend);
    let ctx = Context::background().with_timeout(Duration::from_millis(20));

    let errors = validator
        .validate(&ctx, &instructions(&services_script(2)))
        .await
        .unwrap_err();

    assert_eq!(errors.len(), 2);
    assert!(errors
        .iter()
        .all(|e| e.message.starts_with("Failed fetching the required image")));
}

/// Backend whose fetches hang until dropped
#[derive(Default)]
struct HangingBackend {
    started: AtomicUsize,
    in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ContainerBackend for HangingBackend {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn fetch_image(&self, _image: &str) -> Result<(), BackendError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(())
    }
}

#[tokio::test]
async fn test_dropping_validation_stops_image_checks() {
    let backend = Arc::new(HangingBackend::default());
    let validator = StartosisValidator::new(backend.clone());
    let instructions = instructions(&services_script(3));

    let ctx = Context::background();
    let validation = validator.validate(&ctx, &instructions);
    assert!(tokio::time::timeout(Duration::from_millis(50), validation)
        .await
        .is_err());
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(backend.started.load(Ordering::SeqCst), 3);
    assert_eq!(backend.in_flight.load(Ordering::SeqCst), 0);
}
