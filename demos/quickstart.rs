//! A trivial shell driving the orchestration core end to end.
//!
//! Not part of the library surface — a demonstration that wires the five
//! components together the way a UI/API layer would, without inventing an
//! HTTP or RPC framing for them (none is prescribed; see §6).

use std::sync::Arc;

use agentmesh::bus::{BusHandler, Message, MessageKind, Priority, Recipient};
use agentmesh::cache::ContentCache;
use agentmesh::config::CoreConfig;
use agentmesh::depth::{ContentOutcome, DepthLadder, PrerequisiteGraph};
use agentmesh::domain_types::{Artifact, ConceptId, Modality, ParticipantName, Provenance};
use agentmesh::error::Error;
use agentmesh::observability::{NoopSink, RecordingSink};
use agentmesh::provider::domain_types::ProviderDescriptor;
use agentmesh::provider::{ContentRequest, Provider, ProviderName, ProviderRouter};
use agentmesh::admission::TaskSpec;
use agentmesh::AdmissionQueue;
use async_trait::async_trait;

struct EchoHandler;

#[async_trait]
impl BusHandler for EchoHandler {
    async fn handle(&self, message: &Message) -> Result<(), String> {
        tracing::info!(id = %message.id(), "tutor-ui handled message");
        Ok(())
    }
}

struct StaticProvider;

#[async_trait]
impl Provider for StaticProvider {
    async fn generate(&self, request: &ContentRequest) -> Result<Artifact, String> {
        Ok(Artifact::new(
            format!("content for {}", request.concept),
            Provenance::Provider("demo-provider".to_string()),
        ))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("agentmesh=info".parse()?),
        )
        .init();

    let config = CoreConfig::default();
    let sink = RecordingSink::new();

    let bus = agentmesh::MessageBus::new(config.clone(), Arc::clone(&sink) as _);
    let ui = ParticipantName::try_new("tutor-ui")?;
    bus.subscribe(ui.clone(), Arc::new(EchoHandler));
    bus.route(Message::new(
        ParticipantName::anonymous(),
        Recipient::Participant(ui),
        MessageKind::Event,
        Priority::High,
        &b"hello"[..],
    )?)?;

    let router = Arc::new(ProviderRouter::new(Arc::new(NoopSink)));
    router.register(
        ProviderDescriptor {
            name: ProviderName::try_new("demo-provider")?,
            priority: 0,
            timeout: std::time::Duration::from_secs(5),
            rate_limit: 60,
        },
        Arc::new(StaticProvider),
    );

    let cache = Arc::new(ContentCache::new(config.clone(), Arc::new(NoopSink)));
    let ladder = DepthLadder::new(
        Arc::clone(&router),
        Arc::clone(&cache),
        Arc::new(NoopSink),
        PrerequisiteGraph::new(),
    );
    let recursion = ConceptId::try_new("recursion")?;
    let animation = Modality::try_new("animation")?;
    ladder.init(&recursion, 1, 5)?;
    let outcome = ladder
        .content_at(&recursion, 0, &animation, None, None)
        .await?;
    match outcome {
        ContentOutcome::Ready(artifact) => {
            tracing::info!(bytes = artifact.estimated_size(), "materialized level-0 artifact");
        }
        ContentOutcome::Gated(path) => {
            tracing::info!(steps = path.steps.len(), "blocked on prerequisites");
        }
    }

    let admission = AdmissionQueue::<u32>::new(config, Arc::new(NoopSink));
    let handle = admission.enqueue(TaskSpec::new(|| async { Ok::<u32, Error>(42) }));
    let result = handle.await?;
    tracing::info!(result, "admission task completed");

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    tracing::info!(events = sink.events().len(), "bus events recorded");

    Ok(())
}
