//! Dependency-ordered deployment with placeholder-then-patch resolution.
//!
//! [`DependencySequencer`] turns a [`Topology`] into a [`DeploymentPlan`],
//! deploys every component in plan order through the
//! [`DeploymentExecutor`], patches deferred edges once both ends exist, and
//! hands the finished [`Manifest`] to the [`ManifestWriter`].
//!
//! Guarantees:
//! - planning errors and missing artifacts are reported before the first
//!   backend call;
//! - backend calls are issued one at a time, strictly in plan order;
//! - once anything may exist on the backend, every failure carries the
//!   partial state, including an action sent but never confirmed;
//! - the manifest reaches the sink in one commit, after the last patch.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use linkdeploy_backend::{
    Address, Artifact, ArtifactResolver, DeployedComponent, ExecutionBackend, Manifest,
    ManifestSink,
};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::error::{
    DeploymentError, OrchestratorError, PartialDeployment, PartialManifestError, PlanningError,
    Result, Step,
};
use crate::executor::DeploymentExecutor;
use crate::journal::{JournalEntry, PatchAction};
use crate::manifest::{self, ManifestWriter};
use crate::metrics::METRICS;
use crate::obs;
use crate::plan::{self, ArgSource, DeploymentPlan, PlannedPatch};
use crate::topology::Topology;

/// Per-run knobs.
#[derive(Debug, Clone, Default)]
pub struct SequencerOptions {
    /// Upper bound on each backend call; `None` waits as long as the
    /// backend does.
    pub step_timeout: Option<Duration>,
    /// Checked between steps. Never interrupts a call in flight.
    pub cancel: CancellationToken,
    /// Receives each journal entry as soon as it is recorded.
    pub progress: Option<UnboundedSender<JournalEntry>>,
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub plan: DeploymentPlan,
    pub manifest: Manifest,
    pub journal: Vec<JournalEntry>,
}

pub struct DependencySequencer {
    resolver: Arc<dyn ArtifactResolver>,
    backend: Arc<dyn ExecutionBackend>,
    writer: ManifestWriter,
    options: SequencerOptions,
}

impl DependencySequencer {
    pub fn new(
        resolver: Arc<dyn ArtifactResolver>,
        backend: Arc<dyn ExecutionBackend>,
        sink: Arc<dyn ManifestSink>,
    ) -> Self {
        Self {
            resolver,
            backend,
            writer: ManifestWriter::new(sink),
            options: SequencerOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SequencerOptions) -> Self {
        self.options = options;
        self
    }

    /// Writer used for the final commit; also usable to retry a commit
    /// from [`crate::SinkWriteError::manifest`].
    pub fn writer(&self) -> &ManifestWriter {
        &self.writer
    }

    /// Compute the deployment plan without touching any collaborator.
    pub fn plan(&self, topology: &Topology) -> Result<DeploymentPlan> {
        let plan = plan::plan(topology)?;
        obs::emit_plan_computed(&plan.order(), plan.patches.len());
        Ok(plan)
    }

    /// Plan, deploy, patch and commit.
    pub async fn run(&self, topology: &Topology) -> Result<RunReport> {
        let run_id = new_run_id();
        let started = Instant::now();
        let outcome = async {
            let plan = self.plan(topology)?;
            let report = self.execute_run(&run_id, plan).await?;
            self.writer.commit(&report.manifest).await?;
            Ok::<_, OrchestratorError>(report)
        }
        .instrument(obs::run_span(&run_id))
        .await;
        finish(&run_id, started, outcome)
    }

    /// Deploy and patch `plan` without committing the manifest.
    pub async fn execute(&self, plan: &DeploymentPlan) -> Result<RunReport> {
        let run_id = new_run_id();
        let started = Instant::now();
        let outcome = self
            .execute_run(&run_id, plan.clone())
            .instrument(obs::run_span(&run_id))
            .await;
        finish(&run_id, started, outcome)
    }

    async fn execute_run(&self, run_id: &str, plan: DeploymentPlan) -> Result<RunReport> {
        obs::emit_run_started(run_id, plan.steps.len());
        check_plan(&plan)?;
        let artifacts = self.resolve_artifacts(&plan).await?;

        let mut executor = DeploymentExecutor::new(Arc::clone(&self.backend))
            .with_step_timeout(self.options.step_timeout);
        let mut state = RunState {
            progress: self.options.progress.clone(),
            ..RunState::default()
        };

        if self.options.cancel.is_cancelled() {
            return Err(DeploymentError::Cancelled {
                step: Step::QueryDeployer,
            }
            .into());
        }
        let deployer = executor.deployer().await?;

        for (step, artifact) in plan.steps.iter().zip(&artifacts) {
            let at = Step::Deploy {
                component: step.component.clone(),
            };
            if self.options.cancel.is_cancelled() {
                return Err(state.abort(&plan, DeploymentError::Cancelled { step: at }));
            }

            let mut args = Vec::with_capacity(step.constructor_args.len());
            let mut links = BTreeMap::new();
            for source in &step.constructor_args {
                let address = match source {
                    ArgSource::Deployed(dep) => state.address_of(dep)?,
                    ArgSource::Placeholder(_) => Address::placeholder(),
                };
                links.insert(source.component().to_string(), address.clone());
                args.push(address);
            }
            for patch in plan.patches_for(&step.component) {
                links
                    .entry(patch.dependency.clone())
                    .or_insert_with(Address::placeholder);
            }

            let address = match executor.deploy(&at, &artifact.bundle, &args).await {
                Ok(address) => address,
                Err(cause) => return Err(state.abort(&plan, cause)),
            };

            obs::emit_component_deployed(step.position, &step.component, address.as_str());
            state.record(JournalEntry::deployed(
                step.position,
                &step.component,
                address.clone(),
            ));
            state
                .addresses
                .insert(step.component.clone(), address.clone());
            state.deployed.push(DeployedComponent {
                name: step.component.clone(),
                address,
                interface: artifact.interface.clone(),
                links,
            });
        }

        for patch in &plan.patches {
            let at = Step::Patch {
                source: patch.source.clone(),
                dependency: patch.dependency.clone(),
                method: patch.method.clone(),
            };
            if self.options.cancel.is_cancelled() {
                return Err(state.abort(&plan, DeploymentError::Cancelled { step: at }));
            }

            let action = state.patch_action(patch)?;
            let receipt = match executor
                .mutate(
                    &at,
                    &action.target_address,
                    &action.method,
                    &action.argument_addresses,
                )
                .await
            {
                Ok(receipt) => receipt,
                Err(cause) => return Err(state.abort(&plan, cause)),
            };

            obs::emit_patch_applied(
                &action.source,
                &action.dependency,
                &action.method,
                &receipt.transaction_hash,
            );
            state.record_patch(&action);
            state.record(JournalEntry::patched(&action, receipt));
            state.patched += 1;
        }

        let manifest = manifest::assemble(deployer, state.deployed, &plan.aliases);
        Ok(RunReport {
            run_id: run_id.to_string(),
            plan,
            manifest,
            journal: state.journal,
        })
    }

    /// Resolve every bundle up front, in plan order.
    async fn resolve_artifacts(&self, plan: &DeploymentPlan) -> Result<Vec<Artifact>> {
        let mut artifacts = Vec::with_capacity(plan.steps.len());
        for step in &plan.steps {
            artifacts.push(self.resolver.resolve(&step.component).await?);
        }
        Ok(artifacts)
    }
}

fn new_run_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn finish(run_id: &str, started: Instant, outcome: Result<RunReport>) -> Result<RunReport> {
    let duration_ms = started.elapsed().as_millis() as u64;
    match &outcome {
        Ok(report) => {
            obs::emit_run_finished(run_id, duration_ms, report.manifest.len(), true);
        }
        Err(err) => {
            METRICS.inc_runs_failed();
            obs::emit_run_failed(run_id, err);
            let deployed = match err {
                OrchestratorError::PartialManifest(partial) => partial.partial.deployed.len(),
                OrchestratorError::SinkWrite(sink) => sink.manifest.len(),
                _ => 0,
            };
            obs::emit_run_finished(run_id, duration_ms, deployed, false);
        }
    }
    METRICS.flush();
    outcome
}

/// Reject plans whose references cannot be satisfied in order. Plans from
/// [`plan::plan`] always pass; deserialized ones might not.
fn check_plan(plan: &DeploymentPlan) -> std::result::Result<(), PlanningError> {
    if plan.steps.is_empty() {
        return Err(PlanningError::EmptyTopology);
    }
    let mut seen: HashSet<&str> = HashSet::new();
    for step in &plan.steps {
        for source in &step.constructor_args {
            if let ArgSource::Deployed(dep) = source {
                if !seen.contains(dep.as_str()) {
                    return Err(PlanningError::UndeclaredDependency {
                        component: step.component.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
        if !seen.insert(step.component.as_str()) {
            return Err(PlanningError::DuplicateComponent {
                name: step.component.clone(),
            });
        }
    }
    for patch in &plan.patches {
        for name in [&patch.source, &patch.dependency] {
            if !seen.contains(name.as_str()) {
                return Err(PlanningError::UndeclaredDependency {
                    component: patch.source.clone(),
                    dependency: name.clone(),
                });
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RunState {
    addresses: HashMap<String, Address>,
    deployed: Vec<DeployedComponent>,
    journal: Vec<JournalEntry>,
    patched: usize,
    progress: Option<UnboundedSender<JournalEntry>>,
}

impl RunState {
    fn address_of(&self, component: &str) -> std::result::Result<Address, PlanningError> {
        self.addresses
            .get(component)
            .cloned()
            .ok_or_else(|| PlanningError::UndeclaredDependency {
                component: component.to_string(),
                dependency: component.to_string(),
            })
    }

    fn patch_action(
        &self,
        patch: &PlannedPatch,
    ) -> std::result::Result<PatchAction, PlanningError> {
        Ok(PatchAction {
            source: patch.source.clone(),
            dependency: patch.dependency.clone(),
            target_address: self.address_of(&patch.source)?,
            method: patch.method.clone(),
            argument_addresses: vec![self.address_of(&patch.dependency)?],
        })
    }

    fn record(&mut self, entry: JournalEntry) {
        if let Some(progress) = &self.progress {
            // A dropped receiver only means nobody is watching.
            let _ = progress.send(entry.clone());
        }
        self.journal.push(entry);
    }

    fn record_patch(&mut self, action: &PatchAction) {
        if let Some(component) = self.deployed.iter_mut().find(|c| c.name == action.source) {
            if let Some(address) = action.argument_addresses.first() {
                component
                    .links
                    .insert(action.dependency.clone(), address.clone());
            }
        }
    }

    /// Classify a failure by whether anything may exist on the backend.
    fn abort(mut self, plan: &DeploymentPlan, cause: DeploymentError) -> OrchestratorError {
        let in_flight = cause.in_flight();
        if self.deployed.is_empty() && in_flight.is_none() {
            return OrchestratorError::Deployment(cause);
        }
        let sent = match in_flight.as_ref().map(|action| &action.step) {
            Some(Step::Deploy { component }) => Some(component.as_str()),
            _ => None,
        };
        let not_deployed = plan
            .steps
            .iter()
            .filter(|s| !self.addresses.contains_key(&s.component))
            .filter(|s| Some(s.component.as_str()) != sent)
            .map(|s| s.component.clone())
            .collect();
        let pending_patches = plan.patches[self.patched..].to_vec();
        if let Some(action) = &in_flight {
            self.record(JournalEntry::in_doubt(action.clone()));
        }
        PartialManifestError {
            cause,
            partial: Box::new(PartialDeployment {
                deployed: self.deployed,
                not_deployed,
                in_flight,
                pending_patches,
                journal: self.journal,
            }),
        }
        .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::ComponentSpec;
    use linkdeploy_backend::fakes::{MemoryArtifactResolver, MemoryBackend, MemoryManifestSink};
    use linkdeploy_backend::BackendError;

    fn resolver(names: &[&str]) -> Arc<MemoryArtifactResolver> {
        let mut resolver = MemoryArtifactResolver::new();
        for (i, name) in names.iter().enumerate() {
            resolver = resolver.with_artifact(name, &[0x60, 0x80, i as u8]);
        }
        Arc::new(resolver)
    }

    fn chain() -> Topology {
        Topology::new(vec![
            ComponentSpec::new("A"),
            ComponentSpec::new("B").needs(&["A"]),
            ComponentSpec::new("C").needs(&["B"]),
        ])
    }

    #[tokio::test]
    async fn run_commits_manifest_in_plan_order() {
        let backend = Arc::new(MemoryBackend::new());
        let sink = Arc::new(MemoryManifestSink::new());
        let sequencer =
            DependencySequencer::new(resolver(&["A", "B", "C"]), backend.clone(), sink.clone());

        let report = sequencer.run(&chain()).await.unwrap();
        let names: Vec<&str> = report
            .manifest
            .components
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(names, vec!["A", "B", "C"]);
        assert_eq!(report.journal.len(), 3);
        assert_eq!(sink.read().await.unwrap(), Some(report.manifest.clone()));

        let b = report.manifest.get("B").unwrap();
        assert_eq!(Some(&b.links["A"]), report.manifest.address_of("A"));
    }

    #[tokio::test]
    async fn execute_does_not_commit() {
        let sink = Arc::new(MemoryManifestSink::new());
        let sequencer = DependencySequencer::new(
            resolver(&["A", "B", "C"]),
            Arc::new(MemoryBackend::new()),
            sink.clone(),
        );
        let plan = sequencer.plan(&chain()).unwrap();
        let report = sequencer.execute(&plan).await.unwrap();
        assert_eq!(report.manifest.len(), 3);
        assert_eq!(sink.commit_attempts(), 0);
    }

    #[tokio::test]
    async fn failed_patch_leaves_pending_patch_and_placeholder_link() {
        let backend = Arc::new(MemoryBackend::new());
        // Calls 0..=2 are deploys; call 3 is the only patch.
        backend.fail_call(3, BackendError::Unavailable("node restarting".into()));
        let sequencer = DependencySequencer::new(
            resolver(&["Ticket", "EventManager", "Marketplace"]),
            backend,
            Arc::new(MemoryManifestSink::new()),
        );

        let partial = match sequencer.run(&Topology::ticketing()).await {
            Err(OrchestratorError::PartialManifest(partial)) => partial,
            other => panic!("expected partial manifest, got {other:?}"),
        };
        assert!(partial.cause.is_transient());
        assert_eq!(partial.partial.deployed.len(), 3);
        assert!(partial.partial.not_deployed.is_empty());
        assert_eq!(partial.partial.pending_patches.len(), 1);
        assert!(partial.partial.deployed[0].links["EventManager"].is_placeholder());
    }

    #[tokio::test]
    async fn hand_built_plan_with_forward_reference_is_rejected() {
        let sequencer = DependencySequencer::new(
            resolver(&["A", "B"]),
            Arc::new(MemoryBackend::new()),
            Arc::new(MemoryManifestSink::new()),
        );
        let plan = DeploymentPlan {
            steps: vec![
                plan::PlanStep {
                    position: 0,
                    component: "B".into(),
                    constructor_args: vec![ArgSource::Deployed("A".into())],
                },
                plan::PlanStep {
                    position: 1,
                    component: "A".into(),
                    constructor_args: vec![],
                },
            ],
            patches: vec![],
            aliases: Default::default(),
        };
        let err = sequencer.execute(&plan).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Planning(PlanningError::UndeclaredDependency { .. })
        ));
    }
}
