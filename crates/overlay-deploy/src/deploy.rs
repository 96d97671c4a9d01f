//! Idempotent deployment of one overlay.
//!
//! Every run asks the emitter which resources already exist and never keeps
//! deployment state of its own, so a second run against an unchanged
//! environment creates nothing and an interrupted run resumes where it
//! stopped.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use overlay_core::{DeploymentResult, OverlayError, OverlayKey, OverlayResult};
use overlay_graph::AnnotationStore;

use crate::emitter::{count_present, Emitter, GenerateOptions};
use crate::executor::{Executor, ExecutorError};
use crate::retry::{RetryFailure, RetryPolicy};

/// Parameters of one deploy.
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub exercise: String,
    pub scenario: String,
    pub layer: String,
    pub output_directory: PathBuf,
    pub dry_run: bool,
}

impl DeployRequest {
    pub fn key(&self) -> OverlayKey {
        OverlayKey::new(&self.exercise, &self.scenario, &self.layer)
    }
}

fn deploy_error(failure: RetryFailure) -> OverlayError {
    match failure.error {
        ExecutorError::Transient { message, diagnostics } => OverlayError::DeployTransient {
            attempts: failure.attempts,
            message,
            diagnostics,
        },
        ExecutorError::Fatal {
            message,
            diagnostics,
        } => OverlayError::DeployFatal {
            message,
            diagnostics,
        },
    }
}

pub struct DeployPipeline {
    store: AnnotationStore,
    emitter: Arc<dyn Emitter>,
    executor: Arc<dyn Executor>,
    retry: RetryPolicy,
}

impl DeployPipeline {
    pub fn new(
        store: AnnotationStore,
        emitter: Arc<dyn Emitter>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        Self {
            store,
            emitter,
            executor,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Deploy the overlay named by `request`.
    ///
    /// Executor failures come back as `DeployTransient` (retries exhausted)
    /// or `DeployFatal`, both carrying the executor's raw output. A run that
    /// completes but cannot be validated returns `success = false`.
    pub async fn deploy(&self, request: &DeployRequest) -> OverlayResult<DeploymentResult> {
        let key = request.key();
        let resources = self
            .store
            .query(Some(&request.exercise), Some(&request.scenario), &request.layer)
            .await?;

        if resources.is_empty() {
            warn!(overlay = %key, "Nothing to deploy");
            return Ok(DeploymentResult {
                success: false,
                error_message: Some(format!("overlay {} has no annotated resources", key)),
                dry_run: request.dry_run,
                ..Default::default()
            });
        }

        let options = GenerateOptions {
            auto_detect_existing: true,
            output_dir: request.output_directory.clone(),
        };
        tokio::fs::create_dir_all(&options.output_dir).await?;
        let directory = self.emitter.generate(&resources, &options).await?;

        let before = self.emitter.detect_existing(&directory).await?;
        let preexisting = count_present(&resources, &before);
        info!(overlay = %key, resources = resources.len(), preexisting, "Generated deployment");

        let dir = directory.as_path();
        let executor = self.executor.as_ref();
        let plan = self
            .retry
            .run("plan", move || executor.plan(dir))
            .await
            .map_err(deploy_error)?;
        info!(
            overlay = %key,
            to_import = plan.to_import,
            to_add = plan.to_add,
            to_change = plan.to_change,
            to_destroy = plan.to_destroy,
            "Planned deployment"
        );

        let mut warnings = Vec::new();
        if plan.to_destroy > 0 {
            warnings.push(format!("plan destroys {} resources", plan.to_destroy));
        }
        if plan.to_change > 0 {
            warnings.push(format!("plan changes {} existing resources in place", plan.to_change));
        }

        if request.dry_run {
            return Ok(DeploymentResult {
                resources_deployed: 0,
                resources_preexisting: preexisting,
                resources_newly_created: plan.to_add,
                success: true,
                error_message: None,
                dry_run: true,
                warnings,
            });
        }

        if plan.has_changes() {
            // A failed apply may already have changed state, which makes the
            // saved plan stale; every retry plans again before applying.
            let mut first_attempt = true;
            let applied = self
                .retry
                .run("apply", move || {
                    let replan = !std::mem::replace(&mut first_attempt, false);
                    async move {
                        if replan {
                            executor.plan(dir).await?;
                        }
                        executor.apply(dir).await
                    }
                })
                .await
                .map_err(deploy_error)?;
            info!(
                overlay = %key,
                imported = applied.imported,
                added = applied.added,
                "Applied deployment"
            );
        } else {
            info!(overlay = %key, "Plan has no changes, skipping apply");
        }

        let after = self.emitter.detect_existing(&directory).await?;
        let present = count_present(&resources, &after);
        let expected = resources.len();
        let success = present >= expected;
        let created = present.saturating_sub(preexisting);
        if success {
            info!(overlay = %key, created, present, "Deployment complete");
        } else {
            warn!(overlay = %key, expected, present, "Deployment incomplete");
        }

        Ok(DeploymentResult {
            resources_deployed: present,
            resources_preexisting: preexisting,
            resources_newly_created: created,
            success,
            error_message: (!success).then(|| {
                format!(
                    "post-deploy validation failed: expected {} resources \
                     in the live environment, found {}",
                    expected, present
                )
            }),
            dry_run: false,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::ResourceRef;
    use crate::executor::{ApplySummary, PlanSummary};
    use async_trait::async_trait;
    use overlay_core::{AnnotatedResource, OverlayAnnotation};
    use overlay_graph::{MemoryGraph, NodeSeed};
    use std::collections::{BTreeSet, VecDeque};
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;

    const VM_TYPE: &str = "Microsoft.Compute/virtualMachines";

    /// A live environment plus the executor's state, in memory.
    #[derive(Default)]
    struct SimState {
        generated: Vec<String>,
        live: BTreeSet<String>,
        managed: BTreeSet<String>,
        failures: VecDeque<ExecutorError>,
        /// Apply creates this many resources and then fails with the error.
        apply_failure: Option<(usize, ExecutorError)>,
        /// A saved plan exists and nothing has changed since it was made.
        plan_current: bool,
        plans: usize,
        applies: usize,
    }

    #[derive(Default, Clone)]
    struct SimEnv {
        state: Arc<Mutex<SimState>>,
    }

    impl SimEnv {
        fn live(&self) -> BTreeSet<String> {
            self.state.lock().unwrap().live.clone()
        }

        fn with<R>(&self, f: impl FnOnce(&mut SimState) -> R) -> R {
            f(&mut self.state.lock().unwrap())
        }
    }

    #[async_trait]
    impl Emitter for SimEnv {
        async fn generate(
            &self,
            resources: &[AnnotatedResource],
            options: &GenerateOptions,
        ) -> OverlayResult<PathBuf> {
            assert!(options.auto_detect_existing);
            let addresses: Vec<String> = resources
                .iter()
                .map(|r| r.annotation.source_address.clone())
                .collect();
            std::fs::write(options.output_dir.join("main.tf.json"), addresses.join("\n"))?;
            self.with(|s| s.generated = addresses);
            Ok(options.output_dir.clone())
        }

        async fn detect_existing(&self, _output_dir: &Path) -> OverlayResult<Vec<ResourceRef>> {
            Ok(self.with(|s| {
                s.generated
                    .iter()
                    .filter(|a| s.live.contains(*a))
                    .map(|a| ResourceRef {
                        address: a.clone(),
                        resource_id: String::new(),
                    })
                    .collect()
            }))
        }
    }

    #[async_trait]
    impl Executor for SimEnv {
        async fn plan(&self, _directory: &Path) -> Result<PlanSummary, ExecutorError> {
            self.with(|s| {
                s.plans += 1;
                if let Some(err) = s.failures.pop_front() {
                    return Err(err);
                }
                let missing = s.generated.iter().filter(|a| !s.live.contains(*a)).count();
                let unmanaged = s
                    .generated
                    .iter()
                    .filter(|a| s.live.contains(*a) && !s.managed.contains(*a))
                    .count();
                s.plan_current = true;
                Ok(PlanSummary {
                    to_import: unmanaged,
                    to_add: missing,
                    ..Default::default()
                })
            })
        }

        async fn apply(&self, _directory: &Path) -> Result<ApplySummary, ExecutorError> {
            self.with(|s| {
                s.applies += 1;
                if !std::mem::replace(&mut s.plan_current, false) {
                    return Err(ExecutorError::classify(
                        "apply failed",
                        "Error: Saved plan is stale",
                    ));
                }
                if let Some(err) = s.failures.pop_front() {
                    return Err(err);
                }
                let mut summary = ApplySummary::default();
                for address in s.generated.clone() {
                    if s.live.contains(&address) {
                        if s.managed.insert(address) {
                            summary.imported += 1;
                        }
                        continue;
                    }
                    if s.apply_failure.as_ref().map(|(after, _)| *after) == Some(summary.added) {
                        if let Some((_, err)) = s.apply_failure.take() {
                            return Err(err);
                        }
                    }
                    s.live.insert(address.clone());
                    s.managed.insert(address);
                    summary.added += 1;
                }
                Ok(summary)
            })
        }
    }

    struct Fixture {
        env: SimEnv,
        pipeline: DeployPipeline,
        output: tempfile::TempDir,
    }

    /// An overlay of `names` VMs under ex1/red@base.
    async fn fixture(names: &[&str]) -> Fixture {
        let graph = MemoryGraph::new();
        let store = AnnotationStore::new(Arc::new(graph.clone()));
        let annotations: Vec<OverlayAnnotation> = names
            .iter()
            .map(|name| {
                let node_id = graph.add_node(NodeSeed::new(VM_TYPE, name, "t1", "base"));
                OverlayAnnotation {
                    node_id,
                    resource_id: String::new(),
                    resource_kind: VM_TYPE.to_string(),
                    resource_name: name.to_string(),
                    exercise: "ex1".to_string(),
                    scenario: "red".to_string(),
                    layer: "base".to_string(),
                    role: None,
                    source_address: format!("azurerm_linux_virtual_machine.{}", name),
                    source_location: "main.tf:1".to_string(),
                }
            })
            .collect();
        if !annotations.is_empty() {
            store.annotate_bulk(&annotations).await.unwrap().into_result().unwrap();
        }

        let env = SimEnv::default();
        let pipeline = DeployPipeline::new(store, Arc::new(env.clone()), Arc::new(env.clone()))
            .with_retry(RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2)));
        Fixture {
            env,
            pipeline,
            output: tempfile::tempdir().unwrap(),
        }
    }

    fn request(fixture: &Fixture, dry_run: bool) -> DeployRequest {
        DeployRequest {
            exercise: "ex1".to_string(),
            scenario: "red".to_string(),
            layer: "base".to_string(),
            output_directory: fixture.output.path().join("ex1-red"),
            dry_run,
        }
    }

    #[tokio::test]
    async fn test_second_deploy_creates_nothing() {
        let f = fixture(&["web", "db"]).await;

        let first = f.pipeline.deploy(&request(&f, false)).await.unwrap();
        assert!(first.success);
        assert_eq!(first.resources_newly_created, 2);
        assert_eq!(first.resources_preexisting, 0);
        assert_eq!(first.resources_deployed, 2);

        let second = f.pipeline.deploy(&request(&f, false)).await.unwrap();
        assert!(second.success);
        assert_eq!(second.resources_newly_created, 0);
        assert_eq!(second.resources_preexisting, 2);
        assert_eq!(second.resources_deployed, 2);
    }

    #[tokio::test]
    async fn test_existing_resources_are_imported_not_recreated() {
        let f = fixture(&["web", "db"]).await;
        f.env.with(|s| {
            s.live.insert("azurerm_linux_virtual_machine.web".to_string());
        });

        let result = f.pipeline.deploy(&request(&f, false)).await.unwrap();
        assert!(result.success);
        assert_eq!(result.resources_preexisting, 1);
        assert_eq!(result.resources_newly_created, 1);
    }

    #[tokio::test]
    async fn test_dry_run_leaves_environment_unchanged() {
        let f = fixture(&["web", "db", "jump"]).await;
        f.env.with(|s| {
            s.live.insert("azurerm_linux_virtual_machine.db".to_string());
        });
        let before = f.env.live();

        let result = f.pipeline.deploy(&request(&f, true)).await.unwrap();
        assert!(result.dry_run);
        assert!(result.success);
        assert_eq!(result.resources_newly_created, 2);
        assert_eq!(result.resources_deployed, 0);
        assert_eq!(result.resources_preexisting, 1);
        assert_eq!(f.env.live(), before);
        assert_eq!(f.env.with(|s| s.applies), 0);
        assert!(request(&f, true).output_directory.join("main.tf.json").exists());
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let f = fixture(&["web"]).await;
        f.env.with(|s| {
            let throttled =
                ExecutorError::classify("plan failed", "StatusCode=429 TooManyRequests");
            s.failures.push_back(throttled);
        });

        let result = f.pipeline.deploy(&request(&f, false)).await.unwrap();
        assert!(result.success);
        assert_eq!(f.env.with(|s| s.plans), 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_diagnostics() {
        let f = fixture(&["web"]).await;
        f.env.with(|s| {
            for _ in 0..3 {
                let reset = ExecutorError::classify("plan failed", "connection reset by peer");
                s.failures.push_back(reset);
            }
        });

        let err = f.pipeline.deploy(&request(&f, false)).await.unwrap_err();
        match &err {
            OverlayError::DeployTransient { attempts, .. } => assert_eq!(*attempts, 3),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.diagnostics(), Some("connection reset by peer"));
        assert!(f.env.live().is_empty());
    }

    #[tokio::test]
    async fn test_fatal_failure_is_not_retried() {
        let f = fixture(&["web"]).await;
        f.env.with(|s| {
            let denied = ExecutorError::classify("plan failed", "Code=\"AuthorizationFailed\"");
            s.failures.push_back(denied);
        });

        let err = f.pipeline.deploy(&request(&f, false)).await.unwrap_err();
        assert!(matches!(err, OverlayError::DeployFatal { .. }));
        assert!(err.diagnostics().unwrap_or_default().contains("AuthorizationFailed"));
        assert_eq!(f.env.with(|s| s.plans), 1);
    }

    #[tokio::test]
    async fn test_partial_apply_resumes_on_next_run() {
        let f = fixture(&["a", "b", "c"]).await;
        f.env.with(|s| {
            s.apply_failure = Some((
                1,
                ExecutorError::classify("creating b failed", "Code=\"QuotaExceeded\""),
            ))
        });

        let err = f.pipeline.deploy(&request(&f, false)).await.unwrap_err();
        assert!(matches!(err, OverlayError::DeployFatal { .. }));
        assert_eq!(f.env.live().len(), 1);
        assert_eq!(f.env.with(|s| s.applies), 1);

        let resumed = f.pipeline.deploy(&request(&f, false)).await.unwrap();
        assert!(resumed.success);
        assert_eq!(resumed.resources_preexisting, 1);
        assert_eq!(resumed.resources_newly_created, 2);
        assert_eq!(f.env.live().len(), 3);
    }

    #[tokio::test]
    async fn test_transient_failure_mid_apply_replans_and_converges() {
        let f = fixture(&["a", "b", "c"]).await;
        f.env.with(|s| {
            s.apply_failure = Some((
                1,
                ExecutorError::classify("creating b failed", "StatusCode=429 TooManyRequests"),
            ))
        });

        let result = f.pipeline.deploy(&request(&f, false)).await.unwrap();
        assert!(result.success);
        assert_eq!(result.resources_preexisting, 0);
        assert_eq!(result.resources_newly_created, 3);
        assert_eq!(result.resources_deployed, 3);
        assert_eq!(f.env.live().len(), 3);
        assert_eq!(f.env.with(|s| (s.plans, s.applies)), (2, 2));
    }

    #[tokio::test]
    async fn test_unchanged_environment_skips_apply() {
        let f = fixture(&["web"]).await;
        f.pipeline.deploy(&request(&f, false)).await.unwrap();

        let second = f.pipeline.deploy(&request(&f, false)).await.unwrap();
        assert!(second.success);
        assert_eq!(f.env.with(|s| (s.plans, s.applies)), (2, 1));
    }

    #[tokio::test]
    async fn test_empty_overlay_is_not_deployed() {
        let f = fixture(&[]).await;
        let result = f.pipeline.deploy(&request(&f, false)).await.unwrap();
        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("no annotated resources"));
        assert_eq!(f.env.with(|s| s.plans), 0);
    }

    /// Executor that reports success without creating anything.
    struct Liar;

    #[async_trait]
    impl Executor for Liar {
        async fn plan(&self, _directory: &Path) -> Result<PlanSummary, ExecutorError> {
            Ok(PlanSummary {
                to_add: 1,
                ..Default::default()
            })
        }

        async fn apply(&self, _directory: &Path) -> Result<ApplySummary, ExecutorError> {
            Ok(ApplySummary {
                added: 1,
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn test_post_validation_failure_is_reported() {
        let f = fixture(&["web"]).await;
        let pipeline =
            DeployPipeline::new(f.pipeline.store.clone(), Arc::new(f.env.clone()), Arc::new(Liar));

        let result = pipeline.deploy(&request(&f, false)).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.resources_deployed, 0);
        assert!(result.error_message.unwrap().contains("expected 1"));
    }
}
