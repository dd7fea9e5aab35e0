//! Main reconciler for FailoverService resources
//!
//! Every triggering event runs one full pass: list all inputs, process them,
//! write back every status and converge generated artifacts in every
//! relevant cluster. Passes are idempotent, so the controller runtime is free
//! to coalesce or repeat triggers.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use kube::{
    api::{Api, ListParams},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        finalizer::{finalizer, Event as FinalizerEvent},
        reflector::{ObjectRef, Store},
        watcher::Config,
    },
    ResourceExt,
};
use tracing::{debug, error, info, instrument, warn};

use crate::crd::{
    EnvoyFilter, FailoverService, KubernetesCluster, Mesh, MeshService, ResourceRef,
    ServiceEntry, VirtualMesh,
};
use crate::error::{Error, MultiError, Result};
use crate::failover::{
    FailoverProcessor, InputSnapshot, IstioTranslator, OutputSnapshot, OwnershipLabels,
    TopologyValidator, VirtualIpAssigner,
};

#[cfg(feature = "metrics")]
use super::metrics;

use super::clients::{
    ClusterClientFactory, KubeClusterClients, KubeSnapshotSource, KubeStatusWriter,
    SnapshotSource, StatusWriter,
};
use super::config::ControllerConfig;
use super::convergence::converge;
use super::finalizers::{is_being_deleted, FAILOVER_SERVICE_FINALIZER};

/// Controller name used in metrics
pub const CONTROLLER_NAME: &str = "failoverservice";

/// Requeue interval while another replica holds the leader lease
const NON_LEADER_REQUEUE: Duration = Duration::from_secs(5);

// ============================================================================
// FailoverReconciler
// ============================================================================

/// Runs reconciliation passes against its collaborators
pub struct FailoverReconciler {
    source: Arc<dyn SnapshotSource>,
    status_writer: Arc<dyn StatusWriter>,
    processor: FailoverProcessor,
    service_entries: Arc<dyn ClusterClientFactory<ServiceEntry>>,
    envoy_filters: Arc<dyn ClusterClientFactory<EnvoyFilter>>,
    labels: OwnershipLabels,
}

impl FailoverReconciler {
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        status_writer: Arc<dyn StatusWriter>,
        processor: FailoverProcessor,
        service_entries: Arc<dyn ClusterClientFactory<ServiceEntry>>,
        envoy_filters: Arc<dyn ClusterClientFactory<EnvoyFilter>>,
        labels: OwnershipLabels,
    ) -> Self {
        Self {
            source,
            status_writer,
            processor,
            service_entries,
            envoy_filters,
            labels,
        }
    }

    /// Reconciler wired to the Kubernetes API with the Istio translator
    pub fn from_client(client: Client, config: &ControllerConfig) -> Result<Self> {
        let assigner = Arc::new(VirtualIpAssigner::from_cidr(&config.virtual_ip_cidr)?);
        let processor = FailoverProcessor::new(TopologyValidator::new())
            .with_translator(IstioTranslator::new(assigner, config.labels.clone()));
        info!("Registered translators: {:?}", processor.translator_ids());
        let clusters = Arc::new(KubeClusterClients::new(
            client.clone(),
            config.local_cluster.clone(),
            config.namespace.clone(),
        ));

        Ok(Self::new(
            Arc::new(KubeSnapshotSource::new(client.clone())),
            Arc::new(KubeStatusWriter::new(client)),
            processor,
            clusters.clone(),
            clusters,
            config.labels.clone(),
        ))
    }

    /// List every input kind. Any failed list aborts the pass.
    ///
    /// FailoverServices being deleted are left out, so their artifacts are
    /// swept like those of any FailoverService that no longer exists.
    pub async fn build_snapshot(&self) -> Result<InputSnapshot> {
        let (failover_services, mesh_services, meshes, clusters, virtual_meshes) = futures::try_join!(
            self.source.list_failover_services(),
            self.source.list_mesh_services(),
            self.source.list_meshes(),
            self.source.list_clusters(),
            self.source.list_virtual_meshes(),
        )?;

        let failover_services = failover_services
            .into_iter()
            .filter(|fs| !is_being_deleted(fs))
            .collect();

        Ok(InputSnapshot::builder()
            .failover_services(failover_services)
            .mesh_services(mesh_services)
            .meshes(meshes)
            .clusters(clusters)
            .virtual_meshes(virtual_meshes)
            .build())
    }

    /// One complete pass: snapshot, process, write back and converge
    #[instrument(skip(self))]
    pub async fn reconcile_pass(&self) -> Result<OutputSnapshot> {
        let snapshot = self.build_snapshot().await?;
        let output = self.processor.process(&snapshot).await;
        self.ensure_output_snapshot(&snapshot, &output).await?;
        Ok(output)
    }

    /// Write every status and converge every artifact kind.
    ///
    /// All writes are attempted; failures come back as one combined error.
    pub async fn ensure_output_snapshot(
        &self,
        snapshot: &InputSnapshot,
        output: &OutputSnapshot,
    ) -> Result<()> {
        let mut errors = self.write_statuses(snapshot, output).await;

        let clusters: BTreeSet<String> = snapshot
            .referenced_clusters()
            .into_iter()
            .chain(output.mesh_outputs.clusters())
            .collect();

        errors.extend(
            converge::<ServiceEntry>(
                self.service_entries.as_ref(),
                &output.mesh_outputs,
                &clusters,
                &output.retained,
                &self.labels,
            )
            .await,
        );
        errors.extend(
            converge::<EnvoyFilter>(
                self.envoy_filters.as_ref(),
                &output.mesh_outputs,
                &clusters,
                &output.retained,
                &self.labels,
            )
            .await,
        );

        if !errors.is_empty() {
            warn!("Pass finished with {} error(s)", errors.len());
        }
        errors.into_result()
    }

    async fn write_statuses(&self, snapshot: &InputSnapshot, output: &OutputSnapshot) -> MultiError {
        let mut errors = MultiError::new();
        for update in &output.statuses {
            let Some(fs) = snapshot.failover_service(&update.key) else {
                continue;
            };

            #[cfg(feature = "metrics")]
            record_outcomes(&update.status);

            errors.record(
                self.status_writer
                    .update_status(&fs.with_status(update.status.clone()))
                    .await,
            );
        }
        errors
    }

    /// Called when a FailoverService is deleted. Its artifacts go away with
    /// a pass that no longer sees it.
    ///
    /// A failed pass never holds the finalizer: the next pass on any trigger
    /// still sweeps whatever was left behind.
    pub async fn reconcile_deletion(&self, key: &ResourceRef) -> Action {
        info!(
            "FailoverService {} deleted, removing its generated artifacts",
            key
        );
        if let Err(e) = run_pass(self).await {
            warn!(
                "Cleanup pass for {} failed, releasing finalizer anyway: {}",
                key, e
            );
        }
        Action::await_change()
    }
}

#[cfg(feature = "metrics")]
fn record_outcomes(status: &crate::crd::FailoverServiceStatus) {
    if let Some(validation) = &status.validation_status {
        metrics::inc_outcome("validation", &validation.state.to_string());
    }
    if let Some(translation) = &status.translation_status {
        metrics::inc_outcome("translation", &translation.state.to_string());
    }
}

// ============================================================================
// Controller runtime
// ============================================================================

/// Shared state for the controller
pub struct ControllerState {
    pub client: Client,
    pub reconciler: FailoverReconciler,
    pub config: ControllerConfig,
    pub is_leader: Arc<AtomicBool>,
}

/// Map any change of a related kind to every known FailoverService
fn retrigger_all<K>(
    store: Store<FailoverService>,
) -> impl Fn(K) -> Vec<ObjectRef<FailoverService>> + Send + Sync + 'static {
    move |_| {
        store
            .state()
            .iter()
            .map(|fs| ObjectRef::from_obj(&**fs))
            .collect()
    }
}

/// Main entry point to start the controller
pub async fn run_controller(state: Arc<ControllerState>) -> Result<()> {
    let client = state.client.clone();
    let failover_services: Api<FailoverService> = Api::all(client.clone());

    info!("Starting FailoverService controller");

    // Verify CRD exists
    match failover_services.list(&ListParams::default().limit(1)).await {
        Ok(_) => info!("FailoverService CRD is available"),
        Err(e) => {
            error!(
                "FailoverService CRD not found. Please install the CRD first: {:?}",
                e
            );
            return Err(Error::ConfigError(
                "FailoverService CRD not installed".to_string(),
            ));
        }
    }

    let controller = Controller::new(failover_services, Config::default());
    let store = controller.store();

    controller
        // Topology changes can affect any FailoverService
        .watches(
            Api::<MeshService>::all(client.clone()),
            Config::default(),
            retrigger_all(store.clone()),
        )
        .watches(
            Api::<Mesh>::all(client.clone()),
            Config::default(),
            retrigger_all(store.clone()),
        )
        .watches(
            Api::<VirtualMesh>::all(client.clone()),
            Config::default(),
            retrigger_all(store.clone()),
        )
        .watches(
            Api::<KubernetesCluster>::all(client.clone()),
            Config::default(),
            retrigger_all(store),
        )
        .shutdown_on_signal()
        .run(reconcile, error_policy, state)
        .for_each(|res| async move {
            match res {
                Ok(obj) => debug!("Reconciled: {:?}", obj),
                Err(e) => error!("Reconcile error: {:?}", e),
            }
        })
        .await;

    Ok(())
}

/// The main reconciliation function
///
/// This function is called whenever:
/// - A FailoverService is created, updated, or deleted
/// - A MeshService, Mesh, VirtualMesh or KubernetesCluster changes
/// - The requeue timer expires
#[instrument(skip(ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile(obj: Arc<FailoverService>, ctx: Arc<ControllerState>) -> Result<Action> {
    if !ctx.is_leader.load(Ordering::Relaxed) {
        debug!("Not the leader, deferring {}", obj.name_any());
        return Ok(Action::requeue(NON_LEADER_REQUEUE));
    }

    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<FailoverService> = Api::namespaced(ctx.client.clone(), &namespace);

    finalizer(&api, FAILOVER_SERVICE_FINALIZER, obj, |event| async {
        match event {
            FinalizerEvent::Apply(_) => {
                run_pass(&ctx.reconciler).await?;
                Ok(Action::requeue(ctx.config.resync_interval))
            }
            FinalizerEvent::Cleanup(fs) => Ok(ctx
                .reconciler
                .reconcile_deletion(&ResourceRef::from_resource(fs.as_ref()))
                .await),
        }
    })
    .await
    .map_err(Error::from)
}

async fn run_pass(reconciler: &FailoverReconciler) -> Result<()> {
    let started = Instant::now();
    let result = reconciler.reconcile_pass().await;

    #[cfg(feature = "metrics")]
    {
        metrics::observe_pass_duration_seconds(CONTROLLER_NAME, started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            metrics::inc_pass_error(CONTROLLER_NAME, e.kind());
        }
    }

    let output = result?;
    debug!(
        "Pass over {} FailoverService(s) took {:?}",
        output.statuses.len(),
        started.elapsed()
    );
    Ok(())
}

/// Error policy for the controller
fn error_policy(fs: Arc<FailoverService>, error: &Error, _ctx: Arc<ControllerState>) -> Action {
    error!("Reconciliation error for {}: {:?}", fs.name_any(), error);

    // Use shorter retry for retriable errors
    let retry_duration = if error.is_retriable() {
        Duration::from_secs(15)
    } else {
        Duration::from_secs(60)
    };

    Action::requeue(retry_duration)
}
