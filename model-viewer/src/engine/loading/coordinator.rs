use bevy::prelude::*;
use bevy::tasks::{IoTaskPool, Task, block_on, futures_lite::future};
use serde::Serialize;
use std::sync::Arc;

use crate::engine::assets::format::{FitStrategy, FormatTag};
use crate::engine::assets::source::Source;
use crate::engine::camera::fit::{FitSettings, fit_bounding_box, fit_to_content};
use crate::engine::camera::rig::CameraRig;
use crate::engine::loading::fetch::{LoadRequest, SourceFetcher};
use crate::engine::loading::registry::{LoadOutput, LoaderRegistry};
use crate::engine::scene::node::{NodeId, SceneContainer, SceneNode};
use crate::error::{LoadError, ViewerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadState {
    #[default]
    Idle,
    Loading,
    Ready,
    Failed,
}

/// Result of asking for a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Started,
    /// Another load was already in flight; nothing changed.
    Ignored,
}

/// Emitted by [`LoadCoordinator::poll`] when a load settles.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadEvent {
    Completed { node: NodeId, format: FormatTag },
    Failed(ViewerError),
}

enum InFlight {
    /// Classification or resolution failed; settles on the next poll.
    Rejected(ViewerError),
    Running {
        task: Task<Result<LoadOutput, LoadError>>,
        format: FormatTag,
        started_at: f64,
    },
}

/// Single-flight orchestrator for the active model.
///
/// Owns the active asset set. Every request first disposes the previous
/// content, then resolves a loader and runs it on the IO task pool. The task
/// is polled from the main schedule, so state only ever changes there.
pub struct LoadCoordinator {
    registry: LoaderRegistry,
    fetcher: Arc<dyn SourceFetcher>,
    state: LoadState,
    error: Option<ViewerError>,
    current_format: Option<FormatTag>,
    active: Vec<SceneNode>,
    in_flight: Option<InFlight>,
    retired: Vec<Entity>,
    generation: u64,
    next_node_id: NodeId,
    timeout_secs: f64,
}

impl LoadCoordinator {
    pub fn new(registry: LoaderRegistry, fetcher: Arc<dyn SourceFetcher>) -> Self {
        Self {
            registry,
            fetcher,
            state: LoadState::Idle,
            error: None,
            current_format: None,
            active: Vec::new(),
            in_flight: None,
            retired: Vec::new(),
            generation: 0,
            next_node_id: 1,
            timeout_secs: 0.0,
        }
    }

    /// Loads still running after `secs` are cancelled. Zero disables the limit.
    pub fn with_timeout(mut self, secs: f64) -> Self {
        self.timeout_secs = secs.max(0.0);
        self
    }

    pub fn set_timeout(&mut self, secs: f64) {
        self.timeout_secs = secs.max(0.0);
    }

    pub fn set_registry(&mut self, registry: LoaderRegistry) {
        self.registry = registry;
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn error(&self) -> Option<&ViewerError> {
        self.error.as_ref()
    }

    /// Format of the most recent request, if it could be classified.
    pub fn current_format(&self) -> Option<FormatTag> {
        self.current_format
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn active_nodes(&self) -> &[SceneNode] {
        &self.active
    }

    pub fn active_nodes_mut(&mut self) -> &mut [SceneNode] {
        &mut self.active
    }

    /// Root entities of disposed nodes that still need despawning.
    pub fn take_retired(&mut self) -> Vec<Entity> {
        std::mem::take(&mut self.retired)
    }

    /// Start loading `source`, replacing whatever is currently shown.
    ///
    /// Dropped without any effect while another load is in flight. Never
    /// fails synchronously: classification errors settle on the next poll.
    pub fn request_load(&mut self, source: Source, now: f64) -> RequestOutcome {
        if self.state == LoadState::Loading {
            debug!("Load already in progress, ignoring request for {}", source);
            return RequestOutcome::Ignored;
        }

        self.state = LoadState::Loading;
        self.error = None;
        self.dispose_active();
        self.generation += 1;
        let container = SceneContainer::new(self.generation);

        let resolved = source.format().and_then(|format| {
            self.registry
                .resolve(format)
                .map(|loader| (format, loader))
        });

        match resolved {
            Ok((format, loader)) => {
                info!("Loading {} as .{}", source, format);
                self.current_format = Some(format);
                let request =
                    LoadRequest::new(source, self.fetcher.clone()).with_timeout(self.timeout_secs);
                let task = IoTaskPool::get()
                    .spawn(async move { loader.load_into(request, container).await });
                self.in_flight = Some(InFlight::Running {
                    task,
                    format,
                    started_at: now,
                });
            }
            Err(error) => {
                self.current_format = None;
                self.in_flight = Some(InFlight::Rejected(error));
            }
        }

        RequestOutcome::Started
    }

    /// Drive the in-flight load. On success the new node joins the active
    /// set and `rig` is refitted for its format.
    pub fn poll(
        &mut self,
        now: f64,
        rig: &mut CameraRig,
        settings: &FitSettings,
    ) -> Option<LoadEvent> {
        match self.in_flight.take()? {
            InFlight::Rejected(error) => Some(self.fail(error)),
            InFlight::Running {
                mut task,
                format,
                started_at,
            } => match block_on(future::poll_once(&mut task)) {
                Some(Ok(output)) => Some(self.complete(output, format, rig, settings)),
                Some(Err(error)) => Some(self.fail(ViewerError::LoaderFailure(error))),
                None => {
                    let waited = now - started_at;
                    if self.timeout_secs > 0.0 && waited >= self.timeout_secs {
                        drop(task);
                        return Some(self.fail(ViewerError::LoaderFailure(LoadError::TimedOut(
                            waited,
                        ))));
                    }
                    self.in_flight = Some(InFlight::Running {
                        task,
                        format,
                        started_at,
                    });
                    None
                }
            },
        }
    }

    /// Dispose all content, cancel any in-flight load and return to idle.
    pub fn clear(&mut self) {
        if self.in_flight.take().is_some() {
            info!("Cancelled in-flight load");
        }
        self.dispose_active();
        self.generation += 1;
        self.state = LoadState::Idle;
        self.error = None;
        self.current_format = None;
    }

    pub fn is_model_visible(&self) -> bool {
        self.state == LoadState::Ready && !self.active.is_empty()
    }

    fn complete(
        &mut self,
        (container, behaviour): LoadOutput,
        format: FormatTag,
        rig: &mut CameraRig,
        settings: &FitSettings,
    ) -> LoadEvent {
        let id = self.next_node_id;
        self.next_node_id += 1;

        let node = SceneNode::new(id, format, container, behaviour);
        let bounds = self
            .active
            .iter()
            .fold(node.bounds(), |bounds, other| bounds.union(&other.bounds()));

        match format.fit_strategy() {
            FitStrategy::BoundingBox => *rig = fit_bounding_box(&bounds, rig.aspect, settings),
            FitStrategy::ContentAware => fit_to_content(rig, &bounds, settings),
        }

        info!(
            "Loaded .{} model: {} primitive(s), extent {:?}",
            format,
            node.container().len(),
            bounds.size()
        );

        self.active.push(node);
        self.state = LoadState::Ready;
        LoadEvent::Completed { node: id, format }
    }

    fn fail(&mut self, error: ViewerError) -> LoadEvent {
        error!("Model load failed: {}", error);
        self.dispose_active();
        self.error = Some(error.clone());
        self.state = LoadState::Failed;
        LoadEvent::Failed(error)
    }

    fn dispose_active(&mut self) {
        for mut node in self.active.drain(..) {
            if node.dispose() {
                if let Some(spawned) = node.take_spawned() {
                    self.retired.push(spawned.root);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::loading::fetch::MemoryFetcher;
    use crate::engine::loading::registry::{ModelLoader, NodeParser};
    use crate::engine::scene::node::{Animator, MaterialDesc, ParsedModel, Primitive};
    use bevy::tasks::{BoxedFuture, TaskPool};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct Counters {
        parses: Arc<AtomicUsize>,
        disposals: Arc<AtomicUsize>,
    }

    struct Spin(Arc<AtomicUsize>);

    impl Animator for Spin {
        fn update(&mut self, elapsed: f64, primitives: &mut [Primitive]) {
            for primitive in primitives {
                primitive.transform.rotation = Quat::from_rotation_y(elapsed as f32);
            }
        }

        fn dispose(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct CountingParser(Counters);

    impl NodeParser for CountingParser {
        fn parse<'a>(
            &'a self,
            _request: LoadRequest,
        ) -> BoxedFuture<'a, Result<ParsedModel, LoadError>> {
            Box::pin(async move {
                self.0.parses.fetch_add(1, Ordering::SeqCst);
                Ok(ParsedModel::animated(
                    vec![Primitive {
                        name: "cube".into(),
                        mesh: Mesh::from(Cuboid::new(2.0, 2.0, 2.0)),
                        material: MaterialDesc::default(),
                        transform: Transform::IDENTITY,
                    }],
                    Spin(self.0.disposals.clone()),
                ))
            })
        }
    }

    struct FailingParser;

    impl NodeParser for FailingParser {
        fn parse<'a>(
            &'a self,
            _request: LoadRequest,
        ) -> BoxedFuture<'a, Result<ParsedModel, LoadError>> {
            Box::pin(async { Err(LoadError::parse(FormatTag::Fbx, "corrupt header")) })
        }
    }

    struct NeverLoader;

    impl ModelLoader for NeverLoader {
        fn load_into<'a>(
            &'a self,
            _request: LoadRequest,
            _container: SceneContainer,
        ) -> BoxedFuture<'a, Result<LoadOutput, LoadError>> {
            Box::pin(future::pending())
        }
    }

    fn coordinator(counters: &Counters) -> LoadCoordinator {
        IoTaskPool::get_or_init(TaskPool::new);
        let mut registry = LoaderRegistry::new();
        registry.register_parser(FormatTag::Ply, CountingParser(counters.clone()));
        registry.register_parser(FormatTag::Fbx, FailingParser);
        registry.register(FormatTag::Glb, NeverLoader);
        LoadCoordinator::new(registry, Arc::new(MemoryFetcher::new())).with_timeout(30.0)
    }

    fn settle(coordinator: &mut LoadCoordinator, rig: &mut CameraRig) -> LoadEvent {
        let settings = FitSettings::default();
        for _ in 0..2000 {
            if let Some(event) = coordinator.poll(0.0, rig, &settings) {
                return event;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        panic!("load never settled");
    }

    #[test]
    fn successful_load_registers_one_node_and_fits_the_camera() {
        let counters = Counters::default();
        let mut coordinator = coordinator(&counters);
        let mut rig = CameraRig::default();
        let before = rig.clone();

        assert_eq!(
            coordinator.request_load(Source::url("asset.ply"), 0.0),
            RequestOutcome::Started
        );
        assert_eq!(coordinator.state(), LoadState::Loading);

        let event = settle(&mut coordinator, &mut rig);
        assert!(matches!(event, LoadEvent::Completed { format: FormatTag::Ply, .. }));
        assert_eq!(coordinator.state(), LoadState::Ready);
        assert_eq!(coordinator.active_nodes().len(), 1);
        assert!(coordinator.is_model_visible());
        assert_ne!(rig, before);
        assert_eq!(rig.target, Vec3::ZERO);
    }

    #[test]
    fn request_during_loading_is_dropped() {
        let counters = Counters::default();
        let mut coordinator = coordinator(&counters);
        coordinator.request_load(Source::url("slow.glb"), 0.0);
        let generation = coordinator.generation();

        assert_eq!(
            coordinator.request_load(Source::url("asset.ply"), 0.0),
            RequestOutcome::Ignored
        );
        assert_eq!(coordinator.state(), LoadState::Loading);
        assert_eq!(coordinator.generation(), generation);
        assert!(coordinator.error().is_none());
        assert!(coordinator.active_nodes().is_empty());
        assert_eq!(counters.parses.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn replacing_content_disposes_the_previous_node_once() {
        let counters = Counters::default();
        let mut coordinator = coordinator(&counters);
        let mut rig = CameraRig::default();

        coordinator.request_load(Source::url("first.ply"), 0.0);
        settle(&mut coordinator, &mut rig);
        let first = coordinator.active_nodes()[0].id();

        coordinator.request_load(Source::url("second.ply"), 0.0);
        assert!(coordinator.active_nodes().is_empty());
        settle(&mut coordinator, &mut rig);

        assert_eq!(coordinator.active_nodes().len(), 1);
        assert_ne!(coordinator.active_nodes()[0].id(), first);
        assert_eq!(counters.disposals.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.active_nodes()[0].generation(), coordinator.generation());
    }

    #[test]
    fn loader_failure_leaves_an_empty_set() {
        let counters = Counters::default();
        let mut coordinator = coordinator(&counters);
        let mut rig = CameraRig::default();
        let before = rig.clone();

        coordinator.request_load(Source::url("first.ply"), 0.0);
        settle(&mut coordinator, &mut rig);
        let fitted = rig.clone();
        assert_ne!(fitted, before);

        coordinator.request_load(Source::url("broken.fbx"), 0.0);
        let event = settle(&mut coordinator, &mut rig);

        assert!(matches!(event, LoadEvent::Failed(ViewerError::LoaderFailure(_))));
        assert_eq!(coordinator.state(), LoadState::Failed);
        assert!(coordinator.active_nodes().is_empty());
        assert!(coordinator.error().is_some());
        assert_eq!(rig, fitted);
    }

    #[test]
    fn unsupported_extension_fails_on_the_next_poll() {
        let counters = Counters::default();
        let mut coordinator = coordinator(&counters);
        let mut rig = CameraRig::default();

        coordinator.request_load(Source::url("asset.xyz"), 0.0);
        assert_eq!(coordinator.state(), LoadState::Loading);

        let event = settle(&mut coordinator, &mut rig);
        assert_eq!(
            event,
            LoadEvent::Failed(ViewerError::UnsupportedFormat {
                extension: "xyz".into()
            })
        );
        assert_eq!(coordinator.state(), LoadState::Failed);
        assert!(coordinator.active_nodes().is_empty());
        assert_eq!(counters.parses.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn source_without_extension_is_rejected_before_any_loader_runs() {
        let counters = Counters::default();
        let mut coordinator = coordinator(&counters);
        let mut rig = CameraRig::default();

        coordinator.request_load(Source::url("http://host/model"), 0.0);
        let event = settle(&mut coordinator, &mut rig);

        assert!(matches!(event, LoadEvent::Failed(ViewerError::InvalidSource(_))));
        assert_eq!(counters.parses.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stalled_loads_time_out() {
        let counters = Counters::default();
        let mut coordinator = coordinator(&counters);
        let mut rig = CameraRig::default();
        let settings = FitSettings::default();

        coordinator.request_load(Source::url("slow.glb"), 10.0);
        assert_eq!(coordinator.poll(20.0, &mut rig, &settings), None);

        let event = coordinator.poll(40.0, &mut rig, &settings);
        assert_eq!(
            event,
            Some(LoadEvent::Failed(ViewerError::LoaderFailure(
                LoadError::TimedOut(30.0)
            )))
        );
        assert_eq!(coordinator.state(), LoadState::Failed);
    }

    #[test]
    fn clear_returns_to_idle_and_cancels_loading() {
        let counters = Counters::default();
        let mut coordinator = coordinator(&counters);
        let mut rig = CameraRig::default();

        coordinator.request_load(Source::url("asset.ply"), 0.0);
        settle(&mut coordinator, &mut rig);
        coordinator.clear();
        assert_eq!(coordinator.state(), LoadState::Idle);
        assert!(coordinator.active_nodes().is_empty());
        assert_eq!(counters.disposals.load(Ordering::SeqCst), 1);

        coordinator.request_load(Source::url("slow.glb"), 0.0);
        coordinator.clear();
        assert_eq!(coordinator.state(), LoadState::Idle);
        assert_eq!(coordinator.poll(100.0, &mut rig, &FitSettings::default()), None);
    }
}
