use bevy::app::AppExit;
use bevy::platform::time::Instant;
use bevy::prelude::*;
use bevy::window::WindowResized;

use crate::engine::core::session::ViewerSession;
use crate::engine::scene::node::{NodeId, SceneNode};

/// What one frame step touched.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub frame: u64,
    /// Seconds since the loop's first frame, as handed to animated nodes.
    pub elapsed: f64,
    pub updated: Vec<NodeId>,
    pub rendered: Vec<NodeId>,
}

/// Frame driver owned by the session.
///
/// Each step begins frame timing, advances every animated node in
/// active-set order and reports what the camera will draw. Frame timing is
/// closed by [`RenderLoop::end_frame`] once rendering has been queued; it
/// is wall-clock time, independent of the animation clock passed to `step`.
/// Stopping is explicit and checked on every step.
#[derive(Debug, Clone)]
pub struct RenderLoop {
    running: bool,
    frame: u64,
    started_at: Option<f64>,
    frame_began_at: Option<Instant>,
    last_frame_secs: f64,
}

impl Default for RenderLoop {
    fn default() -> Self {
        Self {
            running: true,
            frame: 0,
            started_at: None,
            frame_began_at: None,
            last_frame_secs: 0.0,
        }
    }
}

impl RenderLoop {
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn stop(&mut self) {
        if self.running {
            info!("Render loop stopping after {} frame(s)", self.frame);
        }
        self.running = false;
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Duration of the last completed frame in seconds.
    pub fn last_frame_secs(&self) -> f64 {
        self.last_frame_secs
    }

    /// Run one frame against `nodes`. Returns `None` once stopped.
    pub fn step(&mut self, now: f64, nodes: &mut [SceneNode]) -> Option<FrameReport> {
        if !self.running {
            return None;
        }

        self.frame_began_at = Some(Instant::now());
        let elapsed = now - *self.started_at.get_or_insert(now);

        let mut updated = Vec::new();
        let mut rendered = Vec::new();
        for node in nodes.iter_mut().filter(|node| !node.is_disposed()) {
            if node.update(elapsed) {
                updated.push(node.id());
            }
            rendered.push(node.id());
        }

        self.frame += 1;
        Some(FrameReport {
            frame: self.frame,
            elapsed,
            updated,
            rendered,
        })
    }

    pub fn end_frame(&mut self) {
        if let Some(began) = self.frame_began_at.take() {
            self.last_frame_secs = began.elapsed().as_secs_f64();
        }
    }
}

/// Per-frame step driven from the main schedule.
pub fn advance_render_loop(mut session: ResMut<ViewerSession>, time: Res<Time>) {
    session.step(time.elapsed_secs_f64());
}

pub fn end_render_frame(mut session: ResMut<ViewerSession>) {
    session.render_loop.end_frame();
}

/// Recompute the camera aspect when the window changes; the surface itself
/// is resized by the renderer.
pub fn handle_window_resize(
    mut resize_events: EventReader<WindowResized>,
    mut session: ResMut<ViewerSession>,
) {
    for event in resize_events.read() {
        session.rig.set_aspect(event.width, event.height);
    }
}

pub fn exit_on_stop(session: Res<ViewerSession>, mut exit: EventWriter<AppExit>) {
    if !session.render_loop.is_running() {
        exit.write(AppExit::Success);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::assets::config::ViewerConfig;
    use crate::engine::assets::format::FormatTag;
    use crate::engine::loading::fetch::MemoryFetcher;
    use crate::engine::scene::node::{
        Animator, MaterialDesc, ParsedModel, Primitive, SceneContainer,
    };
    use std::sync::Arc;
    use std::time::Duration;

    struct Bob;

    impl Animator for Bob {
        fn update(&mut self, elapsed: f64, primitives: &mut [Primitive]) {
            for primitive in primitives {
                primitive.transform.translation.y = elapsed as f32;
            }
        }
    }

    fn node(id: NodeId, animated: bool) -> SceneNode {
        let primitive = Primitive {
            name: "box".into(),
            mesh: Mesh::from(Cuboid::new(1.0, 1.0, 1.0)),
            material: MaterialDesc::default(),
            transform: Transform::IDENTITY,
        };
        let model = if animated {
            ParsedModel::animated(vec![primitive], Bob)
        } else {
            ParsedModel::new(vec![primitive])
        };
        let mut container = SceneContainer::new(1);
        let behaviour = container.attach(model);
        SceneNode::new(id, FormatTag::Gltf, container, behaviour)
    }

    #[test]
    fn step_updates_animated_nodes_in_order() {
        let mut render_loop = RenderLoop::default();
        let mut nodes = vec![node(1, true), node(2, false), node(3, true)];

        let first = render_loop.step(10.0, &mut nodes).unwrap();
        assert_eq!(first.elapsed, 0.0);

        let report = render_loop.step(12.5, &mut nodes).unwrap();
        assert_eq!(report.frame, 2);
        assert_eq!(report.elapsed, 2.5);
        assert_eq!(report.updated, vec![1, 3]);
        assert_eq!(report.rendered, vec![1, 2, 3]);
        assert_eq!(nodes[2].container().primitives()[0].transform.translation.y, 2.5);
    }

    #[test]
    fn disposed_nodes_are_neither_updated_nor_rendered() {
        let mut render_loop = RenderLoop::default();
        let mut nodes = vec![node(1, true), node(2, true)];
        nodes[0].dispose();

        let report = render_loop.step(0.0, &mut nodes).unwrap();
        assert_eq!(report.updated, vec![2]);
        assert_eq!(report.rendered, vec![2]);
    }

    #[test]
    fn stopped_loop_does_not_step() {
        let mut render_loop = RenderLoop::default();
        let mut nodes = vec![node(1, true)];
        render_loop.stop();
        assert!(render_loop.step(1.0, &mut nodes).is_none());
        assert_eq!(render_loop.frame(), 0);
    }

    #[test]
    fn frame_timing_is_measured_between_begin_and_end() {
        let mut render_loop = RenderLoop::default();
        render_loop.step(1.0, &mut []);
        std::thread::sleep(Duration::from_millis(2));
        render_loop.end_frame();
        let measured = render_loop.last_frame_secs();
        assert!(measured >= 0.002);

        // No open frame, so the last measurement stands.
        render_loop.end_frame();
        assert_eq!(render_loop.last_frame_secs(), measured);
    }

    fn slow_frame() {
        std::thread::sleep(Duration::from_millis(1));
    }

    #[test]
    fn scheduled_systems_measure_real_frame_time() {
        let mut app = App::new();
        app.add_plugins(MinimalPlugins)
            .insert_resource(ViewerSession::new(
                ViewerConfig::default(),
                Arc::new(MemoryFetcher::new()),
            ))
            .add_systems(Update, (advance_render_loop, slow_frame).chain())
            .add_systems(Last, end_render_frame);

        app.update();
        app.update();

        let session = app.world().resource::<ViewerSession>();
        assert_eq!(session.render_loop.frame(), 2);
        assert!(session.render_loop.last_frame_secs() >= 0.001);
    }
}
