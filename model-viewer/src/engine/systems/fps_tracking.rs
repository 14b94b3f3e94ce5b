use bevy::diagnostic::{DiagnosticsStore, FrameTimeDiagnosticsPlugin};
use bevy::prelude::*;

use crate::constants::render_settings::{FPS_NOTIFICATION_INTERVAL_SECS, FPS_TEXT_SIZE};
use crate::engine::core::session::ViewerSession;
use crate::engine::loading::systems::LoadStateChanged;
use crate::rpc::web_rpc::WebRpcInterface;

#[derive(Component)]
pub struct FpsText;

/// Smoothed frame rate, if the diagnostic has samples yet.
pub fn smoothed_fps(diagnostics: &DiagnosticsStore) -> Option<f64> {
    diagnostics
        .get(&FrameTimeDiagnosticsPlugin::FPS)
        .and_then(|fps| fps.smoothed())
}

pub fn create_native_overlays(commands: &mut Commands) {
    commands
        .spawn(Node {
            width: Val::Percent(100.0),
            height: Val::Percent(100.0),
            ..default()
        })
        .with_children(|parent| {
            parent.spawn((
                Text::new("FPS: "),
                TextFont {
                    font_size: FPS_TEXT_SIZE,
                    ..default()
                },
                TextColor(Color::srgb(1., 0., 0.)),
                Node {
                    position_type: PositionType::Absolute,
                    bottom: Val::Px(12.0),
                    right: Val::Px(12.0),
                    ..default()
                },
                FpsText,
            ));
        });
}

pub fn fps_notification_system(
    mut rpc_interface: ResMut<WebRpcInterface>,
    diagnostics: Res<DiagnosticsStore>,
    mut last_send_time: Local<f32>,
    time: Res<Time>,
) {
    let current_time = time.elapsed_secs();

    if current_time - *last_send_time >= FPS_NOTIFICATION_INTERVAL_SECS {
        if let Some(value) = smoothed_fps(&diagnostics) {
            rpc_interface.send_notification(
                "fps_update",
                serde_json::json!({
                    "fps": value as f32
                }),
            );
            *last_send_time = current_time;
        }
    }
}

pub fn fps_text_update_system(
    diagnostics: Res<DiagnosticsStore>,
    session: Res<ViewerSession>,
    mut query: Query<(&mut Text, &mut Visibility), With<FpsText>>,
) {
    let shown = session.config().show_fps;
    let fps = smoothed_fps(&diagnostics);
    let frame_ms = session.render_loop.last_frame_secs() * 1000.0;
    for (mut text, mut visibility) in &mut query {
        visibility.set_if_neq(if shown {
            Visibility::Inherited
        } else {
            Visibility::Hidden
        });
        if let Some(value) = fps {
            text.0 = format!("FPS: {value:.1} ({frame_ms:.1} ms)");
        }
    }
}

/// Forward load state transitions to the embedding page.
pub fn load_state_notification_system(
    mut state_changes: EventReader<LoadStateChanged>,
    mut rpc_interface: ResMut<WebRpcInterface>,
) {
    for change in state_changes.read() {
        match &change.error {
            Some(error) => warn!("Load state: {:?} ({})", change.state, error),
            None => info!("Load state: {:?}", change.state),
        }
        rpc_interface.send_notification(
            "load_state_changed",
            serde_json::json!({
                "state": change.state,
                "format": change.format,
                "error": change.error,
            }),
        );
    }
}
