use bevy::prelude::*;

use crate::engine::assets::format::FormatTag;
use crate::engine::assets::source::Source;
use crate::engine::core::session::ViewerSession;
use crate::engine::loading::coordinator::{LoadState, RequestOutcome};

/// Requests from the web bridge and startup code.
#[derive(Event, Debug, Clone, PartialEq)]
pub enum ViewerCommand {
    Load(Source),
    Clear,
    Stop,
}

/// Broadcast whenever the session's load state moves.
#[derive(Event, Debug, Clone, PartialEq)]
pub struct LoadStateChanged {
    pub state: LoadState,
    pub format: Option<FormatTag>,
    pub error: Option<String>,
}

impl LoadStateChanged {
    pub fn snapshot(session: &ViewerSession) -> Self {
        Self {
            state: session.load_state(),
            format: session.coordinator.current_format(),
            error: session.error().map(|error| error.to_string()),
        }
    }
}

pub fn handle_viewer_commands(
    mut viewer_commands: EventReader<ViewerCommand>,
    mut state_changes: EventWriter<LoadStateChanged>,
    mut session: ResMut<ViewerSession>,
    time: Res<Time>,
) {
    for command in viewer_commands.read() {
        match command {
            ViewerCommand::Load(source) => {
                let outcome = session.request_load(source.clone(), time.elapsed_secs_f64());
                if outcome == RequestOutcome::Started {
                    state_changes.write(LoadStateChanged::snapshot(&session));
                }
            }
            ViewerCommand::Clear => {
                session.clear();
                state_changes.write(LoadStateChanged::snapshot(&session));
            }
            ViewerCommand::Stop => session.render_loop.stop(),
        }
    }
}

/// Poll the in-flight load once per frame.
pub fn poll_active_load(
    mut state_changes: EventWriter<LoadStateChanged>,
    mut session: ResMut<ViewerSession>,
    time: Res<Time>,
) {
    if session.poll_load(time.elapsed_secs_f64()).is_some() {
        state_changes.write(LoadStateChanged::snapshot(&session));
    }
}
