use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bevy::diagnostic::DiagnosticsStore;
use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::engine::assets::source::Source;
use crate::engine::core::session::ViewerSession;
use crate::engine::loading::coordinator::LoadState;
use crate::engine::loading::systems::ViewerCommand;
use crate::engine::systems::fps_tracking::smoothed_fps;

#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

#[cfg(target_arch = "wasm32")]
use wasm_bindgen::JsValue;

#[cfg(target_arch = "wasm32")]
use web_sys::{MessageEvent, window};

/// JSON-RPC 2.0 request structure.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    pub id: Option<serde_json::Value>,
}

/// JSON-RPC 2.0 response structure.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub result: Option<serde_json::Value>,
    pub error: Option<RpcError>,
    pub id: Option<serde_json::Value>,
}

/// JSON-RPC 2.0 notification structure for one-way communication.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RpcNotification {
    pub jsonrpc: String,
    pub method: String,
    pub params: serde_json::Value,
}

/// JSON-RPC 2.0 error object.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

/// Resource managing bidirectional RPC communication with the embedding page.
/// Handles both request-response patterns and notification broadcasting.
#[derive(Resource, Default)]
pub struct WebRpcInterface {
    outgoing_notifications: Vec<RpcNotification>,
    outgoing_responses: Vec<RpcResponse>,
}

impl WebRpcInterface {
    /// Send notification to the frontend without expecting response.
    pub fn send_notification(&mut self, method: &str, params: serde_json::Value) {
        self.outgoing_notifications.push(RpcNotification {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        });
    }

    /// Queue response for transmission to the frontend.
    fn queue_response(&mut self, response: RpcResponse) {
        self.outgoing_responses.push(response);
    }
}

/// Plugin establishing WebRPC communication layer for iframe-based deployment.
pub struct WebRpcPlugin;

impl Plugin for WebRpcPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<WebRpcInterface>()
            .add_event::<IncomingRpcMessage>()
            .add_systems(
                Update,
                (
                    process_incoming_messages,
                    handle_rpc_messages,
                    send_outgoing_messages,
                )
                    .chain(),
            );

        #[cfg(target_arch = "wasm32")]
        app.add_systems(Startup, setup_message_listener);
    }
}

#[cfg(target_arch = "wasm32")]
fn setup_message_listener(mut commands: Commands) {
    use std::sync::Arc;
    use std::sync::Mutex;

    // Thread-safe message queue for cross-thread communication.
    let message_queue: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let queue_clone = message_queue.clone();

    let closure = Closure::wrap(Box::new(move |event: MessageEvent| {
        if let Ok(data) = event.data().dyn_into::<js_sys::JsString>() {
            let message_str: String = data.into();

            if message_str.contains("jsonrpc") {
                if let Ok(mut queue) = queue_clone.lock() {
                    queue.push(message_str);
                }
            }
        }
    }) as Box<dyn FnMut(MessageEvent)>);

    if let Some(window) = window() {
        if let Err(e) =
            window.add_event_listener_with_callback("message", closure.as_ref().unchecked_ref())
        {
            error!("Failed to register message listener: {:?}", e);
        }
    }

    // Prevent closure from being dropped by transferring ownership to JS.
    closure.forget();
    commands.insert_resource(MessageQueue(message_queue));
}

/// Resource wrapping thread-safe message queue for WASM event handling.
#[derive(Resource)]
struct MessageQueue(std::sync::Arc<std::sync::Mutex<Vec<String>>>);

/// Event representing incoming RPC message from the frontend.
#[derive(Event)]
struct IncomingRpcMessage {
    content: String,
}

fn process_incoming_messages(
    message_queue: Option<Res<MessageQueue>>,
    mut message_events: EventWriter<IncomingRpcMessage>,
) {
    let Some(queue_res) = message_queue else {
        return;
    };

    let messages = if let Ok(mut queue) = queue_res.0.lock() {
        std::mem::take(&mut *queue)
    } else {
        Vec::new()
    };

    for message_str in messages {
        message_events.write(IncomingRpcMessage {
            content: message_str,
        });
    }
}

fn handle_rpc_messages(
    mut events: EventReader<IncomingRpcMessage>,
    diagnostics: Res<DiagnosticsStore>,
    session: Res<ViewerSession>,
    mut rpc_interface: ResMut<WebRpcInterface>,
    mut viewer_commands: EventWriter<ViewerCommand>,
) {
    let fps = smoothed_fps(&diagnostics);
    let mut queued = Vec::new();

    for event in events.read() {
        match serde_json::from_str::<RpcRequest>(&event.content) {
            Ok(request) => {
                debug!("Processing RPC method: {}", request.method);
                if let Some(response) = handle_rpc_request(&request, fps, &session, &mut queued) {
                    rpc_interface.queue_response(response);
                }
            }
            Err(parse_error) => {
                warn!("RPC parse error: {}", parse_error);
            }
        }
    }

    for command in queued {
        viewer_commands.write(command);
    }
}

/// Handle individual RPC request and generate response based on method.
///
/// Commands that change the session are pushed onto `commands` and applied
/// by the viewer systems later in the frame. Requests without an id are
/// still executed but get no response.
pub fn handle_rpc_request(
    request: &RpcRequest,
    fps: Option<f64>,
    session: &ViewerSession,
    commands: &mut Vec<ViewerCommand>,
) -> Option<RpcResponse> {
    let result = match request.method.as_str() {
        "load_model" => handle_load_model(&request.params, session, commands),
        "load_model_bytes" => handle_load_model_bytes(&request.params, session, commands),
        "clear_model" => {
            commands.push(ViewerCommand::Clear);
            Ok(serde_json::json!({ "success": true }))
        }
        "stop" => {
            commands.push(ViewerCommand::Stop);
            Ok(serde_json::json!({ "success": true }))
        }
        "get_load_state" => Ok(load_state_snapshot(session)),
        "get_fps" => Ok(serde_json::json!({ "fps": fps.unwrap_or(0.0) as f32 })),
        _ => {
            warn!("Unknown RPC method: {}", request.method);
            return request.id.clone().map(|id| {
                create_error_response(
                    id,
                    -32601,
                    "Method not found",
                    Some(serde_json::json!({"method": request.method})),
                )
            });
        }
    };

    // Only generate responses for requests with IDs (notifications have no ID).
    let id = request.id.clone()?;
    match result {
        Ok(result_value) => Some(RpcResponse {
            jsonrpc: "2.0".to_string(),
            result: Some(result_value),
            error: None,
            id: Some(id),
        }),
        Err(error) => Some(RpcResponse {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(error),
            id: Some(id),
        }),
    }
}

/// A load only starts from a settled state; requests during a load, or
/// behind a load already queued this frame, are dropped.
fn accepts_load(session: &ViewerSession, commands: &[ViewerCommand]) -> bool {
    session.load_state() != LoadState::Loading
        && !commands
            .iter()
            .any(|command| matches!(command, ViewerCommand::Load(_)))
}

fn handle_load_model(
    params: &serde_json::Value,
    session: &ViewerSession,
    commands: &mut Vec<ViewerCommand>,
) -> Result<serde_json::Value, RpcError> {
    #[derive(Deserialize)]
    struct LoadModelParams {
        url: String,
    }

    let load_params = serde_json::from_value::<LoadModelParams>(params.clone())
        .map_err(|_| RpcError::invalid_params("Expected 'url' parameter"))?;

    let accepted = accepts_load(session, commands);
    if accepted {
        info!("Load requested over RPC: {}", load_params.url);
        commands.push(ViewerCommand::Load(Source::url(load_params.url)));
    }

    Ok(serde_json::json!({ "accepted": accepted }))
}

fn handle_load_model_bytes(
    params: &serde_json::Value,
    session: &ViewerSession,
    commands: &mut Vec<ViewerCommand>,
) -> Result<serde_json::Value, RpcError> {
    #[derive(Deserialize)]
    struct LoadBytesParams {
        name: String,
        data: String,
    }

    let bytes_params = serde_json::from_value::<LoadBytesParams>(params.clone())
        .map_err(|_| RpcError::invalid_params("Expected 'name' and 'data' parameters"))?;
    let data = STANDARD
        .decode(bytes_params.data.as_bytes())
        .map_err(|e| RpcError::invalid_params(&format!("Invalid base64 data: {}", e)))?;

    let accepted = accepts_load(session, commands);
    if accepted {
        info!(
            "Load requested over RPC: {} ({} bytes)",
            bytes_params.name,
            data.len()
        );
        commands.push(ViewerCommand::Load(Source::bytes(bytes_params.name, data)));
    }

    Ok(serde_json::json!({ "accepted": accepted }))
}

fn load_state_snapshot(session: &ViewerSession) -> serde_json::Value {
    serde_json::json!({
        "state": session.load_state(),
        "format": session.coordinator.current_format(),
        "error": session.error().map(|error| error.to_string()),
        "visible": session.is_model_visible(),
    })
}

/// Create standardized error response with optional data payload.
fn create_error_response(
    id: serde_json::Value,
    code: i32,
    message: &str,
    data: Option<serde_json::Value>,
) -> RpcResponse {
    RpcResponse {
        jsonrpc: "2.0".to_string(),
        result: None,
        error: Some(RpcError {
            code,
            message: message.to_string(),
            data,
        }),
        id: Some(id),
    }
}

/// Send queued notifications and responses to the frontend.
fn send_outgoing_messages(mut rpc_interface: ResMut<WebRpcInterface>) {
    for notification in rpc_interface.outgoing_notifications.drain(..) {
        send_message_to_parent(&notification);
    }

    // Responses after notifications to maintain order.
    for response in rpc_interface.outgoing_responses.drain(..) {
        send_message_to_parent(&response);
    }
}

/// Send serialized message to parent window.
fn send_message_to_parent<T: Serialize>(message: &T) {
    #[cfg(target_arch = "wasm32")]
    {
        match serde_json::to_string(message) {
            Ok(json) => {
                if let Some(window) = window() {
                    if let Some(parent) = window.parent().ok().flatten() {
                        if let Err(e) = parent.post_message(&JsValue::from_str(&json), "*") {
                            error!("Failed to send message to parent: {:?}", e);
                        }
                    } else {
                        warn!("No parent window available for message transmission");
                    }
                } else {
                    error!("Window object not available");
                }
            }
            Err(e) => {
                error!("Failed to serialize message: {}", e);
            }
        }
    }

    #[cfg(not(target_arch = "wasm32"))]
    {
        // No-op for non-WASM targets.
        let _ = message;
    }
}

/// Standard RPC error codes and constructors.
impl RpcError {
    pub fn invalid_params(message: &str) -> Self {
        Self {
            code: -32602,
            message: message.to_string(),
            data: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::assets::config::ViewerConfig;
    use crate::engine::loading::fetch::MemoryFetcher;
    use std::sync::Arc;

    fn session() -> ViewerSession {
        ViewerSession::new(ViewerConfig::default(), Arc::new(MemoryFetcher::new()))
    }

    fn request(method: &str, params: serde_json::Value) -> RpcRequest {
        RpcRequest {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id: Some(serde_json::json!(7)),
        }
    }

    #[test]
    fn load_model_queues_a_url_load() {
        let session = session();
        let mut commands = Vec::new();
        let response = handle_rpc_request(
            &request("load_model", serde_json::json!({"url": "models/duck.glb"})),
            None,
            &session,
            &mut commands,
        )
        .unwrap();

        assert_eq!(response.result, Some(serde_json::json!({"accepted": true})));
        assert_eq!(commands, vec![ViewerCommand::Load(Source::url("models/duck.glb"))]);
    }

    #[test]
    fn load_model_bytes_decodes_base64_payload() {
        let session = session();
        let mut commands = Vec::new();
        handle_rpc_request(
            &request(
                "load_model_bytes",
                serde_json::json!({"name": "cube.ply", "data": STANDARD.encode(b"ply\n")}),
            ),
            None,
            &session,
            &mut commands,
        );

        match commands.as_slice() {
            [ViewerCommand::Load(source)] => {
                assert_eq!(source.identifier(), "cube.ply");
            }
            other => panic!("unexpected commands: {:?}", other),
        }
    }

    #[test]
    fn invalid_params_are_reported() {
        let session = session();
        let mut commands = Vec::new();
        let response = handle_rpc_request(
            &request("load_model_bytes", serde_json::json!({"name": "a.ply", "data": "%%%"})),
            None,
            &session,
            &mut commands,
        )
        .unwrap();

        assert_eq!(response.error.map(|e| e.code), Some(-32602));
        assert!(commands.is_empty());
    }

    #[test]
    fn unknown_method_is_not_found() {
        let session = session();
        let response =
            handle_rpc_request(&request("explode", serde_json::Value::Null), None, &session, &mut Vec::new())
                .unwrap();
        assert_eq!(response.error.map(|e| e.code), Some(-32601));
    }

    #[test]
    fn notifications_execute_without_response() {
        let session = session();
        let mut commands = Vec::new();
        let mut clear = request("clear_model", serde_json::Value::Null);
        clear.id = None;

        assert!(handle_rpc_request(&clear, None, &session, &mut commands).is_none());
        assert_eq!(commands, vec![ViewerCommand::Clear]);
    }

    #[test]
    fn load_state_reports_idle_session() {
        let session = session();
        let response = handle_rpc_request(
            &request("get_load_state", serde_json::Value::Null),
            Some(59.5),
            &session,
            &mut Vec::new(),
        )
        .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["state"], "idle");
        assert_eq!(result["visible"], false);
        assert!(result["error"].is_null());
    }

    #[test]
    fn second_load_in_the_same_frame_is_refused() {
        let session = session();
        let mut commands = Vec::new();
        let mut accepted = Vec::new();
        for url in ["models/a.glb", "models/b.glb"] {
            let response = handle_rpc_request(
                &request("load_model", serde_json::json!({ "url": url })),
                None,
                &session,
                &mut commands,
            )
            .unwrap();
            accepted.push(response.result.unwrap()["accepted"].clone());
        }

        assert_eq!(accepted, vec![serde_json::json!(true), serde_json::json!(false)]);
        assert_eq!(commands, vec![ViewerCommand::Load(Source::url("models/a.glb"))]);
    }
}
