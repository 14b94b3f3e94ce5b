//! JSON-RPC 2.0 communication layer for the embedding web page.
//!
//! Implements bidirectional messaging between the viewer and its host page via
//! iframe postMessage, supporting both request-response and notification patterns.
//!
//! ## Architecture
//!
//! The RPC system uses standard JSON-RPC 2.0 protocol with:
//! - **Requests**: Expect responses with matching IDs
//! - **Notifications**: One-way messages without responses
//! - **Responses**: Reply to requests with results or errors
//!
//! ## Message Flow
//!
//! ```text
//! Host (Parent Window)   <──postMessage──>  Viewer (iframe)
//!        │                                        │
//!        ├─ Request (with ID) ──────────────────> │
//!        │                                        ├─ Process request
//!        │ <───────────────── Response (with ID) ─┤
//!        │                                        │
//!        │ <────────── Notification (no ID) ─────┤
//! ```
//!
//! ## Adding New RPC Methods
//!
//! Add a case to `handle_rpc_request()` and a handler returning
//! `Result<Value, RpcError>`. Handlers never mutate the session directly;
//! they push a `ViewerCommand` which the loading systems apply:
//!
//! ```rust,ignore
//! fn handle_your_method(
//!     params: &Value,
//!     session: &ViewerSession,
//!     commands: &mut Vec<ViewerCommand>,
//! ) -> Result<Value, RpcError> {
//!     #[derive(Deserialize)]
//!     struct YourParams {
//!         field: String,
//!     }
//!
//!     let parsed = serde_json::from_value::<YourParams>(params.clone())
//!         .map_err(|_| RpcError::invalid_params("Expected 'field' parameter"))?;
//!
//!     commands.push(ViewerCommand::Clear);
//!     Ok(json!({ "success": true }))
//! }
//! ```
//!
//! Calling from the host page:
//!
//! ```typescript
//! iframe.contentWindow.postMessage(JSON.stringify({
//!   jsonrpc: "2.0",
//!   method: "load_model",
//!   params: { url: "models/robot.glb" },
//!   id: 1
//! }), "*");
//! ```
//!
//! ## Sending Notifications from Bevy
//!
//! Use `WebRpcInterface::send_notification()` to push updates to the host page:
//!
//! ```rust,ignore
//! fn your_system(mut rpc: ResMut<WebRpcInterface>) {
//!     rpc.send_notification("event_name", json!({
//!         "data": "value",
//!         "timestamp": 123456
//!     }));
//! }
//! ```
//!
//! ## Error Handling
//!
//! Standard JSON-RPC 2.0 error codes:
//! - `-32600`: Invalid request
//! - `-32601`: Method not found
//! - `-32602`: Invalid params
//! - `-32603`: Internal error
//!
//! ## Existing Methods
//!
//! ### Model Loading
//! - `load_model`: Load from `{ url }`; dropped while a load is in flight
//! - `load_model_bytes`: Load from `{ name, data }` with base64 encoded bytes
//! - `clear_model`: Unload the active model and return to idle
//! - `get_load_state`: Current state, format, error and visibility
//!
//! ### Diagnostics
//! - `get_fps`: Retrieve current frame rate
//! - `stop`: Stop the render loop and exit
//!
//! ### Notifications
//! - `load_state_changed`: `{ state, format, error }` on every transition
//! - `fps_update`: `{ fps }` twice per second

/// JSON-RPC 2.0 bidirectional communication system for the host page.
///
/// Handles request-response patterns, notifications, and WASM message listeners.
pub mod web_rpc;
