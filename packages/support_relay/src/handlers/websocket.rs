use axum::{
    extract::{State, WebSocketUpgrade},
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;

use crate::AppState;
use crate::auth::session_from_jar;
use crate::relay::handler::handle_relay_ws;

/// Relay WebSocket: one browser link, identified by its session cookie.
/// A link without a valid cookie gets a fresh one on the upgrade response.
pub async fn relay_websocket_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    ws: WebSocketUpgrade,
) -> Response {
    let (jar, token) = session_from_jar(jar, &state.auth_config, &state.signer);
    let router = state.router.clone();
    let metrics = state.metrics.clone();

    let upgrade = ws.on_upgrade(move |socket| handle_relay_ws(socket, router, metrics, token));
    (jar, upgrade).into_response()
}
