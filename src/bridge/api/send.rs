//! Submission endpoint: publish one message on behalf of a viewer.

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::bridge::Bridge;
use crate::protocol::Submission;

/// `POST /send`
///
/// Publishes the submission as given, empty body included. `202` with the
/// new ids once published, `502` when the bus refuses the publish.
pub async fn send_message(
    State(bridge): State<Bridge>,
    Json(submission): Json<Submission>,
) -> (StatusCode, Json<Value>) {
    match bridge.submit(submission.into_envelope()).await {
        Ok(envelope) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "status": "sent",
                "message_id": envelope.message_id,
                "conversation_id": envelope.conversation_id,
            })),
        ),
        Err(e) => {
            tracing::error!(component = "bridge", "Submission not published: {}", e);
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "status": "error", "error": e.to_string() })),
            )
        }
    }
}
