use axum::{
    extract::{ Path, State },
    response::{ sse::{ Event, Sse }, IntoResponse },
    Json,
};
use futures::{ Stream, StreamExt };
use log::info;
use serde::Serialize;

use super::AppState;
use super::error::ApiError;
use crate::auth::CallerIdentity;
use crate::models::chat::{
    ChatRequest,
    Conversation,
    CreateConversationRequest,
    Message,
    RenameConversationRequest,
    StreamEvent,
};

#[derive(Serialize)]
pub struct StatusMessage {
    message: &'static str,
}

pub async fn root() -> Json<StatusMessage> {
    Json(StatusMessage { message: "Chat relay is ready" })
}

pub async fn create_conversation(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Json(req): Json<CreateConversationRequest>
) -> Result<Json<Conversation>, ApiError> {
    let conversation = Conversation::new(&caller.user_id, req.title);
    state.store.insert_conversation(&conversation).await?;
    info!("Created conversation {} for {}", conversation.id, caller.user_id);
    Ok(Json(conversation))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    caller: CallerIdentity
) -> Result<Json<Vec<Conversation>>, ApiError> {
    Ok(Json(state.store.list_conversations(&caller.user_id).await?))
}

pub async fn list_messages(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(conversation_id): Path<String>
) -> Result<Json<Vec<Message>>, ApiError> {
    let conversation = state.dispatcher.guard().authorize(&caller, &conversation_id).await?;
    Ok(Json(state.store.list_messages(&conversation.id).await?))
}

pub async fn rename_conversation(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(conversation_id): Path<String>,
    Json(req): Json<RenameConversationRequest>
) -> Result<Json<Conversation>, ApiError> {
    state.store
        .rename_conversation(&conversation_id, &caller.user_id, &req.title).await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

pub async fn delete_conversation(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(conversation_id): Path<String>
) -> Result<Json<StatusMessage>, ApiError> {
    let conversation = state.dispatcher.guard().authorize(&caller, &conversation_id).await?;
    state.store.delete_conversation_cascade(&conversation.id).await?;
    info!("Deleted conversation {} for {}", conversation.id, caller.user_id);
    Ok(Json(StatusMessage { message: "Conversation deleted successfully" }))
}

/// Validation and the user-message write finish before the response head,
/// so their failures come back as plain JSON errors. Everything after is
/// relayed as `data: {json}` frames.
pub async fn chat(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Json(req): Json<ChatRequest>
) -> Result<impl IntoResponse, ApiError> {
    let events = state.dispatcher.dispatch(&caller, req).await?;
    Ok(Sse::new(sse_frames(events)))
}

fn sse_frames(
    events: impl Stream<Item = StreamEvent>
) -> impl Stream<Item = Result<Event, axum::Error>> {
    events.map(|event| Event::default().json_data(event.to_frame()))
}
