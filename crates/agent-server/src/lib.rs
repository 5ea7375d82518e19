// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The chat server: thread/step CRUD, streaming chat turns, human-in-the-loop
//! responses, and feedback, fronting the ReAct orchestrator over HTTP.

pub mod chat;
pub mod dto;
pub mod error;
pub mod feedback;
pub mod state;
pub mod threads;

use std::net::SocketAddr;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/threads", get(threads::list_threads).post(threads::create_thread))
        .route(
            "/threads/:id",
            get(threads::get_thread).patch(threads::patch_thread).delete(threads::delete_thread),
        )
        .route("/threads/:id/messages", get(threads::list_messages))
        .route("/chat", post(chat::chat))
        .route("/chat/respond/:request_id", post(chat::respond))
        .route("/feedbacks", post(feedback::submit_feedback))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

/// Bring up the chat server and serve until the process is asked to stop.
pub async fn serve(state: AppState, bind_addr: SocketAddr) -> anyhow::Result<()> {
    let app = router(state);
    tracing::info!(%bind_addr, "chat server listening");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
