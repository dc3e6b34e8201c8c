//! HTTP routes: index, health and the board directory.

use crate::state::AppState;
use crate::ws::ws_handler;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use clado_core::directory::{BoardId, BoardListing, BoardQuery, BoardRecord, DirectoryError};
use clado_core::session::Identity;
use clado_core::storage::{BoardKey, StorageError};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;

/// Build the application router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .route("/boards", get(list_boards).post(create_board))
        .route("/boards/{id}", patch(rename_board).delete(remove_board))
        .route("/boards/{id}/favourite", post(favourite_board).delete(unfavourite_board))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Index page
async fn index() -> &'static str {
    "Clado collaboration server - connect via WebSocket at /ws"
}

/// Health check
async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing or unknown access token")]
    Unauthorized,
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::FORBIDDEN,
            ApiError::Directory(DirectoryError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Directory(DirectoryError::InvalidTitle(_)) => StatusCode::BAD_REQUEST,
            ApiError::Directory(DirectoryError::Forbidden(_)) => StatusCode::FORBIDDEN,
            ApiError::Directory(DirectoryError::Other(_)) | ApiError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!("Request failed: {}", self);
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// Resolve the caller from `Authorization: Bearer <token>`.
fn authorize(state: &AppState, headers: &HeaderMap) -> Result<Identity, ApiError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .and_then(|token| state.identities.verify(token.trim()))
        .ok_or(ApiError::Unauthorized)
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub search: Option<String>,
    /// Only boards the caller marked as favourite.
    #[serde(default)]
    pub favourites: bool,
}

#[derive(Debug, Deserialize)]
pub struct TitleBody {
    pub title: String,
}

async fn list_boards(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<BoardListing>>, ApiError> {
    let caller = authorize(&state, &headers)?;
    let mut query = BoardQuery::org(caller.org_id.clone());
    if let Some(search) = params.search.filter(|s| !s.trim().is_empty()) {
        query = query.search(search);
    }
    if params.favourites {
        query = query.favourites_of(caller.user_id.clone());
    }
    Ok(Json(state.directory.list(&caller.user_id, &query)?))
}

async fn create_board(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<TitleBody>,
) -> Result<(StatusCode, Json<BoardRecord>), ApiError> {
    let caller = authorize(&state, &headers)?;
    let board = state.directory.create(&caller, &body.title)?;
    Ok((StatusCode::CREATED, Json(board)))
}

async fn rename_board(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<BoardId>,
    Json(body): Json<TitleBody>,
) -> Result<Json<BoardRecord>, ApiError> {
    let caller = authorize(&state, &headers)?;
    Ok(Json(state.directory.rename(&caller, id, &body.title)?))
}

/// Reason given to members of a board that is removed while open.
pub const BOARD_REMOVED: &str = "board removed";

/// Remove a board, close it for anyone editing it and delete its snapshot.
async fn remove_board(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<BoardId>,
) -> Result<StatusCode, ApiError> {
    let caller = authorize(&state, &headers)?;
    state.directory.remove(&caller, id)?;
    state.evict(id, BOARD_REMOVED).await;
    state
        .storage
        .delete(&BoardKey::new(caller.org_id.clone(), id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn favourite_board(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<BoardId>,
) -> Result<StatusCode, ApiError> {
    let caller = authorize(&state, &headers)?;
    state.directory.favourite(&caller, id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn unfavourite_board(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<BoardId>,
) -> Result<StatusCode, ApiError> {
    let caller = authorize(&state, &headers)?;
    state.directory.unfavourite(&caller, id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use clado_core::directory::MemoryDirectory;
    use clado_core::session::StaticIdentityProvider;
    use clado_core::snapshot::BoardSnapshot;
    use clado_core::storage::{MemoryStorage, Storage};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn identity(user: &str, org: &str) -> Identity {
        Identity {
            user_id: user.to_string(),
            org_id: org.to_string(),
            name: user.to_string(),
        }
    }

    fn state() -> Arc<AppState> {
        let identities = StaticIdentityProvider::new()
            .with_token("alice-token", identity("alice", "acme"))
            .with_token("bob-token", identity("bob", "acme"))
            .with_token("mallory-token", identity("mallory", "globex"));
        Arc::new(AppState::new(
            Arc::new(MemoryStorage::new()),
            Arc::new(identities),
            Arc::new(MemoryDirectory::new()),
        ))
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    fn title(title: &str) -> Json<TitleBody> {
        Json(TitleBody {
            title: title.to_string(),
        })
    }

    async fn create(state: &Arc<AppState>, token: &str, name: &str) -> BoardRecord {
        let (status, Json(board)) = create_board(State(state.clone()), bearer(token), title(name))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        board
    }

    #[tokio::test]
    async fn test_missing_token_is_forbidden() {
        let state = state();
        let err = list_boards(State(state.clone()), HeaderMap::new(), Query(ListParams::default()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);

        let err = list_boards(State(state), bearer("nope"), Query(ListParams::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
    }

    #[tokio::test]
    async fn test_list_is_scoped_to_org() {
        let state = state();
        create(&state, "alice-token", "Roadmap").await;
        create(&state, "bob-token", "Retro notes").await;
        create(&state, "mallory-token", "Secret plans").await;

        let Json(acme) = list_boards(State(state.clone()), bearer("bob-token"), Query(ListParams::default()))
            .await
            .unwrap();
        assert_eq!(acme.len(), 2);
        // Newest first.
        assert_eq!(acme[0].board.title, "Retro notes");

        let Json(found) = list_boards(
            State(state),
            bearer("alice-token"),
            Query(ListParams {
                search: Some("road".to_string()),
                favourites: false,
            }),
        )
        .await
        .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].board.title, "Roadmap");
    }

    #[tokio::test]
    async fn test_favourites() {
        let state = state();
        let board = create(&state, "alice-token", "Roadmap").await;
        create(&state, "alice-token", "Backlog").await;

        let status = favourite_board(State(state.clone()), bearer("bob-token"), Path(board.id))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);

        let favourites = || ListParams {
            search: None,
            favourites: true,
        };
        let Json(bobs) = list_boards(State(state.clone()), bearer("bob-token"), Query(favourites()))
            .await
            .unwrap();
        assert_eq!(bobs.len(), 1);
        assert!(bobs[0].is_favourite);

        let Json(alices) = list_boards(State(state.clone()), bearer("alice-token"), Query(favourites()))
            .await
            .unwrap();
        assert!(alices.is_empty());

        unfavourite_board(State(state.clone()), bearer("bob-token"), Path(board.id))
            .await
            .unwrap();
        let Json(bobs) = list_boards(State(state), bearer("bob-token"), Query(favourites()))
            .await
            .unwrap();
        assert!(bobs.is_empty());
    }

    #[tokio::test]
    async fn test_rename_and_remove() {
        let state = state();
        let board = create(&state, "alice-token", "Roadmap").await;
        let key = BoardKey::new("acme", board.id);
        state.storage.save(&key, &BoardSnapshot::default()).await.unwrap();

        let Json(renamed) = rename_board(State(state.clone()), bearer("bob-token"), Path(board.id), title("Q3 roadmap"))
            .await
            .unwrap();
        assert_eq!(renamed.title, "Q3 roadmap");

        let err = rename_board(State(state.clone()), bearer("alice-token"), Path(board.id), title("   "))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = remove_board(State(state.clone()), bearer("mallory-token"), Path(board.id))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);

        let status = remove_board(State(state.clone()), bearer("alice-token"), Path(board.id))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(!state.storage.exists(&key).await.unwrap());

        let err = remove_board(State(state), bearer("alice-token"), Path(board.id))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_health_over_http() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = app(state());
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("ok"));
    }
}
