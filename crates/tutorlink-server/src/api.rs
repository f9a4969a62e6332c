//! HTTP API surface: REST routes plus the live-channel upgrade endpoint.

use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use tutorlink_shared::constants::{DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT};
use tutorlink_shared::protocol::ServerEvent;
use tutorlink_shared::types::{
    ConversationRef, Group, GroupId, GroupRole, MediaAttachment, Message, UserId,
};
use tutorlink_store::Database;

use crate::auth::AuthUser;
use crate::bus::DeliveryBus;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::gateway;
use crate::ingress::MessageIngress;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<StdMutex<Database>>,
    pub bus: DeliveryBus,
    pub ingress: Arc<MessageIngress>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(
        db: Arc<StdMutex<Database>>,
        bus: DeliveryBus,
        ingress: Arc<MessageIngress>,
        config: Arc<ServerConfig>,
    ) -> Self {
        Self {
            db,
            bus,
            ingress,
            config,
        }
    }

    fn lock_db(&self) -> Result<MutexGuard<'_, Database>, ServerError> {
        self.db
            .lock()
            .map_err(|e| ServerError::Internal(format!("store lock poisoned: {e}")))
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = match state.config.cors_origin.as_deref() {
        Some(origin) => match origin.parse::<axum::http::HeaderValue>() {
            Ok(value) => CorsLayer::new()
                .allow_origin(value)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
            Err(_) => {
                tracing::warn!(origin, "invalid CORS_ORIGIN, allowing any origin");
                CorsLayer::permissive()
            }
        },
        None => CorsLayer::permissive(),
    };

    Router::new()
        .route("/health", get(health))
        .route("/ws", get(gateway::ws_handler))
        .route("/api/messages", post(create_message))
        .route("/api/conversations/:key/messages", get(conversation_history))
        .route("/api/conversations/:key/read", post(mark_conversation_read))
        .route("/api/conversations/:key/unread", get(conversation_unread))
        .route("/api/groups", post(create_group).get(list_groups))
        .route("/api/groups/:id", delete(delete_group))
        .route("/api/groups/:id/members", post(add_group_members))
        .route("/api/groups/:id/members/:user/role", put(set_member_role))
        .route("/api/groups/:id/members/:user", delete(remove_group_member))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    tracing::info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    instance: String,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        instance: state.config.instance_name.clone(),
    })
}

// ---- messages ----

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitRequest {
    conversation: ConversationRef,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    attachments: Vec<MediaAttachment>,
    correlation_id: Uuid,
}

async fn create_message(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(req): Json<SubmitRequest>,
) -> Result<impl IntoResponse, ServerError> {
    let message = state
        .ingress
        .submit(
            user,
            req.conversation,
            req.body,
            req.attachments,
            req.correlation_id,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

#[derive(Deserialize)]
struct HistoryQuery {
    cursor: Option<DateTime<Utc>>,
    limit: Option<u32>,
}

async fn conversation_history(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(key): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<Message>>, ServerError> {
    let conversation = parse_conversation(&key)?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_LIMIT);

    let db = state.lock_db()?;
    require_participant(&db, &conversation, user)?;
    let messages = db.messages_for_conversation(&conversation, query.cursor, limit)?;
    Ok(Json(messages))
}

#[derive(Serialize)]
struct ReadResponse {
    acknowledged: u64,
}

async fn mark_conversation_read(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(key): Path<String>,
) -> Result<Json<ReadResponse>, ServerError> {
    let conversation = parse_conversation(&key)?;

    let acknowledged = {
        let db = state.lock_db()?;
        require_participant(&db, &conversation, user)?;
        db.mark_read(&conversation, user)?
    };

    // Repeated acknowledgments change nothing and stay silent.
    if acknowledged > 0 {
        let event = ServerEvent::ConversationRead {
            conversation,
            reader_id: user,
        };
        for channel in conversation.channels() {
            state.bus.publish(&channel, event.clone()).await;
        }
    }

    Ok(Json(ReadResponse { acknowledged }))
}

#[derive(Serialize)]
struct UnreadResponse {
    unread: u64,
}

async fn conversation_unread(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(key): Path<String>,
) -> Result<Json<UnreadResponse>, ServerError> {
    let conversation = parse_conversation(&key)?;
    let db = state.lock_db()?;
    require_participant(&db, &conversation, user)?;
    let unread = db.unread_count(&conversation, user)?;
    Ok(Json(UnreadResponse { unread }))
}

// ---- groups ----

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateGroupRequest {
    name: String,
    #[serde(default)]
    avatar_url: Option<String>,
    #[serde(default)]
    members: Vec<UserId>,
}

async fn create_group(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(req): Json<CreateGroupRequest>,
) -> Result<impl IntoResponse, ServerError> {
    if req.name.trim().is_empty() {
        return Err(ServerError::BadRequest("group name is required".into()));
    }
    let db = state.lock_db()?;
    let group = db.create_group(
        req.name.trim(),
        req.avatar_url.as_deref(),
        user,
        &req.members,
    )?;
    Ok((StatusCode::CREATED, Json(group)))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GroupSummary {
    #[serde(flatten)]
    group: Group,
    unread: u64,
}

async fn list_groups(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<GroupSummary>>, ServerError> {
    let db = state.lock_db()?;
    let groups = db
        .groups_for_user(user)?
        .into_iter()
        .map(|(group, unread)| GroupSummary { group, unread })
        .collect();
    Ok(Json(groups))
}

async fn delete_group(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ServerError> {
    let db = state.lock_db()?;
    require_admin(&db, GroupId(id), user)?;
    db.delete_group(GroupId(id))?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct AddMembersRequest {
    members: Vec<UserId>,
}

#[derive(Serialize)]
struct AddMembersResponse {
    added: usize,
}

async fn add_group_members(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<AddMembersRequest>,
) -> Result<Json<AddMembersResponse>, ServerError> {
    let db = state.lock_db()?;
    require_admin(&db, GroupId(id), user)?;
    let added = db.add_members(GroupId(id), &req.members)?;
    Ok(Json(AddMembersResponse { added }))
}

#[derive(Deserialize)]
struct SetRoleRequest {
    role: GroupRole,
}

async fn set_member_role(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path((id, target)): Path<(Uuid, Uuid)>,
    Json(req): Json<SetRoleRequest>,
) -> Result<Json<Group>, ServerError> {
    let db = state.lock_db()?;
    require_admin(&db, GroupId(id), user)?;
    db.set_member_role(GroupId(id), UserId(target), req.role)?;
    Ok(Json(db.group_by_id(GroupId(id))?))
}

async fn remove_group_member(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path((id, target)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ServerError> {
    let db = state.lock_db()?;
    // Anyone may leave; removing someone else takes admin.
    if UserId(target) != user {
        require_admin(&db, GroupId(id), user)?;
    }
    db.remove_member(GroupId(id), UserId(target))?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- helpers ----

fn parse_conversation(key: &str) -> Result<ConversationRef, ServerError> {
    ConversationRef::parse_key(key)
        .ok_or_else(|| ServerError::BadRequest(format!("malformed conversation key: {key}")))
}

fn require_participant(
    db: &Database,
    conversation: &ConversationRef,
    user: UserId,
) -> Result<(), ServerError> {
    let allowed = match conversation {
        ConversationRef::Direct { .. } => conversation.is_direct_participant(user),
        ConversationRef::Group { group_id } => db.is_member(*group_id, user)?,
    };
    if allowed {
        Ok(())
    } else {
        Err(ServerError::Forbidden(
            "not a participant of this conversation".into(),
        ))
    }
}

fn require_admin(db: &Database, group_id: GroupId, user: UserId) -> Result<(), ServerError> {
    let group = db.group_by_id(group_id)?;
    match group.role_of(user) {
        Some(GroupRole::Admin) => Ok(()),
        Some(GroupRole::Member) => {
            Err(ServerError::Forbidden("admin role required".into()))
        }
        None => Err(ServerError::Forbidden("not a member of this group".into())),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use tower::ServiceExt;

    use tutorlink_shared::constants::DEDUP_WINDOW_SECS;

    use super::*;
    use crate::auth::USER_ID_HEADER;

    fn test_state() -> AppState {
        let db = Arc::new(StdMutex::new(Database::open_in_memory().unwrap()));
        let bus = DeliveryBus::new();
        let ingress = Arc::new(MessageIngress::new(
            db.clone(),
            bus.clone(),
            Duration::from_secs(DEDUP_WINDOW_SECS),
        ));
        AppState::new(db, bus, ingress, Arc::new(ServerConfig::default()))
    }

    fn request(method: Method, uri: &str, user: Option<UserId>, body: Option<serde_json::Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(USER_ID_HEADER, user.to_string());
        }
        match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn response_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_instance_name() {
        let app = build_router(test_state());
        let response = app
            .oneshot(request(Method::GET, "/health", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = response_json(response).await;
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn submit_requires_identity_header() {
        let app = build_router(test_state());
        let (a, b) = (UserId::new(), UserId::new());
        let body = serde_json::json!({
            "conversation": ConversationRef::direct(a, b),
            "body": "hello",
            "correlationId": Uuid::new_v4(),
        });

        let response = app
            .oneshot(request(Method::POST, "/api/messages", None, Some(body)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn submit_then_fetch_history() {
        let state = test_state();
        let app = build_router(state);
        let (a, b) = (UserId::new(), UserId::new());
        let conv = ConversationRef::direct(a, b);

        let body = serde_json::json!({
            "conversation": conv,
            "body": "hello there",
            "correlationId": Uuid::new_v4(),
        });
        let response = app
            .clone()
            .oneshot(request(Method::POST, "/api/messages", Some(a), Some(body)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let uri = format!("/api/conversations/{}/messages", conv.key());
        let response = app
            .oneshot(request(Method::GET, &uri, Some(b), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = response_json(response).await;
        assert_eq!(json.as_array().unwrap().len(), 1);
        assert_eq!(json[0]["body"], "hello there");
    }

    #[tokio::test]
    async fn history_denied_to_non_participants() {
        let app = build_router(test_state());
        let conv = ConversationRef::direct(UserId::new(), UserId::new());

        let uri = format!("/api/conversations/{}/messages", conv.key());
        let response = app
            .oneshot(request(Method::GET, &uri, Some(UserId::new()), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn read_then_unread_drops_to_zero() {
        let app = build_router(test_state());
        let (a, b) = (UserId::new(), UserId::new());
        let conv = ConversationRef::direct(a, b);

        let body = serde_json::json!({
            "conversation": conv,
            "body": "ping",
            "correlationId": Uuid::new_v4(),
        });
        app.clone()
            .oneshot(request(Method::POST, "/api/messages", Some(a), Some(body)))
            .await
            .unwrap();

        let unread_uri = format!("/api/conversations/{}/unread", conv.key());
        let response = app
            .clone()
            .oneshot(request(Method::GET, &unread_uri, Some(b), None))
            .await
            .unwrap();
        assert_eq!(response_json(response).await["unread"], 1);

        let read_uri = format!("/api/conversations/{}/read", conv.key());
        let response = app
            .clone()
            .oneshot(request(Method::POST, &read_uri, Some(b), None))
            .await
            .unwrap();
        assert_eq!(response_json(response).await["acknowledged"], 1);

        let response = app
            .oneshot(request(Method::GET, &unread_uri, Some(b), None))
            .await
            .unwrap();
        assert_eq!(response_json(response).await["unread"], 0);
    }

    #[tokio::test]
    async fn group_admin_flow() {
        let app = build_router(test_state());
        let admin = UserId::new();
        let member = UserId::new();

        let response = app
            .clone()
            .oneshot(request(
                Method::POST,
                "/api/groups",
                Some(admin),
                Some(serde_json::json!({ "name": "Algebra cohort", "members": [member] })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let group = response_json(response).await;
        let group_id = group["id"].as_str().unwrap().to_string();

        // A plain member cannot add people.
        let outsider = UserId::new();
        let response = app
            .clone()
            .oneshot(request(
                Method::POST,
                &format!("/api/groups/{group_id}/members"),
                Some(member),
                Some(serde_json::json!({ "members": [outsider] })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        // The admin can.
        let response = app
            .clone()
            .oneshot(request(
                Method::POST,
                &format!("/api/groups/{group_id}/members"),
                Some(admin),
                Some(serde_json::json!({ "members": [outsider] })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_json(response).await["added"], 1);

        // Demoting the sole admin conflicts.
        let response = app
            .clone()
            .oneshot(request(
                Method::PUT,
                &format!("/api/groups/{group_id}/members/{admin}/role"),
                Some(admin),
                Some(serde_json::json!({ "role": "member" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        // A member may leave on their own.
        let response = app
            .oneshot(request(
                Method::DELETE,
                &format!("/api/groups/{group_id}/members/{member}"),
                Some(member),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn malformed_conversation_key_is_bad_request() {
        let app = build_router(test_state());
        let response = app
            .oneshot(request(
                Method::GET,
                "/api/conversations/nonsense/unread",
                Some(UserId::new()),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
