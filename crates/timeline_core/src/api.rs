/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Internal HTTP surface used by the activity, relationship and UI layers.

use crate::collaborators::{ActivityContentStore, ActivityStamp, IdentityKey, IdentityRef};
use crate::error::StreamError;
use crate::fanout::FanoutReport;
use crate::social_db::{ActivityOrigin, SocialDb};
use crate::timeline::Timeline;
use axum::{
    body::Body,
    http::{HeaderValue, Request, Response, StatusCode},
    response::IntoResponse,
    routing::any,
    Router,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use timeline_protocol::{
    ActivityResponse, ActivityStampDto, ConnectionRequest, CountResponse, FanoutReportDto, IdentityRefDto,
    IdentityResponse, PageResponse, SpaceMemberRequest, StoreActivityRequest, StreamType, UpdateActivityRequest,
};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

const INTERNAL_HEADER: &str = "X-Timeline-Internal";
const DEFAULT_PAGE_LIMIT: u32 = 50;

#[derive(Clone)]
pub struct ApiState {
    pub timeline: Arc<Timeline>,
    pub social: Arc<SocialDb>,
    pub internal_token: String,
    pub max_body_bytes: usize,
}

pub fn router(state: ApiState) -> Router {
    let max_body_bytes = state.max_body_bytes;
    Router::new()
        .fallback(any(move |req| {
            let st = state.clone();
            async move { handle_request(&st, req).await }
        }))
        .layer(axum::extract::DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
}

pub async fn handle_request(state: &ApiState, req: Request<Body>) -> Response<Body> {
    let path = req.uri().path().to_string();
    if path.starts_with("/_timeline/") {
        if let Err(resp) = require_internal(state, req.headers()) {
            return resp;
        }
    }
    let decoded = match path
        .trim_matches('/')
        .split('/')
        .map(|s| urlencoding::decode(s).map(|v| v.into_owned()))
        .collect::<Result<Vec<_>, _>>()
    {
        Ok(v) => v,
        Err(_) => return simple(StatusCode::BAD_REQUEST, "invalid path encoding"),
    };
    let segs: Vec<&str> = decoded.iter().map(String::as_str).collect();
    let method = req.method().as_str().to_string();

    let resp = match (method.as_str(), segs.as_slice()) {
        ("GET", ["healthz"]) => simple(StatusCode::OK, "ok"),
        ("GET", ["readyz"]) => readyz_get(state).await,
        ("PUT", ["_timeline", "identities", provider, remote_id]) => {
            identity_put(state, IdentityRef::new(*provider, *remote_id)).await
        }
        ("DELETE", ["_timeline", "identities", provider, remote_id]) => {
            identity_delete(state, IdentityRef::new(*provider, *remote_id)).await
        }
        ("POST", ["_timeline", "activities"]) => activity_post(state, req).await,
        ("PUT", ["_timeline", "activities", id]) => activity_put(state, id.to_string(), req).await,
        ("DELETE", ["_timeline", "activities", id]) => activity_delete(state, id.to_string()).await,
        ("POST", ["_timeline", "connections"]) => connection_post(state, req, true).await,
        ("POST", ["_timeline", "connections", "break"]) => connection_post(state, req, false).await,
        ("POST", ["_timeline", "spaces", provider, remote_id, "members"]) => {
            member_post(state, IdentityRef::new(*provider, *remote_id), req, true).await
        }
        ("POST", ["_timeline", "spaces", provider, remote_id, "members", "leave"]) => {
            member_post(state, IdentityRef::new(*provider, *remote_id), req, false).await
        }
        ("GET", ["_timeline", "streams", provider, remote_id, stream]) => {
            stream_get(state, IdentityRef::new(*provider, *remote_id), stream, req.uri().query()).await
        }
        ("GET", ["_timeline", "streams", provider, remote_id, stream, "count"]) => {
            count_get(state, IdentityRef::new(*provider, *remote_id), stream).await
        }
        _ => simple(StatusCode::NOT_FOUND, "not found"),
    };
    add_security_headers(resp)
}

async fn readyz_get(state: &ApiState) -> Response<Body> {
    let st = state.clone();
    let ready = tokio::task::spawn_blocking(move || st.social.health_check().is_ok() && st.timeline.health_check().is_ok())
        .await
        .unwrap_or(false);
    if ready {
        simple(StatusCode::OK, "ready")
    } else {
        simple(StatusCode::SERVICE_UNAVAILABLE, "db not ready")
    }
}

async fn identity_put(state: &ApiState, identity: IdentityRef) -> Response<Body> {
    let st = state.clone();
    let res = blocking(move || {
        let key = st.social.upsert_identity(&identity).map_err(db_error)?;
        Ok(IdentityResponse {
            identity: IdentityRefDto::from(&identity),
            key: key.0,
        })
    })
    .await;
    json_result(StatusCode::OK, res)
}

async fn identity_delete(state: &ApiState, identity: IdentityRef) -> Response<Body> {
    let st = state.clone();
    let res = blocking(move || {
        if st.social.delete_identity(&identity).map_err(db_error)? {
            Ok(())
        } else {
            Err(simple(StatusCode::NOT_FOUND, "identity not found"))
        }
    })
    .await;
    match res {
        Ok(()) => simple(StatusCode::NO_CONTENT, ""),
        Err(resp) => resp,
    }
}

async fn activity_post(state: &ApiState, req: Request<Body>) -> Response<Body> {
    let input: StoreActivityRequest = match read_json(state, req).await {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let st = state.clone();
    let res = blocking(move || {
        let owner = IdentityRef::from(input.owner);
        let owner_key = known_identity(&st.social, &owner)?;
        let space = input.space.map(IdentityRef::from);
        let space_key = match &space {
            Some(s) => Some(known_identity(&st.social, s)?),
            None => None,
        };
        if let Some(id) = input.id.as_deref() {
            if st.social.exists(id).map_err(db_error)? {
                return Err(simple(StatusCode::CONFLICT, "activity already exists"));
            }
        }
        let body = serde_json::to_string(&input.body).map_err(|e| simple(StatusCode::BAD_REQUEST, &e.to_string()))?;
        let stamp = st
            .social
            .store_activity(&owner_key, space_key.as_ref(), input.id.as_deref(), input.created_at_ms, &body)
            .map_err(db_error)?;
        let report = match &space {
            Some(s) => st.timeline.record_space_activity_created(s, &stamp.id),
            None => st.timeline.record_activity_created(&owner, &stamp.id),
        }
        .map_err(stream_error)?;
        Ok(ActivityResponse {
            activity: stamp_dto(stamp),
            fanout: report.into(),
        })
    })
    .await;
    json_result(StatusCode::CREATED, res)
}

async fn activity_put(state: &ApiState, id: String, req: Request<Body>) -> Response<Body> {
    let input: UpdateActivityRequest = match read_json(state, req).await {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let st = state.clone();
    let res = blocking(move || {
        let row = st
            .social
            .get_activity(&id)
            .map_err(db_error)?
            .ok_or_else(|| stream_error(StreamError::ActivityNotFound(id.clone())))?;
        let body = serde_json::to_string(&input.body).map_err(|e| simple(StatusCode::BAD_REQUEST, &e.to_string()))?;
        let stamp = st
            .social
            .update_activity(&id, &body)
            .map_err(db_error)?
            .ok_or_else(|| stream_error(StreamError::ActivityNotFound(id.clone())))?;
        let report = match row.origin() {
            Some(ActivityOrigin::Space(s)) => st.timeline.record_space_activity_updated(s, &id),
            Some(ActivityOrigin::Author(owner)) => st.timeline.record_activity_updated(owner, &id),
            None => Ok(orphaned(&id)),
        }
        .map_err(stream_error)?;
        Ok(ActivityResponse {
            activity: stamp_dto(stamp),
            fanout: report.into(),
        })
    })
    .await;
    json_result(StatusCode::OK, res)
}

async fn activity_delete(state: &ApiState, id: String) -> Response<Body> {
    let st = state.clone();
    let res = blocking(move || {
        let row = st
            .social
            .get_activity(&id)
            .map_err(db_error)?
            .ok_or_else(|| stream_error(StreamError::ActivityNotFound(id.clone())))?;
        st.social.delete_activity(&id).map_err(db_error)?;
        let report = match row.origin() {
            Some(ActivityOrigin::Space(s)) => st.timeline.record_space_activity_deleted(s, &id),
            Some(ActivityOrigin::Author(owner)) => st.timeline.record_activity_deleted(owner, &id),
            None => Ok(orphaned(&id)),
        }
        .map_err(stream_error)?;
        Ok(FanoutReportDto::from(report))
    })
    .await;
    json_result(StatusCode::OK, res)
}

/// Lists of a deleted identity are left to the reader to heal.
fn orphaned(activity_id: &str) -> FanoutReport {
    debug!("activity {activity_id} has no resolvable origin; fan-out skipped");
    FanoutReport::default()
}

async fn connection_post(state: &ApiState, req: Request<Body>, attach: bool) -> Response<Body> {
    let input: ConnectionRequest = match read_json(state, req).await {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let st = state.clone();
    let res = blocking(move || {
        let (a, b) = (IdentityRef::from(input.a), IdentityRef::from(input.b));
        let ka = known_identity(&st.social, &a)?;
        let kb = known_identity(&st.social, &b)?;
        let report = if attach {
            st.social.add_connection(&ka, &kb).map_err(db_error)?;
            st.timeline.record_connection_established(&a, &b)
        } else {
            st.social.remove_connection(&ka, &kb).map_err(db_error)?;
            st.timeline.record_connection_broken(&a, &b)
        }
        .map_err(stream_error)?;
        Ok(FanoutReportDto::from(report))
    })
    .await;
    json_result(StatusCode::OK, res)
}

async fn member_post(state: &ApiState, space: IdentityRef, req: Request<Body>, join: bool) -> Response<Body> {
    let input: SpaceMemberRequest = match read_json(state, req).await {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let st = state.clone();
    let res = blocking(move || {
        let member = IdentityRef::from(input.member);
        let ks = known_identity(&st.social, &space)?;
        let km = known_identity(&st.social, &member)?;
        let report = if join {
            st.social
                .add_space_member(&ks, &km, input.role.as_deref())
                .map_err(db_error)?;
            st.timeline.record_space_member_joined(&space, &member)
        } else {
            st.social.remove_space_member(&ks, &km).map_err(db_error)?;
            st.timeline.record_space_member_left(&space, &member)
        }
        .map_err(stream_error)?;
        Ok(FanoutReportDto::from(report))
    })
    .await;
    json_result(StatusCode::OK, res)
}

async fn stream_get(state: &ApiState, identity: IdentityRef, stream: &str, query: Option<&str>) -> Response<Body> {
    let Some(stream) = StreamType::parse(stream) else {
        return simple(StatusCode::BAD_REQUEST, "unknown stream");
    };
    let query = query.unwrap_or("");
    let offset = query_u32(query, "offset").unwrap_or(0);
    let limit = query_u32(query, "limit").unwrap_or(DEFAULT_PAGE_LIMIT);
    let st = state.clone();
    let res = blocking(move || {
        let items = st
            .timeline
            .page(&identity, stream, offset, limit)
            .map_err(stream_error)?;
        Ok(PageResponse {
            stream,
            offset,
            limit,
            items,
        })
    })
    .await;
    json_result(StatusCode::OK, res)
}

async fn count_get(state: &ApiState, identity: IdentityRef, stream: &str) -> Response<Body> {
    let Some(stream) = StreamType::parse(stream) else {
        return simple(StatusCode::BAD_REQUEST, "unknown stream");
    };
    let st = state.clone();
    let res = blocking(move || {
        let total = st.timeline.count(&identity, stream).map_err(stream_error)?;
        Ok(CountResponse { stream, total })
    })
    .await;
    json_result(StatusCode::OK, res)
}

fn require_internal(state: &ApiState, headers: &http::HeaderMap) -> std::result::Result<(), Response<Body>> {
    if state.internal_token.is_empty() {
        return Ok(());
    }
    let token = headers
        .get(INTERNAL_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if token != state.internal_token {
        warn!("rejected internal request: invalid token");
        return Err(simple(StatusCode::FORBIDDEN, "forbidden"));
    }
    Ok(())
}

/// Runs store work off the async executor.
async fn blocking<T, F>(f: F) -> std::result::Result<T, Response<Body>>
where
    T: Send + 'static,
    F: FnOnce() -> std::result::Result<T, Response<Body>> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(res) => res,
        Err(e) => {
            warn!("blocking task failed: {e}");
            Err(simple(StatusCode::INTERNAL_SERVER_ERROR, "internal error"))
        }
    }
}

async fn read_json<T: DeserializeOwned>(state: &ApiState, req: Request<Body>) -> std::result::Result<T, Response<Body>> {
    let bytes = match axum::body::to_bytes(req.into_body(), state.max_body_bytes).await {
        Ok(b) => b,
        Err(_) => return Err(simple(StatusCode::PAYLOAD_TOO_LARGE, "body too large")),
    };
    if bytes.is_empty() {
        return Err(simple(StatusCode::BAD_REQUEST, "empty body"));
    }
    serde_json::from_slice(&bytes).map_err(|e| simple(StatusCode::BAD_REQUEST, &format!("invalid body: {e}")))
}

fn known_identity(social: &SocialDb, identity: &IdentityRef) -> std::result::Result<IdentityKey, Response<Body>> {
    social
        .find_identity(identity)
        .map_err(db_error)?
        .ok_or_else(|| stream_error(StreamError::ReferenceTargetMissing(identity.to_string())))
}

fn stream_error(e: StreamError) -> Response<Body> {
    let status = if e.is_transient() {
        warn!("request failed: {e}");
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::NOT_FOUND
    };
    simple(status, &e.to_string())
}

fn db_error(e: anyhow::Error) -> Response<Body> {
    warn!("db error: {e:#}");
    simple(StatusCode::SERVICE_UNAVAILABLE, &format!("db error: {e:#}"))
}

fn json_result<T: Serialize>(status: StatusCode, res: std::result::Result<T, Response<Body>>) -> Response<Body> {
    match res {
        Ok(v) => (status, axum::Json(v)).into_response(),
        Err(resp) => resp,
    }
}

fn stamp_dto(s: ActivityStamp) -> ActivityStampDto {
    ActivityStampDto {
        id: s.id,
        created_at_ms: s.created_at_ms,
        last_updated_ms: s.last_updated_ms,
    }
}

fn query_u32(query: &str, name: &str) -> Option<u32> {
    query
        .split('&')
        .filter_map(|p| p.split_once('='))
        .find(|(k, _)| *k == name)
        .and_then(|(_, v)| v.parse::<u32>().ok())
}

fn add_security_headers(mut resp: Response<Body>) -> Response<Body> {
    let headers = resp.headers_mut();
    headers.entry("X-Content-Type-Options").or_insert(HeaderValue::from_static("nosniff"));
    headers.entry("Cache-Control").or_insert(HeaderValue::from_static("no-store"));
    resp
}

fn simple(status: StatusCode, msg: &str) -> Response<Body> {
    let mut resp = Response::new(Body::from(msg.to_string()));
    *resp.status_mut() = status;
    resp
}
