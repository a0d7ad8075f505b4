//! Operation dispatch.
//!
//! | mode     | op            | method | action                                    |
//! |----------|---------------|--------|-------------------------------------------|
//! | `api`    | `ping`        | any    | `{ok, ts}`, no session needed             |
//! | `api`    | `sessionInfo` | any    | `{ok, info: {ok, role}}`, no session needed |
//! | `api`    | `login`       | POST   | issue an admin session                    |
//! | `api`    | `logout`      | any    | revoke the session                        |
//! | `api`    | `update`      | POST   | admin only, forwarded                     |
//! | `api`    | other         | any    | `bad_op`                                  |
//! | `data`   |               | GET    | any session, forwarded                    |
//! | `update` |               | GET/POST | admin only, forwarded                   |
//! | none     |               |        | `not_found`                               |
//!
//! `ping` and `sessionInfo` never touch the upstream, and `login` is the only
//! operation that creates a session.

use std::sync::Arc;

use bytes::Bytes;
use http::{Method, Response};
use http_body_util::Full;
use serde_json::{json, Value};
use sheet_relay_telemetry::metrics::record_login;
use tracing::{info, warn};

use crate::config::{AuthSettings, RelayConfig};
use crate::cors::OriginPolicy;
use crate::error::{RelayError, RelayResult};
use crate::normalize::{finalize, normalize, normalize_update, preflight, RelayResponse};
use crate::request::{Mode, RequestDescriptor};
use crate::session::{Role, SessionStore};
use crate::upstream::{Forwarder, Upstream};

const EMPTY_OBJECT: &[u8] = b"{}";

/// Routes requests to local handlers or the forwarder.
#[derive(Debug)]
pub struct Dispatcher {
    policy: OriginPolicy,
    sessions: SessionStore,
    auth: AuthSettings,
    forwarder: Forwarder,
}

impl Dispatcher {
    /// Build the dispatcher from configuration and an upstream transport.
    pub fn new(config: &RelayConfig, upstream: Arc<dyn Upstream>) -> Self {
        Self {
            policy: OriginPolicy::new(&config.cors),
            sessions: SessionStore::new(&config.session),
            auth: config.auth.clone(),
            forwarder: Forwarder::new(config.upstream.base_url.clone(), upstream),
        }
    }

    /// Session store in use.
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Handle one request end to end. Never fails: errors become envelopes.
    pub async fn handle(&self, request: RequestDescriptor, request_id: &str) -> Response<Full<Bytes>> {
        let cors = self.policy.decide(request.origin.as_deref());

        if request.method == Method::OPTIONS {
            return preflight(self.policy.preflight_headers(&cors), request_id);
        }

        let response = match self.dispatch(&request).await {
            Ok(response) => response,
            Err(e) => {
                if !e.is_upstream() {
                    info!(route = %request.route(), error = e.code(), "request rejected");
                }
                RelayResponse::from_error(&e)
            }
        };

        finalize(response, &cors, request_id)
    }

    /// Render `err` for a request that failed before a descriptor existed.
    pub fn reject(&self, origin: Option<&str>, err: &RelayError, request_id: &str) -> Response<Full<Bytes>> {
        let cors = self.policy.decide(origin);
        finalize(RelayResponse::from_error(err), &cors, request_id)
    }

    async fn dispatch(&self, request: &RequestDescriptor) -> RelayResult<RelayResponse> {
        if !request.is_api_path() {
            return Err(RelayError::NotFound);
        }

        match request.mode {
            Some(Mode::Api) => self.api(request).await,
            Some(Mode::Data) => self.data(request).await,
            Some(Mode::Update) => self.update(request, Mode::Update).await,
            None => Err(RelayError::NotFound),
        }
    }

    async fn api(&self, request: &RequestDescriptor) -> RelayResult<RelayResponse> {
        match request.op.as_deref().unwrap_or("") {
            "ping" => Ok(ping()),
            "sessionInfo" => Ok(self.session_info(request)),
            "login" => self.login(request),
            "logout" => Ok(self.logout()),
            "update" => self.update(request, Mode::Api).await,
            other => Err(RelayError::bad_op(other)),
        }
    }

    fn session_info(&self, request: &RequestDescriptor) -> RelayResponse {
        let role = self.sessions.validate(request.cookie.as_deref());
        RelayResponse::ok(json!({
            "ok": true,
            "info": {
                "ok": role.is_some(),
                "role": role.unwrap_or(Role::User),
            },
        }))
    }

    fn login(&self, request: &RequestDescriptor) -> RelayResult<RelayResponse> {
        require_method(request, &[Method::POST])?;

        let body: Value = serde_json::from_slice(&request.body).map_err(|_| RelayError::BadJson)?;
        let username = body.get("username").and_then(Value::as_str).unwrap_or("");
        let password = body.get("password").and_then(Value::as_str).unwrap_or("");

        if !self.credentials_match(username, password) {
            warn!(username, "login rejected");
            record_login(false);
            return Err(RelayError::InvalidCredentials);
        }

        info!(username, "admin session issued");
        record_login(true);
        Ok(RelayResponse::ok(json!({ "ok": true, "role": Role::Admin }))
            .with_cookie(self.sessions.issue(Role::Admin)))
    }

    fn credentials_match(&self, username: &str, password: &str) -> bool {
        if password.is_empty() || username.to_lowercase() != self.auth.admin_username.to_lowercase() {
            return false;
        }
        self.auth
            .admin_password
            .as_deref()
            .map_or(true, |expected| expected == password)
    }

    fn logout(&self) -> RelayResponse {
        RelayResponse::ok(json!({ "ok": true })).with_cookie(self.sessions.revoke())
    }

    async fn data(&self, request: &RequestDescriptor) -> RelayResult<RelayResponse> {
        self.sessions
            .validate(request.cookie.as_deref())
            .ok_or(RelayError::Unauthorized)?;
        require_method(request, &[Method::GET])?;

        let response = self.forwarder.forward(request, Mode::Data, None).await?;
        normalize(response)
    }

    async fn update(&self, request: &RequestDescriptor, mode: Mode) -> RelayResult<RelayResponse> {
        let role = self
            .sessions
            .validate(request.cookie.as_deref())
            .ok_or(RelayError::Unauthorized)?;
        if !role.is_admin() {
            return Err(RelayError::Unauthorized);
        }
        match mode {
            Mode::Api => require_method(request, &[Method::POST])?,
            _ => require_method(request, &[Method::GET, Method::POST])?,
        }

        // Malformed or empty payloads are forwarded as an empty object.
        let body_override = (request.method == Method::POST && request.json_body().is_none())
            .then(|| Bytes::from_static(EMPTY_OBJECT));

        let response = self.forwarder.forward(request, mode, body_override).await?;
        normalize_update(response)
    }
}

fn ping() -> RelayResponse {
    RelayResponse::ok(json!({
        "ok": true,
        "ts": chrono::Utc::now().timestamp_millis(),
    }))
}

fn require_method(request: &RequestDescriptor, allowed: &[Method]) -> RelayResult<()> {
    if allowed.contains(&request.method) {
        Ok(())
    } else {
        Err(RelayError::method_not_allowed(&request.method))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use http::{HeaderMap, HeaderValue, StatusCode};
    use http_body_util::BodyExt;

    use super::*;
    use crate::upstream::{BoxFuture, UpstreamRequest, UpstreamResponse};

    /// Records calls and answers with a canned response.
    struct RecordingUpstream {
        calls: AtomicUsize,
        last: Mutex<Option<UpstreamRequest>>,
        reply: fn() -> RelayResult<UpstreamResponse>,
    }

    impl RecordingUpstream {
        fn new(reply: fn() -> RelayResult<UpstreamResponse>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                last: Mutex::new(None),
                reply,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn last_url(&self) -> String {
            self.last.lock().unwrap().as_ref().map(|r| r.target.url()).unwrap_or_default()
        }

        fn last_body(&self) -> Option<Bytes> {
            self.last.lock().unwrap().as_ref().and_then(|r| r.body.clone())
        }
    }

    impl Upstream for RecordingUpstream {
        fn send(&self, request: UpstreamRequest) -> BoxFuture<'_, RelayResult<UpstreamResponse>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock().unwrap() = Some(request);
            let reply = (self.reply)();
            Box::pin(async move { reply })
        }
    }

    fn json_reply() -> RelayResult<UpstreamResponse> {
        Ok(UpstreamResponse::new(
            StatusCode::OK,
            Some("application/json"),
            r#"{"ok":true,"rows":[["a",1]]}"#,
        ))
    }

    fn html_reply() -> RelayResult<UpstreamResponse> {
        Ok(UpstreamResponse::new(
            StatusCode::OK,
            Some("text/html"),
            "<html>error</html>",
        ))
    }

    fn unreachable_reply() -> RelayResult<UpstreamResponse> {
        Err(RelayError::upstream_unreachable("connection refused"))
    }

    const BASE: &str = "https://script.example.com/exec";
    const APP: &str = "https://app.example.com";

    fn dispatcher(upstream: Arc<RecordingUpstream>) -> Dispatcher {
        let config = RelayConfig::builder()
            .upstream_url(BASE)
            .allow_origin(APP)
            .build()
            .unwrap();
        Dispatcher::new(&config, upstream)
    }

    struct Call<'a> {
        method: Method,
        path: &'a str,
        query: &'a str,
        body: &'a str,
        cookie: Option<&'a str>,
        origin: Option<&'a str>,
    }

    impl<'a> Call<'a> {
        fn get(path: &'a str, query: &'a str) -> Self {
            Self {
                method: Method::GET,
                path,
                query,
                body: "",
                cookie: None,
                origin: Some(APP),
            }
        }

        fn post(path: &'a str, query: &'a str, body: &'a str) -> Self {
            Self {
                method: Method::POST,
                body,
                ..Self::get(path, query)
            }
        }

        fn cookie(mut self, cookie: &'a str) -> Self {
            self.cookie = Some(cookie);
            self
        }

        fn origin(mut self, origin: Option<&'a str>) -> Self {
            self.origin = origin;
            self
        }

        fn method(mut self, method: Method) -> Self {
            self.method = method;
            self
        }

        fn descriptor(&self) -> RequestDescriptor {
            let mut headers = HeaderMap::new();
            if let Some(cookie) = self.cookie {
                headers.insert(http::header::COOKIE, HeaderValue::from_str(cookie).unwrap());
            }
            if let Some(origin) = self.origin {
                headers.insert(http::header::ORIGIN, HeaderValue::from_str(origin).unwrap());
            }
            RequestDescriptor::new(
                self.method.clone(),
                self.path,
                Some(self.query),
                &headers,
                Bytes::copy_from_slice(self.body.as_bytes()),
            )
        }
    }

    struct Answer {
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
    }

    impl Answer {
        fn json(&self) -> Value {
            serde_json::from_slice(&self.body).unwrap()
        }

        fn cookie_pair(&self) -> String {
            let directive = self.headers[http::header::SET_COOKIE].to_str().unwrap();
            directive.split(';').next().unwrap().to_string()
        }
    }

    async fn run(dispatcher: &Dispatcher, call: Call<'_>) -> Answer {
        let response = dispatcher.handle(call.descriptor(), "test").await;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        Answer { status, headers, body }
    }

    async fn admin_cookie(dispatcher: &Dispatcher) -> String {
        let answer = run(
            dispatcher,
            Call::post("/api", "mode=api&op=login", r#"{"username":"admin","password":"x"}"#),
        )
        .await;
        answer.cookie_pair()
    }

    #[tokio::test]
    async fn test_ping_needs_no_session() {
        let upstream = RecordingUpstream::new(json_reply);
        let dispatcher = dispatcher(upstream.clone());

        for call in [
            Call::get("/api", "mode=api&op=ping"),
            Call::post("/api", "mode=api&op=ping", "").origin(None),
            Call::get("/api", "mode=api&op=ping").origin(Some("https://elsewhere.example.org")),
        ] {
            let answer = run(&dispatcher, call).await;
            assert_eq!(answer.status, StatusCode::OK);
            let json = answer.json();
            assert_eq!(json["ok"], true);
            assert!(json["ts"].is_i64());
            assert_eq!(answer.headers[http::header::CACHE_CONTROL], "no-store");
        }
        assert_eq!(upstream.calls(), 0);
    }

    #[tokio::test]
    async fn test_session_info_without_cookie() {
        let dispatcher = dispatcher(RecordingUpstream::new(json_reply));
        let answer = run(&dispatcher, Call::get("/api", "mode=api&op=sessionInfo")).await;
        assert_eq!(
            answer.json(),
            json!({"ok": true, "info": {"ok": false, "role": "user"}})
        );
    }

    #[tokio::test]
    async fn test_login_session_info_logout_cycle() {
        let upstream = RecordingUpstream::new(json_reply);
        let dispatcher = dispatcher(upstream.clone());

        let login = run(
            &dispatcher,
            Call::post("/api", "mode=api&op=login", r#"{"username":"Admin","password":"x"}"#),
        )
        .await;
        assert_eq!(login.status, StatusCode::OK);
        assert_eq!(login.json(), json!({"ok": true, "role": "admin"}));
        let directive = login.headers[http::header::SET_COOKIE].to_str().unwrap();
        assert!(directive.contains("=admin"));
        assert!(directive.contains("Max-Age=28800"));
        assert_eq!(login.headers["access-control-allow-credentials"], "true");

        let cookie = login.cookie_pair();
        let info = run(
            &dispatcher,
            Call::get("/api", "mode=api&op=sessionInfo").cookie(&cookie),
        )
        .await;
        assert_eq!(info.json(), json!({"ok": true, "info": {"ok": true, "role": "admin"}}));

        for _ in 0..2 {
            let logout = run(&dispatcher, Call::get("/api", "mode=api&op=logout").cookie(&cookie)).await;
            assert_eq!(logout.status, StatusCode::OK);
            assert_eq!(logout.json(), json!({"ok": true}));
            let directive = logout.headers[http::header::SET_COOKIE].to_str().unwrap();
            assert!(directive.contains("Max-Age=0"));

            // The browser drops the cookie; what it sends back is the empty value.
            let after = run(
                &dispatcher,
                Call::get("/api", "mode=api&op=sessionInfo").cookie(&logout.cookie_pair()),
            )
            .await;
            assert_eq!(after.json(), json!({"ok": true, "info": {"ok": false, "role": "user"}}));
        }

        assert_eq!(upstream.calls(), 0);
    }

    #[tokio::test]
    async fn test_login_rejections() {
        let dispatcher = dispatcher(RecordingUpstream::new(json_reply));

        let answer = run(
            &dispatcher,
            Call::post("/api", "mode=api&op=login", r#"{"username":"nobody","password":""}"#),
        )
        .await;
        assert_eq!(answer.status, StatusCode::UNAUTHORIZED);
        assert_eq!(answer.json(), json!({"ok": false, "error": "invalid_credentials"}));
        assert!(answer.headers.get(http::header::SET_COOKIE).is_none());

        let answer = run(
            &dispatcher,
            Call::post("/api", "mode=api&op=login", r#"{"username":"admin","password":""}"#),
        )
        .await;
        assert_eq!(answer.status, StatusCode::UNAUTHORIZED);

        let answer = run(
            &dispatcher,
            Call::post("/api", "mode=api&op=login", r#"{"username":"bob","password":"x"}"#),
        )
        .await;
        assert_eq!(answer.status, StatusCode::UNAUTHORIZED);

        let answer = run(&dispatcher, Call::post("/api", "mode=api&op=login", "{not json")).await;
        assert_eq!(answer.status, StatusCode::BAD_REQUEST);
        assert_eq!(answer.json(), json!({"ok": false, "error": "bad_json"}));

        let answer = run(&dispatcher, Call::get("/api", "mode=api&op=login")).await;
        assert_eq!(answer.status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_login_with_configured_password() {
        let config = RelayConfig::builder()
            .upstream_url(BASE)
            .admin_password("hunter2")
            .build()
            .unwrap();
        let dispatcher = Dispatcher::new(&config, RecordingUpstream::new(json_reply));

        let wrong = run(
            &dispatcher,
            Call::post("/api", "mode=api&op=login", r#"{"username":"admin","password":"x"}"#),
        )
        .await;
        assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);

        let right = run(
            &dispatcher,
            Call::post("/api", "mode=api&op=login", r#"{"username":"admin","password":"hunter2"}"#),
        )
        .await;
        assert_eq!(right.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_update_requires_admin_and_skips_upstream() {
        let upstream = RecordingUpstream::new(json_reply);
        let dispatcher = dispatcher(upstream.clone());

        let anonymous = run(&dispatcher, Call::post("/api", "mode=api&op=update", r#"{"id":1}"#)).await;
        assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);
        assert_eq!(anonymous.json(), json!({"ok": false, "error": "unauthorized"}));

        let user = run(
            &dispatcher,
            Call::post("/api", "mode=api&op=update", r#"{"id":1}"#).cookie("__Host-sheet_sess=user"),
        )
        .await;
        assert_eq!(user.status, StatusCode::UNAUTHORIZED);

        assert_eq!(upstream.calls(), 0);
    }

    #[tokio::test]
    async fn test_update_checks_role_before_method() {
        let upstream = RecordingUpstream::new(json_reply);
        let dispatcher = dispatcher(upstream.clone());

        let answer = run(&dispatcher, Call::get("/api", "mode=api&op=update")).await;
        assert_eq!(answer.status, StatusCode::UNAUTHORIZED);
        assert_eq!(upstream.calls(), 0);
    }

    #[tokio::test]
    async fn test_update_forwards_body_verbatim() {
        let upstream = RecordingUpstream::new(json_reply);
        let dispatcher = dispatcher(upstream.clone());
        let cookie = admin_cookie(&dispatcher).await;

        let raw = r#"{"op":"update", "id": 7, "qty": 1.50}"#;
        let answer = run(&dispatcher, Call::post("/api", "mode=api", raw).cookie(&cookie)).await;

        assert_eq!(answer.status, StatusCode::OK);
        assert_eq!(upstream.calls(), 1);
        assert_eq!(upstream.last_url(), format!("{BASE}?mode=api&op=update"));
        assert_eq!(upstream.last_body().as_deref(), Some(raw.as_bytes()));
    }

    #[tokio::test]
    async fn test_update_with_malformed_body_forwards_empty_object() {
        let upstream = RecordingUpstream::new(json_reply);
        let dispatcher = dispatcher(upstream.clone());
        let cookie = admin_cookie(&dispatcher).await;

        let answer = run(
            &dispatcher,
            Call::post("/api", "mode=api&op=update", "{oops").cookie(&cookie),
        )
        .await;
        assert_eq!(answer.status, StatusCode::OK);
        assert_eq!(upstream.last_body().as_deref(), Some(&b"{}"[..]));
    }

    #[tokio::test]
    async fn test_update_requires_post() {
        let upstream = RecordingUpstream::new(json_reply);
        let dispatcher = dispatcher(upstream.clone());
        let cookie = admin_cookie(&dispatcher).await;

        let answer = run(&dispatcher, Call::get("/api", "mode=api&op=update").cookie(&cookie)).await;
        assert_eq!(answer.status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(upstream.calls(), 0);
    }

    #[tokio::test]
    async fn test_update_mode_acknowledges_html() {
        let upstream = RecordingUpstream::new(html_reply);
        let dispatcher = dispatcher(upstream.clone());
        let cookie = admin_cookie(&dispatcher).await;

        let answer = run(
            &dispatcher,
            Call::get("/api", "mode=update&row=4&value=x").cookie(&cookie),
        )
        .await;
        assert_eq!(answer.status, StatusCode::OK);
        assert_eq!(answer.json(), json!({"ok": true}));
        assert_eq!(upstream.last_url(), format!("{BASE}?mode=update&row=4&value=x"));
    }

    #[tokio::test]
    async fn test_data_requires_session() {
        let upstream = RecordingUpstream::new(json_reply);
        let dispatcher = dispatcher(upstream.clone());

        let answer = run(&dispatcher, Call::get("/api/data", "mode=data")).await;
        assert_eq!(answer.status, StatusCode::UNAUTHORIZED);
        assert_eq!(upstream.calls(), 0);
    }

    #[tokio::test]
    async fn test_data_relays_json_for_any_role() {
        let upstream = RecordingUpstream::new(json_reply);
        let dispatcher = dispatcher(upstream.clone());

        for cookie in ["__Host-sheet_sess=user", "__Host-sheet_sess=admin"] {
            let answer = run(&dispatcher, Call::get("/api/data", "mode=data").cookie(cookie)).await;
            assert_eq!(answer.status, StatusCode::OK);
            assert_eq!(answer.body, &br#"{"ok":true,"rows":[["a",1]]}"#[..]);
        }
        assert_eq!(upstream.calls(), 2);
        assert_eq!(upstream.last_url(), format!("{BASE}?mode=data"));
    }

    #[tokio::test]
    async fn test_data_defaults_mode_from_path() {
        let upstream = RecordingUpstream::new(json_reply);
        let dispatcher = dispatcher(upstream.clone());

        let answer = run(
            &dispatcher,
            Call::get("/api/data", "sheet=Stock").cookie("__Host-sheet_sess=user"),
        )
        .await;
        assert_eq!(answer.status, StatusCode::OK);
        assert_eq!(upstream.last_url(), format!("{BASE}?sheet=Stock&mode=data"));
    }

    #[tokio::test]
    async fn test_data_html_becomes_502() {
        let dispatcher = dispatcher(RecordingUpstream::new(html_reply));
        let answer = run(
            &dispatcher,
            Call::get("/api/data", "mode=data").cookie("__Host-sheet_sess=user"),
        )
        .await;
        assert_eq!(answer.status, StatusCode::BAD_GATEWAY);
        assert_eq!(
            answer.json(),
            json!({
                "ok": false,
                "error": "upstream_non_json",
                "status": 200,
                "preview": "<html>error</html>",
            })
        );
    }

    #[tokio::test]
    async fn test_data_unreachable_becomes_502() {
        let dispatcher = dispatcher(RecordingUpstream::new(unreachable_reply));
        let answer = run(
            &dispatcher,
            Call::get("/api/data", "mode=data").cookie("__Host-sheet_sess=admin"),
        )
        .await;
        assert_eq!(answer.status, StatusCode::BAD_GATEWAY);
        assert_eq!(answer.json()["error"], "upstream_unreachable");
        assert_eq!(answer.json()["detail"], "connection refused");
    }

    #[tokio::test]
    async fn test_data_requires_get() {
        let upstream = RecordingUpstream::new(json_reply);
        let dispatcher = dispatcher(upstream.clone());
        let answer = run(
            &dispatcher,
            Call::post("/api/data", "mode=data", "{}").cookie("__Host-sheet_sess=user"),
        )
        .await;
        assert_eq!(answer.status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(answer.json()["error"], "method_not_allowed");
        assert_eq!(upstream.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_routes() {
        let dispatcher = dispatcher(RecordingUpstream::new(json_reply));

        let answer = run(&dispatcher, Call::get("/api", "mode=api&op=frobnicate")).await;
        assert_eq!(answer.status, StatusCode::BAD_REQUEST);
        assert_eq!(answer.json(), json!({"ok": false, "error": "bad_op"}));

        let answer = run(&dispatcher, Call::get("/api", "mode=api")).await;
        assert_eq!(answer.json()["error"], "bad_op");

        for call in [
            Call::get("/api", ""),
            Call::get("/api", "mode=admin"),
            Call::get("/elsewhere", "mode=api&op=ping"),
        ] {
            let answer = run(&dispatcher, call).await;
            assert_eq!(answer.status, StatusCode::NOT_FOUND);
            assert_eq!(answer.json(), json!({"ok": false, "error": "not_found"}));
        }
    }

    #[tokio::test]
    async fn test_preflight_short_circuits() {
        let upstream = RecordingUpstream::new(json_reply);
        let dispatcher = dispatcher(upstream.clone());

        let answer = run(
            &dispatcher,
            Call::get("/api/data", "mode=data").method(Method::OPTIONS),
        )
        .await;
        assert_eq!(answer.status, StatusCode::NO_CONTENT);
        assert!(answer.body.is_empty());
        assert_eq!(answer.headers["access-control-allow-origin"], APP);
        assert_eq!(answer.headers["access-control-allow-credentials"], "true");
        assert_eq!(answer.headers["access-control-allow-methods"], "GET,POST,OPTIONS");
        assert_eq!(upstream.calls(), 0);
    }

    #[tokio::test]
    async fn test_unlisted_origin_never_gets_credentials() {
        let dispatcher = dispatcher(RecordingUpstream::new(json_reply));

        for origin in [Some("https://evil.example.net"), None] {
            let answer = run(
                &dispatcher,
                Call::get("/api", "mode=api&op=ping").origin(origin),
            )
            .await;
            assert_eq!(answer.headers["access-control-allow-origin"], "*");
            assert!(answer.headers.get("access-control-allow-credentials").is_none());
        }
    }

    #[tokio::test]
    async fn test_reject_renders_envelope() {
        let dispatcher = dispatcher(RecordingUpstream::new(json_reply));
        let response = dispatcher.reject(
            Some(APP),
            &RelayError::PayloadTooLarge { limit: 10 },
            "req",
        );
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(response.headers()["access-control-allow-origin"], APP);
    }
}
