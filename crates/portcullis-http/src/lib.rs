//! HTTP basic-credential binding for the portcullis user directory.
//!
//! The same [`Authenticator`] that backs the SSH password callback is
//! exposed here as axum middleware: the binding extracts `Authorization:
//! Basic` credentials and the peer address from its own transport
//! envelope, then runs the shared authentication path. Missing or
//! malformed credentials get a challenge with an example of the expected
//! header; a failed login gets the same bare denial regardless of why it
//! failed.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use portcullis_core::CancelToken;
use portcullis_users::{Authenticator, User};
use tracing::debug;

/// Shared state for the basic-auth middleware.
#[derive(Clone)]
pub struct BasicAuthState {
    authenticator: Arc<Authenticator>,
    shutdown: CancelToken,
}

impl BasicAuthState {
    /// Creates middleware state over a shared authenticator.
    ///
    /// `shutdown` scopes in-flight authentication waits, so an HTTP login
    /// racing a server shutdown ends promptly like its SSH counterpart.
    pub fn new(authenticator: Arc<Authenticator>, shutdown: CancelToken) -> Self {
        Self {
            authenticator,
            shutdown,
        }
    }
}

/// Authenticated user stored in request extensions.
#[derive(Clone, Debug)]
pub struct AuthUser {
    /// The directory record that matched.
    pub user: User,
}

fn challenge() -> Response {
    // Example credentials show the expected header shape without naming
    // any real account.
    let example = BASE64.encode("exampleUser:examplePass");
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic realm=\"portcullis\"")],
        format!(
            "access denied. This resource requires Basic authentication. For example, \
             set the Authorization header as: Authorization: Basic {example}"
        ),
    )
        .into_response()
}

fn decode_basic(header_value: Option<&str>) -> Option<(String, String)> {
    let encoded = header_value?.strip_prefix("Basic ")?;
    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (username, secret) = text.split_once(':')?;
    Some((username.to_string(), secret.to_string()))
}

/// Middleware enforcing Basic authentication via the shared authenticator.
///
/// On success the matched user is stored in the request extensions as
/// [`AuthUser`]; handlers behind the middleware can rely on it being
/// present.
pub async fn basic_auth_middleware(
    State(state): State<BasicAuthState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    mut request: Request,
    next: Next,
) -> Result<Response, Response> {
    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let Some((username, secret)) = decode_basic(header_value) else {
        debug!(%peer, "missing or malformed basic credentials");
        return Err(challenge());
    };

    match state
        .authenticator
        .authenticate(&state.shutdown, &username, &secret, &peer.to_string())
        .await
    {
        Ok(user) => {
            debug!(%peer, user = user.username(), "basic authentication succeeded");
            request.extensions_mut().insert(AuthUser { user });
            Ok(next.run(request).await)
        }
        Err(kind) => {
            // The kind stays in local logs; the response never varies.
            debug!(%peer, user = %username, %kind, "basic authentication failed");
            Err((StatusCode::UNAUTHORIZED, "access denied").into_response())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::middleware::from_fn_with_state;
    use axum::routing::get;
    use axum::{Extension, Router};
    use portcullis_users::UserDirectory;
    use tower::ServiceExt;

    async fn whoami(Extension(auth): Extension<AuthUser>) -> String {
        auth.user.username().to_string()
    }

    async fn state_with_alice() -> BasicAuthState {
        let directory = Arc::new(UserDirectory::new());
        directory.add("alice", "s3cret").await;
        directory.add_origin("alice", "*").await.unwrap();
        BasicAuthState::new(Arc::new(Authenticator::new(directory)), CancelToken::new())
    }

    fn app(state: BasicAuthState) -> Router {
        Router::new()
            .route("/whoami", get(whoami))
            .layer(from_fn_with_state(state, basic_auth_middleware))
    }

    fn request(auth_header: Option<&str>) -> axum::http::Request<Body> {
        let mut builder = axum::http::Request::builder().uri("/whoami");
        if let Some(value) = auth_header {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        let mut request = builder.body(Body::empty()).unwrap();
        let peer: SocketAddr = "10.0.0.5:55000".parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(peer));
        request
    }

    #[tokio::test]
    async fn missing_header_gets_a_challenge() {
        let app = app(state_with_alice().await);

        let response = app.oneshot(request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let www = response.headers().get(header::WWW_AUTHENTICATE).unwrap();
        assert!(www.to_str().unwrap().starts_with("Basic"));

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("Basic authentication"));
    }

    #[tokio::test]
    async fn wrong_password_is_a_bare_denial() {
        let app = app(state_with_alice().await);

        let value = format!("Basic {}", BASE64.encode("alice:wrong"));
        let response = app.oneshot(request(Some(&value))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // No hint about which check failed.
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(String::from_utf8_lossy(&body), "access denied");
    }

    #[tokio::test]
    async fn unknown_user_and_wrong_password_are_indistinguishable() {
        let app = app(state_with_alice().await);

        let wrong_pass = format!("Basic {}", BASE64.encode("alice:wrong"));
        let unknown = format!("Basic {}", BASE64.encode("mallory:wrong"));

        let first = app.clone().oneshot(request(Some(&wrong_pass))).await.unwrap();
        let second = app.oneshot(request(Some(&unknown))).await.unwrap();

        assert_eq!(first.status(), second.status());
        let first_body = to_bytes(first.into_body(), usize::MAX).await.unwrap();
        let second_body = to_bytes(second.into_body(), usize::MAX).await.unwrap();
        assert_eq!(first_body, second_body);
    }

    #[tokio::test]
    async fn valid_credentials_reach_the_handler() {
        let app = app(state_with_alice().await);

        let value = format!("Basic {}", BASE64.encode("alice:s3cret"));
        let response = app.oneshot(request(Some(&value))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(String::from_utf8_lossy(&body), "alice");
    }

    #[tokio::test]
    async fn origin_restrictions_apply_to_http_logins() {
        let directory = Arc::new(UserDirectory::new());
        directory.add("bob", "pw").await;
        directory.add_origin("bob", "192.0.2.0/24").await.unwrap();
        let state =
            BasicAuthState::new(Arc::new(Authenticator::new(directory)), CancelToken::new());

        // The test peer is 10.0.0.5, outside bob's allowed prefix.
        let value = format!("Basic {}", BASE64.encode("bob:pw"));
        let response = app(state).oneshot(request(Some(&value))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_basic(None).is_none());
        assert!(decode_basic(Some("Bearer abc")).is_none());
        assert!(decode_basic(Some("Basic !!!")).is_none());

        let no_colon = BASE64.encode("justusername");
        assert!(decode_basic(Some(&format!("Basic {no_colon}"))).is_none());
    }
}
