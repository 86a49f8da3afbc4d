#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::Router;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::pkcs8::EncodePublicKey;
use ed25519_dalek::Signer;
use internims_db::{open_registry, DbPool, DbRuntimeSettings};
use internims_server::config::RegistryConfig;
use internims_server::probe::{ProbeError, ReachabilityProbe};
use internims_server::{app, AppState};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;
use url::Url;

/// Probe double that records calls instead of touching the network.
pub struct FakeProbe {
    reachable: AtomicBool,
    calls: AtomicUsize,
    delay_ms: AtomicU64,
}

impl FakeProbe {
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReachabilityProbe for FakeProbe {
    async fn probe(&self, api_uri: &Url) -> Result<(), ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ProbeError::Unreachable {
                uri: api_uri.to_string(),
                reason: "HEAD returned 503 Service Unavailable".into(),
            })
        }
    }
}

pub struct TestApp {
    pub router: Router,
    pub pool: DbPool,
    pub probe: Arc<FakeProbe>,
    _dir: TempDir,
}

/// Builds the app over a fresh file database. Each pooled `:memory:`
/// connection would be its own database, so a temp file is used instead.
pub fn setup(configure: impl FnOnce(&mut RegistryConfig)) -> TestApp {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("registry.db");
    let pool = open_registry(
        path.to_str().expect("utf-8 temp path"),
        DbRuntimeSettings::default(),
    )
    .expect("registry database should open");

    let mut registry = RegistryConfig::default();
    configure(&mut registry);

    let probe = Arc::new(FakeProbe {
        reachable: AtomicBool::new(true),
        calls: AtomicUsize::new(0),
        delay_ms: AtomicU64::new(0),
    });
    let router = app(AppState {
        pool: pool.clone(),
        registry,
        probe: probe.clone(),
    });

    TestApp {
        router,
        pool,
        probe,
        _dir: dir,
    }
}

pub struct Site {
    pub id: String,
    pub signing: ed25519_dalek::SigningKey,
    pub pem: String,
}

impl Site {
    pub fn sign(&self, body: &str) -> String {
        STANDARD.encode(self.signing.sign(body.as_bytes()).to_bytes())
    }

    /// A well-formed announcement body for this site.
    pub fn payload(&self, users: &[&str]) -> String {
        serde_json::json!({
            "site": self.id,
            "api_uri": format!("https://{}.example.org/api", self.id),
            "users": users,
            "name": format!("{} (self-reported)", self.id),
        })
        .to_string()
    }
}

impl TestApp {
    /// Registers an active host and returns its key material.
    pub fn register(&self, site_id: &str, common_name: &str) -> Site {
        let signing = ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng);
        let pem = signing
            .verifying_key()
            .to_public_key_pem(ed25519_dalek::pkcs8::spki::der::pem::LineEnding::LF)
            .expect("pem encoding");
        let conn = self.pool.get().expect("connection");
        let host = internims_auth::register_authorized_host(
            &conn,
            site_id,
            &pem,
            common_name,
            chrono::Utc::now(),
        )
        .expect("register host");
        assert_eq!(host.site_id, site_id);
        Site {
            id: site_id.to_string(),
            signing,
            pem,
        }
    }

    /// Registers an active host with a fresh RSA key and returns the
    /// private half.
    pub fn register_rsa(&self, site_id: &str) -> rsa::RsaPrivateKey {
        use rsa::pkcs8::{EncodePublicKey as _, LineEnding};

        let private = rsa::RsaPrivateKey::new(&mut rand::rngs::OsRng, 1024).expect("rsa keygen");
        let pem = private
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .expect("pem encoding");
        let conn = self.pool.get().expect("connection");
        internims_auth::register_authorized_host(&conn, site_id, &pem, "", chrono::Utc::now())
            .expect("register host");
        private
    }

    pub async fn post(&self, body: &str, authorization: Option<&str>) -> (StatusCode, HeaderMap, Value) {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(auth) = authorization {
            builder = builder.header(header::AUTHORIZATION, auth);
        }
        let request = builder.body(Body::from(body.to_string())).unwrap();
        self.send(request).await
    }

    /// Announces `site` with a valid signature.
    pub async fn announce(&self, site: &Site, users: &[&str]) -> (StatusCode, HeaderMap, Value) {
        let body = site.payload(users);
        let signature = site.sign(&body);
        self.post(&body, Some(&signature)).await
    }

    /// Announces `site` through the CRAM exchange: one unauthenticated
    /// request for the challenge, then the answer.
    pub async fn announce_cram(&self, site: &Site, users: &[&str]) -> (StatusCode, HeaderMap, Value) {
        let body = site.payload(users);
        let (status, headers, _) = self.post(&body, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let encoded = headers
            .get(header::WWW_AUTHENTICATE)
            .expect("challenge header")
            .to_str()
            .unwrap();
        let challenge = String::from_utf8(STANDARD.decode(encoded).unwrap()).unwrap();
        let response =
            internims_auth::cram_response(internims_auth::CramHash::Md5, &site.id, &site.pem, &challenge)
                .unwrap();
        self.post(&body, Some(&response)).await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let (status, _, json) = self.send(request).await;
        (status, json)
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, headers, json)
    }

    pub fn count(&self, table: &str) -> i64 {
        let conn = self.pool.get().expect("connection");
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
            row.get(0)
        })
        .unwrap()
    }
}

pub fn site_ids(json: &Value) -> Vec<String> {
    json["sites"]
        .as_array()
        .expect("sites array")
        .iter()
        .map(|s| s["id"].as_str().unwrap().to_string())
        .collect()
}
