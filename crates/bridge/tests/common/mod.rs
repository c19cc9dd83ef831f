#![allow(dead_code)]

use std::io::BufRead as _;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, OnceLock, mpsc};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::Context as _;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Value, json};

pub const TEST_KID: &str = "test-key-1";

/// Kills the bridge process when a test ends, pass or fail.
pub struct KillOnDrop(pub Child);

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

pub struct SpawnedBridge {
    pub child: KillOnDrop,
    pub base: String,
    _config: tempfile::NamedTempFile,
}

impl SpawnedBridge {
    pub fn mcp_url(&self) -> String {
        format!("{}/mcp", self.base)
    }
}

/// The startup event the harness waits for. Piped stdout makes the bridge
/// emit line-delimited JSON with flattened fields, so the bound ephemeral
/// address is simply the `addr` field of this event.
const READY_MESSAGE: &str = "MCP endpoint listening";

const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Spawn the bridge binary with the given YAML config and wait until it
/// logs its bound address.
pub fn spawn_bridge(config_yaml: &str) -> anyhow::Result<SpawnedBridge> {
    let config = tempfile::NamedTempFile::new().context("create temp config")?;
    std::fs::write(config.path(), config_yaml).context("write temp config")?;

    let bin = env!("CARGO_BIN_EXE_toolbridge-bridge");
    let child = Command::new(bin)
        .arg("--bind")
        .arg("127.0.0.1:0")
        .arg("--config")
        .arg(config.path())
        .arg("--log-level")
        .arg("info")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .context("spawn bridge")?;

    let (child, addr) = wait_until_ready(child)?;
    Ok(SpawnedBridge {
        child: KillOnDrop(child),
        base: format!("http://{addr}"),
        _config: config,
    })
}

fn bound_addr_from_log_line(line: &str) -> Option<String> {
    let event: Value = serde_json::from_str(line).ok()?;
    if event["message"] != READY_MESSAGE {
        return None;
    }
    event["addr"].as_str().map(str::to_string)
}

fn wait_until_ready(mut child: Child) -> anyhow::Result<(Child, String)> {
    let stdout = child.stdout.take().context("bridge stdout not piped")?;
    let stderr = child.stderr.take().context("bridge stderr not piped")?;

    // Both pipes are drained for the child's whole lifetime (a full pipe
    // would stall it); everything read is kept for failure diagnostics.
    let log: Arc<parking_lot::Mutex<Vec<String>>> = Arc::default();
    let (addr_tx, addr_rx) = mpsc::channel::<String>();

    let sink = log.clone();
    std::thread::spawn(move || {
        for line in std::io::BufReader::new(stdout).lines().map_while(Result::ok) {
            if let Some(addr) = bound_addr_from_log_line(&line) {
                let _ = addr_tx.send(addr);
            }
            sink.lock().push(line);
        }
    });
    let sink = log.clone();
    std::thread::spawn(move || {
        for line in std::io::BufReader::new(stderr).lines().map_while(Result::ok) {
            sink.lock().push(line);
        }
    });

    let deadline = Instant::now() + STARTUP_TIMEOUT;
    while Instant::now() < deadline {
        if let Ok(addr) = addr_rx.recv_timeout(Duration::from_millis(50)) {
            return Ok((child, addr));
        }
        if let Ok(Some(status)) = child.try_wait() {
            anyhow::bail!(
                "bridge exited ({status}) before logging '{READY_MESSAGE}':\n{}",
                log.lock().join("\n")
            );
        }
    }

    let _ = child.kill();
    anyhow::bail!(
        "bridge never logged '{READY_MESSAGE}' within {STARTUP_TIMEOUT:?}:\n{}",
        log.lock().join("\n")
    );
}

/// POST a JSON-RPC body to the bridge; returns status, headers and the
/// parsed response body (Null when empty).
pub async fn post_rpc(
    client: &reqwest::Client,
    url: &str,
    body: Value,
    bearer: Option<&str>,
) -> anyhow::Result<(reqwest::StatusCode, reqwest::header::HeaderMap, Value)> {
    let mut request = client.post(url).json(&body);
    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }
    let response = request.send().await.context("post JSON-RPC")?;
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.bytes().await.context("read response body")?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).context("parse response body")?
    };
    Ok((status, headers, value))
}

// ============================================================================
// Test RSA keys and tokens
// ============================================================================

pub struct TestKey {
    pub private_pem: String,
    pub jwk: Value,
}

static TEST_KEYS: OnceLock<(TestKey, TestKey)> = OnceLock::new();

fn generate_key(kid: &str) -> TestKey {
    use rsa::pkcs8::{EncodePrivateKey, LineEnding};
    use rsa::traits::PublicKeyParts;

    let mut rng = rand::thread_rng();
    let private_key = rsa::RsaPrivateKey::new(&mut rng, 2048).expect("generate RSA key");
    let private_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .expect("encode private key")
        .as_str()
        .to_owned();

    let n = URL_SAFE_NO_PAD.encode(private_key.n().to_bytes_be());
    let e = URL_SAFE_NO_PAD.encode(private_key.e().to_bytes_be());
    TestKey {
        private_pem,
        jwk: json!({ "kid": kid, "kty": "RSA", "alg": "RS256", "n": n, "e": e }),
    }
}

/// The signing key whose JWK is published by the mock authorization server,
/// plus a second key the server never publishes (for signature negatives).
pub fn test_keys() -> &'static (TestKey, TestKey) {
    TEST_KEYS.get_or_init(|| (generate_key(TEST_KID), generate_key("rogue-key")))
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_secs()
}

/// Sign a JWT over `claims` with the given key and kid.
pub fn sign_token(key: &TestKey, kid: &str, claims: &Value) -> String {
    let encoding_key =
        jsonwebtoken::EncodingKey::from_rsa_pem(key.private_pem.as_bytes()).expect("valid RSA pem");
    let mut header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256);
    header.kid = Some(kid.to_string());
    jsonwebtoken::encode(&header, claims, &encoding_key).expect("sign token")
}

/// Standard test claims: one hour of validity, audience `mcp-bridge`.
pub fn base_claims() -> Value {
    let now = unix_now();
    json!({
        "iss": "https://auth.test",
        "aud": "mcp-bridge",
        "sub": "agent-1",
        "iat": now,
        "exp": now + 3600,
    })
}

/// Serve `{ "keys": [jwk] }` at `/jwks.json` on a fresh mock server.
pub async fn mock_jwks_server(jwk: &Value) -> wiremock::MockServer {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": [jwk] })))
        .mount(&server)
        .await;
    server
}
