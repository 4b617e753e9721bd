//! End-to-end tests driving the `spsum` binary against an in-process stub
//! of the token endpoint, Microsoft Graph and Azure OpenAI.

use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;

const SITE_ID: &str = "contoso.sharepoint.com,site-guid,web-guid";
const SUMMARY: &str = "TITLE: Friday release\n---\n- Ship on Friday\n- Freeze Thursday";
const NOTES: &str = "Meeting notes: ship on Friday, freeze on Thursday.";

#[derive(Clone, Default)]
struct Stub {
    forbid_download: bool,
    /// Answer the site lookup with 403, as Graph does without a site grant.
    forbid_site: bool,
    /// Hold completion requests long enough to interrupt the client.
    slow_completion: bool,
    requests: Arc<Mutex<Vec<String>>>,
}

impl Stub {
    fn count(&self, prefix: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.starts_with(prefix))
            .count()
    }
}

fn graph_error(status: StatusCode, code: &str) -> Response {
    (
        status,
        Json(json!({"error": {"code": code, "message": format!("stub: {}", code)}})),
    )
        .into_response()
}

async fn handle(
    State(stub): State<Stub>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> Response {
    let path = uri.path().to_string();
    stub.requests
        .lock()
        .unwrap()
        .push(format!("{} {}", method, path));

    if path.ends_with("/oauth2/v2.0/token") && method == Method::POST {
        if body.contains("client_secret=wrong") {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({
                    "error": "invalid_client",
                    "error_description": "AADSTS7000215: Invalid client secret provided.\r\nTrace ID: 0000",
                    "error_codes": [7000215]
                })),
            )
                .into_response();
        }
        return Json(json!({
            "token_type": "Bearer",
            "expires_in": 3599,
            "access_token": "stub-token"
        }))
        .into_response();
    }

    if path.starts_with("/openai/") {
        if headers.get("api-key").and_then(|v| v.to_str().ok()) != Some("test-key") {
            return (StatusCode::UNAUTHORIZED, "bad key").into_response();
        }
        if path != "/openai/deployments/gpt-4o-mini/chat/completions" {
            return (StatusCode::NOT_FOUND, "DeploymentNotFound").into_response();
        }
        if stub.slow_completion {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        return Json(json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": SUMMARY}}]
        }))
        .into_response();
    }

    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        == Some("Bearer stub-token");
    if !authorized {
        return graph_error(StatusCode::UNAUTHORIZED, "InvalidAuthenticationToken");
    }

    let site = format!("/graph/sites/{}", SITE_ID);
    match (&method, path.as_str()) {
        (&Method::GET, "/graph/sites/contoso.sharepoint.com:/sites/Eng") => {
            if stub.forbid_site {
                graph_error(StatusCode::FORBIDDEN, "accessDenied")
            } else {
                Json(json!({"id": SITE_ID, "displayName": "Engineering"})).into_response()
            }
        }
        (&Method::GET, p) if p == format!("{}/drives", site) => Json(json!({
            "value": [
                {"id": "drive-docs", "name": "Documents"},
                {"id": "drive-archive", "name": "Archive"}
            ]
        }))
        .into_response(),
        (&Method::GET, "/graph/drives/drive-docs/root/children") => Json(json!({
            "value": [
                {"id": "item-1", "name": "intro.docx", "size": 2048,
                 "file": {"mimeType": "application/vnd.openxmlformats-officedocument.wordprocessingml.document"},
                 "lastModifiedDateTime": "2024-03-01T10:00:00Z"},
                {"id": "item-2", "name": "notes.txt", "size": NOTES.len(),
                 "file": {"mimeType": "text/plain"},
                 "lastModifiedDateTime": "2024-03-02T09:30:00Z"},
                {"id": "item-3", "name": "Specs", "size": 0, "folder": {"childCount": 4}}
            ]
        }))
        .into_response(),
        (&Method::GET, "/graph/drives/drive-docs/items/item-2/content") => {
            if stub.forbid_download {
                graph_error(StatusCode::FORBIDDEN, "accessDenied")
            } else {
                (StatusCode::OK, NOTES).into_response()
            }
        }
        (&Method::GET, p) if p == format!("{}/permissions", site) => Json(json!({
            "value": [{
                "id": "perm-1",
                "roles": ["read"],
                "grantedToIdentities": [
                    {"application": {"id": "app-1", "displayName": "Doc Summarizer"}}
                ]
            }]
        }))
        .into_response(),
        (&Method::POST, p) if p == format!("{}/permissions", site) => {
            let request: Value = serde_json::from_str(&body).unwrap_or_default();
            (
                StatusCode::CREATED,
                Json(json!({
                    "id": "perm-new",
                    "roles": request["roles"],
                    "grantedToIdentities": request["grantedToIdentities"]
                })),
            )
                .into_response()
        }
        (&Method::DELETE, p) if p == format!("{}/permissions/perm-1", site) => {
            StatusCode::NO_CONTENT.into_response()
        }
        _ => graph_error(StatusCode::NOT_FOUND, "itemNotFound"),
    }
}

/// Serve the stub on its own runtime thread; returns the base URL.
fn spawn_stub(stub: Stub) -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            let app = Router::new().fallback(handle).with_state(stub);
            axum::serve(listener, app).await.unwrap();
        });
    });
    format!("http://{}", addr)
}

fn spsum_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("spsum");
    path
}

fn setup(base: &str, drive_name: &str, client_secret: &str) -> (TempDir, PathBuf, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let downloads = tmp.path().join("downloads");
    let config = format!(
        r#"tenant_id = "tenant-1"
client_id = "app-1"
client_secret = "{secret}"
download_dir = "{downloads}"

[graph]
authority_host = "{base}"
base_url = "{base}/graph"
timeout_secs = 10

[sharepoint]
site_hostname = "contoso.sharepoint.com"
site_path = "/sites/Eng"
drive_name = "{drive}"

[azure_openai]
endpoint = "{base}"
api_key = "test-key"
deployment = "gpt-4o-mini"
api_version = "2024-06-01"
timeout_secs = 10
"#,
        secret = client_secret,
        downloads = downloads.display(),
        base = base,
        drive = drive_name,
    );
    let config_path = tmp.path().join("config.toml");
    fs::write(&config_path, config).unwrap();
    (tmp, config_path, downloads)
}

fn spsum_command(config_path: &Path, args: &[&str]) -> Command {
    let mut command = Command::new(spsum_binary());
    command
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env_remove("AZURE_OPENAI_ENDPOINT")
        .env_remove("AZURE_OPENAI_API_KEY")
        .env_remove("AZURE_OPENAI_CHAT_DEPLOYMENT")
        .env_remove("AZURE_OPENAI_API_VERSION")
        .env_remove("RUST_LOG")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    command
}

fn run_spsum(config_path: &Path, args: &[&str], stdin: &str) -> (String, String, bool) {
    let mut child = spsum_command(config_path, args)
        .stdin(Stdio::piped())
        .spawn()
        .unwrap_or_else(|e| panic!("Failed to run spsum binary at {:?}: {}", spsum_binary(), e));

    if let Some(mut input) = child.stdin.take() {
        input.write_all(stdin.as_bytes()).unwrap();
    }
    let output = child.wait_with_output().unwrap();

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn no_leftover_files(dir: &Path) -> bool {
    !dir.exists() || fs::read_dir(dir).unwrap().next().is_none()
}

#[test]
fn test_run_summarizes_selected_file() {
    let stub = Stub::default();
    let base = spawn_stub(stub.clone());
    let (_tmp, config, downloads) = setup(&base, "Documents", "s3cr3t");

    let (stdout, stderr, success) = run_spsum(&config, &["run"], "2\n");
    assert!(success, "run failed: {}", stderr);

    assert!(stdout.contains("Files:"));
    assert!(stdout.contains(
        "1. intro.docx  [application/vnd.openxmlformats-officedocument.wordprocessingml.document]  2048 bytes  modified 2024-03-01T10:00:00Z"
    ));
    assert!(stdout.contains("2. notes.txt  [text/plain]"));
    assert!(!stdout.contains("Specs"), "folders are not offered: {}", stdout);
    assert!(stdout.contains("- Ship on Friday"));
    assert!(stdout.contains(&format!("Downloaded Size: {} bytes", NOTES.len())));
    assert!(stdout.contains("Deleted temporary file:"));

    assert_eq!(stub.count("POST /openai/"), 1);
    assert_eq!(stub.count("POST /tenant-1/oauth2/v2.0/token"), 1);
    assert!(no_leftover_files(&downloads));
    assert!(!stderr.contains("s3cr3t"));
    assert!(!stdout.contains("s3cr3t"));
}

#[test]
fn test_run_with_select_flag() {
    let stub = Stub::default();
    let base = spawn_stub(stub.clone());
    let (_tmp, config, downloads) = setup(&base, "Documents", "s3cr3t");

    let (stdout, stderr, success) = run_spsum(&config, &["run", "--select", "2"], "");
    assert!(success, "run failed: {}", stderr);
    assert!(stdout.contains("Freeze Thursday"));
    assert!(no_leftover_files(&downloads));
}

#[test]
fn test_unknown_library_fails() {
    let stub = Stub::default();
    let base = spawn_stub(stub.clone());
    let (_tmp, config, downloads) = setup(&base, "Shared Docs", "s3cr3t");

    let (_stdout, stderr, success) = run_spsum(&config, &["run"], "2\n");
    assert!(!success);
    assert!(stderr.contains("NotFoundError{library}"), "stderr: {}", stderr);
    assert!(stderr.contains("Shared Docs"));
    assert_eq!(stub.count("GET /graph/drives/"), 0);
    assert!(no_leftover_files(&downloads));
}

#[test]
fn test_forbidden_download_fails_with_permission_hint() {
    let stub = Stub {
        forbid_download: true,
        ..Default::default()
    };
    let base = spawn_stub(stub.clone());
    let (_tmp, config, downloads) = setup(&base, "Documents", "s3cr3t");

    let (_stdout, stderr, success) = run_spsum(&config, &["run"], "2\n");
    assert!(!success);
    assert!(stderr.contains("DownloadError{forbidden}"), "stderr: {}", stderr);
    assert!(stderr.contains("application permission"));
    assert_eq!(stub.count("POST /openai/"), 0);
    assert!(no_leftover_files(&downloads));
}

#[test]
fn test_site_without_grant_names_permission() {
    let stub = Stub {
        forbid_site: true,
        ..Default::default()
    };
    let base = spawn_stub(stub.clone());
    let (_tmp, config, downloads) = setup(&base, "Documents", "s3cr3t");

    let (_stdout, stderr, success) = run_spsum(&config, &["run"], "2\n");
    assert!(!success);
    assert!(stderr.contains("AccessDeniedError{site}"), "stderr: {}", stderr);
    assert!(stderr.contains("contoso.sharepoint.com:/sites/Eng"));
    assert!(stderr.contains("spsum grant add"));
    assert_eq!(stub.count("GET /graph/sites/contoso.sharepoint.com:/sites/Eng"), 1);
    assert_eq!(stub.count("GET /graph/drives/"), 0);
    assert!(no_leftover_files(&downloads));
}

#[cfg(unix)]
#[test]
fn test_interrupt_during_summarization_removes_download() {
    let stub = Stub {
        slow_completion: true,
        ..Default::default()
    };
    let base = spawn_stub(stub.clone());
    let (_tmp, config, downloads) = setup(&base, "Documents", "s3cr3t");

    let child = spsum_command(&config, &["run", "--select", "2"])
        .stdin(Stdio::null())
        .spawn()
        .unwrap();

    // The completion request only goes out once the file is downloaded.
    let deadline = Instant::now() + Duration::from_secs(20);
    while stub.count("POST /openai/") == 0 {
        assert!(Instant::now() < deadline, "completion request never arrived");
        std::thread::sleep(Duration::from_millis(50));
    }
    assert!(!no_leftover_files(&downloads), "download should exist mid-run");

    let kill = Command::new("kill")
        .args(["-INT", &child.id().to_string()])
        .status()
        .unwrap();
    assert!(kill.success());

    let output = child.wait_with_output().unwrap();
    assert_eq!(output.status.code(), Some(130));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Interrupted"));
    assert!(no_leftover_files(&downloads));
}

#[test]
fn test_invalid_secret_is_auth_error() {
    let stub = Stub::default();
    let base = spawn_stub(stub.clone());
    let (_tmp, config, _downloads) = setup(&base, "Documents", "wrong");

    let (_stdout, stderr, success) = run_spsum(&config, &["run"], "2\n");
    assert!(!success);
    assert!(stderr.contains("AuthError{invalid_credentials}"), "stderr: {}", stderr);
    assert!(stderr.contains("AADSTS7000215"));
    assert!(!stderr.contains("Trace ID"));
    assert_eq!(stub.count("GET /graph/"), 0);
}

#[test]
fn test_empty_input_cancels() {
    let stub = Stub::default();
    let base = spawn_stub(stub.clone());
    let (_tmp, config, _downloads) = setup(&base, "Documents", "s3cr3t");

    let (stdout, stderr, success) = run_spsum(&config, &["run"], "\n");
    assert!(success, "cancel should not fail: {}", stderr);
    assert!(stdout.contains("Cancelled."));
    assert_eq!(stub.count("GET /graph/drives/drive-docs/items/"), 0);
}

#[test]
fn test_out_of_range_reprompts() {
    let stub = Stub::default();
    let base = spawn_stub(stub.clone());
    let (_tmp, config, _downloads) = setup(&base, "Documents", "s3cr3t");

    let (stdout, stderr, success) = run_spsum(&config, &["run"], "5\n2\n");
    assert!(success, "run failed: {}", stderr);
    assert!(stdout.contains("Please enter a number between 1 and 2."));
    assert!(stdout.contains("- Ship on Friday"));
}

#[test]
fn test_list_prints_entries() {
    let stub = Stub::default();
    let base = spawn_stub(stub.clone());
    let (_tmp, config, _downloads) = setup(&base, "Documents", "s3cr3t");

    let (stdout, stderr, success) = run_spsum(&config, &["list"], "");
    assert!(success, "list failed: {}", stderr);
    assert!(stdout.contains("Location: Documents"));
    assert!(stdout.contains("2. notes.txt"));
    assert!(stdout.contains("-  Specs/  [folder]"));
    assert_eq!(stub.count("POST /openai/"), 0);
}

#[test]
fn test_list_without_completion_settings() {
    let stub = Stub::default();
    let base = spawn_stub(stub.clone());
    let (_tmp, config, _downloads) = setup(&base, "Documents", "s3cr3t");
    let full = fs::read_to_string(&config).unwrap();
    let storage_only = &full[..full.find("[azure_openai]").unwrap()];
    fs::write(&config, storage_only).unwrap();

    let (stdout, stderr, success) = run_spsum(&config, &["list"], "");
    assert!(success, "list failed: {}", stderr);
    assert!(stdout.contains("2. notes.txt"));

    let (_stdout, stderr, success) = run_spsum(&config, &["run", "--select", "2"], "");
    assert!(!success);
    assert!(stderr.contains("azure_openai.endpoint"), "stderr: {}", stderr);
}

#[test]
fn test_grant_add_list_remove() {
    let stub = Stub::default();
    let base = spawn_stub(stub.clone());
    let (_tmp, config, _downloads) = setup(&base, "Documents", "s3cr3t");

    let (stdout, stderr, success) = run_spsum(
        &config,
        &[
            "grant",
            "add",
            "--app-id",
            "app-1",
            "--display-name",
            "Doc Summarizer",
            "--role",
            "read",
        ],
        "",
    );
    assert!(success, "grant add failed: {}", stderr);
    assert!(stdout.contains("permission id perm-new"));
    assert_eq!(
        stub.count(&format!("POST /graph/sites/{}/permissions", SITE_ID)),
        1
    );

    let (stdout, _, success) = run_spsum(&config, &["grant", "list"], "");
    assert!(success);
    assert!(stdout.contains("perm-1  [read]  Doc Summarizer (app-1)"));

    let (stdout, _, success) = run_spsum(&config, &["grant", "remove", "perm-1"], "");
    assert!(success);
    assert!(stdout.contains("Removed permission perm-1"));
}

#[test]
fn test_grant_rejects_unknown_role() {
    let (_tmp, config, _downloads) = setup("http://127.0.0.1:9", "Documents", "s3cr3t");
    let (_stdout, stderr, success) = run_spsum(
        &config,
        &[
            "grant",
            "add",
            "--app-id",
            "app-1",
            "--display-name",
            "X",
            "--role",
            "owner",
        ],
        "",
    );
    assert!(!success);
    assert!(stderr.contains("owner"));
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_stdout, stderr, success) =
        run_spsum(&tmp.path().join("absent.toml"), &["list"], "");
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}
