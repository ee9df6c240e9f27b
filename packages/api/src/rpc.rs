// ABOUTME: JSON-RPC 2.0 dispatch for the sandbox.v1 method surface
// ABOUTME: Wire shapes, codes, and caps are compatibility contracts with existing clients

use std::collections::HashMap;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use capsule_sandbox::{
    ErrorKind, ExecLimits, FileEntry, SandboxError, Template, DEFAULT_TTL_MS, REQUEST_BODY_CAP,
};

use crate::AppState;

const CODE_INVALID_PARAMS: i64 = -32001;
const CODE_CONTAINER_CREATE_FAILED: i64 = -32003;
const CODE_EXEC_TIMEOUT: i64 = -32004;
const CODE_EXEC_FAILED: i64 = -32005;
const CODE_IO_FAILED: i64 = -32006;
const CODE_DELETE_FAILED: i64 = -32007;
const CODE_METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ErrorData>,
}

#[derive(Debug, Serialize)]
pub struct ErrorData {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl RpcResponse {
    fn result<T: Serialize>(id: Option<Value>, value: T) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(serde_json::to_value(value).unwrap_or(Value::Null)),
            error: None,
        }
    }

    fn error(id: Option<Value>, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(error),
        }
    }
}

// ---- Params / Results ----

#[derive(Debug, Deserialize)]
struct CreateParams {
    template: String,
    #[serde(default)]
    ttl_ms: Option<i64>,
}

#[derive(Debug, Serialize)]
struct CreateResult {
    id: String,
    template: Template,
    created_at: String,
    expires_at: String,
}

#[derive(Debug, Deserialize)]
struct ExecParams {
    id: String,
    cmd: Vec<String>,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default)]
    env: Option<HashMap<String, String>>,
    #[serde(default)]
    timeout_ms: Option<i64>,
    #[serde(default)]
    max_stdout_bytes: Option<i64>,
    #[serde(default)]
    max_stderr_bytes: Option<i64>,
}

#[derive(Debug, Serialize)]
struct ExecResult {
    stdout: String,
    stderr: String,
    exit_code: i64,
    timed_out: bool,
    stdout_truncated: bool,
    stderr_truncated: bool,
    duration_ms: i64,
}

#[derive(Debug, Deserialize)]
struct WriteFileParams {
    id: String,
    path: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ReadFileParams {
    id: String,
    path: String,
}

#[derive(Debug, Serialize)]
struct ReadFileResult {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ListDirParams {
    id: String,
    path: String,
}

#[derive(Debug, Serialize)]
struct ListDirResult {
    files: Vec<FileEntry>,
}

#[derive(Debug, Deserialize)]
struct DeleteParams {
    id: String,
}

#[derive(Debug, Serialize)]
struct OkResult {
    ok: bool,
}

// ---- Handler ----

pub async fn handle_rpc(State(state): State<AppState>, body: Bytes) -> Json<RpcResponse> {
    if body.len() > REQUEST_BODY_CAP {
        return Json(RpcResponse::error(
            None,
            invalid_params("request body too large"),
        ));
    }

    let req: RpcRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(_) => {
            return Json(RpcResponse::error(
                None,
                invalid_params("invalid json-rpc request"),
            ))
        }
    };

    if req.jsonrpc != "2.0" || req.method.is_empty() {
        return Json(RpcResponse::error(
            req.id,
            invalid_params("invalid json-rpc request"),
        ));
    }

    debug!("rpc {}", req.method);
    Json(dispatch(&state, req).await)
}

async fn dispatch(state: &AppState, req: RpcRequest) -> RpcResponse {
    let RpcRequest {
        id, method, params, ..
    } = req;

    match method.as_str() {
        "sandbox.v1.create" => create(state, id, params).await,
        "sandbox.v1.exec" => exec(state, id, params).await,
        "sandbox.v1.writeFile" => write_file(state, id, params).await,
        "sandbox.v1.readFile" => read_file(state, id, params).await,
        "sandbox.v1.listDir" => list_dir(state, id, params).await,
        "sandbox.v1.delete" => delete(state, id, params).await,
        _ => RpcResponse::error(
            id,
            RpcError {
                code: CODE_METHOD_NOT_FOUND,
                message: "method not found".to_string(),
                data: Some(ErrorData {
                    kind: ErrorKind::MethodNotFound,
                    retryable: false,
                    details: None,
                }),
            },
        ),
    }
}

async fn create(state: &AppState, id: Option<Value>, params: Option<Value>) -> RpcResponse {
    let p: CreateParams = match parse_params(params) {
        Ok(p) => p,
        Err(e) => return RpcResponse::error(id, e),
    };

    let template: Template = match p.template.parse() {
        Ok(t) => t,
        Err(e) => return RpcResponse::error(id, to_rpc_error(e, CODE_INVALID_PARAMS)),
    };

    let ttl_ms = match p.ttl_ms {
        Some(v) if v > 0 => v,
        _ => DEFAULT_TTL_MS,
    };

    match state
        .provider
        .create_sandbox(template, Duration::from_millis(ttl_ms as u64))
        .await
    {
        Ok(sandbox) => RpcResponse::result(
            id,
            CreateResult {
                id: sandbox.id,
                template: sandbox.template,
                created_at: rfc3339(sandbox.created_at),
                expires_at: rfc3339(sandbox.expires_at),
            },
        ),
        Err(e) => RpcResponse::error(id, to_rpc_error(e, CODE_CONTAINER_CREATE_FAILED)),
    }
}

async fn exec(state: &AppState, id: Option<Value>, params: Option<Value>) -> RpcResponse {
    let p: ExecParams = match parse_params(params) {
        Ok(p) => p,
        Err(e) => return RpcResponse::error(id, e),
    };
    if p.id.is_empty() || p.cmd.is_empty() {
        return RpcResponse::error(id, invalid_params("invalid params"));
    }

    let limits = ExecLimits::from_request(
        p.timeout_ms.unwrap_or(0),
        p.max_stdout_bytes.unwrap_or(0),
        p.max_stderr_bytes.unwrap_or(0),
    );

    match state
        .provider
        .exec(&p.id, p.cmd, p.cwd, p.env.unwrap_or_default(), limits)
        .await
    {
        Ok(outcome) => RpcResponse::result(
            id,
            ExecResult {
                stdout: String::from_utf8_lossy(&outcome.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&outcome.stderr).into_owned(),
                exit_code: outcome.exit_code,
                timed_out: outcome.timed_out,
                stdout_truncated: outcome.stdout_truncated,
                stderr_truncated: outcome.stderr_truncated,
                duration_ms: outcome.duration.as_millis() as i64,
            },
        ),
        Err(e) => RpcResponse::error(id, to_rpc_error(e, CODE_EXEC_FAILED)),
    }
}

async fn write_file(state: &AppState, id: Option<Value>, params: Option<Value>) -> RpcResponse {
    let p: WriteFileParams = match parse_params(params) {
        Ok(p) => p,
        Err(e) => return RpcResponse::error(id, e),
    };
    if p.id.is_empty() || p.path.is_empty() {
        return RpcResponse::error(id, invalid_params("invalid params"));
    }

    let content = match STANDARD.decode(&p.content) {
        Ok(bytes) => bytes,
        Err(_) => return RpcResponse::error(id, invalid_params("content must be base64")),
    };

    match state.provider.write_file(&p.id, &p.path, &content).await {
        Ok(()) => RpcResponse::result(id, OkResult { ok: true }),
        Err(e) => RpcResponse::error(id, to_rpc_error(e, CODE_IO_FAILED)),
    }
}

async fn read_file(state: &AppState, id: Option<Value>, params: Option<Value>) -> RpcResponse {
    let p: ReadFileParams = match parse_params(params) {
        Ok(p) => p,
        Err(e) => return RpcResponse::error(id, e),
    };
    if p.id.is_empty() || p.path.is_empty() {
        return RpcResponse::error(id, invalid_params("invalid params"));
    }

    match state.provider.read_file(&p.id, &p.path).await {
        Ok(bytes) => RpcResponse::result(
            id,
            ReadFileResult {
                content: STANDARD.encode(bytes),
            },
        ),
        Err(e) => RpcResponse::error(id, to_rpc_error(e, CODE_IO_FAILED)),
    }
}

async fn list_dir(state: &AppState, id: Option<Value>, params: Option<Value>) -> RpcResponse {
    let p: ListDirParams = match parse_params(params) {
        Ok(p) => p,
        Err(e) => return RpcResponse::error(id, e),
    };
    if p.id.is_empty() || p.path.is_empty() {
        return RpcResponse::error(id, invalid_params("invalid params"));
    }

    match state.provider.list_dir(&p.id, &p.path).await {
        Ok(files) => RpcResponse::result(id, ListDirResult { files }),
        Err(e) => RpcResponse::error(id, to_rpc_error(e, CODE_IO_FAILED)),
    }
}

async fn delete(state: &AppState, id: Option<Value>, params: Option<Value>) -> RpcResponse {
    let p: DeleteParams = match parse_params(params) {
        Ok(p) => p,
        Err(e) => return RpcResponse::error(id, e),
    };
    if p.id.is_empty() {
        return RpcResponse::error(id, invalid_params("invalid params"));
    }

    match state.provider.delete_sandbox(&p.id).await {
        Ok(()) => RpcResponse::result(id, OkResult { ok: true }),
        Err(e) => RpcResponse::error(id, to_rpc_error(e, CODE_DELETE_FAILED)),
    }
}

// ---- Helpers ----

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, RpcError> {
    serde_json::from_value(params.unwrap_or(Value::Null))
        .map_err(|_| invalid_params("invalid params"))
}

fn invalid_params(message: &str) -> RpcError {
    RpcError {
        code: CODE_INVALID_PARAMS,
        message: message.to_string(),
        data: Some(ErrorData {
            kind: ErrorKind::InvalidParams,
            retryable: false,
            details: None,
        }),
    }
}

/// Map a sandbox error onto the wire envelope. `not_found_code` is the code
/// family of the calling method: an unknown sandbox id keeps its precise
/// NOT_FOUND type but surfaces under the method's code.
fn to_rpc_error(err: SandboxError, not_found_code: i64) -> RpcError {
    let (code, message, details) = match &err {
        SandboxError::InvalidParams(msg) => (
            CODE_INVALID_PARAMS,
            "invalid params",
            Some(json!({ "err": msg })),
        ),
        SandboxError::NotFound(_) => (
            not_found_code,
            "sandbox not found",
            Some(json!({ "err": err.to_string() })),
        ),
        SandboxError::ContainerCreateFailed(msg) => (
            CODE_CONTAINER_CREATE_FAILED,
            "container create failed",
            Some(json!({ "err": msg })),
        ),
        SandboxError::ExecTimeout { timeout_ms } => (
            CODE_EXEC_TIMEOUT,
            "exec timed out",
            Some(json!({ "timeout_ms": timeout_ms })),
        ),
        SandboxError::ExecFailed(msg) => {
            (CODE_EXEC_FAILED, "exec failed", Some(json!({ "err": msg })))
        }
        SandboxError::DeleteFailed(msg) => (
            CODE_DELETE_FAILED,
            "delete failed",
            Some(json!({ "err": msg })),
        ),
        SandboxError::IoFailed { message, stderr } => (
            CODE_IO_FAILED,
            "file operation failed",
            Some(json!({ "err": message, "stderr": stderr })),
        ),
        SandboxError::Docker(e) => (
            CODE_EXEC_FAILED,
            "exec failed",
            Some(json!({ "err": e.to_string() })),
        ),
    };

    RpcError {
        code,
        message: message.to_string(),
        data: Some(ErrorData {
            kind: err.kind(),
            retryable: err.retryable(),
            details,
        }),
    }
}

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}
