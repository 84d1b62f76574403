use crate::backend::TransactionRef;
use crate::chain::ChainLedger;
use crate::error::{ClassificationError, LedgerError, ModerationError};
use crate::fingerprint::Fingerprint;
use crate::service::{BatchItem, ModerationOutcome, ModerationService};
use crate::verdict::ContentKind;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use tracing::{debug, warn};

const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

pub struct GatewayState {
    pub service: Arc<ModerationService>,
    /// Local chain for `/tip`; absent when the backend is remote.
    pub chain: Option<Arc<ChainLedger>>,
}

#[derive(Deserialize)]
struct ModerateRequest {
    content: String,
    content_type: String,
    #[serde(default)]
    encoding: Option<String>,
}

/// Bind `listen_addr` and serve each connection on its own thread.
/// Returns the bound address so callers can pass port 0.
pub fn start_http_server(listen_addr: &str, state: Arc<GatewayState>) -> io::Result<SocketAddr> {
    let listener = TcpListener::bind(listen_addr)?;
    let local = listener.local_addr()?;
    thread::Builder::new().name("http-accept".into()).spawn(move || {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let state = Arc::clone(&state);
                    thread::spawn(move || handle_client(stream, state));
                }
                Err(e) => warn!(error = %e, "accept failed"),
            }
        }
    })?;
    Ok(local)
}

fn handle_client(mut stream: TcpStream, state: Arc<GatewayState>) {
    let req = match read_request(&mut stream) {
        Ok(r) => r,
        Err(e) => {
            debug!(error = %e, "dropping unreadable request");
            return;
        }
    };
    let (status, body) = route(&state, &req);
    write_json(&mut stream, status, &body);
}

fn route(state: &GatewayState, req: &Request) -> (u16, Value) {
    match (req.method.as_str(), req.path.as_str()) {
        ("GET", "/") => (
            200,
            json!({"service": env!("CARGO_PKG_NAME"), "version": env!("CARGO_PKG_VERSION")}),
        ),
        ("POST", "/moderate") => {
            let body = match serde_json::from_slice::<ModerateRequest>(&req.body) {
                Ok(b) => b,
                Err(_) => return bad_request("bad json"),
            };
            let item = match decode_item(&body) {
                Ok(i) => i,
                Err(e) => return bad_request(&e),
            };
            match state.service.moderate(&item.content, item.kind) {
                Ok(out) => (200, outcome_json(&out)),
                Err(e) => moderation_error(&e),
            }
        }
        ("POST", "/batch") => {
            let bodies = match serde_json::from_slice::<Vec<ModerateRequest>>(&req.body) {
                Ok(b) => b,
                Err(_) => return bad_request("bad json"),
            };
            (200, Value::Array(batch(state, &bodies)))
        }
        ("GET", "/tip") => match &state.chain {
            Some(chain) => {
                let (height, hash) = chain.tip();
                (
                    200,
                    json!({
                        "height": height,
                        "hash": hex::encode(hash),
                        "audit_root": hex::encode(chain.audit_root()),
                    }),
                )
            }
            None => (404, json!({"error": "no local chain"})),
        },
        ("GET", path) if path.starts_with("/history/") => {
            let Ok(fp) = path.trim_start_matches("/history/").parse::<Fingerprint>() else {
                return bad_request("bad fingerprint");
            };
            match state.service.history(&fp) {
                Ok(h) => match serde_json::to_value(&h) {
                    Ok(v) => (200, v),
                    Err(e) => (500, json!({"error": e.to_string()})),
                },
                Err(e) => ledger_error(&e, None),
            }
        }
        ("GET", path) if path.starts_with("/verify/") => {
            let raw = path.trim_start_matches("/verify/");
            if raw.is_empty() {
                return bad_request("missing tx_ref");
            }
            let tx_ref = TransactionRef::new(raw);
            match state.service.verify(&tx_ref) {
                Ok(s) => (200, json!({"tx_ref": tx_ref, "state": s})),
                Err(e) => ledger_error(&e, None),
            }
        }
        _ => (404, json!({"error": "not found"})),
    }
}

/// Undecodable items fail alone; the rest go through the service together.
fn batch(state: &GatewayState, bodies: &[ModerateRequest]) -> Vec<Value> {
    let decoded: Vec<Result<BatchItem, String>> = bodies.iter().map(decode_item).collect();
    let valid: Vec<BatchItem> = decoded.iter().filter_map(|d| d.as_ref().ok().cloned()).collect();
    let mut results = state.service.batch_moderate(&valid).into_iter();

    decoded
        .into_iter()
        .map(|d| match d {
            Err(e) => json!({"error": e, "kind": "bad_request"}),
            Ok(_) => match results.next() {
                Some(Ok(out)) => json!({"ok": outcome_json(&out)}),
                Some(Err(e)) => moderation_error(&e).1,
                None => json!({"error": "missing batch result", "kind": "internal"}),
            },
        })
        .collect()
}

fn decode_item(req: &ModerateRequest) -> Result<BatchItem, String> {
    let kind: ContentKind = req.content_type.parse()?;
    let encoding = req.encoding.as_deref().unwrap_or(match kind {
        ContentKind::Text => "utf8",
        ContentKind::Image => "base64",
    });
    let content = match encoding {
        "utf8" => req.content.as_bytes().to_vec(),
        "base64" => BASE64
            .decode(req.content.trim())
            .map_err(|_| "bad base64".to_string())?,
        other => return Err(format!("unsupported encoding: {}", other)),
    };
    Ok(BatchItem::new(content, kind))
}

fn outcome_json(out: &ModerationOutcome) -> Value {
    serde_json::to_value(out).unwrap_or_else(|e| json!({"error": e.to_string()}))
}

fn bad_request(msg: &str) -> (u16, Value) {
    (400, json!({"error": msg, "kind": "bad_request"}))
}

fn moderation_error(e: &ModerationError) -> (u16, Value) {
    let fp = e.fingerprint().to_hex();
    match e {
        ModerationError::Classification { source, .. } => {
            let (status, kind) = match source {
                ClassificationError::Unreachable(_) => (502, "classifier_unreachable"),
                ClassificationError::Malformed(_) => (422, "classification_malformed"),
                ClassificationError::UnknownCategory(_) => (422, "unknown_category"),
            };
            (status, json!({"error": e.to_string(), "kind": kind, "fingerprint": fp}))
        }
        ModerationError::Ledger { source, .. } => {
            let (status, mut body) = ledger_error(source, e.dedup_key().map(|k| k.to_hex()));
            body["error"] = Value::String(e.to_string());
            body["fingerprint"] = Value::String(fp);
            (status, body)
        }
    }
}

fn ledger_error(e: &LedgerError, dedup_key: Option<String>) -> (u16, Value) {
    let (status, kind) = match e {
        LedgerError::Unavailable(_) => (503, "ledger_unavailable"),
        LedgerError::Rejected(_) => (422, "ledger_rejected"),
        LedgerError::Timeout { .. } => (504, "ledger_timeout"),
        LedgerError::Malformed { .. } => (502, "ledger_malformed"),
    };
    let mut body = json!({"error": e.to_string(), "kind": kind});
    if let Some(k) = dedup_key {
        body["dedup_key"] = Value::String(k);
    }
    (status, body)
}

struct Request {
    method: String,
    path: String,
    body: Vec<u8>,
}

fn read_request(stream: &mut TcpStream) -> Result<Request, String> {
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf).map_err(|e| format!("{}", e))?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
        if data.len() > MAX_BODY_BYTES {
            return Err("headers too large".into());
        }
    }
    let header_end = data
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or("bad request")?
        + 4;
    let header_bytes = &data[..header_end];
    let mut body = data[header_end..].to_vec();

    let req_str = String::from_utf8_lossy(header_bytes);
    let mut lines = req_str.split("\r\n");
    let line = lines.next().ok_or("bad request")?;
    let mut parts = line.split_whitespace();
    let method = parts.next().ok_or("bad method")?.to_string();
    let path = parts.next().ok_or("bad path")?.to_string();

    let mut content_len = 0usize;
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_len = value.trim().parse::<usize>().unwrap_or(0);
            }
        }
    }
    if content_len > MAX_BODY_BYTES {
        return Err("body too large".into());
    }

    let mut remaining = content_len.saturating_sub(body.len());
    while remaining > 0 {
        let mut buf = vec![0u8; remaining.min(4096)];
        let n = stream.read(&mut buf).map_err(|e| format!("{}", e))?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&buf[..n]);
        remaining = remaining.saturating_sub(n);
    }

    Ok(Request { method, path, body })
}

fn write_json(stream: &mut TcpStream, status: u16, body: &Value) {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        422 => "HTTP/1.1 422 Unprocessable Entity",
        502 => "HTTP/1.1 502 Bad Gateway",
        503 => "HTTP/1.1 503 Service Unavailable",
        504 => "HTTP/1.1 504 Gateway Timeout",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let body = body.to_string();
    let resp = format!(
        "{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status_line,
        body.len(),
        body
    );
    let _ = stream.write_all(resp.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(content: &str, content_type: &str, encoding: Option<&str>) -> ModerateRequest {
        ModerateRequest {
            content: content.into(),
            content_type: content_type.into(),
            encoding: encoding.map(str::to_string),
        }
    }

    #[test]
    fn image_defaults_to_base64() {
        let item = decode_item(&req("aGk=", "image", None)).expect("decode");
        assert_eq!(item.content, b"hi");
        assert_eq!(item.kind, ContentKind::Image);

        let item = decode_item(&req("aGk=", "text", None)).expect("decode");
        assert_eq!(item.content, b"aGk=");
    }

    #[test]
    fn bad_items_are_described() {
        assert!(decode_item(&req("x", "video", None))
            .unwrap_err()
            .contains("unsupported content type"));
        assert_eq!(decode_item(&req("!!", "image", None)).unwrap_err(), "bad base64");
        assert!(decode_item(&req("x", "text", Some("rot13"))).is_err());
    }

    #[test]
    fn ledger_errors_map_to_statuses() {
        assert_eq!(ledger_error(&LedgerError::Unavailable("x".into()), None).0, 503);
        assert_eq!(ledger_error(&LedgerError::Rejected("x".into()), None).0, 422);
        let (status, body) = ledger_error(
            &LedgerError::Malformed {
                tx_ref: "t".into(),
                reason: "r".into(),
            },
            Some("ab".into()),
        );
        assert_eq!(status, 502);
        assert_eq!(body["dedup_key"], "ab");
    }
}
