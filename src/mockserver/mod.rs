//! The mock HTTP server clients are pointed at.
//!
//! Every request is answered from the Swagger operation the index maps it
//! to: the operation's 200 response schema is expanded, monomorphized and
//! synthesized into candidate bodies, one candidate is selected (first by
//! default, or the one an override's selector patch leaves unchanged),
//! post-processing patches and an armed vibration are applied, and the
//! final bytes are recorded as an annotated value for correlation.
//!
//! Per-execution state (overrides, generator, records, sequence log,
//! vibration slot) lives behind one mutex held for the whole request;
//! callers drive one client at a time per execution.

pub mod auth;
pub mod index;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use regex::Regex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::timeout::TimeoutLayer;
use tracing::{debug, error, info};

use crate::config::OverrideConfig;
use crate::swagger::{
    monomorphize, Expander, ExpanderCache, ExpanderOption, JsonValue, PropertyAddr, Rnd, RootModel,
    SpecStore, SynthDuplicateElement, Synthesizer, SynthesizerOption,
};
use index::OperationIndex;

/// Server construction options.
pub struct ServerOption {
    pub addr: String,
    pub port: u16,
    /// Path of the operation index file.
    pub index: PathBuf,
    /// Directory the index's spec references resolve against.
    pub specdir: PathBuf,
    /// Per-request timeout.
    pub timeout: Duration,
}

/// A compiled override. Converted from the config representation when an
/// execution is initialized.
pub struct Override {
    pub path_pattern: Regex,
    pub response_body: Option<String>,
    pub response_selector_merge: Option<Value>,
    pub response_selector_json: Option<json_patch::Patch>,
    pub response_patch_merge: Option<Value>,
    pub response_patch_json: Option<json_patch::Patch>,
    pub response_header: BTreeMap<String, String>,
    pub response_status_code: Option<u16>,
    pub expander_option: ExpanderOption,
    pub synth_option: SynthesizerOption,
}

impl Override {
    /// Compiles a config override, wiring the shared expander cache unless
    /// the override disables it.
    pub fn from_config(cfg: &OverrideConfig, cache: Arc<ExpanderCache>) -> Result<Override> {
        let path_pattern = Regex::new(&cfg.path_pattern)
            .with_context(|| format!("compiling path pattern {}", cfg.path_pattern))?;

        let parse_value = |label: &str, raw: &Option<String>| -> Result<Option<Value>> {
            raw.as_deref()
                .map(|s| serde_json::from_str(s).with_context(|| format!("decoding {}", label)))
                .transpose()
        };
        let parse_patch = |label: &str, raw: &Option<String>| -> Result<Option<json_patch::Patch>> {
            raw.as_deref()
                .map(|s| serde_json::from_str(s).with_context(|| format!("decoding {}", label)))
                .transpose()
        };

        let mut expander_option = ExpanderOption {
            empty_obj_as_str: false,
            cache: Some(cache),
        };
        if let Some(opt) = &cfg.expander {
            expander_option.empty_obj_as_str = opt.empty_obj_as_str;
            if opt.disable_cache {
                expander_option.cache = None;
            }
        }

        let mut synth_option = SynthesizerOption::default();
        if let Some(opt) = &cfg.synthesizer {
            synth_option.use_enum_values = opt.use_enum_value;
            for de in &opt.duplicate_elements {
                synth_option.duplicate_elements.push(SynthDuplicateElement {
                    count: de.count.unwrap_or(1),
                    addr: PropertyAddr::parse(&de.addr)
                        .map_err(|e| anyhow!("parsing duplicate_element addr {}: {}", de.addr, e))?,
                });
            }
        }

        Ok(Override {
            path_pattern,
            response_body: cfg.response_body.clone(),
            response_selector_merge: parse_value("response_selector_merge", &cfg.response_selector_merge)?,
            response_selector_json: parse_patch("response_selector_json", &cfg.response_selector_json)?,
            response_patch_merge: parse_value("response_patch_merge", &cfg.response_patch_merge)?,
            response_patch_json: parse_patch("response_patch_json", &cfg.response_patch_json)?,
            response_header: cfg.response_header.clone(),
            response_status_code: cfg.response_status_code,
            expander_option,
            synth_option,
        })
    }
}

/// The armed single-leaf perturbation.
pub struct Vibration {
    pub path_pattern: Regex,
    /// JSON pointer into the response body.
    pub path: String,
    pub value: Value,
}

/// One entry of the per-execution sequence log; vibration runs must replay
/// the same sequence as their base run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonoModelDesc {
    pub op_ref: String,
    pub version: String,
    pub selected: usize,
}

#[derive(Default)]
struct ExecState {
    overrides: Vec<Override>,
    rnd: Rnd,
    init_rnd: Rnd,
    records: Vec<JsonValue>,
    sequences: Vec<MonoModelDesc>,
    vibration: Option<Vibration>,
    vibration_record: Option<JsonValue>,
}

struct ServerInner {
    store: Arc<SpecStore>,
    index: OperationIndex,
    exec: Mutex<ExecState>,
}

/// The mock server. Start/stop bracket a whole run; executions re-arm the
/// per-execution state through [`MockServer::init_execution`] and
/// [`MockServer::init_vibration`].
pub struct MockServer {
    addr: String,
    port: u16,
    timeout: Duration,
    inner: Arc<ServerInner>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MockServer {
    pub fn new(opt: ServerOption) -> Result<MockServer> {
        let index = OperationIndex::load(&opt.index, &opt.specdir)?;
        Ok(MockServer {
            addr: opt.addr,
            port: opt.port,
            timeout: opt.timeout,
            inner: Arc::new(ServerInner {
                store: Arc::new(SpecStore::new()),
                index,
                exec: Mutex::new(ExecState::default()),
            }),
            shutdown_tx: Mutex::new(None),
            task: Mutex::new(None),
        })
    }

    /// `host:port` clients should be pointed at.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }

    pub fn index(&self) -> &OperationIndex {
        &self.inner.index
    }

    pub async fn start(&self) -> Result<()> {
        let router = Router::new()
            .fallback(handle)
            .layer(TimeoutLayer::new(self.timeout))
            .with_state(self.inner.clone());
        let listener = tokio::net::TcpListener::bind((self.addr.as_str(), self.port))
            .await
            .with_context(|| format!("binding {}", self.server_addr()))?;
        info!("mock server listening on http://{}", self.server_addr());

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        *self.shutdown_tx.lock().unwrap() = Some(shutdown_tx);
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
        });
        *self.task.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Signals shutdown and waits for the listener to drain.
    pub async fn stop(&self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
        let task = self.task.lock().unwrap().take();
        if let Some(task) = task {
            task.await.context("joining server task")?;
        }
        info!("mock server stopped");
        Ok(())
    }

    /// Arms a fresh execution: new overrides, a fresh generator (whose
    /// initial state is kept so vibration runs replay identically), and
    /// empty records.
    pub fn init_execution(&self, overrides: Vec<Override>) {
        let rnd = Rnd::new();
        let mut exec = self.inner.exec.lock().unwrap();
        *exec = ExecState {
            overrides,
            init_rnd: rnd.clone(),
            rnd,
            ..ExecState::default()
        };
    }

    /// Arms a vibration run: the generator rewinds to the execution's
    /// initial state so unperturbed responses are byte-identical.
    pub fn init_vibration(&self, vibration: Vibration) {
        let mut exec = self.inner.exec.lock().unwrap();
        exec.rnd = exec.init_rnd.clone();
        exec.records.clear();
        exec.sequences.clear();
        exec.vibration = Some(vibration);
        exec.vibration_record = None;
    }

    pub fn records(&self) -> Vec<JsonValue> {
        self.inner.exec.lock().unwrap().records.clone()
    }

    pub fn sequences(&self) -> Vec<MonoModelDesc> {
        self.inner.exec.lock().unwrap().sequences.clone()
    }

    pub fn vibration_record(&self) -> Option<JsonValue> {
        self.inner.exec.lock().unwrap().vibration_record.clone()
    }
}

async fn handle(State(inner): State<Arc<ServerInner>>, req: Request<Body>) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let version = query_param(req.uri().query(), "api-version").unwrap_or_default();
    debug!(%method, %path, %version, "mock request");

    match respond(&inner, &method, &path, &version) {
        Ok(resp) => resp,
        Err(err) => {
            error!(%method, %path, error = %format!("{:#}", err), "request failed");
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &BTreeMap::new(),
                serde_json::to_vec(&serde_json::json!({"error": format!("{:#}", err)}))
                    .unwrap_or_default(),
            )
        }
    }
}

fn respond(inner: &ServerInner, method: &str, path: &str, version: &str) -> Result<Response> {
    if auth::is_token_request(path) {
        let body = auth::token_response()?;
        return Ok(json_response(
            StatusCode::OK,
            &BTreeMap::new(),
            serde_json::to_vec(&body)?,
        ));
    }

    let op_ref = inner
        .index
        .lookup(method, path)
        .ok_or_else(|| anyhow!("no operation matches {} {}", method, path))?
        .clone();

    let mut exec = inner.exec.lock().unwrap();
    let ov_idx = exec
        .overrides
        .iter()
        .position(|o| o.path_pattern.is_match(path));

    let (status, headers) = match ov_idx.map(|i| &exec.overrides[i]) {
        Some(ov) => (
            ov.response_status_code
                .and_then(|c| StatusCode::from_u16(c).ok())
                .unwrap_or(StatusCode::OK),
            ov.response_header.clone(),
        ),
        None => (StatusCode::OK, BTreeMap::new()),
    };

    // A hard-coded body bypasses synthesis entirely; nothing is recorded
    // for correlation.
    if let Some(body) = ov_idx.and_then(|i| exec.overrides[i].response_body.clone()) {
        return Ok(json_response(status, &headers, body.into_bytes()));
    }

    let (expander_option, synth_option) = match ov_idx.map(|i| &exec.overrides[i]) {
        Some(ov) => (ov.expander_option.clone(), ov.synth_option.clone()),
        None => (ExpanderOption::default(), SynthesizerOption::default()),
    };

    let mut expander = Expander::from_op_ref(inner.store.clone(), &op_ref, expander_option)?;
    let root = expander.expand()?;
    let monos = monomorphize(&root);
    if monos.is_empty() {
        bail!("{}: no monomorphized candidate", op_ref);
    }

    // Candidates fork the execution generator; the selected fork is
    // committed back so the next request continues from it.
    let mut candidates = Vec::with_capacity(monos.len());
    for mono in &monos {
        let synthesizer = Synthesizer::new(mono, &synth_option)?;
        let mut rnd = exec.rnd.clone();
        let value = synthesizer
            .synthesize(&mut rnd)
            .ok_or_else(|| anyhow!("{}: nothing synthesized", op_ref))?;
        candidates.push((value, rnd));
    }

    let selected = select_candidate(&candidates, ov_idx.map(|i| &exec.overrides[i]))?;
    let (mut body, rnd_after) = candidates.swap_remove(selected);
    exec.rnd = rnd_after;

    if let Some(ov) = ov_idx.map(|i| &exec.overrides[i]) {
        if let Some(merge) = &ov.response_patch_merge {
            json_patch::merge(&mut body, merge);
        }
        if let Some(patch) = &ov.response_patch_json {
            json_patch::patch(&mut body, patch).context("applying response_patch_json")?;
        }
    }

    let mut vibrated = false;
    if let Some(vibration) = &exec.vibration {
        if vibration.path_pattern.is_match(path) {
            let patch: json_patch::Patch = serde_json::from_value(serde_json::json!([
                {"op": "replace", "path": vibration.path.clone(), "value": vibration.value.clone()}
            ]))?;
            json_patch::patch(&mut body, &patch).context("applying vibration patch")?;
            vibrated = true;
        }
    }

    let bytes = serde_json::to_vec(&body)?;
    let root_model = RootModel {
        path_ref: op_ref.parent(),
        operation: op_ref.last_token(),
        version: version.to_string(),
    };
    let annotated = JsonValue::from_bytes(&bytes, Some(&monos[selected]), Some(&root_model))?;
    if vibrated {
        exec.vibration_record = Some(annotated);
    } else {
        exec.records.push(annotated);
    }
    exec.sequences.push(MonoModelDesc {
        op_ref: op_ref.to_string(),
        version: version.to_string(),
        selected,
    });

    Ok(json_response(status, &headers, bytes))
}

/// Picks the candidate an override's selector patch leaves unchanged; the
/// first candidate without a selector.
fn select_candidate(candidates: &[(Value, Rnd)], ov: Option<&Override>) -> Result<usize> {
    if let Some(ov) = ov {
        if let Some(merge) = &ov.response_selector_merge {
            return candidates
                .iter()
                .position(|(v, _)| {
                    let mut patched = v.clone();
                    json_patch::merge(&mut patched, merge);
                    patched == *v
                })
                .ok_or_else(|| anyhow!("no candidate matches response_selector_merge"));
        }
        if let Some(patch) = &ov.response_selector_json {
            return candidates
                .iter()
                .position(|(v, _)| {
                    let mut patched = v.clone();
                    json_patch::patch(&mut patched, patch).is_ok() && patched == *v
                })
                .ok_or_else(|| anyhow!("no candidate matches response_selector_json"));
        }
    }
    Ok(0)
}

fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    query?
        .split('&')
        .filter_map(|kv| kv.split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.to_string())
}

fn json_response(
    status: StatusCode,
    headers: &BTreeMap<String, String>,
    body: Vec<u8>,
) -> Response {
    let mut builder = Response::builder()
        .status(status)
        .header("content-type", "application/json");
    for (k, v) in headers {
        builder = builder.header(k.as_str(), v.as_str());
    }
    builder
        .body(Body::from(body))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}
