//! Drives the run: starts the mock server, launches each configured
//! client execution, correlates its stdout with the recorded responses,
//! runs vibrations, and writes the aggregated mapping to stdout.

pub mod modelmap;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use regex::Regex;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::{Config, ExecutionConfig, InterpolationVars, VibrateConfig};
use crate::mockserver::{MockServer, MonoModelDesc, Override, ServerOption, Vibration};
use crate::swagger::{ExpanderCache, ValuePos};
use modelmap::{compare_flattened, flatten_json, LinkContext, ModelMap, SingleModelMap};

pub struct CtrlOption {
    pub config_file: PathBuf,
    pub continue_on_err: bool,
    pub server_option: ServerOption,
    /// Run from this execution (`name.type`, inclusive) onward.
    pub exec_from: String,
    /// Stop at this execution (`name.type`, exclusive).
    pub exec_to: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ExecutionState {
    BeforeRun,
    Running,
    AfterRun,
}

/// The run driver.
pub struct Ctrl {
    spec: Config,
    continue_on_err: bool,
    server: MockServer,
    exec_from: String,
    exec_to: String,
    state: ExecutionState,
    cache: Arc<ExpanderCache>,
}

/// Base-run observations a vibration run is compared against.
struct BaseExecInfo {
    app: Value,
    seq: Vec<MonoModelDesc>,
}

impl Ctrl {
    pub fn new(opt: CtrlOption) -> Result<Ctrl> {
        let server = MockServer::new(opt.server_option)?;
        let vars = InterpolationVars {
            home: std::env::var("HOME").unwrap_or_default(),
            server_addr: server.server_addr(),
        };
        let spec = Config::load(&opt.config_file, &vars)?;
        Ok(Ctrl {
            spec,
            continue_on_err: opt.continue_on_err,
            server,
            exec_from: opt.exec_from,
            exec_to: opt.exec_to,
            state: ExecutionState::BeforeRun,
            cache: Arc::new(ExpanderCache::new()),
        })
    }

    pub async fn run(&mut self) -> Result<()> {
        info!("starting the mock server");
        self.server.start().await?;

        let executions = self.spec.executions.clone();
        let total = executions.len();
        let mut results: BTreeMap<String, Vec<SingleModelMap>> = BTreeMap::new();
        let (mut skipped, mut succeeded, mut failed) = (0usize, 0usize, 0usize);

        for (i, execution) in executions.iter().enumerate() {
            match self.state {
                ExecutionState::BeforeRun => {
                    if self.exec_from.is_empty() || self.exec_from == execution.to_string() {
                        self.state = ExecutionState::Running;
                    } else {
                        info!("skipping {} ({}/{}): skipped by --from", execution, i + 1, total);
                        skipped += 1;
                        continue;
                    }
                }
                ExecutionState::Running => {
                    if !self.exec_to.is_empty() && self.exec_to == execution.to_string() {
                        self.state = ExecutionState::AfterRun;
                        info!("skipping {} ({}/{}): skipped by --to", execution, i + 1, total);
                        skipped += 1;
                        continue;
                    }
                }
                ExecutionState::AfterRun => {
                    info!("skipping {} ({}/{}): skipped by --to", execution, i + 1, total);
                    skipped += 1;
                    continue;
                }
            }

            if execution.skip {
                info!(
                    "skipping {} ({}/{}): {}",
                    execution,
                    i + 1,
                    total,
                    execution.skip_reason
                );
                skipped += 1;
                continue;
            }

            match self.execute(execution, i, total).await {
                Ok(m) => {
                    succeeded += 1;
                    results.entry(execution.name.clone()).or_default().push(m);
                }
                Err(err) => {
                    failed += 1;
                    if self.continue_on_err {
                        error!("execution {} failed: {:#}", execution, err);
                        continue;
                    }
                    return Err(err);
                }
            }
        }

        self.write_result(results)?;

        info!("stopping the mock server");
        self.server.stop().await?;

        if self.continue_on_err {
            info!(total, succeeded, failed, skipped, "summary");
        }
        if failed > 0 {
            bail!("{} execution failures encountered", failed);
        }
        Ok(())
    }

    fn write_result(&self, results: BTreeMap<String, Vec<SingleModelMap>>) -> Result<()> {
        let outputs: BTreeMap<String, ModelMap> = results
            .into_iter()
            .map(|(name, models)| (name, ModelMap::merge(models)))
            .collect();
        let rendered =
            serde_json::to_string_pretty(&outputs).context("marshalling output")?;
        println!("{}", rendered);
        Ok(())
    }

    async fn execute(
        &mut self,
        execution: &ExecutionConfig,
        exec_idx: usize,
        exec_total: usize,
    ) -> Result<SingleModelMap> {
        let mut overrides = Vec::new();
        for cfg in execution.overrides.iter().chain(self.spec.overrides.iter()) {
            overrides.push(Override::from_config(cfg, self.cache.clone())?);
        }
        self.server.init_execution(overrides);

        let app_model = self
            .run_command(execution, exec_idx, exec_total, 0, 0)
            .await?;

        let records = self.server.records();
        let mut map = SingleModelMap::correlate(&app_model, &records);
        let base = BaseExecInfo {
            app: app_model,
            seq: self.server.sequences(),
        };

        let vib_total = execution.vibrations.len();
        for (vib_idx, vib) in execution.vibrations.iter().enumerate() {
            let found = self
                .vibrate(execution, vib, &base, exec_idx, exec_total, vib_idx, vib_total)
                .await
                .with_context(|| format!("vibrating {} ({})", execution, vib.path))?;
            if let Some((app_pointer, pos)) = found {
                if map.0.contains_key(&app_pointer) {
                    warn!("the {}-th vibration is redundant", vib_idx);
                } else {
                    map.0.insert(app_pointer, pos);
                }
            }
        }

        let ctx = LinkContext {
            commit: self.server.index().commit().map(str::to_string),
            github_base_url: self.server.index().github_base_url().map(str::to_string),
            specdir: self.server.index().specdir().to_path_buf(),
        };
        map.add_links(&ctx)
            .with_context(|| format!("adding links for {}", execution))?;
        map.relativize(&ctx.specdir);
        Ok(map)
    }

    async fn run_command(
        &self,
        execution: &ExecutionConfig,
        exec_idx: usize,
        exec_total: usize,
        vib_idx: usize,
        vib_total: usize,
    ) -> Result<Value> {
        let vibrate_msg = if vib_total == 0 {
            String::new()
        } else {
            format!(" by vibrating ({}/{})", vib_idx + 1, vib_total)
        };
        info!(
            "executing {} ({}/{}){}",
            execution,
            exec_idx + 1,
            exec_total,
            vibrate_msg
        );
        debug!(path = %execution.path, args = ?execution.args, dir = ?execution.dir, "execution detail");

        let mut cmd = tokio::process::Command::new(&execution.path);
        cmd.args(&execution.args).envs(&execution.env);
        if let Some(dir) = &execution.dir {
            cmd.current_dir(dir);
        }
        let output = cmd
            .output()
            .await
            .with_context(|| format!("launching execution {}", execution))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            error!(%stdout, stderr = %String::from_utf8_lossy(&output.stderr), "run failure");
            bail!(
                "running execution {}{}: {}",
                execution,
                vibrate_msg,
                output.status
            );
        }
        debug!(%stdout, "execution result");

        let app: Value = serde_json::from_slice(&output.stdout).with_context(|| {
            format!("post-execution {}{} unmarshal", execution, vibrate_msg)
        })?;
        if !app.is_object() {
            bail!("execution {} stdout is not a JSON object", execution);
        }
        Ok(app)
    }

    /// Runs the execution once more with a perturbation armed, and maps
    /// the single moved app property to the perturbed schema leaf.
    #[allow(clippy::too_many_arguments)]
    async fn vibrate(
        &mut self,
        execution: &ExecutionConfig,
        vib: &VibrateConfig,
        base: &BaseExecInfo,
        exec_idx: usize,
        exec_total: usize,
        vib_idx: usize,
        vib_total: usize,
    ) -> Result<Option<(String, ValuePos)>> {
        self.server.init_vibration(Vibration {
            path_pattern: Regex::new(&vib.path_pattern)
                .with_context(|| format!("compiling vibration pattern {}", vib.path_pattern))?,
            path: vib.path.clone(),
            value: vib.value.clone(),
        });

        let vib_model = self
            .run_command(execution, exec_idx, exec_total, vib_idx, vib_total)
            .await?;

        let seq = self.server.sequences();
        if base.seq != seq {
            error!(old = ?base.seq, new = ?seq, "API invocation sequence not matched");
            bail!(
                "API invocation sequence not matched between the base execution and the {}-th vibrated execution",
                vib_idx
            );
        }

        let flat_base = flatten_json(&base.app);
        let flat_vib = flatten_json(&vib_model);
        let (base_only, vib_only, diff) = compare_flattened(&flat_base, &flat_vib);
        if base_only.is_empty() && vib_only.is_empty() && diff.is_empty() {
            warn!("vibration causes no diff against the base model");
            return Ok(None);
        }
        if !base_only.is_empty() || !vib_only.is_empty() {
            error!(?base_only, ?vib_only, "vibration causes property set mismatch");
            bail!(
                "vibration causes property set mismatch (base only: {:?}, vibration only: {:?})",
                base_only,
                vib_only
            );
        }
        if diff.len() != 1 {
            warn!(properties = ?diff, "vibration causes more than one differing property");
            return Ok(None);
        }
        let app_pointer = diff.into_iter().next().expect("checked length");

        let record = self
            .server
            .vibration_record()
            .ok_or_else(|| anyhow!("vibration record is unexpectedly absent"))?;
        for (pointer, pos) in record.leaf_positions_by_pointer() {
            if pointer == vib.path {
                return Ok(Some((app_pointer, pos.clone())));
            }
        }
        bail!(
            "failed to find a leaf property at {} in the vibration response",
            vib.path
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionConfig;

    fn echo_execution(json: &str) -> ExecutionConfig {
        ExecutionConfig {
            name: "echo".into(),
            kind: "test".into(),
            skip: false,
            skip_reason: String::new(),
            overrides: vec![],
            vibrations: vec![],
            env: Default::default(),
            dir: None,
            path: "/bin/echo".into(),
            args: vec![json.to_string()],
        }
    }

    fn test_ctrl() -> Ctrl {
        // The server is never started in these tests; the index just has
        // to load.
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("index.json"), r#"{"entries": []}"#).unwrap();
        let server = MockServer::new(ServerOption {
            addr: "localhost".into(),
            port: 0,
            index: dir.path().join("index.json"),
            specdir: dir.path().to_path_buf(),
            timeout: std::time::Duration::from_secs(60),
        })
        .unwrap();
        // Leak the dir so the paths stay valid for the test's lifetime.
        std::mem::forget(dir);
        Ctrl {
            spec: Config::default(),
            continue_on_err: false,
            server,
            exec_from: String::new(),
            exec_to: String::new(),
            state: ExecutionState::BeforeRun,
            cache: Arc::new(ExpanderCache::new()),
        }
    }

    #[tokio::test]
    async fn test_run_command_parses_stdout() {
        let ctrl = test_ctrl();
        let app = ctrl
            .run_command(&echo_execution(r#"{"a": 1}"#), 0, 1, 0, 0)
            .await
            .unwrap();
        assert_eq!(app["a"], 1);
    }

    #[tokio::test]
    async fn test_run_command_rejects_non_json_stdout() {
        let ctrl = test_ctrl();
        assert!(ctrl
            .run_command(&echo_execution("not json"), 0, 1, 0, 0)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_run_command_rejects_non_object_stdout() {
        let ctrl = test_ctrl();
        assert!(ctrl
            .run_command(&echo_execution("[1, 2]"), 0, 1, 0, 0)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_run_command_rejects_failing_subprocess() {
        let ctrl = test_ctrl();
        let mut exec = echo_execution("{}");
        exec.path = "/bin/false".into();
        exec.args = vec![];
        assert!(ctrl.run_command(&exec, 0, 1, 0, 0).await.is_err());
    }
}
