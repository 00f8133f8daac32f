//! The execution spec: which client programs to run, and how the mock
//! server should answer while each one runs.
//!
//! Loaded from a TOML file. `${home}` and `${server_addr}` placeholders in
//! execution paths, args, dirs and env values are interpolated at load
//! time.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level execution spec: global overrides plus the ordered executions.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default, rename = "override")]
    pub overrides: Vec<OverrideConfig>,
    #[serde(default, rename = "execution")]
    pub executions: Vec<ExecutionConfig>,
}

/// One client program run.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub skip: bool,
    #[serde(default)]
    pub skip_reason: String,
    #[serde(default, rename = "override")]
    pub overrides: Vec<OverrideConfig>,
    #[serde(default, rename = "vibrate")]
    pub vibrations: Vec<VibrateConfig>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub dir: Option<String>,
    pub path: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl fmt::Display for ExecutionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.kind)
    }
}

/// Per-request response shaping. At most one of the exclusive response
/// options may be set; see [`Config::validate`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OverrideConfig {
    /// Regex matched against the request URL path.
    pub path_pattern: String,
    #[serde(default)]
    pub response_body: Option<String>,
    /// Merge patch selecting the monomorphized candidate it leaves
    /// unchanged.
    #[serde(default)]
    pub response_selector_merge: Option<String>,
    /// JSON patch flavor of the selector.
    #[serde(default)]
    pub response_selector_json: Option<String>,
    /// Merge patch applied to the selected response.
    #[serde(default)]
    pub response_patch_merge: Option<String>,
    /// JSON patch applied to the selected response.
    #[serde(default)]
    pub response_patch_json: Option<String>,
    #[serde(default)]
    pub response_header: BTreeMap<String, String>,
    #[serde(default)]
    pub response_status_code: Option<u16>,
    #[serde(default)]
    pub expander: Option<ExpanderOpt>,
    #[serde(default)]
    pub synthesizer: Option<SynthOpt>,
}

impl OverrideConfig {
    fn is_empty(&self) -> bool {
        self.response_body.is_none()
            && self.response_selector_merge.is_none()
            && self.response_selector_json.is_none()
            && self.response_patch_merge.is_none()
            && self.response_patch_json.is_none()
            && self.response_header.is_empty()
            && self.response_status_code.is_none()
            && self.expander.is_none()
            && self.synthesizer.is_none()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExpanderOpt {
    #[serde(default)]
    pub empty_obj_as_str: bool,
    #[serde(default)]
    pub disable_cache: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SynthOpt {
    #[serde(default)]
    pub use_enum_value: bool,
    #[serde(default, rename = "duplicate_element")]
    pub duplicate_elements: Vec<DuplicateElement>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DuplicateElement {
    #[serde(default)]
    pub count: Option<usize>,
    pub addr: String,
}

/// A single-leaf perturbation applied on matched responses during a
/// vibration run.
#[derive(Debug, Clone, Deserialize)]
pub struct VibrateConfig {
    pub path_pattern: String,
    /// JSON pointer into the response body.
    pub path: String,
    /// Replacement value; scalars only.
    pub value: serde_json::Value,
}

/// Values substituted into `${...}` placeholders.
#[derive(Debug, Clone, Default)]
pub struct InterpolationVars {
    pub home: String,
    pub server_addr: String,
}

pub fn interpolate(s: &str, vars: &InterpolationVars) -> String {
    s.replace("${home}", &vars.home)
        .replace("${server_addr}", &vars.server_addr)
}

impl Config {
    /// Loads, interpolates and validates an execution spec file.
    pub fn load(path: &Path, vars: &InterpolationVars) -> Result<Config> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let mut config: Config =
            toml::from_str(&raw).with_context(|| format!("decoding {}", path.display()))?;
        for exec in &mut config.executions {
            exec.path = interpolate(&exec.path, vars);
            for arg in &mut exec.args {
                *arg = interpolate(arg, vars);
            }
            if let Some(dir) = &mut exec.dir {
                *dir = interpolate(dir, vars);
            }
            for value in exec.env.values_mut() {
                *value = interpolate(value, vars);
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Enforces the override exclusivity rules, skip reasons, unique
    /// execution identities and scalar vibration values.
    pub fn validate(&self) -> Result<()> {
        validate_overrides(&self.overrides)?;

        let mut seen: BTreeMap<String, ()> = BTreeMap::new();
        for exec in &self.executions {
            if exec.skip && exec.skip_reason.is_empty() {
                bail!("skipped execution {} must have a skip_reason", exec);
            }
            validate_overrides(&exec.overrides)?;
            for vib in &exec.vibrations {
                if !matches!(
                    vib.value,
                    serde_json::Value::String(_)
                        | serde_json::Value::Number(_)
                        | serde_json::Value::Bool(_)
                ) {
                    bail!("vibration value for {} must be a scalar", vib.path);
                }
            }
            if seen.insert(exec.to_string(), ()).is_some() {
                bail!("duplicated execution {}", exec);
            }
        }
        Ok(())
    }
}

fn validate_overrides(overrides: &[OverrideConfig]) -> Result<()> {
    for ov in overrides {
        if ov.is_empty() {
            bail!("empty override block is not allowed");
        }
        if ov.response_body.is_some() {
            let has_other = ov.response_selector_merge.is_some()
                || ov.response_selector_json.is_some()
                || ov.response_patch_merge.is_some()
                || ov.response_patch_json.is_some()
                || ov.expander.is_some()
                || ov.synthesizer.is_some();
            if has_other {
                bail!("`response_body` excludes all other response-content options");
            }
            continue;
        }
        if ov.response_patch_merge.is_some() && ov.response_patch_json.is_some() {
            bail!("`response_patch_merge` conflicts with `response_patch_json`");
        }
        if ov.response_selector_merge.is_some() && ov.response_selector_json.is_some() {
            bail!("`response_selector_merge` conflicts with `response_selector_json`");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> Config {
        toml::from_str(body).unwrap()
    }

    #[test]
    fn test_parse_full_spec() {
        let config = parse(
            r#"
            [[override]]
            path_pattern = "^/providers/"
            response_status_code = 404

            [[execution]]
            name = "resource"
            type = "basic"
            path = "/usr/bin/client"
            args = ["--endpoint", "http://${server_addr}"]

            [execution.env]
            TOKEN = "fake"

            [[execution.override]]
            path_pattern = ".*"
            response_selector_merge = '{"type": "var1"}'

            [[execution.vibrate]]
            path_pattern = ".*"
            path = "/name"
            value = "vibrated"
            "#,
        );
        assert_eq!(config.overrides.len(), 1);
        let exec = &config.executions[0];
        assert_eq!(exec.to_string(), "resource.basic");
        assert_eq!(exec.vibrations[0].path, "/name");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_interpolation() {
        let vars = InterpolationVars {
            home: "/home/u".into(),
            server_addr: "localhost:8888".into(),
        };
        assert_eq!(
            interpolate("http://${server_addr}/x in ${home}", &vars),
            "http://localhost:8888/x in /home/u"
        );
    }

    #[test]
    fn test_validate_rejects_empty_override() {
        let config = parse(
            r#"
            [[override]]
            path_pattern = ".*"
            "#,
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_body_with_selector() {
        let config = parse(
            r#"
            [[override]]
            path_pattern = ".*"
            response_body = '{"fixed": true}'
            response_selector_merge = '{"type": "var1"}'
            "#,
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_conflicting_patches() {
        let config = parse(
            r#"
            [[override]]
            path_pattern = ".*"
            response_patch_merge = '{}'
            response_patch_json = '[]'
            "#,
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_execution() {
        let config = parse(
            r#"
            [[execution]]
            name = "a"
            type = "t"
            path = "/bin/true"

            [[execution]]
            name = "a"
            type = "t"
            path = "/bin/true"
            "#,
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_skip_without_reason() {
        let config = parse(
            r#"
            [[execution]]
            name = "a"
            type = "t"
            path = "/bin/true"
            skip = true
            "#,
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_scalar_vibration() {
        let config = parse(
            r#"
            [[execution]]
            name = "a"
            type = "t"
            path = "/bin/true"

            [[execution.vibrate]]
            path_pattern = ".*"
            path = "/p"
            value = [1, 2]
            "#,
        );
        assert!(config.validate().is_err());
    }
}
