use std::{collections::BTreeMap, path::Path};

use serde::Deserialize;
use serde_json::{Map, Value};
use stacked_errors::{bail, Result, StackableErr};

use crate::UpdateError;

/// The extra arguments for recreating a container, read from the JSON env
/// file.
///
/// Keys follow the keyword options of `docker run` style client libraries,
/// e.g.
///
/// ```json
/// {
///     "ports": { "80/tcp": 8080 },
///     "volumes": ["/srv/web:/usr/share/nginx/html:ro"],
///     "environment": { "TZ": "Europe/Berlin" },
///     "restart_policy": { "Name": "unless-stopped" }
/// }
/// ```
///
/// Any key not listed as a field here ends up in [RunOptions::extra] and must
/// be a Docker Engine API container create field in its PascalCase wire
/// form (e.g. `"StopSignal"` or `"HostConfig": {"ShmSize": 1048576}`). Those
/// are merged verbatim into the create request.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    /// Container port (`"80/tcp"`, or `"80"` meaning tcp) to host side
    /// bindings. `null` publishes on a random host port.
    pub ports: BTreeMap<String, Option<PortSpec>>,
    pub volumes: Volumes,
    pub environment: Environment,
    pub restart_policy: Option<RestartPolicy>,
    pub command: Option<StringOrList>,
    pub entrypoint: Option<StringOrList>,
    pub hostname: Option<String>,
    pub user: Option<String>,
    pub working_dir: Option<String>,
    /// Network mode, or the name of a network to join
    pub network: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub privileged: bool,
    pub cap_add: Vec<String>,
    /// Engine API passthrough fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The host side of a published port
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum PortSpec {
    /// `8080`
    Port(u16),
    /// `"8080"` or `"127.0.0.1:8080"`
    Address(String),
    /// `["127.0.0.1", 8080]`
    IpPort(String, u16),
    /// `[8080, 8081]`, publishing on several host ports
    Ports(Vec<u16>),
}

/// One resolved host binding, `None` fields are left to the runtime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostBinding {
    pub host_ip: Option<String>,
    pub host_port: Option<u16>,
}

impl PortSpec {
    pub fn bindings(&self) -> Result<Vec<HostBinding>> {
        Ok(match self {
            PortSpec::Port(port) => vec![HostBinding {
                host_ip: None,
                host_port: Some(*port),
            }],
            PortSpec::Address(address) => {
                let (host_ip, port) = match address.rsplit_once(':') {
                    Some((ip, port)) => {
                        // IPv6 hosts are written as `[::1]:8080`
                        let ip = ip
                            .strip_prefix('[')
                            .and_then(|ip| ip.strip_suffix(']'))
                            .unwrap_or(ip);
                        (Some(ip.to_owned()), port)
                    }
                    None => (None, address.as_str()),
                };
                let host_port = if port.is_empty() {
                    None
                } else {
                    Some(
                        port.parse::<u16>()
                            .stack_err_with(|| format!("invalid host port in \"{address}\""))?,
                    )
                };
                vec![HostBinding { host_ip, host_port }]
            }
            PortSpec::IpPort(ip, port) => vec![HostBinding {
                host_ip: Some(ip.clone()),
                host_port: Some(*port),
            }],
            PortSpec::Ports(ports) => ports
                .iter()
                .map(|port| HostBinding {
                    host_ip: None,
                    host_port: Some(*port),
                })
                .collect(),
        })
    }
}

/// Appends the default `/tcp` protocol to a bare container port
pub fn container_port_key(key: &str) -> String {
    if key.contains('/') {
        key.to_owned()
    } else {
        format!("{key}/tcp")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Volumes {
    /// `["/host:/container:ro", ...]`
    Binds(Vec<String>),
    /// `{"/host": {"bind": "/container", "mode": "ro"}}`
    Map(BTreeMap<String, VolumeBind>),
}

impl Default for Volumes {
    fn default() -> Self {
        Volumes::Binds(vec![])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VolumeBind {
    pub bind: String,
    #[serde(default = "default_volume_mode")]
    pub mode: String,
}

fn default_volume_mode() -> String {
    "rw".to_owned()
}

impl Volumes {
    /// Bind strings in `host:container[:mode]` form
    pub fn binds(&self) -> Vec<String> {
        match self {
            Volumes::Binds(binds) => binds.clone(),
            Volumes::Map(map) => map
                .iter()
                .map(|(host, volume)| format!("{host}:{}:{}", volume.bind, volume.mode))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Environment {
    /// `{"KEY": "value"}`, non string values are written out as JSON
    Map(BTreeMap<String, Value>),
    /// `["KEY=value", ...]`
    List(Vec<String>),
}

impl Default for Environment {
    fn default() -> Self {
        Environment::List(vec![])
    }
}

impl Environment {
    /// Variables in `KEY=value` form
    pub fn to_env_list(&self) -> Vec<String> {
        match self {
            Environment::List(list) => list.clone(),
            Environment::Map(map) => map
                .iter()
                .map(|(key, value)| match value {
                    Value::String(s) => format!("{key}={s}"),
                    Value::Null => format!("{key}="),
                    other => format!("{key}={other}"),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RestartPolicy {
    #[serde(rename = "Name", alias = "name")]
    pub name: RestartPolicyName,
    #[serde(
        rename = "MaximumRetryCount",
        alias = "maximum_retry_count",
        default
    )]
    pub maximum_retry_count: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicyName {
    #[serde(rename = "")]
    Empty,
    No,
    Always,
    UnlessStopped,
    OnFailure,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum StringOrList {
    /// Split on whitespace, no shell quoting is interpreted
    One(String),
    Many(Vec<String>),
}

impl StringOrList {
    pub fn to_args(&self) -> Vec<String> {
        match self {
            StringOrList::One(s) => s.split_whitespace().map(ToOwned::to_owned).collect(),
            StringOrList::Many(args) => args.clone(),
        }
    }
}

impl RunOptions {
    /// Parses and validates an env file document
    pub fn from_json_str(s: &str) -> Result<Self> {
        let options: RunOptions = serde_json::from_str(s).stack()?;
        options.validate().stack()?;
        Ok(options)
    }

    /// Rejects passthrough keys that are not Engine API fields. Those are
    /// always PascalCase, so a lowercase key is a misspelled or unsupported
    /// option. With the `bollard` feature the full create request is built
    /// as well, which rejects unknown or mistyped PascalCase fields.
    pub fn validate(&self) -> Result<()> {
        let unknown: Vec<&str> = self
            .extra
            .keys()
            .filter(|key| !key.starts_with(|c: char| c.is_ascii_uppercase()))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            bail!("unrecognized run options: {}", unknown.join(", "))
        }
        if let Some(host_config) = self.extra.get("HostConfig") {
            if !host_config.is_object() {
                bail!("the \"HostConfig\" passthrough must be an object")
            }
        }
        for (port, spec) in &self.ports {
            if let Some(spec) = spec {
                spec.bindings()
                    .stack_err_with(|| format!("in the binding of port \"{port}\""))?;
            }
        }
        // passthrough values are only type checked when the create request is
        // built, which has to happen before the old container is removed
        #[cfg(feature = "bollard")]
        crate::api_docker::container_config("", self)
            .stack_err("run options do not form a valid container create request")?;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        *self == RunOptions::default()
    }
}

/// Reads the env file at `path`. No path gives the empty [RunOptions].
pub async fn load_run_options(path: Option<&Path>) -> std::result::Result<RunOptions, UpdateError> {
    let Some(path) = path else {
        return Ok(RunOptions::default())
    };
    let invalid = |cause| UpdateError::InvalidRunOptions {
        path: path.to_owned(),
        cause,
    };
    let contents = tokio::fs::read_to_string(path)
        .await
        .stack_err_with(|| format!("reading {path:?}"))
        .map_err(invalid)?;
    RunOptions::from_json_str(&contents).map_err(invalid)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serde_json::json;

    use super::*;

    #[test]
    fn port_shapes() {
        let options = RunOptions::from_json_str(
            r#"{"ports": {
                "80/tcp": 8080,
                "443": "127.0.0.1:8443",
                "53/udp": ["0.0.0.0", 5353],
                "9000/tcp": [9000, 9001],
                "9100/tcp": null
            }}"#,
        )
        .unwrap();
        assert_eq!(options.ports["80/tcp"], Some(PortSpec::Port(8080)));
        assert_eq!(
            options.ports["443"].as_ref().unwrap().bindings().unwrap(),
            vec![HostBinding {
                host_ip: Some("127.0.0.1".to_owned()),
                host_port: Some(8443),
            }]
        );
        assert_eq!(
            options.ports["53/udp"],
            Some(PortSpec::IpPort("0.0.0.0".to_owned(), 5353))
        );
        assert_eq!(
            options.ports["9000/tcp"].as_ref().unwrap().bindings().unwrap().len(),
            2
        );
        assert_eq!(options.ports["9100/tcp"], None);
        assert_eq!(
            PortSpec::Address("[::1]:8080".to_owned()).bindings().unwrap(),
            vec![HostBinding {
                host_ip: Some("::1".to_owned()),
                host_port: Some(8080),
            }]
        );
        assert_eq!(container_port_key("443"), "443/tcp");
        assert_eq!(container_port_key("53/udp"), "53/udp");
    }

    #[test]
    fn bad_host_port() {
        assert!(RunOptions::from_json_str(r#"{"ports": {"80": "localhost:http"}}"#).is_err());
        assert!(RunOptions::from_json_str(r#"{"ports": {"80": 70000}}"#).is_err());
    }

    #[test]
    fn volumes_and_environment() {
        let options = RunOptions::from_json_str(
            r#"{
                "volumes": {"/srv/data": {"bind": "/data"}, "/etc/app": {"bind": "/config", "mode": "ro"}},
                "environment": {"TZ": "UTC", "WORKERS": 4, "EMPTY": null}
            }"#,
        )
        .unwrap();
        assert_eq!(options.volumes.binds(), vec![
            "/etc/app:/config:ro".to_owned(),
            "/srv/data:/data:rw".to_owned()
        ]);
        assert_eq!(options.environment.to_env_list(), vec![
            "EMPTY=".to_owned(),
            "TZ=UTC".to_owned(),
            "WORKERS=4".to_owned()
        ]);

        let options = RunOptions::from_json_str(
            r#"{"volumes": ["/a:/b"], "environment": ["A=1"], "command": "nginx -g daemon"}"#,
        )
        .unwrap();
        assert_eq!(options.volumes.binds(), vec!["/a:/b".to_owned()]);
        assert_eq!(options.environment.to_env_list(), vec!["A=1".to_owned()]);
        assert_eq!(options.command.unwrap().to_args(), vec!["nginx", "-g", "daemon"]);
    }

    #[test]
    fn restart_policy() {
        let options = RunOptions::from_json_str(
            r#"{"restart_policy": {"Name": "on-failure", "MaximumRetryCount": 3}}"#,
        )
        .unwrap();
        assert_eq!(
            options.restart_policy,
            Some(RestartPolicy {
                name: RestartPolicyName::OnFailure,
                maximum_retry_count: Some(3),
            })
        );
        assert!(RunOptions::from_json_str(r#"{"restart_policy": {"Name": "sometimes"}}"#).is_err());
    }

    #[test]
    fn passthrough_keys() {
        let options = RunOptions::from_json_str(
            r#"{"StopSignal": "SIGINT", "HostConfig": {"ShmSize": 1048576}}"#,
        )
        .unwrap();
        assert_eq!(options.extra["StopSignal"], json!("SIGINT"));
        assert_eq!(options.extra["HostConfig"], json!({"ShmSize": 1048576}));

        assert!(RunOptions::from_json_str(r#"{"detach": false}"#).is_err());
        assert!(RunOptions::from_json_str(r#"{"HostConfig": 1}"#).is_err());
        assert!(RunOptions::from_json_str(r#"["not", "an", "object"]"#).is_err());
    }

    #[test]
    fn example_env_file() {
        let options =
            RunOptions::from_json_str(include_str!("../resources/docker-env.example.json"))
                .unwrap();
        assert_eq!(options.ports["80/tcp"], Some(PortSpec::Port(8080)));
        assert_eq!(
            options.restart_policy.unwrap().name,
            RestartPolicyName::UnlessStopped
        );
        assert!(options.extra.contains_key("HostConfig"));
    }

    #[tokio::test]
    async fn absent_env_file_is_empty() {
        let options = load_run_options(None).await.unwrap();
        assert!(options.is_empty());
    }

    #[tokio::test]
    async fn env_file_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{\"ports\": ").unwrap();
        let err = load_run_options(Some(file.path())).await.unwrap_err();
        assert!(matches!(err, UpdateError::InvalidRunOptions { .. }));

        let missing = file.path().with_extension("missing");
        let err = load_run_options(Some(&missing)).await.unwrap_err();
        assert!(matches!(err, UpdateError::InvalidRunOptions { .. }));
    }

    #[cfg(feature = "bollard")]
    #[tokio::test]
    async fn env_file_passthrough_is_checked_up_front() {
        for contents in [
            r#"{"HostConfig": {"ShmSize": "64m"}}"#,
            r#"{"StopTimeout": "ten"}"#,
            r#"{"StopSignl": "SIGINT"}"#,
            r#"{"HostConfig": {"ShmSise": 1048576}}"#,
        ] {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            file.write_all(contents.as_bytes()).unwrap();
            let err = load_run_options(Some(file.path())).await.unwrap_err();
            assert!(
                matches!(err, UpdateError::InvalidRunOptions { .. }),
                "{contents}"
            );
        }
    }
}
