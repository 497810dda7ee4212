use std::collections::HashMap;

use bollard::{
    container::Config,
    secret::{HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum},
};
use serde_json::{Map, Value};
use stacked_errors::{bail, Result, StackableErr};

use crate::{
    run_options::{container_port_key, RestartPolicyName},
    RunOptions,
};

#[allow(clippy::type_complexity)] // internal only
fn ports_to_bollard_args(
    options: &RunOptions,
) -> Result<(
    HashMap<String, HashMap<(), ()>>,
    HashMap<String, Option<Vec<PortBinding>>>,
)> {
    let mut exposed_ports = HashMap::new();
    let mut port_bindings = HashMap::new();
    for (port, spec) in &options.ports {
        let key = container_port_key(port);
        let bindings = match spec {
            Some(spec) => spec
                .bindings()
                .stack_err_with(|| format!("binding port {port}"))?
                .into_iter()
                .map(|binding| PortBinding {
                    host_ip: binding.host_ip,
                    host_port: binding.host_port.as_ref().map(ToString::to_string),
                })
                .collect(),
            // the daemon picks a free host port
            None => vec![PortBinding {
                host_ip: None,
                host_port: None,
            }],
        };
        exposed_ports.insert(key.clone(), HashMap::new());
        port_bindings.insert(key, Some(bindings));
    }
    Ok((exposed_ports, port_bindings))
}

fn restart_policy_to_bollard(name: RestartPolicyName) -> RestartPolicyNameEnum {
    match name {
        RestartPolicyName::Empty => RestartPolicyNameEnum::EMPTY,
        RestartPolicyName::No => RestartPolicyNameEnum::NO,
        RestartPolicyName::Always => RestartPolicyNameEnum::ALWAYS,
        RestartPolicyName::UnlessStopped => RestartPolicyNameEnum::UNLESS_STOPPED,
        RestartPolicyName::OnFailure => RestartPolicyNameEnum::ON_FAILURE,
    }
}

fn non_empty<T>(v: Vec<T>) -> Option<Vec<T>> {
    (!v.is_empty()).then_some(v)
}

/// The arguments to the API's equivalent of `docker create` for running
/// `image` with `options`.
///
/// The typed options are applied first, then the passthrough fields in
/// [RunOptions::extra] are merged over the serialized request. A
/// `"HostConfig"` passthrough is merged field by field so it does not
/// discard typed port or volume settings.
pub fn container_config(image: &str, options: &RunOptions) -> Result<Config<String>> {
    let (exposed_ports, port_bindings) = ports_to_bollard_args(options).stack()?;

    let host_config = HostConfig {
        port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
        binds: non_empty(options.volumes.binds()),
        restart_policy: options.restart_policy.as_ref().map(|policy| RestartPolicy {
            name: Some(restart_policy_to_bollard(policy.name)),
            maximum_retry_count: policy.maximum_retry_count,
        }),
        network_mode: options.network.clone(),
        privileged: options.privileged.then_some(true),
        cap_add: non_empty(options.cap_add.clone()),
        ..Default::default()
    };

    let config = Config {
        image: Some(image.to_owned()),
        hostname: options.hostname.clone(),
        user: options.user.clone(),
        working_dir: options.working_dir.clone(),
        env: non_empty(options.environment.to_env_list()),
        cmd: options.command.as_ref().map(|command| command.to_args()),
        entrypoint: options
            .entrypoint
            .as_ref()
            .map(|entrypoint| entrypoint.to_args()),
        labels: (!options.labels.is_empty()).then(|| {
            options
                .labels
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        }),
        exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
        host_config: Some(host_config),
        ..Default::default()
    };

    merge_passthrough(config, &options.extra).stack()
}

fn merge_passthrough(config: Config<String>, extra: &Map<String, Value>) -> Result<Config<String>> {
    if extra.is_empty() {
        return Ok(config)
    }
    let mut request = serde_json::to_value(&config).stack()?;
    let fields = request
        .as_object_mut()
        .stack_err("container config did not serialize to an object")?;
    for (key, value) in extra {
        if key == "HostConfig" {
            if let (Some(Value::Object(current)), Value::Object(overrides)) =
                (fields.get_mut(key), value)
            {
                current.extend(overrides.clone());
                continue;
            }
        }
        fields.insert(key.clone(), value.clone());
    }
    let merged: Config<String> =
        serde_json::from_value(request).stack_err("applying passthrough run options")?;

    // unknown fields are ignored when deserializing, so a typo would vanish
    let applied = serde_json::to_value(&merged).stack()?;
    let dropped = dropped_keys(extra, &applied);
    if !dropped.is_empty() {
        bail!("unsupported passthrough run options: {}", dropped.join(", "))
    }
    Ok(merged)
}

/// Passthrough keys missing from the `applied` request, with `HostConfig`
/// fields named as `HostConfig.Field`. `null` values are skipped since unset
/// fields are not serialized.
fn dropped_keys(extra: &Map<String, Value>, applied: &Value) -> Vec<String> {
    let mut dropped = vec![];
    for (key, value) in extra {
        if value.is_null() {
            continue
        }
        let Some(applied_value) = applied.get(key) else {
            dropped.push(key.clone());
            continue
        };
        if key == "HostConfig" {
            if let Value::Object(fields) = value {
                for (field, field_value) in fields {
                    if !field_value.is_null() && applied_value.get(field).is_none() {
                        dropped.push(format!("HostConfig.{field}"));
                    }
                }
            }
        }
    }
    dropped
}
