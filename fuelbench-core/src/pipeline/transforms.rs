//! Document transforms applied between download and upload.
//!
//! Each transform takes the parsed document and returns it with only the
//! targeted fields changed. Missing structure is a validation error, never
//! silently created.

use crate::error::{BenchError, Result};
use crate::site::NetworkPlan;
use serde_yaml::Value;

/// Interface that carries the isolated networks on workload nodes.
pub const ISOLATED_INTERFACE: &str = "eth2";

/// Networks moved onto [`ISOLATED_INTERFACE`].
pub const ISOLATED_NETWORKS: [&str; 3] = ["management", "storage", "private"];

/// Public addressing written into an environment's network document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicNetwork {
    pub vip: String,
    pub cidr: String,
    pub gateway: String,
    pub ranges: [String; 2],
    pub floating_ranges: [String; 2],
}

impl PublicNetwork {
    pub fn from_plan(plan: &NetworkPlan) -> Self {
        Self {
            vip: plan.public_vip.clone(),
            cidr: plan.public_cidr().to_string(),
            gateway: plan.public_gateway().to_string(),
            ranges: plan.public_ranges.clone(),
            floating_ranges: plan.floating_ranges.clone(),
        }
    }
}

fn string(s: &str) -> Value {
    Value::String(s.to_string())
}

fn range(r: &[String; 2]) -> Value {
    Value::Sequence(vec![string(&r[0]), string(&r[1])])
}

/// Walk `path` through nested mappings.
fn at_path<'a>(doc: &'a mut Value, path: &[&str]) -> Result<&'a mut Value> {
    let mut node = doc;
    for (depth, key) in path.iter().enumerate() {
        node = node.get_mut(*key).ok_or_else(|| {
            BenchError::validation(format!("Missing key '{}' in document", path[..=depth].join(".")))
        })?;
    }
    Ok(node)
}

fn set_at(doc: &mut Value, path: &[&str], value: Value) -> Result<()> {
    *at_path(doc, path)? = value;
    Ok(())
}

fn mapping_set(node: &mut Value, key: &str, value: Value) -> Result<()> {
    let map = node
        .as_mapping_mut()
        .ok_or_else(|| BenchError::validation(format!("Expected a mapping to hold '{}'", key)))?;
    map.insert(string(key), value);
    Ok(())
}

/// Public network, VIP and floating range of an environment.
pub fn site_network(mut doc: Value, public: &PublicNetwork) -> Result<Value> {
    set_at(
        &mut doc,
        &["networking_parameters", "floating_ranges"],
        Value::Sequence(vec![range(&public.floating_ranges)]),
    )?;
    mapping_set(&mut doc, "public_vip", string(&public.vip))?;

    let networks = at_path(&mut doc, &["networks"])?
        .as_sequence_mut()
        .ok_or_else(|| BenchError::validation("'networks' is not a list"))?;

    for net in networks.iter_mut().filter(|n| n.get("name").and_then(Value::as_str) == Some("public")) {
        mapping_set(net, "cidr", string(&public.cidr))?;
        mapping_set(net, "gateway", string(&public.gateway))?;
        mapping_set(net, "ip_ranges", Value::Sequence(vec![range(&public.ranges)]))?;

        let meta = at_path(net, &["meta"])?;
        mapping_set(meta, "cidr", string(&public.cidr))?;
        mapping_set(meta, "ip_range", range(&public.ranges))?;
    }

    Ok(doc)
}

/// Hypervisor type, debug logging and upstream DNS of an environment.
pub fn site_settings(mut doc: Value, upstream_dns: &str) -> Result<Value> {
    set_at(&mut doc, &["editable", "common", "libvirt_type", "value"], string("kvm"))?;
    set_at(&mut doc, &["editable", "common", "debug", "value"], Value::Bool(true))?;
    set_at(&mut doc, &["editable", "external_dns", "dns_list", "value"], string(upstream_dns))?;
    Ok(doc)
}

fn is_isolated(assignment: &Value) -> bool {
    assignment
        .get("name")
        .and_then(Value::as_str)
        .is_some_and(|name| ISOLATED_NETWORKS.contains(&name.trim()))
}

/// Move the isolated network assignments of a node onto [`ISOLATED_INTERFACE`].
pub fn node_network(mut doc: Value) -> Result<Value> {
    let interfaces = doc
        .as_sequence_mut()
        .ok_or_else(|| BenchError::validation("Interface document is not a list"))?;

    let target = interfaces
        .iter()
        .position(|i| i.get("name").and_then(Value::as_str) == Some(ISOLATED_INTERFACE))
        .ok_or_else(|| BenchError::validation(format!("Interface '{}' not found", ISOLATED_INTERFACE)))?;

    let mut moved = Vec::new();
    for (idx, iface) in interfaces.iter_mut().enumerate() {
        if idx == target {
            continue;
        }
        let Some(assigned) = iface.get_mut("assigned_networks").and_then(Value::as_sequence_mut) else {
            continue;
        };
        let (take, keep): (Vec<Value>, Vec<Value>) = std::mem::take(assigned).into_iter().partition(is_isolated);
        *assigned = keep;
        moved.extend(take);
    }

    at_path(&mut interfaces[target], &["assigned_networks"])?
        .as_sequence_mut()
        .ok_or_else(|| BenchError::validation("'assigned_networks' is not a list"))?
        .extend(moved);

    Ok(doc)
}

/// Point a node's kickstart gateway at the admin network gateway.
pub fn node_provisioning(mut doc: Value, admin_gateway: &str) -> Result<Value> {
    let ks_meta = at_path(&mut doc, &["ks_meta"])?;
    mapping_set(ks_meta, "gw", string(admin_gateway))?;
    Ok(doc)
}
