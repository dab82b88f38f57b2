//! Topology query and mutation, delegated to the network model.

use crate::net::{EmuNet, LinkOpts, NodeKind};
use crate::socket::Executor;
use futures_util::future::BoxFuture;
use netplay_core::{arg_str, arg_value, funcs, obj, PlayResult, Value};
use std::sync::Arc;
use tracing::{error, info};

pub struct TopoExecutor {
    net: Arc<dyn EmuNet>,
}

impl TopoExecutor {
    pub fn new(net: Arc<dyn EmuNet>) -> Self {
        Self { net }
    }

    fn get_topo(&self) -> Value {
        let snap = self.net.snapshot();

        let nodes: Vec<Value> = snap
            .nodes
            .iter()
            .map(|(id, kind)| {
                let mut fields = vec![
                    ("id", Value::Text(id.clone())),
                    ("label", Value::Text(id.clone())),
                ];
                if *kind == NodeKind::Switch {
                    fields.push(("isSwitch", Value::Bool(true)));
                }
                obj(fields)
            })
            .collect();

        let links: Vec<Value> = snap
            .links
            .iter()
            .map(|link| {
                let mut fields = vec![
                    ("mnId", Value::Text(link.link_id.clone())),
                    ("from", Value::Text(link.from.clone())),
                    ("to", Value::Text(link.to.clone())),
                ];
                if let Some(latency) = link.opts.latency {
                    fields.push(("latency", Value::Float(latency)));
                }
                if let Some(loss) = link.opts.loss {
                    fields.push(("loss", Value::Float(loss)));
                }
                obj(fields)
            })
            .collect();

        obj([
            ("nodes", Value::Array(nodes)),
            ("links", Value::Array(links)),
        ])
    }

    fn add_link(&self, a: &str, b: &str, ui_id: &str, opts: LinkOpts) -> PlayResult<Value> {
        let link_id = self.net.add_link(a, b, opts)?;
        info!(link = %link_id, "link added");

        let mut fields = vec![
            ("id", Value::Text(ui_id.to_string())),
            ("mnId", Value::Text(link_id)),
        ];
        if let Some(latency) = opts.latency {
            fields.push(("latency", Value::Float(latency)));
        }
        if let Some(loss) = opts.loss {
            fields.push(("loss", Value::Float(loss)));
        }
        Ok(obj(fields))
    }

    fn del_link(&self, a: &str, b: &str, link_id: &str) -> Value {
        let removed = self.net.del_link(a, b, link_id);
        if !removed {
            error!(link = link_id, "no link found to remove");
        }
        Value::Bool(removed)
    }

    fn upd_link(&self, a: &str, b: &str, link_id: &str, opts: LinkOpts) -> Value {
        let updated = self.net.upd_link(a, b, link_id, opts);
        if !updated {
            info!(link = link_id, "no link to configure");
        }
        Value::Bool(updated)
    }

    fn add_node(&self, ui_id: &str, label: &str) -> PlayResult<Value> {
        self.net.add_host(label)?;
        Ok(obj([
            ("id", Value::Text(ui_id.to_string())),
            ("label", Value::Text(label.to_string())),
        ]))
    }

    fn del_node(&self, id: &str) -> PlayResult<Value> {
        self.net.del_node(id)?;
        info!(node = id, "node removed");
        Ok(Value::Bool(true))
    }
}

/// Parse `{latency?, loss?}` link options from a call argument.
fn link_opts(value: Option<&Value>) -> LinkOpts {
    let mut opts = LinkOpts::default();
    let Some(map) = value.and_then(|v| v.as_map()) else {
        return opts;
    };
    for (key, val) in map {
        match key.as_text() {
            Some("latency") => opts.latency = as_number(val),
            Some("loss") => opts.loss = as_number(val),
            _ => {}
        }
    }
    opts
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(i) => Some(i128::from(*i) as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

impl Executor for TopoExecutor {
    fn exposes(&self, fun: &str) -> bool {
        matches!(
            fun,
            funcs::GET_TOPO
                | funcs::ADD_LINK
                | funcs::DEL_LINK
                | funcs::UPD_LINK
                | funcs::ADD_NODE
                | funcs::DEL_NODE
        )
    }

    fn call(
        self: Arc<Self>,
        fun: &str,
        args: Vec<Value>,
    ) -> BoxFuture<'static, PlayResult<Option<Value>>> {
        let fun = fun.to_string();
        Box::pin(async move {
            match fun.as_str() {
                funcs::GET_TOPO => Ok(Some(self.get_topo())),
                funcs::ADD_LINK => {
                    let a = arg_str(&args, 0)?;
                    let b = arg_str(&args, 1)?;
                    let ui_id = arg_str(&args, 2)?;
                    let opts = link_opts(arg_value(&args, 3));
                    self.add_link(a, b, ui_id, opts).map(Some)
                }
                funcs::DEL_LINK => {
                    let a = arg_str(&args, 0)?;
                    let b = arg_str(&args, 1)?;
                    let link_id = arg_str(&args, 2)?;
                    Ok(Some(self.del_link(a, b, link_id)))
                }
                funcs::UPD_LINK => {
                    let a = arg_str(&args, 0)?;
                    let b = arg_str(&args, 1)?;
                    let link_id = arg_str(&args, 2)?;
                    let opts = link_opts(arg_value(&args, 3));
                    Ok(Some(self.upd_link(a, b, link_id, opts)))
                }
                funcs::ADD_NODE => {
                    let ui_id = arg_str(&args, 0)?;
                    let label = arg_str(&args, 1)?;
                    self.add_node(ui_id, label).map(Some)
                }
                funcs::DEL_NODE => {
                    let id = arg_str(&args, 0)?;
                    self.del_node(id).map(Some)
                }
                other => Err(netplay_core::PlayError::UnknownFunction(other.to_string())),
            }
        })
    }
}
