//! Forwarding-state introspection for one host.

use crate::net::{run_capture, EmuNet};
use crate::socket::Executor;
use futures_util::future::BoxFuture;
use netplay_core::{arg_str, funcs, obj, PlayResult, Value};
use std::sync::Arc;

/// The status commands whose concatenated output makes up the report.
const STATUS_COMMANDS: [&[&str]; 2] = [&["nfdc", "status", "report"], &["ifconfig"]];

pub struct StateExecutor {
    net: Arc<dyn EmuNet>,
}

impl StateExecutor {
    pub fn new(net: Arc<dyn EmuNet>) -> Self {
        Self { net }
    }

    async fn get_fib(self: Arc<Self>, node_id: String) -> PlayResult<Option<Value>> {
        if !self.net.is_host(&node_id) {
            // A known non-host gets a descriptive inline value; an unknown
            // id gets nothing.
            if let Some(kind) = self.net.node_kind(&node_id) {
                return Ok(Some(obj([
                    ("id", Value::Text(node_id)),
                    (
                        "fib",
                        Value::Text(format!("Node is not a host ({})", kind.label())),
                    ),
                ])));
            }
            return Ok(None);
        }

        // The status commands block on subprocess output; keep them off
        // the shared scheduler.
        let this = self.clone();
        let host = node_id.clone();
        let report = tokio::task::spawn_blocking(move || -> PlayResult<String> {
            let mut sections = Vec::with_capacity(STATUS_COMMANDS.len());
            for cmd in STATUS_COMMANDS {
                sections.push(run_capture(this.net.as_ref(), &host, cmd[0], &cmd[1..])?);
            }
            Ok(sections.join("\n"))
        })
        .await
        .map_err(|e| netplay_core::PlayError::Other(format!("join error: {e}")))??;

        Ok(Some(obj([
            ("id", Value::Text(node_id)),
            ("fib", Value::Text(report)),
        ])))
    }
}

impl Executor for StateExecutor {
    fn exposes(&self, fun: &str) -> bool {
        fun == funcs::GET_FIB
    }

    fn call(
        self: Arc<Self>,
        fun: &str,
        args: Vec<Value>,
    ) -> BoxFuture<'static, PlayResult<Option<Value>>> {
        let fun = fun.to_string();
        Box::pin(async move {
            match fun.as_str() {
                funcs::GET_FIB => {
                    let node_id = arg_str(&args, 0)?.to_string();
                    self.get_fib(node_id).await
                }
                other => Err(netplay_core::PlayError::UnknownFunction(other.to_string())),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::LocalNet;

    fn executor() -> (tempfile::TempDir, Arc<StateExecutor>) {
        let dir = tempfile::tempdir().unwrap();
        let net = Arc::new(LocalNet::new(
            dir.path().join("hosts"),
            dir.path().to_path_buf(),
        ));
        net.add_host("h1").unwrap();
        net.add_switch("s1");
        (dir, Arc::new(StateExecutor::new(net)))
    }

    fn field<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
        value
            .as_map()?
            .iter()
            .find(|(k, _)| k.as_text() == Some(key))
            .map(|(_, v)| v)
    }

    #[tokio::test]
    async fn non_host_gets_inline_message() {
        let (_dir, exec) = executor();
        let result = exec
            .call(funcs::GET_FIB, vec![Value::Text("s1".into())])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(field(&result, "id").unwrap().as_text(), Some("s1"));
        assert_eq!(
            field(&result, "fib").unwrap().as_text(),
            Some("Node is not a host (Switch)")
        );
    }

    #[tokio::test]
    async fn unknown_id_gets_nothing() {
        let (_dir, exec) = executor();
        let result = exec
            .call(funcs::GET_FIB, vec![Value::Text("ghost".into())])
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
