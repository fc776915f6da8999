//! Fan a message out to several agents and merge (or fail fast on) the
//! results.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::agent::AgentName;
use crate::error::CaxtonError;
use crate::message::Message;
use crate::runtime::Runtime;

/// Tuning knobs for [`call`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ParallelOptions {
    /// Return the first observed error immediately instead of merging
    /// partial results.
    pub fail_fast: bool,
}

#[derive(Serialize)]
struct MergedOutput {
    results: BTreeMap<String, String>,
}

/// Invokes `targets` concurrently via `rt.call_parallel`, named `name` for
/// tracing. With `fail_fast`, the first error (by agent name, for
/// determinism) aborts the whole pattern; otherwise successes are merged
/// into one `Message` whose payload enumerates each contributor's output.
/// Per-target failures are omitted from the merge — callers that need to
/// observe partial failure should call `Runtime::call_parallel` directly.
#[tracing::instrument(name = "orchestration.parallel", skip(rt, input), fields(pattern = name))]
pub async fn call(
    name: &str,
    rt: &Runtime,
    targets: &[AgentName],
    input: Message,
    options: ParallelOptions,
) -> Result<Message, CaxtonError> {
    let outcome = rt.call_parallel(targets, input).await;

    if options.fail_fast {
        let mut failed: Vec<_> = outcome.errors.iter().collect();
        failed.sort_by_key(|(target, _)| target.to_string());
        if let Some((target, err)) = failed.into_iter().next() {
            return Err(CaxtonError::Execution(
                format!("{name}: {target} failed: {err}").into(),
            ));
        }
    }

    let merged = MergedOutput {
        results: outcome
            .results
            .iter()
            .map(|(target, msg)| (target.to_string(), msg.payload.clone()))
            .collect(),
    };
    let payload =
        serde_json::to_string(&merged).map_err(|e| CaxtonError::Execution(Box::new(e)))?;

    Ok(Message::new(format!("{name}.result"), payload))
}

#[cfg(test)]
pub(super) mod test_support {
    use std::sync::Arc;

    use async_trait::async_trait;

    use crate::agent::{Agent, AgentName};
    use crate::config::RuntimeConfig;
    use crate::error::CaxtonError;
    use crate::message::Message;
    use crate::runtime::Runtime;

    /// Echoes `input.payload` prefixed with its own name; fails outright
    /// when constructed with `fails: true`.
    pub struct Stub {
        name: AgentName,
        fails: bool,
    }

    impl Stub {
        pub fn ok(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: AgentName::try_new(name.to_string()).unwrap(),
                fails: false,
            })
        }

        pub fn failing(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: AgentName::try_new(name.to_string()).unwrap(),
                fails: true,
            })
        }
    }

    #[async_trait]
    impl Agent for Stub {
        fn name(&self) -> &AgentName {
            &self.name
        }

        fn role(&self) -> &str {
            "stub"
        }

        fn ready(&self) -> bool {
            true
        }

        async fn start(&self) -> Result<(), CaxtonError> {
            Ok(())
        }

        async fn execute(&self, input: Message) -> Result<Message, CaxtonError> {
            if self.fails {
                return Err(CaxtonError::Execution("boom".into()));
            }
            Ok(Message::new("reply", format!("{}:{}", self.name, input.payload)))
        }

        async fn stop(&self) -> Result<(), CaxtonError> {
            Ok(())
        }
    }

    pub async fn runtime_with(agents: Vec<Arc<Stub>>) -> Runtime {
        let rt = Runtime::new(RuntimeConfig::default());
        for agent in agents {
            rt.register(agent).unwrap();
        }
        rt.start().await.unwrap();
        rt
    }
}
