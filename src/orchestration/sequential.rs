//! Threads a message through an ordered chain of agents, each step's
//! output becoming the next step's input.

use crate::agent::AgentName;
use crate::error::CaxtonError;
use crate::message::Message;
use crate::runtime::Runtime;

/// Invokes `steps` in order, passing the output of step *i* as the input
/// of step *i+1*. Any step failure aborts the chain and is returned
/// wrapped with the failing step's position and name.
#[tracing::instrument(name = "orchestration.sequential", skip(rt, input), fields(pattern = name, steps = steps.len()))]
pub async fn call(
    name: &str,
    rt: &Runtime,
    steps: &[AgentName],
    input: Message,
) -> Result<Message, CaxtonError> {
    let mut current = input;
    for (index, step) in steps.iter().enumerate() {
        current = rt.call(step, current).await.map_err(|err| {
            CaxtonError::Execution(
                format!("{name}: step {index} ({step}) failed: {err}").into(),
            )
        })?;
    }
    Ok(current)
}
