//! Classifies a message, then dispatches it to whichever agent the
//! classification maps to.

use std::collections::HashMap;

use crate::agent::AgentName;
use crate::error::CaxtonError;
use crate::message::Message;
use crate::runtime::Runtime;

/// Tuning knobs for [`call`].
#[derive(Debug, Clone)]
pub struct RouterOptions {
    /// Metadata key the classifier's response carries its label under.
    pub label_key: String,
    /// Target used when the label is absent from `routing_table` and no
    /// fallback is configured.
    pub default_target: Option<AgentName>,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            label_key: "label".to_string(),
            default_target: None,
        }
    }
}

/// Invokes `classifier` with `input`, reads a label out of its response
/// payload (parsed as a JSON object, by agreement with the classifier
/// agent), looks the label up in `routing_table`, and invokes the resolved
/// target with the *original* `input` (not the classifier's response). An
/// unknown label falls back to `options.default_target` or fails with
/// [`CaxtonError::Unrouted`].
#[tracing::instrument(name = "orchestration.router", skip(rt, input, routing_table, options), fields(pattern = name))]
pub async fn call(
    name: &str,
    rt: &Runtime,
    classifier: &AgentName,
    routing_table: &HashMap<String, AgentName>,
    input: Message,
    options: RouterOptions,
) -> Result<Message, CaxtonError> {
    let classification = rt.call(classifier, input.clone()).await?;

    let label = serde_json::from_str::<serde_json::Value>(&classification.payload)
        .ok()
        .and_then(|value| value.get(&options.label_key).and_then(|v| v.as_str().map(str::to_string)));

    let target = label
        .as_deref()
        .and_then(|label| routing_table.get(label))
        .or(options.default_target.as_ref())
        .cloned()
        .ok_or_else(|| {
            CaxtonError::Unrouted(label.unwrap_or_else(|| format!("{name}: no label")))
        })?;

    rt.call(&target, input).await
}
