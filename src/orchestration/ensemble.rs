//! Runs a `Parallel` fan-out, then gates on how much the responses agree.

use crate::agent::AgentName;
use crate::error::CaxtonError;
use crate::message::Message;
use crate::runtime::Runtime;
use crate::voting::{self, Ballot, VoteOutcome, VotingStrategy};

/// Tuning knobs for [`call`].
#[derive(Debug, Clone)]
pub struct EnsembleOptions {
    /// How the participants' responses are reconciled into one winner.
    pub voting_strategy: VotingStrategy,
    /// Minimum fraction of participants that must agree with the winner.
    pub agreement_threshold: f64,
}

/// Invokes every target in `targets` with `input`, then votes over the
/// responses with `options.voting_strategy`. If the winner's agreement
/// fraction falls below `options.agreement_threshold`, returns
/// [`CaxtonError::ValidationGate`] without emitting a result — this is the
/// gating mechanism between workflow phases. Targets that error are simply
/// excluded from the ballot; an all-error fan-out surfaces as
/// [`voting::VotingError::NoResponses`] mapped to `CaxtonError`.
#[tracing::instrument(name = "orchestration.ensemble", skip(rt, input, options), fields(pattern = name))]
pub async fn call(
    name: &str,
    rt: &Runtime,
    targets: &[AgentName],
    input: Message,
    options: EnsembleOptions,
) -> Result<Message, CaxtonError> {
    let outcome = rt.call_parallel(targets, input).await;

    let mut ballots: Vec<Ballot> = outcome
        .results
        .into_iter()
        .map(|(target, response)| Ballot::new(target.to_string(), response))
        .collect();
    ballots.sort_by(|a, b| a.voter.cmp(&b.voter));

    let VoteOutcome { winner, agreement } = voting::vote(&ballots, &options.voting_strategy)?;

    if agreement < options.agreement_threshold {
        return Err(CaxtonError::ValidationGate {
            agreement,
            threshold: options.agreement_threshold,
        });
    }

    let mut result = Message::new(format!("{name}.result"), winner.payload);
    result
        .metadata
        .insert("agreement".to_string(), agreement.to_string());
    result
        .metadata
        .insert("participants".to_string(), ballots.len().to_string());
    Ok(result)
}
