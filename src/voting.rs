//! Deterministic voting strategies for combining multiple agents' responses
//! into one ensemble answer. Every strategy here is pure and makes no
//! network calls: given the same set of responses it always returns the
//! same winner.

use std::collections::HashMap;

use crate::message::Message;

/// Errors raised while tallying a vote.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum VotingError {
    /// `vote` was called with no candidate responses.
    #[error("no responses to vote over")]
    NoResponses,

    /// `Weighted` was used with a weight map missing an agent that voted.
    #[error("no weight provided for voter {0}")]
    MissingWeight(String),

    /// `Unanimous` found disagreement among the responses.
    #[error("responses are not unanimous: {0} distinct answers")]
    NotUnanimous(usize),
}

/// Result alias for voting operations.
pub type VotingResult<T> = Result<T, VotingError>;

/// One agent's response to a ballot: the message it produced and, for
/// strategies that use it, the agent's confidence in the answer (`None` is
/// treated as `0.5`, per the default used for agents that don't report
/// one).
#[derive(Debug, Clone)]
pub struct Ballot {
    /// Name of the agent that cast this vote.
    pub voter: String,
    /// The agent's answer.
    pub response: Message,
    /// Self-reported confidence in `[0.0, 1.0]`, if the agent provides one.
    pub confidence: Option<f64>,
}

impl Ballot {
    /// Creates a ballot with no reported confidence.
    #[must_use]
    pub fn new(voter: impl Into<String>, response: Message) -> Self {
        Self {
            voter: voter.into(),
            response,
            confidence: None,
        }
    }

    /// Creates a ballot with an explicit confidence.
    #[must_use]
    pub fn with_confidence(voter: impl Into<String>, response: Message, confidence: f64) -> Self {
        Self {
            voter: voter.into(),
            response,
            confidence: Some(confidence),
        }
    }

    fn confidence_or_default(&self) -> f64 {
        self.confidence.unwrap_or(0.5)
    }
}

/// The outcome of tallying a vote.
#[derive(Debug, Clone, PartialEq)]
pub struct VoteOutcome {
    /// The winning message.
    pub winner: Message,
    /// Fraction of ballots (by count, or by weight for `Weighted`) that
    /// agreed with `winner`.
    pub agreement: f64,
}

/// A strategy for resolving a set of ballots into one outcome.
#[derive(Debug, Clone)]
pub enum VotingStrategy {
    /// The answer with the most votes wins; ties break alphabetically by
    /// normalized content.
    Majority,
    /// Every ballot must agree, or the vote fails.
    Unanimous,
    /// Votes are weighted by a per-voter weight map; the answer with the
    /// highest total weight wins.
    Weighted(HashMap<String, f64>),
    /// The single ballot with the highest confidence wins outright; ties
    /// break alphabetically by voter name, independent of content.
    HighestConfidence,
}

/// Collapses whitespace runs and trims, so that semantically identical
/// answers that differ only in incidental formatting are treated as the
/// same vote.
fn normalize(payload: &str) -> String {
    payload.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn group_by_normalized(ballots: &[Ballot]) -> HashMap<String, Vec<&Ballot>> {
    let mut groups: HashMap<String, Vec<&Ballot>> = HashMap::new();
    for ballot in ballots {
        groups
            .entry(normalize(&ballot.response.payload))
            .or_default()
            .push(ballot);
    }
    groups
}

/// Picks the alphabetically-first normalized key among ties, for
/// deterministic tie-breaking.
fn alphabetical_winner<'a>(keys: impl Iterator<Item = &'a String>) -> &'a str {
    keys.min().map(String::as_str).unwrap_or_default()
}

/// Tallies `ballots` according to `strategy`.
pub fn vote(ballots: &[Ballot], strategy: &VotingStrategy) -> VotingResult<VoteOutcome> {
    if ballots.is_empty() {
        return Err(VotingError::NoResponses);
    }

    match strategy {
        VotingStrategy::Majority => majority(ballots),
        VotingStrategy::Unanimous => unanimous(ballots),
        VotingStrategy::Weighted(weights) => weighted(ballots, weights),
        VotingStrategy::HighestConfidence => highest_confidence(ballots),
    }
}

fn majority(ballots: &[Ballot]) -> VotingResult<VoteOutcome> {
    let groups = group_by_normalized(ballots);
    let total = ballots.len() as f64;

    let max_count = groups.values().map(Vec::len).max().unwrap_or(0);
    let winning_keys: Vec<&String> = groups
        .iter()
        .filter(|(_, v)| v.len() == max_count)
        .map(|(k, _)| k)
        .collect();

    let winning_key = alphabetical_winner(winning_keys.into_iter());
    let group = &groups[winning_key];

    Ok(VoteOutcome {
        winner: group[0].response.clone(),
        agreement: group.len() as f64 / total,
    })
}

fn unanimous(ballots: &[Ballot]) -> VotingResult<VoteOutcome> {
    let groups = group_by_normalized(ballots);
    if groups.len() != 1 {
        return Err(VotingError::NotUnanimous(groups.len()));
    }
    Ok(VoteOutcome {
        winner: ballots[0].response.clone(),
        agreement: 1.0,
    })
}

fn weighted(ballots: &[Ballot], weights: &HashMap<String, f64>) -> VotingResult<VoteOutcome> {
    for ballot in ballots {
        if !weights.contains_key(&ballot.voter) {
            return Err(VotingError::MissingWeight(ballot.voter.clone()));
        }
    }

    let groups = group_by_normalized(ballots);
    let total_weight: f64 = ballots.iter().map(|b| weights[&b.voter]).sum();

    let mut tallies: HashMap<&String, f64> = HashMap::new();
    for (key, group) in &groups {
        let weight: f64 = group.iter().map(|b| weights[&b.voter]).sum();
        tallies.insert(key, weight);
    }

    let max_weight = tallies.values().copied().fold(f64::MIN, f64::max);
    let winning_keys: Vec<&String> = tallies
        .iter()
        .filter(|(_, w)| (**w - max_weight).abs() < f64::EPSILON)
        .map(|(k, _)| *k)
        .collect();

    let winning_key = alphabetical_winner(winning_keys.into_iter());
    let group = &groups[winning_key];

    Ok(VoteOutcome {
        winner: group[0].response.clone(),
        agreement: if total_weight > 0.0 {
            tallies[&winning_key.to_string()] / total_weight
        } else {
            0.0
        },
    })
}

fn highest_confidence(ballots: &[Ballot]) -> VotingResult<VoteOutcome> {
    let max_confidence = ballots
        .iter()
        .map(Ballot::confidence_or_default)
        .fold(f64::MIN, f64::max);

    let winner = ballots
        .iter()
        .filter(|b| (b.confidence_or_default() - max_confidence).abs() < f64::EPSILON)
        .min_by(|a, b| a.voter.cmp(&b.voter))
        .expect("ballots is non-empty, checked in vote()");

    let groups = group_by_normalized(ballots);
    let winning_key = normalize(&winner.response.payload);
    let group = &groups[&winning_key];
    let total = ballots.len() as f64;

    Ok(VoteOutcome {
        winner: winner.response.clone(),
        agreement: group.len() as f64 / total,
    })
}
