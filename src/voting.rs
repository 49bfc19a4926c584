use crate::error::{EvalError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

//-----------------------------------------------------------------------------
// Voting
//-----------------------------------------------------------------------------

/// Rule turning the binary votes of a group of models into one decision.
///
/// The declaration order is the fixed order in which rules are evaluated and
/// reported, and `Ord` follows it.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VotingRule {
    /// 1ooN: flag as soon as one member flags
    #[serde(rename = "1ooN")]
    AtLeastOne,
    /// Flag when at least half of the members flag; an exact half-split is flagged
    Majority,
    /// NooN: flag only when every member flags
    #[serde(rename = "NooN")]
    Unanimous,
}

impl VotingRule {
    /// Every rule, in evaluation order
    pub const ALL: [VotingRule; 3] = [VotingRule::AtLeastOne, VotingRule::Majority, VotingRule::Unanimous];

    /// Short name used in reports
    pub fn name(&self) -> &'static str {
        match self {
            VotingRule::AtLeastOne => "1ooN",
            VotingRule::Majority => "Majority",
            VotingRule::Unanimous => "NooN",
        }
    }

    /// Decision for one sample given its positive vote count among `members` voters
    pub fn decide(&self, votes: usize, members: usize) -> u8 {
        let flagged = match self {
            VotingRule::AtLeastOne => votes >= 1,
            // real-valued half: with an even group a 50/50 split is flagged as fraud
            VotingRule::Majority => votes as f64 >= members as f64 / 2.0,
            VotingRule::Unanimous => votes == members,
        };
        flagged as u8
    }

    /// Applies the rule to per-sample vote counts
    pub fn apply_to_votes(&self, votes: &[usize], members: usize) -> Vec<u8> {
        votes.iter().map(|&v| self.decide(v, members)).collect()
    }
}

impl fmt::Display for VotingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-sample number of members predicting the positive class
///
/// # Errors
///
/// * `EmptyCombination` if `members` is empty
/// * `DimensionMismatch` if members do not all have the same length
pub fn count_votes(members: &[&[u8]]) -> Result<Vec<usize>> {
    let first = members.first().ok_or(EvalError::EmptyCombination)?;
    let mut votes = vec![0usize; first.len()];

    for (member_idx, member) in members.iter().enumerate() {
        if member.len() != votes.len() {
            return Err(EvalError::mismatch(
                format!("voting member #{}", member_idx),
                votes.len(),
                member.len(),
            ));
        }
        for (vote, &prediction) in votes.iter_mut().zip(member.iter()) {
            *vote += (prediction == 1) as usize;
        }
    }

    Ok(votes)
}

/// Combines member predictions into a single ensemble prediction
///
/// # Examples
///
/// ```
/// # use fraudvote::voting::{apply_rule, VotingRule};
/// let m1: &[u8] = &[1, 0, 1, 0];
/// let m3: &[u8] = &[0, 1, 1, 0];
/// assert_eq!(apply_rule(&[m1, m3], VotingRule::AtLeastOne).unwrap(), vec![1, 1, 1, 0]);
/// assert_eq!(apply_rule(&[m1, m3], VotingRule::Unanimous).unwrap(), vec![0, 0, 1, 0]);
/// ```
pub fn apply_rule(members: &[&[u8]], rule: VotingRule) -> Result<Vec<u8>> {
    let votes = count_votes(members)?;
    Ok(rule.apply_to_votes(&votes, members.len()))
}
