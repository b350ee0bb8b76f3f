use std::collections::{HashMap, HashSet};

use thiserror::Error;
use tracing::debug;

use crate::schemas::{Expense, GroupBalance, Member, MemberId};

#[derive(Clone, Debug, Error, PartialEq)]
pub enum InvalidReason {
    #[error("it has no participants")]
    NoParticipants,
    #[error("its amount is not a finite number")]
    NonFiniteAmount,
    #[error("its amount is negative")]
    NegativeAmount,
    #[error("participant {0} is listed more than once")]
    DuplicateParticipant(MemberId),
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum BalanceError {
    #[error("expense {expense_id} is invalid: {reason}")]
    InvalidExpense {
        expense_id: String,
        reason: InvalidReason,
    },
    #[error("expense {expense_id} references unknown member {member_id}")]
    UnknownMember {
        expense_id: String,
        member_id: MemberId,
    },
}

impl Expense {
    /// What each participant owes for this expense.
    pub fn share(&self) -> f64 {
        self.amount / self.participants.len() as f64
    }
}

/// Checks an expense against the roster before any balance is touched.
pub fn validate_expense(roster: &[Member], expense: &Expense) -> Result<(), BalanceError> {
    let invalid = |reason| BalanceError::InvalidExpense {
        expense_id: expense.id.clone(),
        reason,
    };
    if expense.participants.is_empty() {
        return Err(invalid(InvalidReason::NoParticipants));
    }
    if !expense.amount.is_finite() {
        return Err(invalid(InvalidReason::NonFiniteAmount));
    }
    if expense.amount < 0.0 {
        return Err(invalid(InvalidReason::NegativeAmount));
    }

    let known: HashSet<&str> = roster.iter().map(|member| member.id.as_str()).collect();
    let unknown = |member_id: &MemberId| BalanceError::UnknownMember {
        expense_id: expense.id.clone(),
        member_id: member_id.clone(),
    };
    if !known.contains(expense.paid_by.as_str()) {
        return Err(unknown(&expense.paid_by));
    }
    let mut seen = HashSet::new();
    for participant in &expense.participants {
        if !known.contains(participant.as_str()) {
            return Err(unknown(participant));
        }
        if !seen.insert(participant.as_str()) {
            return Err(invalid(InvalidReason::DuplicateParticipant(
                participant.clone(),
            )));
        }
    }
    Ok(())
}

/// Computes every roster member's net balance from the full expense list.
///
/// The result keeps the roster's order and fields, only `balance` changes and
/// it always starts from zero. Positive means the member is owed money.
/// All expenses are validated first, so an error never leaves a partial result.
pub fn compute_balances(
    roster: &[Member],
    expenses: &[Expense],
) -> Result<Vec<Member>, BalanceError> {
    for expense in expenses {
        validate_expense(roster, expense)?;
    }

    let mut balance: HashMap<&str, f64> = roster
        .iter()
        .map(|member| (member.id.as_str(), 0.0))
        .collect();

    for expense in expenses {
        let share = expense.share();
        let payer_participates = expense.participants.contains(&expense.paid_by);
        let credit = expense.amount - if payer_participates { share } else { 0.0 };
        balance
            .entry(expense.paid_by.as_str())
            .and_modify(|v| *v += credit);

        for participant in &expense.participants {
            if *participant == expense.paid_by {
                continue;
            }
            balance
                .entry(participant.as_str())
                .and_modify(|v| *v -= share);
        }
    }

    debug!(
        members = roster.len(),
        expenses = expenses.len(),
        "recomputed balances"
    );

    Ok(roster
        .iter()
        .map(|member| Member {
            balance: balance.get(member.id.as_str()).copied().unwrap_or_default(),
            ..member.clone()
        })
        .collect())
}

pub fn total_spent(expenses: &[Expense]) -> f64 {
    expenses.iter().map(|expense| expense.amount).sum()
}

impl GroupBalance {
    pub fn compute(
        group_id: impl Into<String>,
        roster: &[Member],
        expenses: &[Expense],
    ) -> Result<Self, BalanceError> {
        Ok(GroupBalance {
            group_id: group_id.into(),
            total_spent: total_spent(expenses),
            members: compute_balances(roster, expenses)?,
        })
    }
}
