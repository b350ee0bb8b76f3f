use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Id of a roster member, as referenced by `Expense::paid_by` and `Expense::participants`.
pub type MemberId = String;
/// Id handed out by the identity provider, as referenced by `Group::members`.
pub type IdentityId = String;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Member {
    pub id: MemberId,
    pub name: String,
    /// Derived from the expense list on every read, never stored.
    pub balance: f64,
}

impl Member {
    pub fn new(id: impl Into<MemberId>, name: impl Into<String>) -> Self {
        Member {
            id: id.into(),
            name: name.into(),
            balance: 0.0,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum RosterError {
    #[error("the roster is empty")]
    Empty,
    #[error("roster member with an empty id")]
    EmptyId,
    #[error("member {0} appears more than once in the roster")]
    DuplicateMember(MemberId),
}

/// The fixed set of members that can pay for or share an expense.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Roster(Vec<Member>);

impl Roster {
    pub fn new(members: Vec<Member>) -> Result<Self, RosterError> {
        if members.is_empty() {
            return Err(RosterError::Empty);
        }
        let mut seen = HashSet::new();
        for member in &members {
            if member.id.is_empty() {
                return Err(RosterError::EmptyId);
            }
            if !seen.insert(member.id.as_str()) {
                return Err(RosterError::DuplicateMember(member.id.clone()));
            }
        }
        Ok(Roster(members))
    }

    pub fn members(&self) -> &[Member] {
        &self.0
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub name: String,
    pub created_by: IdentityId,
    pub members: Vec<IdentityId>,
    pub created_at: DateTime<Utc>,
}

impl Group {
    pub fn has_member(&self, identity: &str) -> bool {
        self.members.iter().any(|member| member == identity)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct NewGroup {
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub id: String,
    pub group_id: String,
    pub description: String,
    pub amount: f64,
    pub paid_by: MemberId,
    pub date: DateTime<Utc>,
    pub participants: Vec<MemberId>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewExpense {
    pub description: String,
    pub amount: f64,
    pub paid_by: MemberId,
    pub participants: Vec<MemberId>,
}

impl NewExpense {
    /// Builds the stored record; the store picks the id.
    pub fn into_expense(self, id: String, group_id: String, date: DateTime<Utc>) -> Expense {
        Expense {
            id,
            group_id,
            description: self.description,
            amount: self.amount,
            paid_by: self.paid_by,
            date,
            participants: self.participants,
        }
    }
}

/// Balances of every roster member for one group, plus what the group spent overall.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupBalance {
    pub group_id: String,
    pub total_spent: f64,
    pub members: Vec<Member>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roster_rejects_duplicates() {
        let members = vec![Member::new("x", "X"), Member::new("x", "Other X")];
        assert_eq!(
            Roster::new(members),
            Err(RosterError::DuplicateMember("x".to_string()))
        );
    }

    #[test]
    fn roster_rejects_empty() {
        assert_eq!(Roster::new(vec![]), Err(RosterError::Empty));
        assert_eq!(
            Roster::new(vec![Member::new("", "Nobody")]),
            Err(RosterError::EmptyId)
        );
    }

    #[test]
    fn expense_uses_camel_case_on_the_wire() {
        let expense = NewExpense {
            description: "Dinner".to_string(),
            amount: 120.0,
            paid_by: "x".to_string(),
            participants: vec!["x".to_string(), "y".to_string()],
        }
        .into_expense(
            "e1".to_string(),
            "g1".to_string(),
            "2024-03-01T12:00:00Z".parse().unwrap(),
        );

        let json = serde_json::to_value(&expense).unwrap();
        assert_eq!(json["groupId"], "g1");
        assert_eq!(json["paidBy"], "x");
        assert_eq!(json["date"], "2024-03-01T12:00:00Z");
        assert_eq!(json["participants"][1], "y");
    }
}
