use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use super::{OnChange, Store, StoreError, StoreResult, Subscription};
use crate::auth::Identity;
use crate::schemas::{Expense, Group, NewExpense};

#[derive(Clone, Debug)]
enum Change {
    Group { members: Vec<String> },
    Expense { group_id: String },
}

#[derive(Debug, Default)]
struct State {
    groups: Vec<Group>,
    expenses: Vec<Expense>,
}

impl State {
    fn groups_of(&self, owner_id: &str) -> Vec<Group> {
        self.groups
            .iter()
            .filter(|group| group.has_member(owner_id))
            .cloned()
            .collect()
    }

    fn expenses_of(&self, group_id: &str) -> Vec<Expense> {
        self.expenses
            .iter()
            .filter(|expense| expense.group_id == group_id)
            .cloned()
            .collect()
    }
}

/// Process-local store, used when no database is configured and in tests.
#[derive(Debug)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
    changes: broadcast::Sender<Change>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(256);
        InMemoryStore {
            state: Arc::new(RwLock::new(State::default())),
            changes,
        }
    }

    fn notify(&self, change: Change) {
        // No receivers just means nobody is subscribed.
        let _ = self.changes.send(change);
    }
}

impl Store for InMemoryStore {
    fn create_group<'a>(
        &'a self,
        name: String,
        owner: &'a Identity,
    ) -> BoxFuture<'a, StoreResult<Group>> {
        Box::pin(async move {
            let group = Group {
                id: Uuid::new_v4().to_string(),
                name,
                created_by: owner.id.clone(),
                members: vec![owner.id.clone()],
                created_at: Utc::now(),
            };
            self.state.write().await.groups.push(group.clone());
            info!(group_id = %group.id, owner = %owner.id, "group created");
            self.notify(Change::Group {
                members: group.members.clone(),
            });
            Ok(group)
        })
    }

    fn create_expense<'a>(
        &'a self,
        group_id: &'a str,
        expense: NewExpense,
    ) -> BoxFuture<'a, StoreResult<Expense>> {
        Box::pin(async move {
            let expense = {
                let mut state = self.state.write().await;
                if !state.groups.iter().any(|group| group.id == group_id) {
                    return Err(StoreError::GroupNotFound(group_id.to_string()));
                }
                let expense = expense.into_expense(
                    Uuid::new_v4().to_string(),
                    group_id.to_string(),
                    Utc::now(),
                );
                state.expenses.push(expense.clone());
                expense
            };
            info!(expense_id = %expense.id, group_id, amount = expense.amount, "expense created");
            self.notify(Change::Expense {
                group_id: group_id.to_string(),
            });
            Ok(expense)
        })
    }

    fn get_group<'a>(&'a self, group_id: &'a str) -> BoxFuture<'a, StoreResult<Option<Group>>> {
        Box::pin(async move {
            let state = self.state.read().await;
            Ok(state.groups.iter().find(|group| group.id == group_id).cloned())
        })
    }

    fn list_groups<'a>(&'a self, owner_id: &'a str) -> BoxFuture<'a, StoreResult<Vec<Group>>> {
        Box::pin(async move { Ok(self.state.read().await.groups_of(owner_id)) })
    }

    fn list_expenses<'a>(&'a self, group_id: &'a str) -> BoxFuture<'a, StoreResult<Vec<Expense>>> {
        Box::pin(async move { Ok(self.state.read().await.expenses_of(group_id)) })
    }

    fn subscribe_groups<'a>(
        &'a self,
        owner_id: &'a str,
        on_change: OnChange<Group>,
    ) -> BoxFuture<'a, StoreResult<Subscription>> {
        Box::pin(async move {
            let mut changes = self.changes.subscribe();
            let state = Arc::clone(&self.state);
            let owner_id = owner_id.to_string();

            let snapshot = state.read().await.groups_of(&owner_id);
            on_change(snapshot);

            let task = tokio::spawn(async move {
                loop {
                    match changes.recv().await {
                        Ok(Change::Group { members }) if members.contains(&owner_id) => {}
                        Ok(_) => continue,
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(skipped, "group subscriber lagged, resending snapshot");
                        }
                        Err(RecvError::Closed) => break,
                    }
                    let snapshot = state.read().await.groups_of(&owner_id);
                    on_change(snapshot);
                }
            });
            Ok(Subscription::new(task))
        })
    }

    fn subscribe_expenses<'a>(
        &'a self,
        group_id: &'a str,
        on_change: OnChange<Expense>,
    ) -> BoxFuture<'a, StoreResult<Subscription>> {
        Box::pin(async move {
            let mut changes = self.changes.subscribe();
            let state = Arc::clone(&self.state);
            let group_id = group_id.to_string();

            let snapshot = state.read().await.expenses_of(&group_id);
            on_change(snapshot);

            let task = tokio::spawn(async move {
                loop {
                    match changes.recv().await {
                        Ok(Change::Expense { group_id: changed }) if changed == group_id => {}
                        Ok(_) => continue,
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(skipped, "expense subscriber lagged, resending snapshot");
                        }
                        Err(RecvError::Closed) => break,
                    }
                    let snapshot = state.read().await.expenses_of(&group_id);
                    on_change(snapshot);
                }
            });
            Ok(Subscription::new(task))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn identity(id: &str) -> Identity {
        Identity {
            id: id.to_string(),
            username: Some(format!("user_{id}")),
        }
    }

    fn new_expense(amount: f64) -> NewExpense {
        NewExpense {
            description: "Groceries".to_string(),
            amount,
            paid_by: "x".to_string(),
            participants: vec!["x".to_string(), "y".to_string()],
        }
    }

    async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for a snapshot")
            .expect("subscription closed")
    }

    #[tokio::test]
    async fn groups_are_listed_for_their_members_only() {
        let store = InMemoryStore::new();
        let alice = identity("1");
        let bob = identity("2");

        let trip = store.create_group("Trip".to_string(), &alice).await.unwrap();
        store.create_group("Flat".to_string(), &bob).await.unwrap();

        assert_eq!(trip.created_by, "1");
        assert_eq!(trip.members, vec!["1".to_string()]);
        assert_eq!(store.list_groups("1").await.unwrap(), vec![trip.clone()]);
        assert_eq!(store.get_group(&trip.id).await.unwrap(), Some(trip));
        assert_eq!(store.get_group("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expenses_need_an_existing_group() {
        let store = InMemoryStore::new();
        let err = store.create_expense("missing", new_expense(10.0)).await.unwrap_err();
        assert!(matches!(err, StoreError::GroupNotFound(id) if id == "missing"));
    }

    #[tokio::test]
    async fn expenses_are_scoped_to_their_group_in_creation_order() {
        let store = InMemoryStore::new();
        let owner = identity("1");
        let a = store.create_group("A".to_string(), &owner).await.unwrap();
        let b = store.create_group("B".to_string(), &owner).await.unwrap();

        let first = store.create_expense(&a.id, new_expense(10.0)).await.unwrap();
        store.create_expense(&b.id, new_expense(99.0)).await.unwrap();
        let second = store.create_expense(&a.id, new_expense(20.0)).await.unwrap();

        assert_eq!(first.group_id, a.id);
        assert_ne!(first.id, second.id);
        assert_eq!(store.list_expenses(&a.id).await.unwrap(), vec![first, second]);
    }

    #[tokio::test]
    async fn expense_subscription_pushes_full_lists() {
        let store = InMemoryStore::new();
        let owner = identity("1");
        let group = store.create_group("Trip".to_string(), &owner).await.unwrap();
        let other = store.create_group("Other".to_string(), &owner).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = store
            .subscribe_expenses(
                &group.id,
                Box::new(move |expenses: Vec<Expense>| {
                    let _ = tx.send(expenses);
                }),
            )
            .await
            .unwrap();

        assert!(next(&mut rx).await.is_empty());

        store.create_expense(&other.id, new_expense(5.0)).await.unwrap();
        store.create_expense(&group.id, new_expense(10.0)).await.unwrap();
        assert_eq!(next(&mut rx).await.len(), 1);

        store.create_expense(&group.id, new_expense(20.0)).await.unwrap();
        let amounts: Vec<f64> = next(&mut rx).await.iter().map(|e| e.amount).collect();
        assert_eq!(amounts, vec![10.0, 20.0]);

        assert!(subscription.is_active());
        subscription.unsubscribe();
        store.create_expense(&group.id, new_expense(30.0)).await.unwrap();
        assert!(
            tokio::time::timeout(Duration::from_millis(100), rx.recv())
                .await
                .map_or(true, |msg| msg.is_none())
        );
    }

    #[tokio::test]
    async fn group_subscription_ignores_other_owners() {
        let store = InMemoryStore::new();
        let alice = identity("1");
        let bob = identity("2");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _subscription = store
            .subscribe_groups(
                "1",
                Box::new(move |groups: Vec<Group>| {
                    let _ = tx.send(groups);
                }),
            )
            .await
            .unwrap();
        assert!(next(&mut rx).await.is_empty());

        store.create_group("Bob's".to_string(), &bob).await.unwrap();
        store.create_group("Alice's".to_string(), &alice).await.unwrap();

        let groups = next(&mut rx).await;
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "Alice's");
    }
}
