//! Persistence for groups and expenses.
//!
//! Subscribers always receive the full current list, first right away and then
//! after every change that touches their filter.

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::auth::Identity;
use crate::schemas::{Expense, Group, NewExpense};

pub mod memory;
pub mod mongo;

pub use memory::InMemoryStore;
pub use mongo::MongoStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Mongo(#[from] mongodb::error::Error),
    #[error("group {0} does not exist")]
    GroupNotFound(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Called with the complete filtered list on every change.
pub type OnChange<T> = Box<dyn Fn(Vec<T>) + Send + Sync + 'static>;

pub trait Store: Send + Sync {
    fn create_group<'a>(
        &'a self,
        name: String,
        owner: &'a Identity,
    ) -> BoxFuture<'a, StoreResult<Group>>;

    fn create_expense<'a>(
        &'a self,
        group_id: &'a str,
        expense: NewExpense,
    ) -> BoxFuture<'a, StoreResult<Expense>>;

    fn get_group<'a>(&'a self, group_id: &'a str) -> BoxFuture<'a, StoreResult<Option<Group>>>;

    /// Groups whose members include `owner_id`.
    fn list_groups<'a>(&'a self, owner_id: &'a str) -> BoxFuture<'a, StoreResult<Vec<Group>>>;

    /// Expenses of a group, oldest first.
    fn list_expenses<'a>(&'a self, group_id: &'a str) -> BoxFuture<'a, StoreResult<Vec<Expense>>>;

    fn subscribe_groups<'a>(
        &'a self,
        owner_id: &'a str,
        on_change: OnChange<Group>,
    ) -> BoxFuture<'a, StoreResult<Subscription>>;

    fn subscribe_expenses<'a>(
        &'a self,
        group_id: &'a str,
        on_change: OnChange<Expense>,
    ) -> BoxFuture<'a, StoreResult<Subscription>>;
}

/// Keeps a subscription alive. Dropping it stops delivery.
#[derive(Debug)]
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    pub(crate) fn new(task: JoinHandle<()>) -> Self {
        Subscription { task }
    }

    pub fn unsubscribe(self) {
        drop(self);
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}
