use bson::{doc, Document};
use chrono::Utc;
use futures::future::BoxFuture;
use futures::TryStreamExt;
use mongodb::options::FindOptions;
use mongodb::{Client, Collection, Database};
use tracing::{info, warn};
use uuid::Uuid;

use super::{OnChange, Store, StoreError, StoreResult, Subscription};
use crate::auth::Identity;
use crate::schemas::{Expense, Group, NewExpense};

/// Store backed by two MongoDB collections, `groups` and `expenses`.
///
/// Records are addressed by their own string `id`, not by `_id`.
/// Subscriptions rely on change streams, so the server has to run as a replica set.
#[derive(Clone)]
pub struct MongoStore {
    groups: Collection<Group>,
    expenses: Collection<Expense>,
}

impl MongoStore {
    pub async fn connect(uri: &str, database: &str) -> StoreResult<Self> {
        let client = Client::with_uri_str(uri).await?;
        info!(database, "connected to MongoDB");
        Ok(Self::new(&client.database(database)))
    }

    pub fn new(database: &Database) -> Self {
        MongoStore {
            groups: database.collection("groups"),
            expenses: database.collection("expenses"),
        }
    }
}

async fn find_all<T>(collection: &Collection<T>, filter: Document) -> StoreResult<Vec<T>>
where
    T: serde::de::DeserializeOwned + Unpin + Send + Sync,
{
    let options = FindOptions::builder().sort(doc! { "_id": 1 }).build();
    let cursor = collection.find(filter, options).await?;
    Ok(cursor.try_collect().await?)
}

/// Opens a change stream for `filter` and re-reads the full list on every event.
async fn watch<T>(
    collection: Collection<T>,
    filter: Document,
    on_change: OnChange<T>,
) -> StoreResult<Subscription>
where
    T: serde::de::DeserializeOwned + Unpin + Send + Sync + 'static,
{
    // Records are never updated or deleted, inserts are the only changes.
    let mut matched = doc! { "operationType": "insert" };
    for (key, value) in filter.iter() {
        matched.insert(format!("fullDocument.{key}"), value.clone());
    }
    let pipeline = [doc! { "$match": matched }];
    let mut stream = collection.watch(pipeline, None).await?;
    on_change(find_all(&collection, filter.clone()).await?);

    let task = tokio::spawn(async move {
        loop {
            match stream.try_next().await {
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(err) => {
                    warn!(
                        %err,
                        collection = collection.name(),
                        "change stream failed, subscription ended"
                    );
                    break;
                }
            }
            match find_all(&collection, filter.clone()).await {
                Ok(snapshot) => on_change(snapshot),
                Err(err) => warn!(
                    %err,
                    collection = collection.name(),
                    "could not reload after change"
                ),
            }
        }
    });
    Ok(Subscription::new(task))
}

impl Store for MongoStore {
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
            self.groups.insert_one(&group, None).await?;
            info!(group_id = %group.id, owner = %owner.id, "group created");
            Ok(group)
        })
    }

    fn create_expense<'a>(
        &'a self,
        group_id: &'a str,
        expense: NewExpense,
    ) -> BoxFuture<'a, StoreResult<Expense>> {
        Box::pin(async move {
            if self.get_group(group_id).await?.is_none() {
                return Err(StoreError::GroupNotFound(group_id.to_string()));
            }
            let expense = expense.into_expense(
                Uuid::new_v4().to_string(),
                group_id.to_string(),
                Utc::now(),
            );
            self.expenses.insert_one(&expense, None).await?;
            info!(expense_id = %expense.id, group_id, amount = expense.amount, "expense created");
            Ok(expense)
        })
    }

    fn get_group<'a>(&'a self, group_id: &'a str) -> BoxFuture<'a, StoreResult<Option<Group>>> {
        Box::pin(async move { Ok(self.groups.find_one(doc! { "id": group_id }, None).await?) })
    }

    fn list_groups<'a>(&'a self, owner_id: &'a str) -> BoxFuture<'a, StoreResult<Vec<Group>>> {
        Box::pin(find_all(&self.groups, doc! { "members": owner_id }))
    }

    fn list_expenses<'a>(&'a self, group_id: &'a str) -> BoxFuture<'a, StoreResult<Vec<Expense>>> {
        Box::pin(find_all(&self.expenses, doc! { "groupId": group_id }))
    }

    fn subscribe_groups<'a>(
        &'a self,
        owner_id: &'a str,
        on_change: OnChange<Group>,
    ) -> BoxFuture<'a, StoreResult<Subscription>> {
        Box::pin(watch(
            self.groups.clone(),
            doc! { "members": owner_id },
            on_change,
        ))
    }

    fn subscribe_expenses<'a>(
        &'a self,
        group_id: &'a str,
        on_change: OnChange<Expense>,
    ) -> BoxFuture<'a, StoreResult<Subscription>> {
        Box::pin(watch(
            self.expenses.clone(),
            doc! { "groupId": group_id },
            on_change,
        ))
    }
}
