use std::convert::Infallible;
use std::time::Duration;

use actix_web::{get, post, web, HttpRequest, HttpResponse, Responder};
use actix_web_lab::sse::{self, Sse};
use chrono::Utc;
use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::info;

use crate::auth::{Identity, TelegramAuth};
use crate::balance::validate_expense;
use crate::error::ApiError;
use crate::schemas::{Expense, Group, GroupBalance, NewExpense, NewGroup, Roster};
use crate::store::{OnChange, Store, Subscription};

/// Settings shared by the event-stream routes.
#[derive(Clone, Debug)]
pub struct FeedSettings {
    pub keep_alive: Duration,
}

/// Registers every route. The app must provide `Data<dyn Store>`, `Data<Roster>`,
/// `Data<TelegramAuth>` and `Data<FeedSettings>`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(get_roster)
        .service(add_group)
        .service(list_groups)
        .service(stream_groups)
        .service(add_expense)
        .service(list_expenses)
        .service(get_balance)
        .service(stream_balance);
}

fn caller(request: &HttpRequest, auth: &TelegramAuth) -> Result<Identity, ApiError> {
    auth.current_user(request).ok_or(ApiError::Unauthorized)
}

/// Loads a group the caller belongs to.
async fn member_group(
    store: &dyn Store,
    group_id: &str,
    identity: &Identity,
) -> Result<Group, ApiError> {
    let group = store
        .get_group(group_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(group_id.to_string()))?;
    if !group.has_member(&identity.id) {
        return Err(ApiError::Forbidden(group_id.to_string()));
    }
    Ok(group)
}

fn check_new_expense(roster: &Roster, expense: &NewExpense) -> Result<(), ApiError> {
    if expense.description.trim().is_empty() {
        return Err(ApiError::Validation("description must not be empty".to_string()));
    }
    if expense.amount.is_nan() || expense.amount <= 0.0 {
        return Err(ApiError::Validation("amount must be greater than zero".to_string()));
    }
    let draft = expense
        .clone()
        .into_expense("<new>".to_string(), String::new(), Utc::now());
    validate_expense(roster.members(), &draft)?;
    Ok(())
}

/// Store callback paired with a stream of the snapshots it receives. Only the newest
/// snapshot is held, a slow reader skips the ones it missed.
fn latest_snapshot<T>() -> (OnChange<T>, WatchStream<Vec<T>>)
where
    T: Clone + Send + Sync + 'static,
{
    let (tx, rx) = watch::channel(Vec::new());
    let on_change: OnChange<T> = Box::new(move |snapshot: Vec<T>| {
        tx.send_replace(snapshot);
    });
    (on_change, WatchStream::from_changes(rx))
}

fn json_event<T: Serialize>(payload: &T) -> sse::Event {
    match sse::Data::new_json(payload) {
        Ok(data) => sse::Event::Data(data),
        Err(err) => error_event(&err.to_string()),
    }
}

fn error_event(message: &str) -> sse::Event {
    let body = serde_json::json!({ "message": message }).to_string();
    sse::Event::Data(sse::Data::new(body).event("error"))
}

/// Event-stream response that owns `subscription` until the client goes away.
fn feed<S>(
    events: S,
    subscription: Subscription,
    settings: &FeedSettings,
) -> Sse<impl Stream<Item = Result<sse::Event, Infallible>>>
where
    S: Stream<Item = sse::Event> + Unpin + 'static,
{
    let events = futures::stream::unfold(
        (events, subscription),
        |(mut events, subscription)| async move {
            let event = events.next().await?;
            Some((Ok(event), (events, subscription)))
        },
    );
    Sse::from_stream(events).with_keep_alive(settings.keep_alive)
}

#[get("/roster")]
async fn get_roster(roster: web::Data<Roster>) -> HttpResponse {
    HttpResponse::Ok().json(roster.members())
}

#[post("/groups")]
async fn add_group(
    request: HttpRequest,
    store: web::Data<dyn Store>,
    auth: web::Data<TelegramAuth>,
    json: web::Json<NewGroup>,
) -> Result<HttpResponse, ApiError> {
    let identity = caller(&request, &auth)?;
    let name = json.into_inner().name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::Validation("group name must not be empty".to_string()));
    }
    let group = store.create_group(name, &identity).await?;
    Ok(HttpResponse::Created().json(group))
}

#[get("/groups")]
async fn list_groups(
    request: HttpRequest,
    store: web::Data<dyn Store>,
    auth: web::Data<TelegramAuth>,
) -> Result<HttpResponse, ApiError> {
    let identity = caller(&request, &auth)?;
    Ok(HttpResponse::Ok().json(store.list_groups(&identity.id).await?))
}

#[get("/groups/stream")]
async fn stream_groups(
    request: HttpRequest,
    store: web::Data<dyn Store>,
    auth: web::Data<TelegramAuth>,
    settings: web::Data<FeedSettings>,
) -> Result<impl Responder, ApiError> {
    let identity = caller(&request, &auth)?;
    let (on_change, snapshots) = latest_snapshot::<Group>();
    let subscription = store.subscribe_groups(&identity.id, on_change).await?;
    info!(user = %identity.id, "group feed opened");

    let events = snapshots.map(|groups| json_event(&groups));
    Ok(feed(events, subscription, &settings))
}

#[post("/groups/{id}/expenses")]
async fn add_expense(
    request: HttpRequest,
    store: web::Data<dyn Store>,
    roster: web::Data<Roster>,
    auth: web::Data<TelegramAuth>,
    id: web::Path<String>,
    expense: web::Json<NewExpense>,
) -> Result<HttpResponse, ApiError> {
    let identity = caller(&request, &auth)?;
    let group = member_group(store.get_ref(), &id, &identity).await?;
    let expense = expense.into_inner();
    check_new_expense(&roster, &expense)?;
    let expense = store.create_expense(&group.id, expense).await?;
    Ok(HttpResponse::Created().json(expense))
}

#[get("/groups/{id}/expenses")]
async fn list_expenses(
    request: HttpRequest,
    store: web::Data<dyn Store>,
    auth: web::Data<TelegramAuth>,
    id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let identity = caller(&request, &auth)?;
    let group = member_group(store.get_ref(), &id, &identity).await?;
    Ok(HttpResponse::Ok().json(store.list_expenses(&group.id).await?))
}

#[get("/groups/{id}/balance")]
async fn get_balance(
    request: HttpRequest,
    store: web::Data<dyn Store>,
    roster: web::Data<Roster>,
    auth: web::Data<TelegramAuth>,
    id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let identity = caller(&request, &auth)?;
    let group = member_group(store.get_ref(), &id, &identity).await?;
    let expenses = store.list_expenses(&group.id).await?;
    let balance = GroupBalance::compute(group.id, roster.members(), &expenses)
        .map_err(ApiError::StoredData)?;
    Ok(HttpResponse::Ok().json(balance))
}

/// Pushes a freshly computed `GroupBalance` every time the group's expenses change.
#[get("/groups/{id}/balance/stream")]
async fn stream_balance(
    request: HttpRequest,
    store: web::Data<dyn Store>,
    roster: web::Data<Roster>,
    auth: web::Data<TelegramAuth>,
    settings: web::Data<FeedSettings>,
    id: web::Path<String>,
) -> Result<impl Responder, ApiError> {
    let identity = caller(&request, &auth)?;
    let group = member_group(store.get_ref(), &id, &identity).await?;
    let (on_change, snapshots) = latest_snapshot::<Expense>();
    let subscription = store.subscribe_expenses(&group.id, on_change).await?;
    info!(user = %identity.id, group_id = %group.id, "balance feed opened");

    let group_id = group.id;
    let events = snapshots.map(move |expenses| {
        match GroupBalance::compute(group_id.clone(), roster.members(), &expenses) {
            Ok(balance) => json_event(&balance),
            Err(err) => error_event(&ApiError::StoredData(err).to_string()),
        }
    });
    Ok(feed(events, subscription, &settings))
}
