use std::io;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use tracing::{info, warn};

use groupsplit::auth::TelegramAuth;
use groupsplit::config::Config;
use groupsplit::routes::{self, FeedSettings};
use groupsplit::store::{InMemoryStore, MongoStore, Store};
use groupsplit::telemetry;

#[actix_web::main]
async fn main() -> io::Result<()> {
    telemetry::init();
    let config = Config::from_env().map_err(io::Error::other)?;

    let store: Arc<dyn Store> = match &config.mongodb_uri {
        Some(uri) => Arc::new(
            MongoStore::connect(uri, &config.database)
                .await
                .map_err(io::Error::other)?,
        ),
        None => {
            warn!("MONGODB_URI is not set, data will only live in memory");
            Arc::new(InMemoryStore::new())
        }
    };
    let store = web::Data::from(store);
    let roster = web::Data::new(config.roster.clone());
    let auth = web::Data::new(TelegramAuth::new(
        config.bot_token.clone(),
        config.auth_max_age,
    ));
    let feeds = web::Data::new(FeedSettings {
        keep_alive: config.feed_keep_alive,
    });

    info!(
        address = %config.bind_address,
        port = config.port,
        members = roster.members().len(),
        "starting server"
    );

    HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .wrap(Logger::default())
            .app_data(store.clone())
            .app_data(roster.clone())
            .app_data(auth.clone())
            .app_data(feeds.clone())
            .configure(routes::configure)
    })
    .bind((config.bind_address.as_str(), config.port))?
    .run()
    .await
}
