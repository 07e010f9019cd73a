// src/main.rs

mod app_state;
mod auth;
mod config;
mod db;
mod error;
mod models;
mod rules;
mod store;
mod task_feed;
mod task_service;
mod tasks;
mod visibility;
mod web_socket_server;

use std::io;
use std::sync::Arc;

use actix::Actor;
use actix_cors::Cors;
use actix_web::{http, middleware::Logger, web, App, HttpServer};
use env_logger::Env;
use log::{info, warn};

use crate::app_state::AppState;
use crate::auth::{login, signup, Authentication};
use crate::db::MongoDB;
use crate::store::{MemoryTaskStore, MemoryUserStore, TaskStore, UserStore};
use crate::task_feed::TaskFeed;
use crate::task_service::TaskService;
use crate::web_socket_server::ws_index;

async fn open_stores(config: &config::Config) -> io::Result<(Arc<dyn TaskStore>, Arc<dyn UserStore>)> {
    match &config.mongo_uri {
        Some(uri) => {
            let mongodb = MongoDB::init(uri, &config.database_name)
                .await
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            mongodb
                .ensure_indexes()
                .await
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            info!("Using MongoDB database {}", config.database_name);
            let tasks: Arc<dyn TaskStore> = Arc::new(mongodb.task_store());
            let users: Arc<dyn UserStore> = Arc::new(mongodb.user_store());
            Ok((tasks, users))
        }
        None => {
            warn!("MONGO_URI not set; tasks and accounts are kept in memory only");
            let tasks: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
            let users: Arc<dyn UserStore> = Arc::new(MemoryUserStore::new());
            Ok((tasks, users))
        }
    }
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = config::Config::from_env()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let (task_store, users) = open_stores(&config).await?;
    let task_service = Arc::new(TaskService::new(task_store, config.feed_capacity));
    let feed = TaskFeed::new(task_service.clone()).start();

    let state = AppState {
        tasks: task_service,
        users,
        feed,
        config: config.clone(),
    };

    info!("Server running at http://{}", config.bind_addr);
    info!("Allowed CORS Origin: {}", config.frontend_origin);

    let frontend_origin = config.frontend_origin.clone();
    let jwt_secret = config.jwt_secret.clone();
    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&frontend_origin)
            .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .allowed_headers(vec![
                http::header::CONTENT_TYPE,
                http::header::ACCEPT,
                http::header::AUTHORIZATION,
            ])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(Authentication::new(jwt_secret.clone()))
            .wrap(cors)
            .wrap(Logger::default())
            .app_data(web::Data::new(state.clone()))
            .service(
                web::scope("/auth")
                    .route("/signup", web::post().to(signup))
                    .route("/login", web::post().to(login)),
            )
            .configure(tasks::configure)
            // WEBSOCKET route for the "tasks" subscription
            .service(web::resource("/ws").route(web::get().to(ws_index)))
    })
    .bind(&config.bind_addr)?
    .run()
    .await
}
