use std::sync::Arc;

use actix_web::web::{self, Data, FormConfig, JsonConfig, PathConfig, QueryConfig};
use actix_web::{App, HttpServer, ResponseError};
use mongodb::Client;
use tracing::{info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::fmt::format::FmtSpan;

mod actor;
mod audience;
mod campaign;
mod clock;
mod config;
mod database;
mod delivery;
mod dispatch;
mod error;
mod optout;
mod recording;
mod scheduler;
mod seed;
mod sender;
mod tag;
mod typedid;
mod utils;
mod voter;

use error::Error;

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::database::{Database, MongoDatabase};
use crate::dispatch::{DispatchConfig, Dispatcher};
use crate::scheduler::Scheduler;
use crate::sender::Senders;

#[actix_web::main]
async fn main() -> Result<(), Error> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_span_events(FmtSpan::NEW)
        .compact()
        .init();

    let config = EngineConfig::from_env();

    info!("connecting to db: {}", config.mongodb_uri);
    let db = Client::with_uri_str(&config.mongodb_uri)
        .await?
        .database(&config.database_name);
    let db = MongoDatabase::initialize(db).await?;

    if config.seed_demo_data {
        seed::seed(&db).await?;
    }

    let db: Arc<dyn Database> = Arc::new(db);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let dispatcher = Dispatcher::new(
        db.clone(),
        Senders::from_env(),
        clock.clone(),
        DispatchConfig::from_engine(&config),
    );

    Scheduler::new(
        db.clone(),
        dispatcher.clone(),
        clock,
        config.scheduler_poll_interval,
    )
    .spawn();

    let db_data: Data<dyn Database> = Data::from(db);
    let dispatcher_data = Data::new(dispatcher);

    info!("listening on {}", config.bind_address);
    HttpServer::new(move || {
        App::new()
            .app_data(JsonConfig::default().error_handler(|err, _req| {
                // format json errors with custom format
                Error::InvalidJson(err).into()
            }))
            .app_data(PathConfig::default().error_handler(|err, _req| {
                // format path errors with custom format
                Error::InvalidPath(err).into()
            }))
            .app_data(FormConfig::default().error_handler(|err, _req| {
                // format form errors with custom format
                Error::InvalidForm(err).into()
            }))
            .app_data(QueryConfig::default().error_handler(|err, _req| {
                // format query errors with custom format
                Error::InvalidQuery(err).into()
            }))
            .app_data(db_data.clone())
            .app_data(dispatcher_data.clone())
            .wrap(TracingLogger::default())
            .service(campaign::endpoints::create_campaign)
            .service(campaign::endpoints::get_campaigns)
            // exact paths under /campaigns must register ahead of the
            // {campaign_id} matcher
            .service(campaign::endpoints::get_recipient_count)
            .service(campaign::endpoints::check_stuck_campaigns)
            .service(campaign::endpoints::get_campaign_by_id)
            .service(campaign::endpoints::update_campaign)
            .service(campaign::endpoints::delete_campaign)
            .service(campaign::endpoints::send_campaign)
            .service(campaign::endpoints::schedule_campaign)
            .service(campaign::endpoints::cancel_campaign)
            .service(campaign::endpoints::force_stop_campaign)
            .service(campaign::endpoints::retry_failed_deliveries)
            .service(campaign::endpoints::duplicate_campaign)
            .service(optout::endpoints::get_opt_out_stats)
            .service(optout::endpoints::export_opt_outs)
            .service(optout::endpoints::get_opt_outs)
            .service(optout::endpoints::create_opt_out)
            .service(optout::endpoints::delete_opt_out)
            .default_service(web::to(|| async { Error::PathNotFound.error_response() }))
    })
    .bind(&config.bind_address)?
    .run()
    .await?;

    Ok(())
}
