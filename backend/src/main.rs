mod config;
mod detector;
mod dispatch;
mod pipeline;
mod routes;
mod storage;

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpServer, web};

use config::Config;
use detector::DetectorSet;
use dispatch::JobDispatcher;
use pipeline::Pipeline;
use pipeline::render::Renderer;
use routes::configure_routes;
use storage::ContentStore;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = Config::from_env();

    let store = ContentStore::new(&config.data_dir).map_err(|e| {
        std::io::Error::other(format!(
            "failed to prepare data directory {}: {}",
            config.data_dir.display(),
            e
        ))
    })?;
    log::info!("data directory: {}", config.data_dir.display());

    let detectors = DetectorSet::remote(&config.detector)
        .map_err(|e| std::io::Error::other(format!("failed to build detector clients: {}", e)))?;
    log::info!("detector service: {}", config.detector.base_url);

    let renderer = Arc::new(Renderer::new(config.label_font.as_deref()));
    let pipeline = Arc::new(Pipeline::new(detectors, renderer, store.clone()));
    let dispatcher = JobDispatcher::new(store.clone(), pipeline, config.dispatcher.clone());
    log::info!(
        "job dispatcher: {} workers, queue capacity {}, timeout {:?}",
        config.dispatcher.workers,
        config.dispatcher.queue_capacity,
        config.dispatcher.job_timeout
    );

    let bind_address = format!("0.0.0.0:{}", config.port);
    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(web::Data::new(store.clone()))
            .app_data(web::Data::new(dispatcher.clone()))
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await
}
