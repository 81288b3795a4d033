use crate::application::use_cases::query_orchestrator::QueryOrchestrator;
use actix_cors::Cors;
use actix_web::{dev::Server, get, post, web, App, HttpResponse, HttpServer, Responder};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct HttpState {
    pub orchestrator: Arc<QueryOrchestrator>,
}

#[derive(Deserialize)]
pub struct QueryRequest {
    pub message: String,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

#[post("/query")]
async fn query(data: web::Data<HttpState>, req: web::Json<QueryRequest>) -> impl Responder {
    let message = req.into_inner().message;
    if message.trim().is_empty() {
        return HttpResponse::BadRequest().json(ErrorBody {
            error: "message must not be empty",
        });
    }

    // actix drops this future when the client goes away; the guard then
    // cancels whatever the request still has in flight
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let response = data
        .orchestrator
        .handle_with_cancel(&message, &cancel)
        .await;
    HttpResponse::Ok().json(response)
}

#[get("/pool")]
async fn pool_stats(data: web::Data<HttpState>) -> impl Responder {
    HttpResponse::Ok().json(data.orchestrator.pool().stats())
}

#[get("/health")]
async fn health(data: web::Data<HttpState>) -> impl Responder {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "schema_version": data.orchestrator.schema().version(),
    }))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .service(query)
            .service(pool_stats)
            .service(health),
    );
}

pub fn start_server(
    orchestrator: Arc<QueryOrchestrator>,
    bind_address: &str,
    port: u16,
) -> std::io::Result<Server> {
    let state = web::Data::new(HttpState { orchestrator });

    let server = HttpServer::new(move || {
        let cors = Cors::permissive(); // Allow all origins for local tool

        App::new()
            .wrap(cors)
            .app_data(state.clone())
            .configure(configure)
    })
    .bind((bind_address, port))?
    .run();

    info!(address = %bind_address, port, "HTTP server listening");
    Ok(server)
}
