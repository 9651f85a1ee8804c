//! http api

use crate::{ledger::Outcome, AppState, CreateDonation, Error, Result};
use actix_web::{
    get, http::StatusCode, post, web, HttpRequest, HttpResponse, Responder, Scope,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

pub const CARGO_PKG_VERSION: Option<&'static str> = option_env!("CARGO_PKG_VERSION");

fn version() -> String {
    CARGO_PKG_VERSION.map(ToOwned::to_owned).unwrap_or_default()
}

fn success<T: Serialize>(status: StatusCode, message: &str, data: T) -> HttpResponse {
    HttpResponse::build(status).json(json!({
        "success": true,
        "message": message,
        "data": data,
    }))
}

pub fn scope() -> Scope {
    web::scope("/api/v1")
        .service(create_donation)
        .service(get_donation)
        .service(payment_status)
        .service(cancel_payment)
}

#[get("/health")]
pub async fn health() -> impl Responder {
    web::Json(json!({
        "status": "ok",
        "service": "jajanin",
        "version": version(),
    }))
}

#[post("/donations")]
pub async fn create_donation(
    state: web::Data<AppState>,
    data: web::Json<CreateDonation>,
) -> Result<HttpResponse> {
    let created = state.service.create_donation(data.into_inner()).await?;
    Ok(success(StatusCode::CREATED, "Donation created", created))
}

#[get("/donations/{id}")]
pub async fn get_donation(
    state: web::Data<AppState>,
    id: web::Path<String>,
) -> Result<HttpResponse> {
    let id = Uuid::parse_str(&id).map_err(|_| Error::InvalidParam("invalid donation id".to_owned()))?;
    let detail = state.service.get_donation(id).await?;
    Ok(success(StatusCode::OK, "Donation found", detail))
}

/// Paylabs notify url. Mounted at the configured webhook path.
pub async fn webhook(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse> {
    let header = |name: &str| req.headers().get(name).and_then(|v| v.to_str().ok());
    let receipt = state
        .service
        .reconciler()
        .on_webhook(&body, header("X-SIGNATURE"), header("X-TIMESTAMP"))
        .await?;
    Ok(success(
        StatusCode::OK,
        "OK",
        json!({
            "order_id": receipt.order_id,
            "status": receipt.status.as_str(),
        }),
    ))
}

#[get("/payment/status/{order_id}")]
pub async fn payment_status(
    state: web::Data<AppState>,
    order_id: web::Path<String>,
) -> Result<HttpResponse> {
    let order_id = order_id.trim();
    if order_id.is_empty() {
        return Err(Error::InvalidParam("order id is required".to_owned()));
    }
    let report = state.service.reconciler().on_poll(order_id).await?;
    Ok(success(StatusCode::OK, "Status check completed", report))
}

#[derive(Debug, Deserialize)]
pub struct CancelPayment {
    #[serde(default)]
    pub merchant_trade_no: String,
    #[serde(default)]
    pub platform_trade_no: String,
}

#[post("/payment/cancel")]
pub async fn cancel_payment(
    state: web::Data<AppState>,
    data: web::Json<CancelPayment>,
) -> Result<HttpResponse> {
    if data.merchant_trade_no.is_empty() || data.platform_trade_no.is_empty() {
        return Err(Error::InvalidParam(
            "merchant_trade_no and platform_trade_no are required".to_owned(),
        ));
    }
    let outcome = state
        .service
        .reconciler()
        .on_cancel(&data.merchant_trade_no, &data.platform_trade_no)
        .await?;
    let status = match outcome {
        Outcome::AlreadyPaid => "paid",
        Outcome::Applied | Outcome::Unchanged => "failed",
    };
    info!(order_id = data.merchant_trade_no, status, "Payment cancelled");
    Ok(success(
        StatusCode::OK,
        "Payment cancelled",
        json!({
            "order_id": data.merchant_trade_no,
            "status": status,
        }),
    ))
}
