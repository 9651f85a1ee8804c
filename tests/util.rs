#![allow(unused)]

use actix_http::{body::MessageBody, Method, Request};
use actix_web::{
    dev::{Service, ServiceResponse},
    test::{call_service, read_body, TestRequest},
};
use anyhow::Result;
use async_trait::async_trait;
use entity::{product, user};
use jajanin::{now, setting::Setting, AppState};
use migration::{Migrator, MigratorTrait};
use parking_lot::Mutex;
use paylabs_client::{
    client::timestamp, CancelResult, Error as GatewayError, Gateway, OpenRequest, PaymentActions,
    PaymentDisplay, PaymentMethod, QueryResult, Signer, TradeStatus, Transaction,
};
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, Set};
use serde_json::Value;
use std::sync::Arc;

pub const PSP_PRIVATE_KEY: &str = include_str!("../paylabs/tests/data/psp.pem");
pub const PSP_PUBLIC_KEY: &str = include_str!("../paylabs/tests/data/psp.pub");
pub const WEBHOOK_PATH: &str = "/api/v1/payment/webhook";
pub const STREAM_KEY: &str = "sk-budi-0001";

/// Scriptable in-memory gateway recording every call.
pub struct FakeGateway {
    pub opened: Mutex<Vec<OpenRequest>>,
    pub queries: Mutex<Vec<(String, PaymentMethod)>>,
    pub cancels: Mutex<Vec<(String, String)>>,
    pub open_error: Mutex<Option<(String, String)>>,
    pub query_result: Mutex<QueryResult>,
    pub cancel_error: Mutex<Option<(String, String)>>,
    pub cancel_unreachable: Mutex<bool>,
}

impl Default for FakeGateway {
    fn default() -> Self {
        Self {
            opened: Default::default(),
            queries: Default::default(),
            cancels: Default::default(),
            open_error: Default::default(),
            query_result: Mutex::new(query_result(TradeStatus::Pending, "0")),
            cancel_error: Default::default(),
            cancel_unreachable: Default::default(),
        }
    }
}

pub fn query_result(status: TradeStatus, err_code: &str) -> QueryResult {
    QueryResult {
        status,
        err_code: err_code.to_owned(),
        err_desc: if err_code == "0" {
            String::new()
        } else {
            "order not exist".to_owned()
        },
        payer: None,
        success_time: (status == TradeStatus::Paid).then(|| "20240101000100".to_owned()),
    }
}

impl FakeGateway {
    pub fn calls(&self) -> usize {
        self.opened.lock().len() + self.queries.lock().len() + self.cancels.lock().len()
    }
}

#[async_trait]
impl Gateway for FakeGateway {
    async fn open(&self, req: &OpenRequest) -> paylabs_client::Result<Transaction> {
        self.opened.lock().push(req.clone());
        if let Some((code, desc)) = self.open_error.lock().clone() {
            return Err(GatewayError::Psp { code, desc });
        }
        let display = if req.method.is_ewallet() {
            PaymentDisplay::EWallet {
                payment_url: format!("https://pay.example/{}", req.order_id),
                actions: Some(PaymentActions {
                    mobile_pay_url: format!("https://pay.example/{}", req.order_id),
                    ..Default::default()
                }),
            }
        } else {
            PaymentDisplay::Qris {
                qr_code: "00020101021226".to_owned(),
                qris_url: format!("https://qr.example/{}", req.order_id),
            }
        };
        Ok(Transaction {
            order_id: req.order_id.clone(),
            platform_trade_no: format!("P-{}", req.order_id),
            expired_time: "20240101001500".to_owned(),
            display,
        })
    }

    async fn query(&self, order_id: &str, method: PaymentMethod) -> paylabs_client::Result<QueryResult> {
        self.queries.lock().push((order_id.to_owned(), method));
        Ok(self.query_result.lock().clone())
    }

    async fn cancel(
        &self,
        order_id: &str,
        platform_trade_no: &str,
    ) -> paylabs_client::Result<CancelResult> {
        self.cancels
            .lock()
            .push((order_id.to_owned(), platform_trade_no.to_owned()));
        if *self.cancel_unreachable.lock() {
            return Err(GatewayError::Status {
                status: 503,
                body: "unavailable".to_owned(),
            });
        }
        Ok(match self.cancel_error.lock().clone() {
            Some((err_code, err_desc)) => CancelResult {
                status: TradeStatus::Pending,
                err_code,
                err_desc,
            },
            None => CancelResult {
                status: TradeStatus::Failed,
                err_code: "0".to_owned(),
                err_desc: String::new(),
            },
        })
    }
}

pub fn test_setting() -> Setting {
    let mut setting = Setting::default();
    setting.db_url = "sqlite::memory:".to_owned();
    setting.paylabs.merchant_id = "010614".to_owned();
    setting.paylabs.public_key = Some(PSP_PUBLIC_KEY.to_owned());
    setting
}

pub async fn create_state(setting: Setting) -> Result<(AppState, Arc<FakeGateway>)> {
    let mut options = ConnectOptions::new(setting.db_url.clone());
    // a single connection keeps the in-memory database alive and shared
    options.max_connections(1).min_connections(1);
    let conn = Database::connect(options).await?;
    Migrator::fresh(&conn).await?;

    let gateway = Arc::new(FakeGateway::default());
    let state = AppState::with_gateway(setting, conn, gateway.clone())?;
    Ok((state, gateway))
}

pub async fn create_test_state() -> Result<(AppState, Arc<FakeGateway>)> {
    create_state(test_setting()).await
}

/// creator `budi` with the overlay key [`STREAM_KEY`]
pub async fn seed_creator(state: &AppState) -> Result<user::Model> {
    let now = now() as i64;
    Ok(user::ActiveModel {
        username: Set("budi".to_owned()),
        name: Set("Budi".to_owned()),
        stream_key: Set(STREAM_KEY.to_owned()),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(state.service.db())
    .await?)
}

pub async fn seed_product(state: &AppState, creator: &user::Model) -> Result<product::Model> {
    Ok(product::ActiveModel {
        user_id: Set(creator.id),
        name: Set("Kopi".to_owned()),
        emoji: Set("☕".to_owned()),
        amount: Set(5000),
        is_active: Set(true),
        created_at: Set(now() as i64),
        ..Default::default()
    }
    .insert(state.service.db())
    .await?)
}

/// `X-SIGNATURE` and `X-TIMESTAMP` as Paylabs would send them
pub fn sign_webhook(body: &[u8]) -> Result<(String, String)> {
    let signer = Signer::from_material(PSP_PRIVATE_KEY)?;
    let ts = timestamp();
    let sig = signer.sign("POST", WEBHOOK_PATH, body, &ts)?;
    Ok((sig, ts))
}

pub fn webhook_body(order_id: &str, status: &str) -> Vec<u8> {
    serde_json::json!({
        "merchantId": "010614",
        "requestId": "N1",
        "merchantTradeNo": order_id,
        "platformTradeNo": format!("P-{}", order_id),
        "paymentType": "QRIS",
        "amount": "5000.00",
        "status": status,
        "successTime": "20240101000100",
    })
    .to_string()
    .into_bytes()
}

pub fn get_req(path: &str) -> TestRequest {
    TestRequest::with_uri(path)
}

pub fn post_req(path: &str, data: Value) -> TestRequest {
    TestRequest::with_uri(path)
        .method(Method::POST)
        .set_json(data)
}

pub async fn call<S, B>(req: TestRequest, app: &S) -> Result<(Value, u16)>
where
    S: Service<Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
    B: MessageBody,
{
    let res = call_service(app, req.to_request()).await;
    let status = res.status().as_u16();
    let body = read_body(res).await;
    let val = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body)?
    };
    Ok((val, status))
}

pub async fn get<S, B>(app: &S, path: &str) -> Result<(Value, u16)>
where
    S: Service<Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
    B: MessageBody,
{
    call(get_req(path), app).await
}

pub async fn post<S, B>(app: &S, path: &str, data: Value) -> Result<(Value, u16)>
where
    S: Service<Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
    B: MessageBody,
{
    call(post_req(path, data), app).await
}
