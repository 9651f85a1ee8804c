//! Paylabs v2.3 http api

use crate::{
    gateway::{payer_text, status_code, QRIS_CANCEL_PATH},
    CancelResult, Error, Gateway, OpenRequest, PaymentActions, PaymentDisplay, PaymentMethod,
    QueryResult, Result, Signer, TradeStatus, Transaction,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use reqwest::{header::CONTENT_TYPE, Client};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{net::IpAddr, time::Duration};
use tracing::{debug, info, warn};
use url::{Host, Url};

/// QRIS code lifetime in seconds
pub const QRIS_EXPIRE: u32 = 900;
const FEE_TYPE: &str = "OUR";
/// Paylabs expects Jakarta time
const WIB_OFFSET_HOURS: i64 = 7;

#[derive(Debug, Clone)]
pub struct PaylabsConfig {
    pub api_url: String,
    pub merchant_id: String,
    /// included in create requests when set
    pub notify_url: Option<String>,
    pub timeout: Duration,
}

/// Build the notify url, or None when the site is a loopback address.
/// Paylabs rejects loopback callback urls.
pub fn notify_url(site: &str, path: &str) -> Option<String> {
    let url = Url::parse(site).ok()?;
    let loopback = match url.host()? {
        Host::Domain(d) => d.eq_ignore_ascii_case("localhost"),
        Host::Ipv4(ip) => IpAddr::V4(ip).is_loopback() || ip.is_unspecified(),
        Host::Ipv6(ip) => IpAddr::V6(ip).is_loopback() || ip.is_unspecified(),
    };
    if loopback {
        None
    } else {
        Some(format!("{}{}", site.trim_end_matches('/'), path))
    }
}

/// `2006-01-02T15:04:05.000+07:00`
pub fn timestamp_at(now: DateTime<Utc>) -> String {
    (now.naive_utc() + ChronoDuration::hours(WIB_OFFSET_HOURS))
        .format("%Y-%m-%dT%H:%M:%S%.3f+07:00")
        .to_string()
}

pub fn timestamp() -> String {
    timestamp_at(Utc::now())
}

/// time prefix plus random suffix, unique per call
pub fn new_request_id() -> String {
    format!(
        "{}{:06}",
        Utc::now().format("%Y%m%d%H%M%S%3f"),
        rand::thread_rng().gen_range(0..1_000_000)
    )
}

/// whole rupiah as a 2 decimal string
pub fn format_amount(amount: i64) -> String {
    format!("{}.00", amount)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PaymentParams<'a> {
    redirect_url: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateReq<'a> {
    request_id: String,
    merchant_id: &'a str,
    payment_type: &'a str,
    amount: String,
    merchant_trade_no: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    notify_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expire: Option<u32>,
    fee_type: &'a str,
    product_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    payment_params: Option<PaymentParams<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryReq<'a> {
    request_id: String,
    merchant_id: &'a str,
    merchant_trade_no: &'a str,
    payment_type: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CancelReq<'a> {
    request_id: String,
    merchant_id: &'a str,
    merchant_trade_no: &'a str,
    platform_trade_no: &'a str,
}

/// Common response envelope of every endpoint.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Response {
    err_code: String,
    err_code_des: String,
    merchant_trade_no: String,
    platform_trade_no: String,
    qr_code: String,
    qris_url: String,
    expired_time: String,
    success_time: Option<String>,
    #[serde(deserialize_with = "status_code")]
    status: String,
    payer: Option<Value>,
    payment_actions: Option<PaymentActions>,
}

impl Response {
    fn is_ok(&self) -> bool {
        self.err_code == "0"
    }

    fn ensure_ok(&self) -> Result<()> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(Error::Psp {
                code: self.err_code.clone(),
                desc: self.err_code_des.clone(),
            })
        }
    }

    /// status is only meaningful on success
    fn trade_status(&self) -> TradeStatus {
        if self.is_ok() {
            TradeStatus::from_code(&self.status)
        } else {
            TradeStatus::Pending
        }
    }
}

/// Paylabs client
#[derive(Clone)]
pub struct Paylabs {
    client: Client,
    signer: Signer,
    config: PaylabsConfig,
}

impl Paylabs {
    pub fn new(config: PaylabsConfig, signer: Signer) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        info!(
            key_bits = signer.bits(),
            merchant_id = config.merchant_id,
            notify_url = config.notify_url.as_deref().unwrap_or("-"),
            "Paylabs client ready"
        );
        Ok(Self {
            client,
            signer,
            config,
        })
    }

    /// Sign and post a payload, returning the decoded envelope.
    async fn call<T: Serialize>(&self, path: &str, payload: &T) -> Result<Response> {
        let body = serde_json::to_vec(payload)?;
        let timestamp = timestamp();
        let signature = self.signer.sign("POST", path, &body, &timestamp)?;
        let request_id = serde_json::from_slice::<Value>(&body)
            .ok()
            .and_then(|v| v["requestId"].as_str().map(ToOwned::to_owned))
            .unwrap_or_else(new_request_id);
        let url = format!("{}{}", self.config.api_url.trim_end_matches('/'), path);

        debug!(url, request_id, timestamp, "Paylabs request");
        let res = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json;charset=utf-8")
            .header("X-TIMESTAMP", &timestamp)
            .header("X-SIGNATURE", signature)
            .header("X-PARTNER-ID", &self.config.merchant_id)
            .header("X-REQUEST-ID", &request_id)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                warn!(error = e.to_string(), url, "Paylabs call failed");
                e
            })?;

        let status = res.status();
        let text = res.text().await?;
        debug!(status = status.as_u16(), body = text, "Paylabs response");
        if !status.is_success() {
            return Err(Error::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait::async_trait]
impl Gateway for Paylabs {
    async fn open(&self, req: &OpenRequest) -> Result<Transaction> {
        let method = req.method;
        let payload = CreateReq {
            request_id: new_request_id(),
            merchant_id: &self.config.merchant_id,
            payment_type: method.payment_type(),
            amount: format_amount(req.amount),
            merchant_trade_no: &req.order_id,
            notify_url: self.config.notify_url.as_deref(),
            expire: (!method.is_ewallet()).then_some(QRIS_EXPIRE),
            fee_type: FEE_TYPE,
            product_name: &req.product_name,
            payment_params: method.is_ewallet().then(|| PaymentParams {
                redirect_url: req.redirect_url.as_deref().unwrap_or_default(),
            }),
        };
        let res = self.call(method.create_path(), &payload).await?;
        res.ensure_ok()?;

        let display = if method.is_ewallet() {
            PaymentDisplay::EWallet {
                payment_url: res
                    .payment_actions
                    .as_ref()
                    .and_then(PaymentActions::preferred_url)
                    .unwrap_or_default()
                    .to_owned(),
                actions: res.payment_actions,
            }
        } else {
            PaymentDisplay::Qris {
                qr_code: res.qr_code,
                qris_url: res.qris_url,
            }
        };
        Ok(Transaction {
            order_id: req.order_id.clone(),
            platform_trade_no: res.platform_trade_no,
            expired_time: res.expired_time,
            display,
        })
    }

    async fn query(&self, order_id: &str, method: PaymentMethod) -> Result<QueryResult> {
        let payload = QueryReq {
            request_id: new_request_id(),
            merchant_id: &self.config.merchant_id,
            merchant_trade_no: order_id,
            payment_type: method.payment_type(),
        };
        let mut res = self.call(method.query_path(), &payload).await?;
        if !res.merchant_trade_no.is_empty() && res.merchant_trade_no != order_id {
            warn!(order_id, returned = res.merchant_trade_no, "Paylabs query order mismatch");
        }
        Ok(QueryResult {
            status: res.trade_status(),
            success_time: res.success_time.clone().filter(|_| res.is_ok()),
            payer: payer_text(res.payer.take()),
            err_code: res.err_code,
            err_desc: res.err_code_des,
        })
    }

    async fn cancel(&self, order_id: &str, platform_trade_no: &str) -> Result<CancelResult> {
        let payload = CancelReq {
            request_id: new_request_id(),
            merchant_id: &self.config.merchant_id,
            merchant_trade_no: order_id,
            platform_trade_no,
        };
        let res = self.call(QRIS_CANCEL_PATH, &payload).await?;
        Ok(CancelResult {
            status: res.trade_status(),
            err_code: res.err_code,
            err_desc: res.err_code_des,
        })
    }
}
