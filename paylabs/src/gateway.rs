//! Payment gateway vocabulary shared by the Paylabs client and its callers.

use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::{fmt, str::FromStr};

pub const QRIS_CREATE_PATH: &str = "/payment/v2.3/qris/create";
pub const QRIS_QUERY_PATH: &str = "/payment/v2.3/qris/query";
pub const QRIS_CANCEL_PATH: &str = "/payment/v2.3/qris/cancel";
pub const EWALLET_CREATE_PATH: &str = "/payment/v2.3/ewallet/create";
pub const EWALLET_QUERY_PATH: &str = "/payment/v2.3/ewallet/query";

/// Supported payment rails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    #[default]
    Qris,
    Gopay,
    Dana,
    Shopee,
    Ovo,
    Linkaja,
}

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 6] = [
        Self::Qris,
        Self::Gopay,
        Self::Dana,
        Self::Shopee,
        Self::Ovo,
        Self::Linkaja,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Qris => "qris",
            Self::Gopay => "gopay",
            Self::Dana => "dana",
            Self::Shopee => "shopee",
            Self::Ovo => "ovo",
            Self::Linkaja => "linkaja",
        }
    }

    /// Paylabs `paymentType` code.
    pub fn payment_type(&self) -> &'static str {
        match self {
            Self::Qris => "QRIS",
            Self::Gopay => "GOPAYBALANCE",
            Self::Dana => "DANABALANCE",
            Self::Shopee => "SHOPEEBALANCE",
            Self::Ovo => "OVOBALANCE",
            Self::Linkaja => "LINKAJABALANCE",
        }
    }

    pub fn is_ewallet(&self) -> bool {
        !matches!(self, Self::Qris)
    }

    pub fn create_path(&self) -> &'static str {
        if self.is_ewallet() {
            EWALLET_CREATE_PATH
        } else {
            QRIS_CREATE_PATH
        }
    }

    pub fn query_path(&self) -> &'static str {
        if self.is_ewallet() {
            EWALLET_QUERY_PATH
        } else {
            QRIS_QUERY_PATH
        }
    }

    /// Lenient parse for stored tags, unknown or empty tags fall back to QRIS.
    pub fn from_tag_or_qris(tag: &str) -> Self {
        tag.parse().unwrap_or_default()
    }
}

impl FromStr for PaymentMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| Error::Invalid(format!("invalid payment method: {}", s)))
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trade status reported by Paylabs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeStatus {
    Pending,
    Paid,
    Failed,
}

impl TradeStatus {
    /// `01` pending, `02` success, `09` failed.
    /// Unknown codes stay pending, they never count as paid.
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "01" => Self::Pending,
            "02" => Self::Paid,
            "09" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Raw {
    Str(String),
    Num(serde_json::Number),
}

/// Status may arrive as `"02"` or `2`.
pub(crate) fn status_code<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Str(s)) => s,
        Some(Raw::Num(n)) => match n.as_u64() {
            Some(n) => format!("{:02}", n),
            None => n.to_string(),
        },
        None => String::new(),
    })
}

/// Amounts may arrive as `"5000.00"` or `5000`.
pub(crate) fn amount_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Str(s)) => s,
        Some(Raw::Num(n)) => n.to_string(),
        None => String::new(),
    })
}

/// Payer is a plain name on some rails and an object on others.
pub(crate) fn payer_text(payer: Option<Value>) -> Option<String> {
    match payer? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PaymentActions {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub pc_pay_url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub mobile_pay_url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub app_deeplink: String,
}

impl PaymentActions {
    /// mobile url first, then the desktop one
    pub fn preferred_url(&self) -> Option<&str> {
        [&self.mobile_pay_url, &self.pc_pay_url]
            .into_iter()
            .find(|u| !u.is_empty())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct OpenRequest {
    /// `merchantTradeNo`
    pub order_id: String,
    /// whole rupiah
    pub amount: i64,
    pub method: PaymentMethod,
    pub product_name: String,
    /// e-wallet return url
    pub redirect_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentDisplay {
    Qris {
        qr_code: String,
        qris_url: String,
    },
    EWallet {
        payment_url: String,
        actions: Option<PaymentActions>,
    },
}

/// An opened gateway transaction.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub order_id: String,
    pub platform_trade_no: String,
    pub expired_time: String,
    pub display: PaymentDisplay,
}

#[derive(Debug, Clone)]
pub struct QueryResult {
    pub status: TradeStatus,
    pub err_code: String,
    pub err_desc: String,
    pub payer: Option<String>,
    pub success_time: Option<String>,
}

impl QueryResult {
    pub fn is_ok(&self) -> bool {
        self.err_code == "0"
    }
}

#[derive(Debug, Clone)]
pub struct CancelResult {
    pub status: TradeStatus,
    pub err_code: String,
    pub err_desc: String,
}

impl CancelResult {
    pub fn is_ok(&self) -> bool {
        self.err_code == "0"
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawNotification {
    merchant_trade_no: String,
    platform_trade_no: String,
    payment_type: String,
    #[serde(deserialize_with = "amount_text")]
    amount: String,
    #[serde(deserialize_with = "status_code")]
    status: String,
    success_time: Option<String>,
    payer: Option<Value>,
}

/// Payment notification pushed by Paylabs to the notify url.
#[derive(Debug, Clone)]
pub struct Notification {
    pub merchant_trade_no: String,
    pub platform_trade_no: String,
    pub payment_type: String,
    pub amount: String,
    pub status: TradeStatus,
    pub success_time: Option<String>,
    pub payer: Option<String>,
}

impl Notification {
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        let raw: RawNotification = serde_json::from_slice(body)?;
        if raw.merchant_trade_no.is_empty() {
            return Err(Error::Invalid("missing merchantTradeNo".to_owned()));
        }
        Ok(Self {
            status: TradeStatus::from_code(&raw.status),
            merchant_trade_no: raw.merchant_trade_no,
            platform_trade_no: raw.platform_trade_no,
            payment_type: raw.payment_type,
            amount: raw.amount,
            success_time: raw.success_time,
            payer: payer_text(raw.payer),
        })
    }
}

/// the payment gateway trait, implemented by [`crate::Paylabs`]
#[async_trait::async_trait]
pub trait Gateway {
    async fn open(&self, req: &OpenRequest) -> Result<Transaction>;

    async fn query(&self, order_id: &str, method: PaymentMethod) -> Result<QueryResult>;

    async fn cancel(&self, order_id: &str, platform_trade_no: &str) -> Result<CancelResult>;
}
