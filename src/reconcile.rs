//! Reconciles donation payment state from the three gateway signals:
//! webhook pushes, status polls and cancellations.

use crate::{
    ledger::{Ledger, Outcome},
    Error, Result,
};
use entity::donation::PaymentStatus;
use paylabs_client::{Gateway, Notification, PaymentMethod, TradeStatus, Verifier};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub type SharedGateway = Arc<dyn Gateway + Send + Sync>;

pub fn payment_status(status: TradeStatus) -> PaymentStatus {
    match status {
        TradeStatus::Pending => PaymentStatus::Pending,
        TradeStatus::Paid => PaymentStatus::Paid,
        TradeStatus::Failed => PaymentStatus::Failed,
    }
}

/// How inbound notifications are authenticated.
#[derive(Debug, Clone)]
pub enum WebhookAuth {
    /// check `X-SIGNATURE` with the gateway public key
    Verify(Verifier),
    /// no public key configured, every notification is refused
    Reject,
    /// accept unsigned notifications, sandbox only
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookReceipt {
    pub order_id: String,
    pub status: PaymentStatus,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PollStatus {
    Pending,
    Paid,
    Failed,
    /// the gateway answered with an error code
    Error,
}

/// What a status poll observed at the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollReport {
    pub order_id: String,
    pub status: PollStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err_code_des: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
    /// set when the gateway reports paid: whether the ledger holds the
    /// donation as paid afterwards
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recorded: Option<bool>,
}

pub struct Reconciler {
    gateway: SharedGateway,
    ledger: Arc<Ledger>,
    auth: WebhookAuth,
    webhook_path: String,
}

impl Reconciler {
    pub fn new(
        gateway: SharedGateway,
        ledger: Arc<Ledger>,
        auth: WebhookAuth,
        webhook_path: String,
    ) -> Self {
        Self {
            gateway,
            ledger,
            auth,
            webhook_path,
        }
    }

    fn verify(&self, body: &[u8], signature: &str, timestamp: &str) -> bool {
        match &self.auth {
            WebhookAuth::Verify(verifier) => {
                verifier.verify("POST", &self.webhook_path, body, timestamp, signature)
            }
            WebhookAuth::Reject => false,
            WebhookAuth::Skip => {
                debug!("Webhook signature check skipped");
                true
            }
        }
    }

    /// Handle a gateway notification. Nothing changes unless the signature
    /// checks out.
    pub async fn on_webhook(
        &self,
        body: &[u8],
        signature: Option<&str>,
        timestamp: Option<&str>,
    ) -> Result<WebhookReceipt> {
        let signature = signature.unwrap_or_default();
        let timestamp = timestamp.unwrap_or_default();
        if !self.verify(body, signature, timestamp) {
            warn!(
                timestamp,
                body = String::from_utf8_lossy(body).as_ref(),
                "Invalid webhook signature"
            );
            return Err(Error::InvalidSignature);
        }

        let notification = Notification::from_slice(body)
            .map_err(|e| Error::InvalidParam(format!("invalid notification: {}", e)))?;
        let status = payment_status(notification.status);
        let order_id = notification.merchant_trade_no;
        let outcome = self.ledger.update_status(&order_id, status).await?;
        info!(
            order_id,
            status = status.as_str(),
            ?outcome,
            "Payment processed"
        );
        Ok(WebhookReceipt {
            order_id,
            status,
            outcome,
        })
    }

    /// Ask the gateway for the current status, recording a payment if it
    /// reports one. Gateway error codes are reported, not raised.
    pub async fn on_poll(&self, order_id: &str) -> Result<PollReport> {
        let method = match self.ledger.find_by_order_id(order_id).await? {
            Some(d) => PaymentMethod::from_tag_or_qris(&d.payment_method),
            None => {
                warn!(order_id, "Donation not found, polling as qris");
                PaymentMethod::Qris
            }
        };

        let res = self.gateway.query(order_id, method).await?;
        if !res.is_ok() {
            info!(
                order_id,
                err_code = res.err_code,
                err_desc = res.err_desc,
                "Payment status query returned an error"
            );
            return Ok(PollReport {
                order_id: order_id.to_owned(),
                status: PollStatus::Error,
                err_code: Some(res.err_code),
                err_code_des: Some(res.err_desc),
                success_time: None,
                payer: None,
                recorded: None,
            });
        }

        let status = match res.status {
            TradeStatus::Pending => PollStatus::Pending,
            TradeStatus::Paid => PollStatus::Paid,
            TradeStatus::Failed => PollStatus::Failed,
        };
        let recorded = if res.status == TradeStatus::Paid {
            match self
                .ledger
                .update_status(order_id, PaymentStatus::Paid)
                .await
            {
                Ok(_) => Some(true),
                Err(e) => {
                    warn!(order_id, error = e.to_string(), "Failed to record polled payment");
                    Some(false)
                }
            }
        } else {
            None
        };
        Ok(PollReport {
            order_id: order_id.to_owned(),
            status,
            err_code: None,
            err_code_des: None,
            success_time: res.success_time,
            payer: res.payer,
            recorded,
        })
    }

    /// Cancel at the gateway on a best-effort basis, then mark the donation
    /// failed whatever the gateway said.
    pub async fn on_cancel(&self, order_id: &str, platform_trade_no: &str) -> Result<Outcome> {
        match self.gateway.cancel(order_id, platform_trade_no).await {
            Ok(res) if !res.is_ok() => warn!(
                order_id,
                err_code = res.err_code,
                err_desc = res.err_desc,
                "Paylabs cancel returned an error"
            ),
            Ok(_) => debug!(order_id, "Paylabs cancel accepted"),
            Err(e) => warn!(order_id, error = e.to_string(), "Paylabs cancel failed"),
        }
        self.ledger
            .update_status(order_id, PaymentStatus::Failed)
            .await
    }
}
