use crate::{
    alert::AlertHub,
    ledger::{Ledger, NewDonation},
    reconcile::{Reconciler, SharedGateway, WebhookAuth},
    setting, Error, Result,
};
use entity::{donation, product, user};
use paylabs_client::{OpenRequest, PaymentActions, PaymentDisplay, PaymentMethod};
use sea_orm::{ColumnTrait, DbConn, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use serde_aux::field_attributes::deserialize_number_from_string;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateDonation {
    pub creator_username: String,
    #[serde(default)]
    pub product_id: Option<i32>,
    pub buyer_name: String,
    #[serde(default)]
    pub buyer_email: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub amount: i64,
    #[serde(default)]
    pub quantity: Option<i32>,
    #[serde(default)]
    pub message: String,
    /// qris, gopay, dana, shopee, ovo or linkaja. Defaults to qris.
    #[serde(default)]
    pub payment_method: Option<String>,
    /// where the e-wallet sends the buyer back to
    #[serde(default)]
    pub redirect_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DonationView {
    pub id: Uuid,
    pub creator_id: i32,
    pub product_id: Option<i32>,
    pub buyer_name: String,
    pub buyer_email: String,
    pub amount: i64,
    pub quantity: i32,
    pub message: String,
    pub payment_id: Option<String>,
    pub payment_status: String,
    pub payment_method: String,
    pub platform_trade_no: Option<String>,
    pub product_name: Option<String>,
    pub product_emoji: Option<String>,
    pub created_at: i64,
    pub paid_at: Option<i64>,
}

impl From<donation::Model> for DonationView {
    fn from(d: donation::Model) -> Self {
        Self {
            id: d.id,
            creator_id: d.user_id,
            product_id: d.product_id,
            buyer_name: d.buyer_name,
            buyer_email: d.buyer_email,
            amount: d.amount,
            quantity: d.quantity,
            message: d.message,
            payment_id: d.payment_id,
            payment_status: d.payment_status.as_str().to_owned(),
            payment_method: d.payment_method,
            platform_trade_no: d.platform_trade_no,
            product_name: d.product_name,
            product_emoji: d.product_emoji,
            created_at: d.created_at,
            paid_at: d.paid_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatorView {
    pub id: i32,
    pub username: String,
    pub name: String,
}

impl From<user::Model> for CreatorView {
    fn from(u: user::Model) -> Self {
        Self {
            id: u.id,
            username: u.username,
            name: u.name,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductView {
    pub id: i32,
    pub name: String,
    pub emoji: String,
    pub amount: i64,
}

impl From<product::Model> for ProductView {
    fn from(p: product::Model) -> Self {
        Self {
            id: p.id,
            name: p.name,
            emoji: p.emoji,
            amount: p.amount,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DonationDetail {
    #[serde(flatten)]
    pub donation: DonationView,
    pub creator: Option<CreatorView>,
    pub product: Option<ProductView>,
}

/// A created donation with what the buyer needs to pay it.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedDonation {
    pub donation: DonationView,
    pub payment_url: String,
    /// the order id
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qris_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_actions: Option<PaymentActions>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub expired_time: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub platform_trade_no: String,
    pub payment_type: String,
}

fn is_email(s: &str) -> bool {
    match s.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !s.contains(' '),
        None => false,
    }
}

/// Donation service
pub struct Service {
    ledger: Arc<Ledger>,
    reconciler: Reconciler,
    gateway: SharedGateway,
    limits: setting::Donation,
}

impl Service {
    pub fn new(
        conn: DbConn,
        gateway: SharedGateway,
        alerts: Arc<AlertHub>,
        auth: WebhookAuth,
        webhook_path: String,
        limits: setting::Donation,
    ) -> Self {
        let ledger = Arc::new(Ledger::new(conn, alerts));
        let reconciler = Reconciler::new(gateway.clone(), ledger.clone(), auth, webhook_path);
        Self {
            ledger,
            reconciler,
            gateway,
            limits,
        }
    }

    pub fn db(&self) -> &DbConn {
        self.ledger.db()
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn alerts(&self) -> &Arc<AlertHub> {
        self.ledger.alerts()
    }

    pub async fn get_creator(&self, id: i32) -> Result<Option<user::Model>> {
        Ok(user::Entity::find_by_id(id).one(self.db()).await?)
    }

    pub async fn get_creator_by_username(&self, username: &str) -> Result<Option<user::Model>> {
        Ok(user::Entity::find()
            .filter(user::Column::Username.eq(username))
            .one(self.db())
            .await?)
    }

    pub async fn get_creator_by_stream_key(&self, key: &str) -> Result<Option<user::Model>> {
        if key.is_empty() {
            return Ok(None);
        }
        Ok(user::Entity::find()
            .filter(user::Column::StreamKey.eq(key))
            .one(self.db())
            .await?)
    }

    pub async fn get_product(&self, id: i32) -> Result<Option<product::Model>> {
        Ok(product::Entity::find_by_id(id).one(self.db()).await?)
    }

    /// Donation by id with the creator and product.
    pub async fn get_donation(&self, id: Uuid) -> Result<DonationDetail> {
        let donation = self
            .ledger
            .find_by_id(id)
            .await?
            .ok_or_else(|| Error::NotFound("donation".to_owned()))?;
        let creator = self.get_creator(donation.user_id).await?;
        let product = match donation.product_id {
            Some(pid) => self.get_product(pid).await?,
            None => None,
        };
        Ok(DonationDetail {
            donation: donation.into(),
            creator: creator.map(Into::into),
            product: product.map(Into::into),
        })
    }

    fn validate(&self, input: &CreateDonation) -> Result<PaymentMethod> {
        if input.buyer_name.trim().is_empty() {
            return Err(Error::InvalidParam("buyer_name is required".to_owned()));
        }
        if !input.buyer_email.is_empty() && !is_email(&input.buyer_email) {
            return Err(Error::InvalidParam("buyer_email is invalid".to_owned()));
        }
        let method = match input.payment_method.as_deref() {
            None | Some("") => PaymentMethod::Qris,
            Some(tag) => tag
                .parse()
                .map_err(|_| Error::InvalidParam(format!("invalid payment method: {}", tag)))?,
        };
        if input.amount < self.limits.min_amount {
            return Err(Error::InvalidParam(format!(
                "minimum amount is Rp {}",
                self.limits.min_amount
            )));
        }
        if method.is_ewallet() && input.amount < self.limits.ewallet_min_amount {
            return Err(Error::InvalidParam(format!(
                "minimum amount for e-wallet is Rp {}",
                self.limits.ewallet_min_amount
            )));
        }
        Ok(method)
    }

    /// Record a pending donation and open its gateway transaction.
    ///
    /// Everything is validated before the gateway is called. The order id is
    /// assigned before the transaction opens so an early notification finds it.
    pub async fn create_donation(&self, input: CreateDonation) -> Result<CreatedDonation> {
        let method = self.validate(&input)?;
        let creator = self
            .get_creator_by_username(&input.creator_username)
            .await?
            .ok_or_else(|| Error::NotFound("creator".to_owned()))?;

        let product = match input.product_id {
            Some(id) => self.get_product(id).await?.filter(|p| p.is_active),
            None => None,
        };

        let (model, order_id) = self
            .ledger
            .create_with_order_id(NewDonation {
                user_id: creator.id,
                product_id: product.as_ref().map(|p| p.id),
                buyer_name: input.buyer_name.trim().to_owned(),
                buyer_email: input.buyer_email,
                amount: input.amount,
                quantity: input.quantity.unwrap_or(1).max(1),
                message: input.message,
                payment_method: method,
                product_name: product.as_ref().map(|p| p.name.clone()),
                product_emoji: product.as_ref().map(|p| p.emoji.clone()),
            })
            .await?;

        let tx = self
            .gateway
            .open(&OpenRequest {
                order_id: order_id.clone(),
                amount: model.amount,
                method,
                product_name: format!("Donasi untuk {}", creator.name),
                redirect_url: input.redirect_url,
            })
            .await
            .map_err(|e| {
                error!(order_id, error = e.to_string(), "Failed to create payment");
                e
            })?;

        if !tx.platform_trade_no.is_empty() {
            self.ledger
                .set_platform_trade_no(&order_id, &tx.platform_trade_no)
                .await?;
        }

        let donation = match self.ledger.find_by_id(model.id).await? {
            Some(d) => d,
            None => {
                warn!(order_id, "Donation vanished after creation");
                return Err(Error::NotFound("donation".to_owned()));
            }
        };
        info!(
            order_id,
            creator = creator.id,
            amount = donation.amount,
            method = method.as_str(),
            "Donation created"
        );

        let (payment_url, qr_code, qris_url, payment_actions) = match tx.display {
            PaymentDisplay::Qris { qr_code, qris_url } => {
                (qris_url.clone(), Some(qr_code), Some(qris_url), None)
            }
            PaymentDisplay::EWallet {
                payment_url,
                actions,
            } => (payment_url, None, None, actions),
        };

        Ok(CreatedDonation {
            donation: donation.into(),
            payment_url,
            token: order_id,
            qr_code,
            qris_url,
            payment_actions,
            expired_time: tx.expired_time,
            platform_trade_no: tx.platform_trade_no,
            payment_type: method.as_str().to_owned(),
        })
    }
}
