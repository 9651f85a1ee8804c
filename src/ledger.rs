//! Donation ledger, the only writer of donation payment state.

use crate::{
    alert::{AlertEvent, AlertHub},
    now, Error, Result,
};
use entity::{
    donation::{self, PaymentStatus},
    user,
};
use paylabs_client::PaymentMethod;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DbConn, EntityTrait, QueryFilter, Set,
};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// prefix of merchant trade numbers sent to the gateway
pub const ORDER_PREFIX: &str = "JJN-";
const MAX_CAS_ATTEMPTS: usize = 3;
const MAX_ORDER_ID_ATTEMPTS: usize = 3;

/// `JJN-` followed by the first 8 characters of the donation id
pub fn order_id_for(id: &Uuid) -> String {
    let hyphenated = id.hyphenated().to_string();
    format!("{}{}", ORDER_PREFIX, &hyphenated[..8])
}

/// Result of a status update request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// the row moved to the new status
    Applied,
    /// already in the requested status
    Unchanged,
    /// paid is terminal, nothing written
    AlreadyPaid,
}

#[derive(Debug, Clone)]
pub struct NewDonation {
    pub user_id: i32,
    pub product_id: Option<i32>,
    pub buyer_name: String,
    pub buyer_email: String,
    pub amount: i64,
    pub quantity: i32,
    pub message: String,
    pub payment_method: PaymentMethod,
    pub product_name: Option<String>,
    pub product_emoji: Option<String>,
}

pub struct Ledger {
    conn: DbConn,
    alerts: Arc<AlertHub>,
}

impl Ledger {
    pub fn new(conn: DbConn, alerts: Arc<AlertHub>) -> Self {
        Self { conn, alerts }
    }

    pub fn db(&self) -> &DbConn {
        &self.conn
    }

    pub fn alerts(&self) -> &Arc<AlertHub> {
        &self.alerts
    }

    /// Insert a pending donation without an order id.
    pub async fn create(&self, new: NewDonation) -> Result<donation::Model> {
        self.insert(new, Uuid::new_v4()).await
    }

    async fn insert(&self, new: NewDonation, id: Uuid) -> Result<donation::Model> {
        let now = now() as i64;
        let model = donation::ActiveModel {
            id: Set(id),
            user_id: Set(new.user_id),
            product_id: Set(new.product_id),
            buyer_name: Set(new.buyer_name),
            buyer_email: Set(new.buyer_email),
            amount: Set(new.amount),
            quantity: Set(new.quantity.max(1)),
            message: Set(new.message),
            payment_id: Set(None),
            payment_status: Set(PaymentStatus::Pending),
            payment_method: Set(new.payment_method.as_str().to_owned()),
            platform_trade_no: Set(None),
            product_name: Set(new.product_name),
            product_emoji: Set(new.product_emoji),
            created_at: Set(now),
            updated_at: Set(now),
            paid_at: Set(None),
        };
        Ok(model.insert(self.db()).await?)
    }

    /// Set the order id if none was set yet. Returns false when the donation
    /// already carries one, the stored value is never replaced.
    pub async fn assign_order_id(&self, id: Uuid, order_id: &str) -> Result<bool> {
        let res = donation::Entity::update_many()
            .col_expr(donation::Column::PaymentId, Expr::value(order_id))
            .col_expr(donation::Column::UpdatedAt, Expr::value(now() as i64))
            .filter(donation::Column::Id.eq(id))
            .filter(donation::Column::PaymentId.is_null())
            .exec(self.db())
            .await?;
        Ok(res.rows_affected == 1)
    }

    /// Insert a pending donation and give it its order id.
    pub async fn create_with_order_id(&self, new: NewDonation) -> Result<(donation::Model, String)> {
        self.create_with_order_id_from(new, Uuid::new_v4).await
    }

    /// Like [`Ledger::create_with_order_id`] with ids drawn from `next_id`.
    ///
    /// The order id keeps only 32 bits of the donation id, so it can collide
    /// with an existing one. The colliding row is removed and a fresh id is
    /// tried, a bounded number of times.
    pub async fn create_with_order_id_from<F>(
        &self,
        new: NewDonation,
        mut next_id: F,
    ) -> Result<(donation::Model, String)>
    where
        F: FnMut() -> Uuid,
    {
        for attempt in 0..MAX_ORDER_ID_ATTEMPTS {
            let model = self.insert(new.clone(), next_id()).await?;
            let order_id = order_id_for(&model.id);
            match self.assign_order_id(model.id, &order_id).await {
                Ok(true) => return Ok((model, order_id)),
                Ok(false) => {
                    return Err(Error::Message(format!(
                        "donation {} already has an order id",
                        model.id
                    )))
                }
                Err(e) => {
                    let taken = self
                        .find_by_order_id(&order_id)
                        .await?
                        .map_or(false, |d| d.id != model.id);
                    if !taken {
                        return Err(e);
                    }
                    warn!(order_id, attempt, "Order id collision, retry with a new id");
                    donation::Entity::delete_by_id(model.id)
                        .exec(self.db())
                        .await?;
                }
            }
        }
        Err(Error::Message("could not allocate a unique order id".to_owned()))
    }

    /// Remember the gateway reference, needed later to cancel.
    pub async fn set_platform_trade_no(&self, order_id: &str, trade_no: &str) -> Result<()> {
        donation::Entity::update_many()
            .col_expr(donation::Column::PlatformTradeNo, Expr::value(trade_no))
            .filter(donation::Column::PaymentId.eq(order_id))
            .exec(self.db())
            .await?;
        Ok(())
    }

    pub async fn find_by_order_id(&self, order_id: &str) -> Result<Option<donation::Model>> {
        Ok(donation::Entity::find()
            .filter(donation::Column::PaymentId.eq(order_id))
            .one(self.db())
            .await?)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<donation::Model>> {
        Ok(donation::Entity::find_by_id(id).one(self.db()).await?)
    }

    /// Move a donation to `status`.
    ///
    /// `paid` is terminal and a settled donation never goes back to `pending`.
    /// Any other settled state may still be overwritten, so a payment arriving
    /// after a cancel is recorded as paid.
    ///
    /// The write is a compare-and-set on the status read just before, so of
    /// concurrent callers exactly one applies a given transition and only that
    /// one broadcasts the paid alert. A caller losing the race re-reads and
    /// decides again.
    pub async fn update_status(&self, order_id: &str, status: PaymentStatus) -> Result<Outcome> {
        for attempt in 0..MAX_CAS_ATTEMPTS {
            let current = self
                .find_by_order_id(order_id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("donation {}", order_id)))?;

            if current.payment_status == status {
                info!(
                    order_id,
                    status = status.as_str(),
                    "Payment status already updated, skipping"
                );
                return Ok(Outcome::Unchanged);
            }
            if current.payment_status == PaymentStatus::Paid {
                info!(
                    order_id,
                    status = status.as_str(),
                    "Payment already paid, skipping status update"
                );
                return Ok(Outcome::AlreadyPaid);
            }
            // status never moves back
            if status == PaymentStatus::Pending {
                info!(
                    order_id,
                    current = current.payment_status.as_str(),
                    "Ignoring pending status for settled payment"
                );
                return Ok(Outcome::Unchanged);
            }

            let now = now() as i64;
            let mut update = donation::Entity::update_many()
                .col_expr(donation::Column::PaymentStatus, Expr::value(status.as_str()))
                .col_expr(donation::Column::UpdatedAt, Expr::value(now));
            if status == PaymentStatus::Paid {
                update = update.col_expr(donation::Column::PaidAt, Expr::value(now));
            }
            let res = update
                .filter(donation::Column::Id.eq(current.id))
                .filter(donation::Column::PaymentStatus.eq(current.payment_status.as_str()))
                .exec(self.db())
                .await?;

            if res.rows_affected == 1 {
                info!(
                    order_id,
                    from = current.payment_status.as_str(),
                    to = status.as_str(),
                    "Payment status updated"
                );
                if status == PaymentStatus::Paid {
                    self.alert_paid(&current).await;
                }
                return Ok(Outcome::Applied);
            }
            debug!(order_id, attempt, "Payment status changed concurrently, retry");
        }
        Err(Error::Message(format!(
            "too many concurrent status updates for {}",
            order_id
        )))
    }

    /// The alert failing never undoes the payment.
    async fn alert_paid(&self, donation: &donation::Model) {
        let creator = match user::Entity::find_by_id(donation.user_id)
            .one(self.db())
            .await
        {
            Ok(Some(u)) => u,
            Ok(None) => {
                warn!(creator = donation.user_id, "Creator missing, alert skipped");
                return;
            }
            Err(e) => {
                warn!(error = e.to_string(), "Failed to load creator, alert skipped");
                return;
            }
        };
        let event = AlertEvent {
            supporter_name: donation.buyer_name.clone(),
            amount: donation.amount,
            message: donation.message.clone(),
            creator_name: creator.name,
            product_name: donation.product_name.clone().filter(|s| !s.is_empty()),
            product_emoji: donation.product_emoji.clone().filter(|s| !s.is_empty()),
            quantity: donation.quantity,
        };
        self.alerts.broadcast(&creator.id.to_string(), &event);
    }
}
