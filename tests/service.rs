// RUST_TEST_THREADS=1 cargo test --test service -- --nocapture

use anyhow::Result;
use entity::{donation, product};
use jajanin::{AppState, CreateDonation, Error};
use paylabs_client::PaymentMethod;
use sea_orm::{ActiveModelTrait, EntityTrait, PaginatorTrait, Set};
use serde_json::json;
use util::{create_test_state, seed_creator, seed_product, STREAM_KEY};

mod util;

fn input(amount: i64, method: Option<&str>) -> CreateDonation {
    CreateDonation {
        creator_username: "budi".to_owned(),
        product_id: None,
        buyer_name: "Andi".to_owned(),
        buyer_email: "andi@example.com".to_owned(),
        amount,
        quantity: None,
        message: "semangat".to_owned(),
        payment_method: method.map(ToOwned::to_owned),
        redirect_url: Some("https://jajanin.id/payment/status".to_owned()),
    }
}

async fn donation_count(state: &AppState) -> Result<u64> {
    Ok(donation::Entity::find().count(state.service.db()).await?)
}

#[test]
fn request_body() -> Result<()> {
    let req: CreateDonation = serde_json::from_value(json!({
        "creator_username": "budi",
        "buyer_name": "Andi",
        "amount": "15000",
    }))?;
    assert_eq!(req.amount, 15000);
    assert_eq!(req.buyer_email, "");
    assert_eq!(req.message, "");
    assert_eq!(req.payment_method, None);

    let req: CreateDonation = serde_json::from_value(json!({
        "creator_username": "budi",
        "buyer_name": "Andi",
        "amount": 15000,
        "quantity": 3,
        "payment_method": "ovo",
    }))?;
    assert_eq!(req.amount, 15000);
    assert_eq!(req.quantity, Some(3));

    assert!(serde_json::from_value::<CreateDonation>(json!({
        "creator_username": "budi",
        "buyer_name": "Andi",
        "amount": "lima ribu",
    }))
    .is_err());
    Ok(())
}

#[tokio::test]
async fn create_qris() -> Result<()> {
    let (state, gateway) = create_test_state().await?;
    let creator = seed_creator(&state).await?;

    let created = state.service.create_donation(input(5000, None)).await?;
    assert!(created.token.starts_with("JJN-"));
    assert_eq!(created.token.len(), 12);
    assert_eq!(created.payment_type, "qris");
    assert_eq!(created.expired_time, "20240101001500");

    let d = &created.donation;
    assert_eq!(d.creator_id, creator.id);
    assert_eq!(d.payment_status, "pending");
    assert_eq!(d.payment_method, "qris");
    assert_eq!(d.quantity, 1);
    assert_eq!(d.payment_id.as_deref(), Some(created.token.as_str()));
    assert_eq!(d.platform_trade_no, Some(format!("P-{}", created.token)));
    assert_eq!(d.paid_at, None);
    assert_eq!(d.product_name, None);

    let json = serde_json::to_value(&created)?;
    assert_eq!(json["qr_code"], "00020101021226");
    assert_eq!(json["payment_url"], json["qris_url"]);
    assert!(json.get("payment_actions").is_none());

    let opened = gateway.opened.lock();
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].method, PaymentMethod::Qris);
    assert_eq!(opened[0].product_name, "Donasi untuk Budi");
    Ok(())
}

#[tokio::test]
async fn create_ewallet() -> Result<()> {
    let (state, gateway) = create_test_state().await?;
    seed_creator(&state).await?;

    let created = state
        .service
        .create_donation(input(10000, Some("dana")))
        .await?;
    assert_eq!(created.payment_type, "dana");
    assert_eq!(created.donation.payment_method, "dana");
    assert_eq!(
        created.payment_url,
        format!("https://pay.example/{}", created.token)
    );
    assert!(created.qr_code.is_none());
    assert!(created.payment_actions.is_some());

    let opened = gateway.opened.lock();
    assert_eq!(opened[0].method, PaymentMethod::Dana);
    assert_eq!(
        opened[0].redirect_url.as_deref(),
        Some("https://jajanin.id/payment/status")
    );
    Ok(())
}

#[tokio::test]
async fn validation_before_gateway() -> Result<()> {
    let (state, gateway) = create_test_state().await?;
    seed_creator(&state).await?;
    let service = &state.service;

    // e-wallet minimum
    let res = service.create_donation(input(5000, Some("dana"))).await;
    assert!(matches!(res, Err(Error::InvalidParam(_))));
    // general minimum
    let res = service.create_donation(input(999, None)).await;
    assert!(matches!(res, Err(Error::InvalidParam(_))));
    let res = service.create_donation(input(5000, Some("bank"))).await;
    assert!(matches!(res, Err(Error::InvalidParam(_))));

    let mut bad = input(5000, None);
    bad.buyer_name = "  ".to_owned();
    assert!(matches!(
        service.create_donation(bad).await,
        Err(Error::InvalidParam(_))
    ));
    let mut bad = input(5000, None);
    bad.buyer_email = "andi".to_owned();
    assert!(matches!(
        service.create_donation(bad).await,
        Err(Error::InvalidParam(_))
    ));
    let mut bad = input(5000, None);
    bad.creator_username = "nobody".to_owned();
    assert!(matches!(
        service.create_donation(bad).await,
        Err(Error::NotFound(_))
    ));

    assert_eq!(gateway.calls(), 0);
    assert_eq!(donation_count(&state).await?, 0);

    // email is optional
    let mut ok = input(1000, Some(""));
    ok.buyer_email = String::new();
    service.create_donation(ok).await?;
    assert_eq!(gateway.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn open_failure() -> Result<()> {
    let (state, gateway) = create_test_state().await?;
    seed_creator(&state).await?;
    *gateway.open_error.lock() = Some(("PARAM_ERROR".to_owned(), "amount".to_owned()));

    let res = state.service.create_donation(input(5000, None)).await;
    assert!(matches!(res, Err(Error::Gateway(_))));
    assert_eq!(gateway.opened.lock().len(), 1);

    // left pending with its order id, never paid
    let rows = donation::Entity::find().all(state.service.db()).await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].payment_status, donation::PaymentStatus::Pending);
    assert!(rows[0].payment_id.is_some());
    assert_eq!(rows[0].platform_trade_no, None);
    Ok(())
}

#[tokio::test]
async fn product_snapshot() -> Result<()> {
    let (state, _) = create_test_state().await?;
    let creator = seed_creator(&state).await?;
    let kopi = seed_product(&state, &creator).await?;

    let mut req = input(10000, None);
    req.product_id = Some(kopi.id);
    req.quantity = Some(2);
    let created = state.service.create_donation(req).await?;
    assert_eq!(created.donation.product_id, Some(kopi.id));
    assert_eq!(created.donation.product_name.as_deref(), Some("Kopi"));
    assert_eq!(created.donation.product_emoji.as_deref(), Some("☕"));
    assert_eq!(created.donation.quantity, 2);

    // renaming the product later leaves the donation as it was
    let mut active: product::ActiveModel = kopi.clone().into();
    active.name = Set("Kopi Susu".to_owned());
    active.is_active = Set(false);
    active.update(state.service.db()).await?;
    let detail = state.service.get_donation(created.donation.id).await?;
    assert_eq!(detail.donation.product_name.as_deref(), Some("Kopi"));
    assert_eq!(detail.product.unwrap().name, "Kopi Susu");

    // inactive products are not attached
    let mut req = input(5000, None);
    req.product_id = Some(kopi.id);
    let created = state.service.create_donation(req).await?;
    assert_eq!(created.donation.product_id, None);
    assert_eq!(created.donation.product_name, None);

    let mut req = input(5000, None);
    req.product_id = Some(404);
    let created = state.service.create_donation(req).await?;
    assert_eq!(created.donation.product_id, None);
    Ok(())
}

#[tokio::test]
async fn lookups() -> Result<()> {
    let (state, _) = create_test_state().await?;
    let creator = seed_creator(&state).await?;
    let service = &state.service;

    let found = service.get_creator_by_stream_key(STREAM_KEY).await?.unwrap();
    assert_eq!(found.id, creator.id);
    assert!(service.get_creator_by_stream_key("").await?.is_none());
    assert!(service.get_creator_by_stream_key("sk-none").await?.is_none());
    assert_eq!(
        service.get_creator_by_username("budi").await?.unwrap().id,
        creator.id
    );

    let res = service.get_donation(uuid::Uuid::new_v4()).await;
    assert!(matches!(res, Err(Error::NotFound(_))));

    let created = service.create_donation(input(5000, None)).await?;
    let detail = service.get_donation(created.donation.id).await?;
    assert_eq!(detail.donation.payment_id, created.donation.payment_id);
    assert_eq!(detail.creator.unwrap().name, "Budi");
    assert!(detail.product.is_none());
    Ok(())
}
