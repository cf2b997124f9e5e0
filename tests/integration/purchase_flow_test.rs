use mobile_store_purchase::{
    models::{common::BuildProfile, product::PriceScale, receipt::{FAKE_PURCHASE_KEY, FINALIZE_TYPE_KEY}},
    FinalizeKind, ProductId, PurchaseError, PurchasePhase, PurchaseReceipt, PurchaseService,
    PurchaseVerifier, StoreNotification, VerificationClient,
};
use mockito::{Matcher, Server};
use serde_json::json;
use std::{sync::Arc, time::Duration};

use super::support::{eventually, offer, shop_config, with_verification, AdapterCall, Harness};

fn verifier(url: String) -> Arc<dyn PurchaseVerifier> {
    Arc::new(VerificationClient::new(url, "secret", Duration::from_secs(2), false).unwrap())
}

fn gems() -> ProductId {
    ProductId::from("gems_100")
}

fn purchase_call(id: &str, consumable: bool) -> AdapterCall {
    AdapterCall::Purchase {
        product_id: ProductId::from(id),
        consumable,
    }
}

#[tokio::test]
async fn verified_purchase_is_consumed() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/verify")
        .match_header("authorization", "Bearer secret")
        .match_body(Matcher::Json(
            json!({"tag": "Shop.Gems100", "purchaseToken": "tx-100"}),
        ))
        .with_status(200)
        .create_async()
        .await;

    let url = format!("{}/verify", server.url());
    let config = with_verification(shop_config(), url.clone());
    let h = Harness::spawn_with_scale(config, Some(verifier(url)), PriceScale::Micros);
    h.seed_catalog(vec![offer("gems_100", 2_990_000)]).await;

    assert_eq!(h.service.price("gems_100").await.unwrap(), 2);
    assert!(h.service.can_buy("gems_100").await.unwrap());

    let ticket = h.service.buy("gems_100").await.unwrap();
    eventually(|| h.adapter.store_calls() == vec![purchase_call("gems_100", true)]).await;
    assert_eq!(
        h.service.session_phase("gems_100").await.unwrap(),
        Some(PurchasePhase::PurchaseInFlight)
    );

    h.adapter
        .sink()
        .purchase_succeeded(PurchaseReceipt::new("gems_100", "tx-100"));

    let receipt = ticket.outcome().await.unwrap();
    mock.assert_async().await;

    assert_eq!(receipt.metadata[FINALIZE_TYPE_KEY], "Consume");
    assert_eq!(
        h.adapter.store_calls(),
        vec![
            purchase_call("gems_100", true),
            AdapterCall::Finalize {
                transaction_id: "tx-100".to_string(),
                kind: FinalizeKind::Consume,
            },
        ]
    );
    assert_eq!(h.service.session_phase("gems_100").await.unwrap(), None);
    assert_eq!(
        *h.ui.events.lock().unwrap(),
        vec!["open:gems_100".to_string(), "close:gems_100".to_string()]
    );
}

#[tokio::test]
async fn rejected_verification_is_never_finalized() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/verify")
        .with_status(403)
        .with_body(r#"{"error":"invalid token"}"#)
        .create_async()
        .await;

    let url = format!("{}/verify", server.url());
    let config = with_verification(shop_config(), url.clone());
    let mut h = Harness::spawn(config, Some(verifier(url)));
    h.seed_catalog(vec![offer("gems_100", 3)]).await;

    let ticket = h.service.buy("gems_100").await.unwrap();
    eventually(|| !h.adapter.store_calls().is_empty()).await;
    h.adapter
        .sink()
        .purchase_succeeded(PurchaseReceipt::new("gems_100", "tx-forged"));

    let result = ticket.outcome().await;
    mock.assert_async().await;

    assert!(matches!(result, Err(PurchaseError::VerificationFailed(_))));
    assert_eq!(h.adapter.store_calls(), vec![purchase_call("gems_100", true)]);

    let completed = h
        .next_notification(|n| matches!(n, StoreNotification::PurchaseCompleted { .. }))
        .await;
    assert_eq!(
        completed,
        StoreNotification::PurchaseCompleted {
            product_id: gems(),
            success: false
        }
    );

    // Nothing pending, the item can be bought again
    assert!(h.service.can_buy("gems_100").await.unwrap());
}

#[tokio::test]
async fn unverified_shop_finalizes_directly() {
    let h = Harness::spawn(shop_config(), None);
    h.seed_catalog(vec![offer("gems_100", 3)]).await;

    let ticket = h.service.buy("gems_100").await.unwrap();
    eventually(|| !h.adapter.store_calls().is_empty()).await;
    h.adapter
        .sink()
        .purchase_succeeded(PurchaseReceipt::new("gems_100", "tx-1"));

    let receipt = ticket.outcome().await.unwrap();
    assert_eq!(receipt.transaction_id, "tx-1");
    assert_eq!(
        h.adapter.store_calls().last(),
        Some(&AdapterCall::Finalize {
            transaction_id: "tx-1".to_string(),
            kind: FinalizeKind::Consume,
        })
    );
}

#[tokio::test]
async fn item_opted_out_of_verification_skips_backend() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/verify")
        .with_status(200)
        .expect(0)
        .create_async()
        .await;

    let url = format!("{}/verify", server.url());
    let mut config = with_verification(shop_config(), url.clone());
    config.store.items[0].skip_verification = true;
    let h = Harness::spawn(config, Some(verifier(url)));
    h.seed_catalog(vec![offer("gems_100", 3)]).await;

    let ticket = h.service.buy("gems_100").await.unwrap();
    eventually(|| !h.adapter.store_calls().is_empty()).await;
    h.adapter
        .sink()
        .purchase_succeeded(PurchaseReceipt::new("gems_100", "tx-1"));

    assert!(ticket.outcome().await.is_ok());
    mock.assert_async().await;
}

#[tokio::test]
async fn non_consumable_is_acknowledged() {
    let h = Harness::spawn(shop_config(), None);
    h.seed_catalog(vec![offer("no_ads", 5)]).await;

    let ticket = h.service.buy("no_ads").await.unwrap();
    eventually(|| !h.adapter.store_calls().is_empty()).await;
    h.adapter
        .sink()
        .purchase_succeeded(PurchaseReceipt::new("no_ads", "tx-ads"));

    let receipt = ticket.outcome().await.unwrap();
    assert_eq!(receipt.finalize_kind(), Some(FinalizeKind::Acknowledge));
    assert_eq!(
        h.adapter.store_calls(),
        vec![
            purchase_call("no_ads", false),
            AdapterCall::Finalize {
                transaction_id: "tx-ads".to_string(),
                kind: FinalizeKind::Acknowledge,
            },
        ]
    );
}

#[tokio::test]
async fn duplicate_buy_is_rejected_without_touching_the_session() {
    let h = Harness::spawn(shop_config(), None);
    h.seed_catalog(vec![offer("gems_100", 3)]).await;

    let ticket = h.service.buy("gems_100").await.unwrap();
    let second = h.service.buy("gems_100").await;

    assert!(matches!(second, Err(PurchaseError::DuplicateInFlight(ref id)) if *id == gems()));
    assert_eq!(
        h.service.session_phase("gems_100").await.unwrap(),
        Some(PurchasePhase::PurchaseInFlight)
    );
    assert!(!h.service.can_buy("gems_100").await.unwrap());

    h.adapter
        .sink()
        .purchase_succeeded(PurchaseReceipt::new("gems_100", "tx-1"));
    assert!(ticket.outcome().await.is_ok());

    let purchases = h
        .adapter
        .store_calls()
        .into_iter()
        .filter(|call| matches!(call, AdapterCall::Purchase { .. }))
        .count();
    assert_eq!(purchases, 1);
}

#[tokio::test]
async fn buy_waits_for_the_catalog() {
    let h = Harness::spawn(shop_config(), None);

    let ticket = h.service.buy("gems_100").await.unwrap();
    assert_eq!(
        h.service.session_phase("gems_100").await.unwrap(),
        Some(PurchasePhase::AwaitingCatalog)
    );
    assert_eq!(
        h.adapter.calls(),
        vec![AdapterCall::RequestProducts(vec![gems()])]
    );
    assert_eq!(h.service.price("gems_100").await.unwrap(), 0);
    assert_eq!(h.service.price_text("gems_100").await.unwrap(), "");

    h.adapter.sink().products_received(vec![offer("gems_100", 3)]);
    eventually(|| h.adapter.store_calls() == vec![purchase_call("gems_100", true)]).await;

    h.adapter
        .sink()
        .purchase_succeeded(PurchaseReceipt::new("gems_100", "tx-1"));
    assert!(ticket.outcome().await.is_ok());
    assert_eq!(h.service.price_text("gems_100").await.unwrap(), "$3");
}

#[tokio::test]
async fn catalog_wait_times_out() {
    let mut config = shop_config();
    config.purchase.catalog_wait_max_updates = 0;
    config.purchase.catalog_wait_timeout_ms = Some(50);
    let h = Harness::spawn(config, None);

    let ticket = h.service.buy("gems_100").await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(2), ticket.outcome())
        .await
        .unwrap();

    assert!(matches!(result, Err(PurchaseError::CatalogUnavailable(_))));
    assert!(h.adapter.store_calls().is_empty());
}

#[tokio::test]
async fn catalog_wait_gives_up_after_unrelated_updates() {
    let mut config = shop_config();
    config.purchase.catalog_wait_max_updates = 1;
    config.purchase.catalog_wait_timeout_ms = None;
    let h = Harness::spawn(config, None);

    // gems_500 queues behind the prefetch batch, so the first update is unrelated
    h.service.request_all_products().await.unwrap();
    let ticket = h.service.buy("gems_500").await.unwrap();
    h.adapter
        .sink()
        .products_received(vec![offer("gems_100", 3), offer("no_ads", 5)]);

    let result = ticket.outcome().await;
    assert!(
        matches!(result, Err(PurchaseError::CatalogUnavailable(ref id)) if id.as_str() == "gems_500")
    );
}

#[tokio::test]
async fn products_queued_during_a_fetch_are_requested_when_it_completes() {
    let h = Harness::spawn(shop_config(), None);

    h.service.request_all_products().await.unwrap();
    let ticket = h.service.buy("gems_500").await.unwrap();
    assert_eq!(
        h.adapter.calls(),
        vec![AdapterCall::RequestProducts(vec![gems(), ProductId::from("no_ads")])]
    );

    h.adapter
        .sink()
        .products_received(vec![offer("gems_100", 3), offer("no_ads", 5)]);
    eventually(|| {
        h.adapter
            .calls()
            .contains(&AdapterCall::RequestProducts(vec![ProductId::from("gems_500")]))
    })
    .await;
    assert_eq!(
        h.service.session_phase("gems_500").await.unwrap(),
        Some(PurchasePhase::AwaitingCatalog)
    );

    h.adapter.sink().products_received(vec![offer("gems_500", 10)]);
    eventually(|| h.adapter.store_calls() == vec![purchase_call("gems_500", true)]).await;
    h.adapter
        .sink()
        .purchase_succeeded(PurchaseReceipt::new("gems_500", "tx-500"));

    assert!(ticket.outcome().await.is_ok());
}

#[tokio::test]
async fn products_queued_during_a_failed_fetch_are_still_requested() {
    let h = Harness::spawn(shop_config(), None);

    h.service.request_all_products().await.unwrap();
    let _ticket = h.service.buy("gems_500").await.unwrap();

    h.adapter.sink().products_query_failed("billing unavailable");
    eventually(|| {
        h.adapter.calls()
            == vec![
                AdapterCall::RequestProducts(vec![gems(), ProductId::from("no_ads")]),
                AdapterCall::RequestProducts(vec![ProductId::from("gems_500")]),
            ]
    })
    .await;

    // Only the failed batch's sessions are failed
    assert_eq!(
        h.service.session_phase("gems_500").await.unwrap(),
        Some(PurchasePhase::AwaitingCatalog)
    );
}

#[tokio::test]
async fn fetch_without_an_offer_fails_the_waiting_session() {
    let mut config = shop_config();
    config.purchase.catalog_wait_max_updates = 0;
    config.purchase.catalog_wait_timeout_ms = None;
    let h = Harness::spawn(config, None);

    let ticket = h.service.buy("gems_500").await.unwrap();
    h.adapter.sink().products_received(vec![offer("gems_100", 3)]);

    let result = tokio::time::timeout(Duration::from_secs(2), ticket.outcome())
        .await
        .unwrap();
    assert!(
        matches!(result, Err(PurchaseError::CatalogUnavailable(ref id)) if id.as_str() == "gems_500")
    );
    assert!(h.adapter.store_calls().is_empty());
    assert!(h.service.offer("gems_100").await.unwrap().is_some());
}

#[tokio::test]
async fn failed_fetch_fails_the_waiting_session() {
    let mut h = Harness::spawn(shop_config(), None);

    let ticket = h.service.buy("gems_100").await.unwrap();
    h.adapter.sink().products_query_failed("billing unavailable");

    let result = ticket.outcome().await;
    assert!(matches!(result, Err(PurchaseError::CatalogFetchFailed(ref r)) if r == "billing unavailable"));

    let notification = h
        .next_notification(|n| matches!(n, StoreNotification::CatalogFetchFailed { .. }))
        .await;
    assert_eq!(
        notification,
        StoreNotification::CatalogFetchFailed {
            reason: "billing unavailable".to_string()
        }
    );
}

#[tokio::test]
async fn unavailable_offer_cannot_be_bought() {
    let h = Harness::spawn(shop_config(), None);
    let mut unavailable = offer("gems_100", 0);
    unavailable.available = false;
    h.seed_catalog(vec![unavailable]).await;

    assert!(!h.service.can_buy("gems_100").await.unwrap());

    let ticket = h.service.buy("gems_100").await.unwrap();
    assert!(matches!(
        ticket.outcome().await,
        Err(PurchaseError::CatalogUnavailable(_))
    ));
    assert!(h.adapter.store_calls().is_empty());
}

#[tokio::test]
async fn anonymous_store_failure_fails_every_checkout() {
    let h = Harness::spawn(shop_config(), None);
    h.seed_catalog(vec![offer("gems_100", 3), offer("no_ads", 5)]).await;

    let gems_ticket = h.service.buy("gems_100").await.unwrap();
    let ads_ticket = h.service.buy("no_ads").await.unwrap();
    eventually(|| h.adapter.store_calls().len() == 2).await;

    h.adapter.sink().purchase_failed(None, "Purchase JSON deserialization fail");

    for result in [gems_ticket.outcome().await, ads_ticket.outcome().await] {
        assert!(matches!(result, Err(PurchaseError::PurchaseRejectedByStore(_))));
    }
}

#[tokio::test]
async fn store_failure_for_one_product_leaves_others_running() {
    let h = Harness::spawn(shop_config(), None);
    h.seed_catalog(vec![offer("gems_100", 3), offer("no_ads", 5)]).await;

    let gems_ticket = h.service.buy("gems_100").await.unwrap();
    let _ads_ticket = h.service.buy("no_ads").await.unwrap();
    eventually(|| h.adapter.store_calls().len() == 2).await;

    h.adapter
        .sink()
        .purchase_failed(Some(gems()), "UserCancelled");

    assert!(matches!(
        gems_ticket.outcome().await,
        Err(PurchaseError::PurchaseRejectedByStore(ref r)) if r == "UserCancelled"
    ));
    assert_eq!(
        h.service.session_phase("no_ads").await.unwrap(),
        Some(PurchasePhase::PurchaseInFlight)
    );
}

#[tokio::test]
async fn purchase_without_a_session_is_surfaced() {
    let mut h = Harness::spawn(shop_config(), None);

    h.adapter
        .sink()
        .purchase_succeeded(PurchaseReceipt::new("gems_100", "tx-orphan"));

    let notification = h
        .next_notification(|n| matches!(n, StoreNotification::UnmatchedPurchase { .. }))
        .await;
    assert_eq!(
        notification,
        StoreNotification::UnmatchedPurchase {
            receipt: PurchaseReceipt::new("gems_100", "tx-orphan")
        }
    );
    assert!(h.adapter.store_calls().is_empty());
}

#[tokio::test]
async fn repeated_completion_of_a_settled_transaction_is_ignored() {
    let mut h = Harness::spawn(shop_config(), None);
    h.seed_catalog(vec![offer("gems_100", 3)]).await;

    let ticket = h.service.buy("gems_100").await.unwrap();
    eventually(|| !h.adapter.store_calls().is_empty()).await;
    h.adapter
        .sink()
        .purchase_succeeded(PurchaseReceipt::new("gems_100", "tx-1"));
    assert!(ticket.outcome().await.is_ok());

    // Store echo of the settled transaction, then a genuinely unknown one
    h.adapter
        .sink()
        .purchase_succeeded(PurchaseReceipt::new("gems_100", "tx-1"));
    h.adapter
        .sink()
        .purchase_succeeded(PurchaseReceipt::new("gems_100", "tx-2"));

    let notification = h
        .next_notification(|n| matches!(n, StoreNotification::UnmatchedPurchase { .. }))
        .await;
    assert_eq!(
        notification,
        StoreNotification::UnmatchedPurchase {
            receipt: PurchaseReceipt::new("gems_100", "tx-2")
        }
    );

    let finalizes = h
        .adapter
        .store_calls()
        .into_iter()
        .filter(|call| matches!(call, AdapterCall::Finalize { .. }))
        .count();
    assert_eq!(finalizes, 1);
}

#[tokio::test]
async fn item_is_unbuyable_until_finalize_is_confirmed() {
    let mut config = shop_config();
    config.purchase.finalize_cooldown_ms = 60_000;
    let h = Harness::spawn(config, None);
    h.seed_catalog(vec![offer("gems_100", 3)]).await;

    let ticket = h.service.buy("gems_100").await.unwrap();
    eventually(|| !h.adapter.store_calls().is_empty()).await;
    h.adapter
        .sink()
        .purchase_succeeded(PurchaseReceipt::new("gems_100", "tx-1"));
    assert!(ticket.outcome().await.is_ok());

    assert!(!h.service.can_buy("gems_100").await.unwrap());

    h.adapter.sink().finalize_completed("tx-1");
    let mut attempts = 0;
    while !h.service.can_buy("gems_100").await.unwrap() {
        attempts += 1;
        assert!(attempts < 200, "finalize confirmation not applied");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn finalize_cooldown_releases_the_item() {
    let mut config = shop_config();
    config.purchase.finalize_cooldown_ms = 50;
    let h = Harness::spawn(config, None);
    h.seed_catalog(vec![offer("gems_100", 3)]).await;

    let ticket = h.service.buy("gems_100").await.unwrap();
    eventually(|| !h.adapter.store_calls().is_empty()).await;
    h.adapter
        .sink()
        .purchase_succeeded(PurchaseReceipt::new("gems_100", "tx-1"));
    assert!(ticket.outcome().await.is_ok());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.service.can_buy("gems_100").await.unwrap());
}

#[tokio::test]
async fn restore_reports_items_without_finalizing() {
    let mut h = Harness::spawn(shop_config(), None);

    h.service.restore_purchases().await.unwrap();
    eventually(|| h.adapter.calls() == vec![AdapterCall::Restore(vec![ProductId::from("no_ads")])])
        .await;

    h.adapter
        .sink()
        .purchase_restored(PurchaseReceipt::new("no_ads", "tx-old"));

    let notification = h
        .next_notification(|n| matches!(n, StoreNotification::PurchaseRestored { .. }))
        .await;
    assert_eq!(
        notification,
        StoreNotification::PurchaseRestored {
            receipt: PurchaseReceipt::new("no_ads", "tx-old"),
            item_tag: Some("Shop.NoAds".to_string()),
        }
    );

    h.adapter.sink().restore_failed("not signed in");
    let failed = h
        .next_notification(|n| matches!(n, StoreNotification::RestoreFailed { .. }))
        .await;
    assert_eq!(
        failed,
        StoreNotification::RestoreFailed {
            reason: "not signed in".to_string()
        }
    );
    assert_eq!(h.adapter.store_calls().len(), 1);
}

#[tokio::test]
async fn request_all_products_prefetches_configured_ids() {
    let mut config = shop_config();
    config.store.product_ids = vec!["starter_pack".to_string(), "gems_100".to_string()];
    let h = Harness::spawn(config, None);

    h.service.request_all_products().await.unwrap();
    eventually(|| !h.adapter.calls().is_empty()).await;

    assert_eq!(
        h.adapter.calls(),
        vec![AdapterCall::RequestProducts(vec![
            ProductId::from("starter_pack"),
            gems(),
            ProductId::from("no_ads"),
        ])]
    );
}

#[tokio::test]
async fn verification_without_verifier_is_misconfigured() {
    let config = with_verification(shop_config(), "http://localhost/verify".to_string());
    let h = Harness::spawn(config, None);
    h.seed_catalog(vec![offer("gems_100", 3)]).await;

    assert!(matches!(
        h.service.buy("gems_100").await,
        Err(PurchaseError::Misconfigured(_))
    ));
    assert!(h.adapter.store_calls().is_empty());
}

#[tokio::test]
async fn missing_adapter_rejects_buy() {
    let service = PurchaseService::builder(shop_config()).spawn();

    let result = service.buy("gems_100").await;
    assert!(matches!(result, Err(PurchaseError::AdapterMissing(ref p)) if p == "android"));
    assert!(!service.can_buy("gems_100").await.unwrap());
}

#[tokio::test]
async fn fake_purchase_bypasses_the_store() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/verify")
        .match_body(Matcher::Json(
            json!({"tag": "Shop.Gems100", "fakePurchase": true}),
        ))
        .with_status(200)
        .create_async()
        .await;

    let url = format!("{}/verify", server.url());
    let mut config = with_verification(shop_config(), url.clone());
    config.purchase.build_profile = BuildProfile::Development;
    config.purchase.fake_purchases_in_dev_build = true;

    let fake_verifier: Arc<dyn PurchaseVerifier> = Arc::new(
        VerificationClient::new(url, "secret", Duration::from_secs(2), true).unwrap(),
    );
    let service = PurchaseService::builder(config)
        .verifier(fake_verifier)
        .spawn();

    assert!(service.can_buy("gems_100").await.unwrap());

    let receipt = service.buy("gems_100").await.unwrap().outcome().await.unwrap();
    mock.assert_async().await;

    assert!(receipt.transaction_id.starts_with("fake-"));
    assert_eq!(receipt.finalize_kind(), None);
    assert_eq!(receipt.metadata[FAKE_PURCHASE_KEY], "True");
}

#[tokio::test]
async fn fake_purchases_are_off_in_shipping_builds() {
    let mut config = shop_config();
    config.purchase.build_profile = BuildProfile::Shipping;
    config.purchase.fake_purchases_in_dev_build = true;

    let service = PurchaseService::builder(config).spawn();

    assert!(matches!(
        service.buy("gems_100").await,
        Err(PurchaseError::AdapterMissing(_))
    ));
}

#[tokio::test]
async fn ticket_reports_stop_when_service_is_gone() {
    let h = Harness::spawn(shop_config(), None);
    let ticket = h.service.buy("gems_100").await.unwrap();
    drop(h);

    let result = tokio::time::timeout(Duration::from_secs(2), ticket.outcome())
        .await
        .unwrap();
    assert!(matches!(result, Err(PurchaseError::ServiceStopped)));
}
