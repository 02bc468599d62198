use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use ulid::Ulid;

use crate::engine::queries::PropertyFilter;
use crate::mailer::{MailError, Mailer, LogMailer};
use crate::model::*;
use crate::notify::NotifyHub;

use super::{Engine, EngineError};

fn wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("keja_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(format!("{name}_{}.wal", Ulid::new()));
    let _ = std::fs::remove_file(&path);
    path
}

fn engine(name: &str) -> Arc<Engine> {
    engine_with_mailer(name, Arc::new(LogMailer)).0
}

fn engine_with_mailer(name: &str, mailer: Arc<dyn Mailer>) -> (Arc<Engine>, PathBuf) {
    let path = wal_path(name);
    let e = Engine::new(path.clone(), Arc::new(NotifyHub::new()), mailer).unwrap();
    (Arc::new(e), path)
}

fn listing(images: usize) -> Property {
    Property {
        id: Ulid::nil(),
        title: "Bedsitter, Ruaka".into(),
        location: "Ruaka, Kiambu".into(),
        county: Some("Kiambu".into()),
        town: Some("Ruaka".into()),
        price: Decimal::new(12_000, 0),
        price_type: PriceType::Month,
        kind: PropertyKind::Rental,
        bedrooms: Some(1),
        bathrooms: Some(1),
        area: Some(250),
        rental_type: Some("bedsitter".into()),
        images: (0..images)
            .map(|i| format!("https://img.example/{i}.jpg"))
            .collect(),
        amenities: BTreeMap::new(),
        featured: false,
        created_by: None,
        created_at: Utc::now(),
    }
}

fn d(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn future(days: i64) -> NaiveDate {
    Utc::now().date_naive() + Duration::days(days)
}

fn booking(property_id: PropertyId, check_in: NaiveDate, check_out: NaiveDate) -> Booking {
    Booking {
        id: Ulid::nil(),
        property_id,
        user_id: Ulid::new(),
        guest_name: "Atieno".into(),
        guest_email: "atieno@example.com".into(),
        guest_phone: "+254711000000".into(),
        booking_date: check_in,
        check_in_date: Some(check_in),
        check_out_date: Some(check_out),
        status: BookingStatus::Pending,
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn overlapping_booking_is_rejected() {
    let e = engine("overlap");
    let p = e.create_property(listing(3)).await.unwrap();

    e.request_booking(booking(p.id, future(10), future(15)))
        .await
        .unwrap();
    let err = e
        .request_booking(booking(p.id, future(12), future(20)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Overlap(_)));

    // A shared boundary date also counts as a conflict.
    let err = e
        .request_booking(booking(p.id, future(15), future(18)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Overlap(_)));

    // Clear of the interval is fine.
    e.request_booking(booking(p.id, future(16), future(18)))
        .await
        .unwrap();
}

#[tokio::test]
async fn inverted_stay_is_rejected() {
    let e = engine("inverted");
    let p = e.create_property(listing(3)).await.unwrap();
    let err = e
        .request_booking(booking(p.id, future(15), future(10)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvertedStay { .. }));
}

#[tokio::test]
async fn past_booking_date_is_rejected() {
    let e = engine("past_date");
    let p = e.create_property(listing(3)).await.unwrap();
    let mut b = booking(p.id, future(10), future(15));
    b.booking_date = d("2020-01-01");
    let err = e.request_booking(b).await.unwrap_err();
    assert!(matches!(err, EngineError::PastBookingDate(_)));
}

#[tokio::test]
async fn update_excludes_own_interval() {
    let e = engine("self_exclude");
    let p = e.create_property(listing(3)).await.unwrap();
    let b = e
        .request_booking(booking(p.id, future(10), future(15)))
        .await
        .unwrap();

    // Shifting within its own window must not conflict with itself.
    let mut edit = b.clone();
    edit.check_in_date = Some(future(11));
    edit.check_out_date = Some(future(14));
    let updated = e.update_booking(b.id, edit).await.unwrap();
    assert_eq!(updated.check_in_date, Some(future(11)));

    // But it still conflicts with other bookings.
    let other = e
        .request_booking(booking(p.id, future(20), future(25)))
        .await
        .unwrap();
    let mut clash = updated.clone();
    clash.check_in_date = Some(future(22));
    clash.check_out_date = Some(future(24));
    let err = e.update_booking(b.id, clash).await.unwrap_err();
    assert_eq!(
        match err {
            EngineError::Overlap(id) => id,
            other => panic!("expected overlap, got {other}"),
        },
        other.id
    );
}

#[tokio::test]
async fn image_count_bounds() {
    let e = engine("images");
    assert!(matches!(
        e.create_property(listing(2)).await.unwrap_err(),
        EngineError::ImageCount(2)
    ));
    assert!(matches!(
        e.create_property(listing(7)).await.unwrap_err(),
        EngineError::ImageCount(7)
    ));
    e.create_property(listing(3)).await.unwrap();
    e.create_property(listing(6)).await.unwrap();
}

#[tokio::test]
async fn concurrent_conflicting_requests_admit_exactly_one() {
    let e = engine("race");
    let p = e.create_property(listing(3)).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let e = e.clone();
        let b = booking(p.id, future(10), future(15));
        handles.push(tokio::spawn(async move { e.request_booking(b).await }));
    }

    let mut ok = 0;
    let mut conflicts = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => ok += 1,
            Err(EngineError::Overlap(_)) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(conflicts, 7);
}

#[tokio::test]
async fn cancelling_frees_the_dates() {
    let e = engine("cancel_frees");
    let p = e.create_property(listing(3)).await.unwrap();
    let b = e
        .request_booking(booking(p.id, future(10), future(15)))
        .await
        .unwrap();

    e.set_booking_status(b.id, BookingStatus::Cancelled)
        .await
        .unwrap();
    e.request_booking(booking(p.id, future(10), future(15)))
        .await
        .unwrap();
}

#[tokio::test]
async fn soft_booking_does_not_block() {
    let e = engine("soft");
    let p = e.create_property(listing(3)).await.unwrap();

    let mut soft = booking(p.id, future(10), future(15));
    soft.check_in_date = None;
    soft.check_out_date = None;
    e.request_booking(soft).await.unwrap();

    e.request_booking(booking(p.id, future(1), future(30)))
        .await
        .unwrap();
}

#[tokio::test]
async fn status_transitions_follow_the_table() {
    let e = engine("transitions");
    let p = e.create_property(listing(3)).await.unwrap();
    let b = e
        .request_booking(booking(p.id, future(10), future(15)))
        .await
        .unwrap();
    assert_eq!(b.status, BookingStatus::Pending);

    let confirmed = e
        .set_booking_status(b.id, BookingStatus::Confirmed)
        .await
        .unwrap();
    assert_eq!(confirmed.status, BookingStatus::Confirmed);

    // Confirmed is terminal here.
    let err = e
        .set_booking_status(b.id, BookingStatus::Cancelled)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));
}

#[tokio::test]
async fn requested_status_is_forced_to_pending() {
    let e = engine("force_pending");
    let p = e.create_property(listing(3)).await.unwrap();
    let mut b = booking(p.id, future(10), future(15));
    b.status = BookingStatus::Confirmed;
    let created = e.request_booking(b).await.unwrap();
    assert_eq!(created.status, BookingStatus::Pending);
}

#[tokio::test]
async fn duplicate_review_is_rejected() {
    let e = engine("dup_review");
    let p = e.create_property(listing(3)).await.unwrap();
    let user_id = Ulid::new();
    let review = Review {
        id: Ulid::nil(),
        property_id: p.id,
        user_id,
        rating: 4,
        comment: Some("Clean and quiet".into()),
        created_at: Utc::now(),
    };

    e.add_review(review.clone()).await.unwrap();
    assert!(matches!(
        e.add_review(review.clone()).await.unwrap_err(),
        EngineError::DuplicateReview
    ));

    let mut bad = review;
    bad.user_id = Ulid::new();
    bad.rating = 0;
    assert!(matches!(
        e.add_review(bad).await.unwrap_err(),
        EngineError::InvalidRating(0)
    ));
}

#[tokio::test]
async fn deleting_property_cascades() {
    let e = engine("cascade");
    let p = e.create_property(listing(3)).await.unwrap();
    let b = e
        .request_booking(booking(p.id, future(10), future(15)))
        .await
        .unwrap();

    e.delete_property(p.id).await.unwrap();
    assert!(matches!(
        e.get_property(p.id).await.unwrap_err(),
        EngineError::NotFound(_)
    ));
    assert!(matches!(
        e.get_booking(b.id).await.unwrap_err(),
        EngineError::NotFound(_)
    ));
}

#[tokio::test]
async fn booking_racing_delete_leaves_no_orphan() {
    let e = engine("delete_race");
    for _ in 0..25 {
        let p = e.create_property(listing(3)).await.unwrap();
        let b = booking(p.id, future(10), future(15));

        let deleter = {
            let e = e.clone();
            let id = p.id;
            tokio::spawn(async move { e.delete_property(id).await })
        };
        let booker = {
            let e = e.clone();
            tokio::spawn(async move { e.request_booking(b).await })
        };

        let deleted = deleter.await.unwrap().is_ok();
        let booked = booker.await.unwrap();

        match booked {
            Ok(b) if deleted => {
                // Admitted before the delete: the cascade must have taken it.
                assert!(e.property_of_booking(&b.id).is_none());
                assert!(e.get_booking(b.id).await.is_err());
            }
            Ok(b) => {
                assert_eq!(e.get_booking(b.id).await.unwrap().id, b.id);
            }
            Err(EngineError::NotFound(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
}

#[tokio::test]
async fn duplicate_username_is_rejected() {
    let e = engine("username");
    e.register_user("njeri".into(), Role::User).await.unwrap();
    assert!(matches!(
        e.register_user("njeri".into(), Role::User).await.unwrap_err(),
        EngineError::UsernameTaken(_)
    ));
    assert!(e.find_user_by_username("njeri").is_some());
}

#[tokio::test]
async fn property_filters_and_pagination() {
    let e = engine("filters");
    for i in 0..15 {
        let mut p = listing(3);
        p.featured = i % 2 == 0;
        if i < 5 {
            p.county = Some("Mombasa".into());
            p.location = "Nyali, Mombasa".into();
        }
        e.create_property(p).await.unwrap();
    }

    let (all, info) = e.list_properties(&PropertyFilter::default()).await;
    assert_eq!(all.len(), 12); // default page size
    assert_eq!(info.total_items, 15);
    assert_eq!(info.total_pages, 2);
    assert!(info.has_next);

    let (mombasa, info) = e
        .list_properties(&PropertyFilter {
            county: Some("mombasa".into()),
            ..Default::default()
        })
        .await;
    assert_eq!(mombasa.len(), 5);
    assert_eq!(info.total_items, 5);

    let (featured, _) = e
        .list_properties(&PropertyFilter {
            featured: Some(true),
            ..Default::default()
        })
        .await;
    assert_eq!(featured.len(), 8);
}

#[tokio::test]
async fn replay_restores_state() {
    let path = wal_path("replay");
    let (property, booking_id);
    {
        let e = Engine::new(path.clone(), Arc::new(NotifyHub::new()), Arc::new(LogMailer)).unwrap();
        property = e.create_property(listing(3)).await.unwrap();
        let b = e
            .request_booking(booking(property.id, future(10), future(15)))
            .await
            .unwrap();
        booking_id = b.id;
        e.set_booking_status(b.id, BookingStatus::Confirmed)
            .await
            .unwrap();
    }

    let e = Engine::new(path.clone(), Arc::new(NotifyHub::new()), Arc::new(LogMailer)).unwrap();
    assert_eq!(e.get_property(property.id).await.unwrap(), property);
    let restored = e.get_booking(booking_id).await.unwrap();
    assert_eq!(restored.status, BookingStatus::Confirmed);
    // The replayed booking still blocks its dates.
    let err = e
        .request_booking(booking(property.id, future(12), future(13)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Overlap(_)));
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = wal_path("compact_state");
    let e = Engine::new(path.clone(), Arc::new(NotifyHub::new()), Arc::new(LogMailer)).unwrap();
    e.register_user("admin".into(), Role::Admin).await.unwrap();
    let p = e.create_property(listing(3)).await.unwrap();
    let b = e
        .request_booking(booking(p.id, future(10), future(15)))
        .await
        .unwrap();
    // Churn that compaction should erase from the log.
    let doomed = e.create_property(listing(4)).await.unwrap();
    e.delete_property(doomed.id).await.unwrap();

    e.compact_wal().await.unwrap();
    assert_eq!(e.wal_appends_since_compact().await, 0);

    let e2 = Engine::new(path.clone(), Arc::new(NotifyHub::new()), Arc::new(LogMailer)).unwrap();
    assert_eq!(e2.get_property(p.id).await.unwrap(), p);
    assert_eq!(e2.get_booking(b.id).await.unwrap().id, b.id);
    assert!(e2.find_user_by_username("admin").is_some());
    assert!(e2.get_property(doomed.id).await.is_err());
    let _ = std::fs::remove_file(&path);
}

struct RecordingMailer {
    tx: mpsc::UnboundedSender<(String, String)>,
}

#[async_trait::async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, to: &str, subject: &str, _body: &str) -> Result<(), MailError> {
        let _ = self.tx.send((to.to_string(), subject.to_string()));
        Ok(())
    }
}

struct FailingMailer;

#[async_trait::async_trait]
impl Mailer for FailingMailer {
    async fn send(&self, _to: &str, _subject: &str, _body: &str) -> Result<(), MailError> {
        Err(MailError("relay unreachable".into()))
    }
}

#[tokio::test]
async fn confirmation_sends_mail() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (e, _) = engine_with_mailer("mail_sent", Arc::new(RecordingMailer { tx }));
    let p = e.create_property(listing(3)).await.unwrap();
    let b = e
        .request_booking(booking(p.id, future(10), future(15)))
        .await
        .unwrap();

    e.set_booking_status(b.id, BookingStatus::Confirmed)
        .await
        .unwrap();

    let (to, subject) = rx.recv().await.unwrap();
    assert_eq!(to, "atieno@example.com");
    assert!(subject.contains("confirmed"));
}

#[tokio::test]
async fn mail_failure_does_not_roll_back_transition() {
    let (e, _) = engine_with_mailer("mail_fail", Arc::new(FailingMailer));
    let p = e.create_property(listing(3)).await.unwrap();
    let b = e
        .request_booking(booking(p.id, future(10), future(15)))
        .await
        .unwrap();

    let confirmed = e
        .set_booking_status(b.id, BookingStatus::Cancelled)
        .await
        .unwrap();
    assert_eq!(confirmed.status, BookingStatus::Cancelled);
    // Give the fire-and-forget task a chance to run; the transition stands.
    tokio::task::yield_now().await;
    assert_eq!(
        e.get_booking(b.id).await.unwrap().status,
        BookingStatus::Cancelled
    );
}

#[tokio::test]
async fn notify_hub_sees_booking_events() {
    let hub = Arc::new(NotifyHub::new());
    let e = Arc::new(
        Engine::new(wal_path("notify"), hub.clone(), Arc::new(LogMailer)).unwrap(),
    );
    let p = e.create_property(listing(3)).await.unwrap();
    let mut rx = hub.subscribe(p.id);

    let b = e
        .request_booking(booking(p.id, future(10), future(15)))
        .await
        .unwrap();

    match rx.recv().await.unwrap() {
        Event::BookingCreated { booking } => assert_eq!(booking.id, b.id),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn find_overlapping_reports_blockers() {
    let e = engine("probe");
    let p = e.create_property(listing(3)).await.unwrap();
    let b = e
        .request_booking(booking(p.id, future(10), future(15)))
        .await
        .unwrap();

    let hits = e
        .find_overlapping(p.id, future(14), future(20), None)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, b.id);

    let clear = e
        .find_overlapping(p.id, future(16), future(20), None)
        .await
        .unwrap();
    assert!(clear.is_empty());

    let excluded = e
        .find_overlapping(p.id, future(14), future(20), Some(b.id))
        .await
        .unwrap();
    assert!(excluded.is_empty());
}

#[tokio::test]
async fn bookings_for_user_filters_by_owner() {
    let e = engine("per_user");
    let p = e.create_property(listing(3)).await.unwrap();
    let mine = Ulid::new();

    let mut b1 = booking(p.id, future(10), future(12));
    b1.user_id = mine;
    e.request_booking(b1).await.unwrap();
    e.request_booking(booking(p.id, future(20), future(22)))
        .await
        .unwrap();

    let mine_only = e.bookings_for_user(mine).await;
    assert_eq!(mine_only.len(), 1);
    assert_eq!(mine_only[0].user_id, mine);
    assert_eq!(e.all_bookings().await.len(), 2);
}

#[tokio::test]
async fn update_preserves_booking_identity() {
    let e = engine("identity");
    let p = e.create_property(listing(3)).await.unwrap();
    let b = e
        .request_booking(booking(p.id, future(10), future(15)))
        .await
        .unwrap();
    e.set_booking_status(b.id, BookingStatus::Confirmed)
        .await
        .unwrap();

    let mut edit = booking(p.id, future(10), future(14));
    edit.status = BookingStatus::Pending; // attempt to sneak a status change
    edit.user_id = Ulid::new(); // and a new owner
    let updated = e.update_booking(b.id, edit).await.unwrap();
    assert_eq!(updated.status, BookingStatus::Confirmed);
    assert_eq!(updated.user_id, b.user_id);
    assert_eq!(updated.created_at, b.created_at);
}
