//! End-to-end dialogue scenarios over the fully wired orchestrator with
//! scripted providers and in-memory stores.

use chrono::Duration;

use crate::session::DialogueMode;
use crate::testing::TestHarness;
use crate::traits::{CallRecord, Clock, GeocodeResult, GroundedResponse, GroundingRef, UsageStore};
use crate::types::{ButtonAction, Location, Review, VenueDetails};

const MOSCOW: Location = Location {
    lat: 55.7558,
    lon: 37.6176,
};

const ID_A: &str = "ChIJaaaaaaaaaaaaaaaaaa01";
const ID_B: &str = "ChIJbbbbbbbbbbbbbbbbbb02";

fn details_for(id: &str, name: &str, reviews: Vec<Review>) -> VenueDetails {
    let mut venue = TestHarness::venue(id, name, 55.7570, 37.6180);
    venue.address = Some("ул. Пушкина, 10".to_string());
    VenueDetails { venue, reviews }
}

/// Share a location and run one grounded search so the session holds a
/// referenceable result page.
async fn seeded_harness() -> TestHarness {
    let h = TestHarness::new();
    h.orchestrator.handle_location("u1", MOSCOW).await;

    h.ai.push_response(GroundedResponse {
        text: "CITY: -\nВот пара хороших кофеен недалеко от вас.".into(),
        refs: vec![
            TestHarness::grounding_ref("Кофейня Март", ID_A),
            TestHarness::grounding_ref("Скуратов", ID_B),
        ],
    });
    // Enrichment detail fetches, one per candidate, in shown order.
    h.places.push_details(details_for(ID_A, "Кофейня Март", vec![]));
    h.places.push_details(details_for(ID_B, "Скуратов", vec![]));

    let response = h.orchestrator.handle_message("u1", "найди кофейню").await;
    assert!(response.text.contains("Кофейня Март"));
    assert!(response.text.contains("Скуратов"));
    h
}

#[tokio::test]
async fn fresh_search_builds_numbered_page_and_session() {
    let h = seeded_harness().await;

    assert_eq!(h.ai.generate_calls(), 1);
    // Grounding produced enough candidates; structured fallback stayed idle.
    assert_eq!(h.places.nearby_calls(), 0);

    let session = h.store.session("u1").expect("session persisted");
    assert_eq!(session.mode, DialogueMode::AwaitingFollowUp);
    assert_eq!(session.last_shown.len(), 2);
    assert!(session.shown_ids.contains(ID_A));
    assert!(session.shown_ids.contains(ID_B));
}

#[tokio::test]
async fn detail_follow_up_reuses_shown_results() {
    let h = seeded_harness().await;

    h.places.push_details(details_for(
        ID_B,
        "Скуратов",
        vec![
            Review { rating: 5, text: "Лучший фильтр в городе".into() },
            Review { rating: 1, text: "Очень грязно".into() },
            Review { rating: 4, text: "Хороший раф".into() },
        ],
    ));

    let response = h
        .orchestrator
        .handle_message("u1", "расскажи о втором месте")
        .await;

    // No second grounded search: the follow-up runs against shown results.
    assert_eq!(h.ai.generate_calls(), 1);
    let details = h.places.details_calls();
    assert_eq!(details.last(), Some(&(ID_B.to_string(), true)));

    assert!(response.text.contains("Скуратов"));
    assert!(response.text.contains("Отзывы:"));
    assert!(response.text.contains("Очень грязно"));
    // Each selected review went through translation.
    assert_eq!(h.ai.translate_calls(), 3);
    // Verified id yields a maps button.
    let has_maps_button = response.buttons.iter().flatten().any(|b| {
        matches!(&b.action, ButtonAction::Url(url) if url.contains(ID_B))
    });
    assert!(has_maps_button);
}

#[tokio::test]
async fn expired_location_requests_a_new_share_without_searching() {
    let h = TestHarness::new();
    h.orchestrator.handle_location("u1", MOSCOW).await;
    h.clock.advance(Duration::minutes(31));

    let response = h.orchestrator.handle_message("u1", "кафе поблизости").await;

    assert!(response.request_location);
    assert_eq!(h.ai.generate_calls(), 0);
    assert_eq!(h.places.nearby_calls(), 0);
    assert_eq!(h.places.text_search_calls(), 0);

    let session = h.store.session("u1").expect("session persisted");
    assert_eq!(session.mode, DialogueMode::AwaitingLocation);
}

#[tokio::test]
async fn empty_grounding_triggers_structured_fallback() {
    let h = TestHarness::new();
    h.orchestrator.handle_location("u1", MOSCOW).await;

    h.ai.push_response(GroundedResponse {
        text: "CITY: -\nМогу предложить пару вариантов.".into(),
        refs: vec![],
    });
    h.places.push_nearby(vec![TestHarness::venue(
        ID_A,
        "Пекарня Хлебная",
        55.7570,
        37.6180,
    )]);

    let response = h.orchestrator.handle_message("u1", "где перекусить").await;

    assert_eq!(h.places.nearby_calls(), 1);
    // One nearby hit is below the minimum, so the whole ladder was walked.
    assert_eq!(h.places.text_search_calls(), 3);
    assert!(response.text.contains("Пекарня Хлебная"));
}

#[tokio::test]
async fn duplicate_ids_keep_the_closer_instance() {
    let h = TestHarness::new();
    h.orchestrator.handle_location("u1", MOSCOW).await;

    h.ai.push_response(GroundedResponse {
        text: "CITY: -\nВот что нашлось.".into(),
        refs: vec![],
    });
    // Same place at ~150 m, surfaced first by the nearby search...
    h.places.push_nearby(vec![TestHarness::venue(
        ID_A,
        "Хлеб Насущный",
        55.75715,
        37.6176,
    )]);
    // ...and at ~300 m from the first ladder step, plus two fresh places.
    h.places.push_text_search(vec![
        TestHarness::venue(ID_A, "Хлеб Насущный", 55.7585, 37.6176),
        TestHarness::venue(ID_B, "Брусника", 55.7590, 37.6200),
        TestHarness::venue("ChIJcccccccccccccccccc03", "Кооператив Чёрный", 55.7540, 37.6150),
    ]);

    let response = h.orchestrator.handle_message("u1", "кофейни недалеко").await;

    assert_eq!(response.text.matches("Хлеб Насущный").count(), 1);
    let session = h.store.session("u1").expect("session persisted");
    let kept = session
        .last_shown
        .iter()
        .find(|v| v.provider_id.as_deref() == Some(ID_A))
        .expect("deduplicated venue shown");
    let d = kept.distance_m.expect("distance filled");
    assert!(d < 200.0, "closer instance should win, got {} m", d);
}

#[tokio::test]
async fn quota_exhaustion_serves_cache_then_denies() {
    let h = seeded_harness().await;

    // Burn through the per-user AI budget.
    let day = h.clock.now().format("%Y-%m-%d").to_string();
    for _ in 0..50 {
        h.store
            .append_call(&CallRecord {
                user_id: "u1".into(),
                provider: "ai".into(),
                api_type: "grounded_generate".into(),
                cost: 0.035,
                from_cache: false,
                quota_exceeded: false,
                day: day.clone(),
                created_at: h.clock.now(),
            })
            .await
            .unwrap();
    }

    // The original query is still answerable from cache.
    let response = h.orchestrator.handle_message("u1", "найди кофейню").await;
    assert!(response.text.contains("лимит"));
    assert!(response.text.contains("Кофейня Март"));
    assert_eq!(h.ai.generate_calls(), 1);

    // A query with no cached answer is refused outright.
    let response = h.orchestrator.handle_message("u1", "суши недалеко").await;
    assert!(response.text.contains("лимит"));
    assert!(!response.text.contains("Кофейня Март"));
    assert_eq!(h.ai.generate_calls(), 1);
}

#[tokio::test]
async fn route_request_links_shown_places() {
    let h = seeded_harness().await;

    let response = h
        .orchestrator
        .handle_message("u1", "построй маршрут по этим местам")
        .await;

    assert!(response.text.contains("Маршрут"));
    let url = response
        .buttons
        .iter()
        .flatten()
        .find_map(|b| match &b.action {
            ButtonAction::Url(url) => Some(url.clone()),
            _ => None,
        })
        .expect("route button");
    assert!(url.contains("maps/dir"));
    assert!(url.contains(ID_B));

    // The same route is reachable through the callback button.
    let response = h.orchestrator.handle_callback("u1", "route").await;
    assert!(response.text.contains("Кофейня Март"));
}

#[tokio::test]
async fn follow_up_against_empty_session_falls_back_to_search() {
    let h = TestHarness::new();
    h.orchestrator.handle_location("u1", MOSCOW).await;

    // An utterance full of follow-up markers, but nothing was shown yet:
    // it must be treated as a fresh search, not a reference.
    h.ai.push_response(GroundedResponse {
        text: "CITY: -\nВот это место.".into(),
        refs: vec![],
    });
    h.places.push_nearby(vec![TestHarness::venue(
        ID_A,
        "Чайная там",
        55.7570,
        37.6180,
    )]);

    let response = h
        .orchestrator
        .handle_message("u1", "что есть второго рядом")
        .await;
    assert_eq!(h.ai.generate_calls(), 1);
    assert!(!response.text.is_empty());
}

#[tokio::test]
async fn detail_button_callback_opens_the_indexed_place() {
    let h = seeded_harness().await;

    h.places.push_details(details_for(
        ID_A,
        "Кофейня Март",
        vec![Review { rating: 5, text: "Очень вкусные круассаны".into() }],
    ));

    let response = h.orchestrator.handle_callback("u1", "detail:1").await;

    assert!(response.text.contains("Кофейня Март"));
    assert!(response.text.contains("круассаны"));
    assert_eq!(
        h.places.details_calls().last(),
        Some(&(ID_A.to_string(), true))
    );

    let response = h.orchestrator.handle_callback("u1", "detail:9").await;
    assert!(response.text.contains("нет места"));
}

#[tokio::test]
async fn grounded_venue_without_inline_id_is_resolved_before_ranking() {
    let h = TestHarness::new();
    h.orchestrator.handle_location("u1", MOSCOW).await;

    // The grounding chunk carries only a title and an opaque web URI.
    h.ai.push_response(GroundedResponse {
        text: "CITY: -\nЗагляните в «Бар Укроп».".into(),
        refs: vec![GroundingRef {
            title: Some("Бар Укроп".into()),
            uri: Some("https://example.com/reviews/bar-ukrop".into()),
            place_id: None,
        }],
    });
    // Name-only text search resolves the id, then a detail fetch fills in
    // coordinates and rating.
    h.places
        .push_text_search(vec![TestHarness::venue(ID_A, "Бар Укроп", 55.7562, 37.6184)]);
    h.places.push_details(details_for(ID_A, "Бар Укроп", vec![]));

    let response = h
        .orchestrator
        .handle_message("u1", "найди бар с коктейлями")
        .await;

    assert!(response.text.contains("Бар Укроп"));
    let session = h.store.session("u1").expect("session saved");
    assert_eq!(session.last_shown.len(), 1);
    assert_eq!(session.last_shown[0].provider_id.as_deref(), Some(ID_A));
    assert!(session.last_shown[0].location.is_some());
    assert_eq!(h.places.text_search_calls(), 1);
}

#[tokio::test]
async fn model_flagged_city_recenters_the_ranking_origin() {
    let h = TestHarness::new();
    h.orchestrator.handle_location("u1", MOSCOW).await;

    h.ai.push_response(GroundedResponse {
        text: "CITY: Тверь\nВ Твери загляните в «Кафе Волга».".into(),
        refs: vec![TestHarness::grounding_ref("Кафе Волга", ID_A)],
    });
    let mut details = details_for(ID_A, "Кафе Волга", vec![]);
    details.venue.location = Some(Location {
        lat: 56.8587,
        lon: 35.9176,
    });
    h.places.push_details(details);
    h.places.push_geocode(vec![GeocodeResult {
        location: Location {
            lat: 56.8596,
            lon: 35.9119,
        },
        formatted_address: "Тверь, Россия".into(),
        types: vec!["locality".into()],
    }]);

    h.orchestrator.handle_message("u1", "где поужинать").await;

    assert_eq!(h.places.geocode_calls(), vec!["Тверь".to_string()]);
    let session = h.store.session("u1").expect("session saved");
    let distance = session.last_shown[0].distance_m.expect("distance computed");
    // Measured from the flagged city's centre, not from the stored location
    // 160 km away.
    assert!(distance < 2_000.0, "distance {} not re-centered", distance);
}
