mod common;

use common::{
    CARD, FakeFactory, FakeSite, LISTING_URL, LOAD_MORE, ListingScript, NAME, PROFILE_LINK,
    RevealMode, detail_url, init_logging, people,
};
use std::sync::Arc;
use std::time::Duration;
use template_scraper::config::ExtractConfig;
use template_scraper::crawl_engine::{
    ExtractionPipeline, FailureKind, RateLimitConfig, RunPhase, ScrapeResult,
};
use template_scraper::template::{
    ExtractionRule, LoadKind, LoadStrategyConfig, RuleSet, Strategy, Template,
};
use tokio_util::sync::CancellationToken;

fn people_template(load: LoadStrategyConfig) -> Template {
    let list = RuleSet::list(
        Some(CARD),
        vec![
            ExtractionRule::new("name", vec![Strategy::selector(NAME)]),
            ExtractionRule::new("profile", vec![Strategy::selector_attr(PROFILE_LINK, "href")]),
        ],
        Some("profile"),
    );
    let detail = RuleSet::detail(vec![
        ExtractionRule::new("email", vec![Strategy::selector("p.email")]),
        ExtractionRule::new("title", vec![Strategy::selector("p.title")]),
    ]);
    Template::new("firm-people", LISTING_URL, list)
        .with_detail(detail)
        .with_load_strategy(load)
}

fn button_load() -> LoadStrategyConfig {
    LoadStrategyConfig::new(LoadKind::Button)
        .with_action_locator(LOAD_MORE)
        .with_pause(Duration::from_millis(500))
}

fn fast_config() -> ExtractConfig {
    ExtractConfig::builder()
        .detail_concurrency(3)
        .rate_limit(RateLimitConfig::new(100.0, 20))
        .build()
        .unwrap()
}

async fn run(factory: &Arc<FakeFactory>, config: ExtractConfig, template: &Template) -> ScrapeResult {
    ExtractionPipeline::new(Arc::clone(factory), config)
        .run(template, CancellationToken::new())
        .await
}

#[tokio::test(start_paused = true)]
async fn listing_and_details_are_merged_in_order() {
    init_logging();
    let site = FakeSite::new(Some(ListingScript::new(
        RevealMode::Append,
        vec![people(0, 5), people(5, 5)],
    )))
    .with_details_for_listing();
    let factory = Arc::new(FakeFactory::new(site));

    let result = run(&factory, fast_config(), &people_template(button_load())).await;

    assert!(result.run_errors.is_empty(), "{:?}", result.run_errors);
    assert_eq!(result.total_items(), 10);
    assert_eq!(result.successful_count, 10);
    assert_eq!(result.failed_count, 0);
    assert_eq!(result.success_rate(), 100.0);
    for (i, item) in result.items.iter().enumerate() {
        assert_eq!(item.sequence_index, i);
        assert_eq!(item.field("name"), Some(format!("Person {i}").as_str()));
        assert_eq!(item.detail_url.as_deref(), Some(detail_url(i).as_str()));
        assert_eq!(
            item.field("email"),
            Some(format!("person{i}@firm.example.com").as_str())
        );
        assert_eq!(item.field("title"), Some("Partner"));
    }

    assert_eq!(result.metadata["traversal_end"], "exhausted");
    assert_eq!(result.metadata["load_actions"], 1);
    assert_eq!(result.metadata["site_url"], LISTING_URL);
    assert_eq!(result.rate_limit_stats["firm.example.com"].total_requests, 10);
    // One listing session plus at most one per detail worker
    assert!(factory.open_count() >= 2);
    assert!(factory.open_count() <= 1 + 3);
}

#[tokio::test]
async fn invalid_template_is_a_configuration_error() {
    let factory = Arc::new(FakeFactory::new(FakeSite::new(None)));
    // Button loading without a locator
    let template = people_template(LoadStrategyConfig::new(LoadKind::Button));

    let result = run(&factory, fast_config(), &template).await;

    assert_eq!(result.run_errors.len(), 1);
    assert_eq!(result.run_errors[0].phase, RunPhase::Configuration);
    assert_eq!(result.run_errors[0].kind, FailureKind::Configuration);
    assert!(result.items.is_empty());
    assert_eq!(factory.open_count(), 0);
}

#[tokio::test]
async fn unrepresentable_pause_is_a_configuration_error() {
    let factory = Arc::new(FakeFactory::new(FakeSite::new(None)));
    let mut load = button_load();
    load.pause_secs = 1e20;

    let result = run(&factory, fast_config(), &people_template(load)).await;

    assert_eq!(result.run_errors.len(), 1);
    assert_eq!(result.run_errors[0].phase, RunPhase::Configuration);
    assert!(result.run_errors[0].message.contains("pause_secs"));
    assert_eq!(factory.open_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn unreachable_listing_fails_the_run_after_retries() {
    let site = FakeSite::new(Some(ListingScript::new(RevealMode::Append, vec![people(0, 3)])))
        .failing(LISTING_URL);
    let factory = Arc::new(FakeFactory::new(site));
    let config = ExtractConfig::builder()
        .navigation_retries(2)
        .build()
        .unwrap();

    let result = run(&factory, config, &people_template(button_load())).await;

    assert!(result.items.is_empty());
    assert_eq!(result.run_errors.len(), 1);
    assert_eq!(result.run_errors[0].phase, RunPhase::Listing);
    assert_eq!(result.run_errors[0].kind, FailureKind::Navigation);
    assert_eq!(factory.site.navigation_count(LISTING_URL), 2);
    assert_eq!(result.success_rate(), 0.0);
}

#[tokio::test(start_paused = true)]
async fn flaky_listing_navigation_is_retried() {
    let site = FakeSite::new(Some(ListingScript::new(RevealMode::Append, vec![people(0, 3)])))
        .with_details_for_listing()
        .flaky(LISTING_URL, 2);
    let factory = Arc::new(FakeFactory::new(site));

    let result = run(&factory, fast_config(), &people_template(button_load())).await;

    assert!(result.run_errors.is_empty());
    assert_eq!(result.total_items(), 3);
    assert_eq!(factory.site.navigation_count(LISTING_URL), 3);
}

#[tokio::test(start_paused = true)]
async fn detail_failures_stay_on_items() {
    let site = FakeSite::new(Some(ListingScript::new(RevealMode::Append, vec![people(0, 4)])))
        .with_details_for_listing()
        .flaky(&detail_url(2), 1);
    let factory = Arc::new(FakeFactory::new(site));
    let template = people_template(LoadStrategyConfig::new(LoadKind::None));

    let result = run(&factory, fast_config(), &template).await;

    assert!(result.run_errors.is_empty());
    assert_eq!(result.total_items(), 4);
    assert_eq!(result.failed_count, 1);
    assert_eq!(result.success_rate(), 75.0);
    let failed = &result.items[2];
    assert_eq!(failed.errors[0].kind, FailureKind::Navigation);
    assert_eq!(failed.field("name"), Some("Person 2"));
    assert!(failed.detail_fields.is_none());
}

#[tokio::test(start_paused = true)]
async fn retry_passes_recover_transient_detail_failures() {
    let site = FakeSite::new(Some(ListingScript::new(RevealMode::Append, vec![people(0, 4)])))
        .with_details_for_listing()
        .flaky(&detail_url(2), 1);
    let factory = Arc::new(FakeFactory::new(site));
    let config = ExtractConfig::builder()
        .rate_limit(RateLimitConfig::new(100.0, 20))
        .detail_retry_passes(2)
        .build()
        .unwrap();
    let template = people_template(LoadStrategyConfig::new(LoadKind::None));

    let result = run(&factory, config, &template).await;

    assert_eq!(result.successful_count, 4);
    assert_eq!(result.items[2].field("email"), Some("person2@firm.example.com"));
    assert_eq!(factory.site.navigation_count(&detail_url(2)), 2);
}

#[tokio::test(start_paused = true)]
async fn template_preset_drives_the_limiter() {
    let site = FakeSite::new(Some(ListingScript::new(RevealMode::Append, vec![people(0, 3)])))
        .with_details_for_listing();
    let factory = Arc::new(FakeFactory::new(site));
    let config = ExtractConfig::builder()
        .detail_concurrency(1)
        .build()
        .unwrap();
    // One request every five seconds after a single-token burst
    let template = people_template(LoadStrategyConfig::new(LoadKind::None))
        .with_rate_limit_preset("respectful");

    let result = run(&factory, config, &template).await;

    assert_eq!(result.successful_count, 3);
    let detail_times: Vec<_> = factory
        .site
        .navigations()
        .into_iter()
        .filter(|(url, _)| url != LISTING_URL)
        .map(|(_, at)| at)
        .collect();
    assert_eq!(detail_times.len(), 3);
    for pair in detail_times.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(4990));
    }
    assert!(result.rate_limit_stats["firm.example.com"].rate_limited >= 2);
}

#[tokio::test(start_paused = true)]
async fn cancellation_before_listing_extraction() {
    let site = FakeSite::new(Some(ListingScript::new(RevealMode::Append, vec![people(0, 3)])))
        .with_details_for_listing();
    let factory = Arc::new(FakeFactory::new(site));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = ExtractionPipeline::new(Arc::clone(&factory), fast_config())
        .run(&people_template(button_load()), cancel)
        .await;

    assert!(result.is_cancelled());
    assert!(result.items.is_empty());
    assert_eq!(result.run_errors.len(), 1);
    assert_eq!(result.run_errors[0].phase, RunPhase::Listing);
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_details_keeps_partial_results() {
    let site = FakeSite::new(Some(ListingScript::new(RevealMode::Append, vec![people(0, 10)])))
        .with_details_for_listing()
        .with_detail_delay(Duration::from_secs(1));
    let factory = Arc::new(FakeFactory::new(site));
    let config = ExtractConfig::builder()
        .detail_concurrency(2)
        .rate_limit(RateLimitConfig::new(100.0, 20))
        .build()
        .unwrap();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(2500)).await;
        trigger.cancel();
    });

    let result = ExtractionPipeline::new(Arc::clone(&factory), config)
        .run(
            &people_template(LoadStrategyConfig::new(LoadKind::None)),
            cancel,
        )
        .await;

    assert_eq!(result.total_items(), 10);
    assert!(result.items[0].is_successful());
    assert!(result.items[1].is_successful());
    assert_eq!(result.items[9].errors[0].kind, FailureKind::Cancelled);
    assert!(result.is_cancelled());
    let cancelled_run = result
        .run_errors
        .iter()
        .find(|e| e.kind == FailureKind::Cancelled)
        .unwrap();
    assert_eq!(cancelled_run.phase, RunPhase::Detail);
}

#[tokio::test(start_paused = true)]
async fn result_serializes_with_stable_field_names() {
    let site = FakeSite::new(Some(ListingScript::new(RevealMode::Append, vec![people(0, 2)])))
        .with_details_for_listing();
    let factory = Arc::new(FakeFactory::new(site));
    let template = people_template(LoadStrategyConfig::new(LoadKind::None));

    let result = run(&factory, fast_config(), &template).await;
    let json = serde_json::to_value(&result).unwrap();

    assert_eq!(json["template_name"], "firm-people");
    assert_eq!(json["successful_count"], 2);
    assert_eq!(json["items"][1]["sequence_index"], 1);
    assert_eq!(json["items"][1]["fields"]["name"], "Person 1");
    assert_eq!(
        json["items"][0]["detail_fields"]["email"],
        "person0@firm.example.com"
    );
    assert!(json["run_errors"].as_array().unwrap().is_empty());

    let back: ScrapeResult = serde_json::from_value(json).unwrap();
    assert_eq!(back.items, result.items);
    assert_eq!(back.run_id, result.run_id);
}
