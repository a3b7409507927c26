mod common;

use common::{FakeDom, FakePage};
use template_scraper::extractor::{Direction, FieldResolver, PatternKind, Scope};
use template_scraper::page_source::{ElementHandle, PageError};
use template_scraper::template::{ExtractionRule, Strategy};

fn contact_card() -> (FakeDom, usize) {
    let mut dom = FakeDom::new();
    let card = dom.add(0, "div.card", "");
    dom.bbox(card, 0.0, 0.0, 400.0, 120.0);

    let row = dom.add(card, "div.row", "");
    dom.bbox(row, 0.0, 0.0, 400.0, 20.0);
    let label = dom.add(row, "span.label", "Email:");
    dom.bbox(label, 0.0, 0.0, 60.0, 20.0);
    let value = dom.add(row, "span.value", "jane@firm.example.com");
    dom.bbox(value, 80.0, 0.0, 150.0, 20.0);

    let note = dom.add(card, "p.note", "Notes");
    dom.bbox(note, 0.0, 40.0, 60.0, 20.0);
    let phone_label = dom.add(card, "span.label", "Phone:");
    dom.bbox(phone_label, 0.0, 80.0, 60.0, 20.0);

    let far = dom.add(0, "span.far", "other@elsewhere.com");
    dom.bbox(far, 900.0, 0.0, 150.0, 20.0);

    let link = dom.add(card, "a.profile", "  View   profile ");
    dom.attr(link, "href", " /people/jane ");
    (dom, card)
}

#[tokio::test]
async fn first_successful_strategy_wins() {
    let (dom, _) = contact_card();
    let page = FakePage::with_dom(dom);
    let resolver = FieldResolver::new();

    let rule = ExtractionRule::new(
        "email",
        vec![
            Strategy::selector("span.missing"),
            Strategy::pattern(PatternKind::Email, &[]),
            Strategy::selector("span.value"),
        ],
    );
    let value = resolver.resolve(&page, Scope::Page, &rule).await.unwrap();
    assert_eq!(value.as_deref(), Some("jane@firm.example.com"));
}

#[tokio::test]
async fn backend_failure_does_not_stop_the_chain() {
    let (dom, _) = contact_card();
    let page = FakePage::with_dom(dom);
    let resolver = FieldResolver::new();

    let rule = ExtractionRule::new(
        "email",
        vec![Strategy::selector("!!broken"), Strategy::selector("span.value")],
    );
    let value = resolver.resolve(&page, Scope::Page, &rule).await.unwrap();
    assert_eq!(value.as_deref(), Some("jane@firm.example.com"));

    let only_broken = ExtractionRule::new(
        "email",
        vec![Strategy::selector("!!broken"), Strategy::selector("span.missing")],
    );
    let err = resolver
        .resolve(&page, Scope::Page, &only_broken)
        .await
        .unwrap_err();
    assert!(matches!(err, PageError::InvalidLocator { .. }));
}

#[tokio::test]
async fn missing_field_is_none_not_error() {
    let (dom, _) = contact_card();
    let page = FakePage::with_dom(dom);
    let rule = ExtractionRule::new("fax", vec![Strategy::selector("span.fax")]);
    let value = FieldResolver::new()
        .resolve(&page, Scope::Page, &rule)
        .await
        .unwrap();
    assert!(value.is_none());
}

#[tokio::test]
async fn selector_reads_text_or_trimmed_attribute() {
    let (dom, _) = contact_card();
    let page = FakePage::with_dom(dom);
    let resolver = FieldResolver::new();

    let text = ExtractionRule::new("link_text", vec![Strategy::selector("a.profile")]);
    let href = ExtractionRule::new(
        "profile",
        vec![Strategy::selector_attr("a.profile", "href")],
    );
    assert_eq!(
        resolver.resolve(&page, Scope::Page, &text).await.unwrap().as_deref(),
        Some("View profile")
    );
    assert_eq!(
        resolver.resolve(&page, Scope::Page, &href).await.unwrap().as_deref(),
        Some("/people/jane")
    );
}

#[tokio::test]
async fn pattern_requires_context_keyword() {
    let (dom, _) = contact_card();
    let page = FakePage::with_dom(dom);
    let resolver = FieldResolver::new();

    let gated = ExtractionRule::new(
        "email",
        vec![Strategy::pattern(PatternKind::Email, &["Contact us"])],
    );
    assert!(resolver.resolve(&page, Scope::Page, &gated).await.unwrap().is_none());

    let open = ExtractionRule::new(
        "email",
        vec![Strategy::pattern(PatternKind::Email, &["EMAIL"])],
    );
    assert_eq!(
        resolver.resolve(&page, Scope::Page, &open).await.unwrap().as_deref(),
        Some("jane@firm.example.com")
    );
}

#[tokio::test]
async fn element_scope_limits_the_search() {
    let (dom, card) = contact_card();
    let page = FakePage::with_dom(dom);
    let resolver = FieldResolver::new();

    // The far span sits outside the card
    let rule = ExtractionRule::new("far", vec![Strategy::selector("span.far")]);
    let scoped = resolver
        .resolve(&page, Scope::Element(ElementHandle(card as u64)), &rule)
        .await
        .unwrap();
    assert!(scoped.is_none());
    let page_wide = resolver.resolve(&page, Scope::Page, &rule).await.unwrap();
    assert_eq!(page_wide.as_deref(), Some("other@elsewhere.com"));
}

#[tokio::test]
async fn proximity_finds_nearest_value_in_direction() {
    let (dom, _) = contact_card();
    let page = FakePage::with_dom(dom);
    let resolver = FieldResolver::new();

    let right_of_label = ExtractionRule::new(
        "email",
        vec![Strategy::proximity("Email", 300.0, Some(Direction::Right))],
    );
    assert_eq!(
        resolver
            .resolve(&page, Scope::Page, &right_of_label)
            .await
            .unwrap()
            .as_deref(),
        Some("jane@firm.example.com")
    );

    // Without a direction the note below the label is closer
    let any_side = ExtractionRule::new("email", vec![Strategy::proximity("Email", 300.0, None)]);
    assert_eq!(
        resolver
            .resolve(&page, Scope::Page, &any_side)
            .await
            .unwrap()
            .as_deref(),
        Some("Notes")
    );
}

#[tokio::test]
async fn proximity_respects_max_distance_and_unknown_labels() {
    let (dom, _) = contact_card();
    let page = FakePage::with_dom(dom);
    let resolver = FieldResolver::new();

    let too_close = ExtractionRule::new(
        "email",
        vec![Strategy::proximity("Email", 20.0, Some(Direction::Right))],
    );
    assert!(resolver.resolve(&page, Scope::Page, &too_close).await.unwrap().is_none());

    let unknown = ExtractionRule::new(
        "website",
        vec![Strategy::proximity("Website", 500.0, None)],
    );
    assert!(resolver.resolve(&page, Scope::Page, &unknown).await.unwrap().is_none());
}

#[tokio::test]
async fn resolve_all_keeps_rule_order_and_failures() {
    let mut dom = FakeDom::new();
    dom.add(0, "h2.name", "Jane Roe");
    let bio = dom.add(0, "p.bio", "Trial lawyer");
    dom.broken(bio);
    let page = FakePage::with_dom(dom);

    let rules = vec![
        ExtractionRule::new("name", vec![Strategy::selector("h2.name")]),
        ExtractionRule::new("bio", vec![Strategy::selector("p.bio")]),
        ExtractionRule::new("fax", vec![Strategy::selector("p.fax")]),
    ];
    let resolved = FieldResolver::new()
        .resolve_all(&page, Scope::Page, &rules)
        .await;

    assert_eq!(resolved.values.keys().collect::<Vec<_>>(), vec!["name"]);
    assert_eq!(resolved.failures.len(), 1);
    assert_eq!(resolved.failures[0].0, "bio");
    assert!(matches!(resolved.failures[0].1, PageError::Script(_)));
}
