//! Integration tests for screenflow.
//!
//! These tests drive a [`Session`] from outside the crate with an in-memory
//! row source, verifying that expansion, conditions, calculations, and the
//! selection store work together.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use serde_json::json;

use screenflow::calc::{
    Calculation, CalculationTable, ConditionOperation, ContainerValueType, DatabaseAction,
    Operation, StepSource,
};
use screenflow::condition::Condition;
use screenflow::dom::{
    AppDefinition, ContainerType, Element, ElementTree, PageConfig, Properties, RepeatingConfig,
    ScreenDefinition,
};
use screenflow::selection::ActiveSelectionStore;
use screenflow::source::{Filter, FilterOperator, Record, RowSource, SourceRef};
use screenflow::QueryError;
use screenflow::testing::{records, render_to_string, CountingInputs, MemoryRowSource};
use screenflow::{EngineConfig, Phase, RenderOutput, RunOutcome, Session};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn custom(value: &str) -> StepSource {
    StepSource::custom(value)
}

fn app(elements: Vec<Element>, calculations: CalculationTable) -> AppDefinition {
    AppDefinition::new()
        .with_screen(ScreenDefinition::new("home", elements))
        .with_calculations(calculations)
}

fn list(id: &str, table: &str) -> Element {
    Element::container(id).repeating(RepeatingConfig {
        source: SourceRef::table(table),
        filters: vec![],
    })
}

fn rendered(outcome: RunOutcome) -> Rc<RenderOutput> {
    match outcome {
        RunOutcome::Rendered(output) => output,
        RunOutcome::Superseded { generation } => panic!("run {generation} was superseded"),
    }
}

fn render(app: AppDefinition, source: MemoryRowSource) -> Rc<RenderOutput> {
    let session = Session::new(app, "home", source);
    rendered(tokio_test::block_on(session.start()))
}

fn text(output: &RenderOutput, id: &str) -> String {
    output.text_of(id).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Calculations
// ---------------------------------------------------------------------------

#[test]
fn test_subtraction_is_order_sensitive() {
    let out = render(
        app(
            vec![Element::text("t", "{{CALC:diff}}")],
            CalculationTable::new().with(
                Calculation::new("diff")
                    .step(custom("5"))
                    .then(Operation::Subtract, custom("2")),
            ),
        ),
        MemoryRowSource::new(),
    );
    assert_eq!(text(&out, "t"), "3");
    assert!(out.errors.is_empty());
}

#[test]
fn test_divide_by_zero_is_an_inline_error() {
    let out = render(
        app(
            vec![
                Element::text("bad", "= {{CALC:div}}"),
                Element::text("sibling", "still {{CALC:one}}"),
            ],
            CalculationTable::new()
                .with(
                    Calculation::new("div")
                        .step(custom("10"))
                        .then(Operation::Divide, custom("0")),
                )
                .with(Calculation::new("one").step(custom("1"))),
        ),
        MemoryRowSource::new(),
    );
    assert_eq!(text(&out, "bad"), "= [Error: division by zero]");
    assert_eq!(text(&out, "sibling"), "still 1");
    assert_eq!(
        out.errors.get("bad").map(String::as_str),
        Some("division by zero")
    );
    assert!(!out.errors.contains_key("sibling"));
}

#[test]
fn test_hello_ab_end_to_end() {
    let out = render(
        app(
            vec![Element::text("greeting", "Hello {{CALC:c1}}")],
            CalculationTable::new().with(
                Calculation::new("c1")
                    .step(custom("A"))
                    .then(Operation::Concatenate, custom("B")),
            ),
        ),
        MemoryRowSource::new(),
    );
    assert_eq!(text(&out, "greeting"), "Hello AB");
}

#[test]
fn test_self_reference_is_a_cycle() {
    let out = render(
        app(
            vec![
                Element::text("direct", "{{CALC:self}}"),
                Element::text("indirect", "{{CALC:a}}"),
            ],
            CalculationTable::new()
                .with(Calculation::new("self").step(custom("{{CALC:self}}")))
                .with(Calculation::new("a").step(custom("{{CALC:b}}")))
                .with(Calculation::new("b").step(custom("{{CALC:a}}"))),
        ),
        MemoryRowSource::new(),
    );
    assert_eq!(
        text(&out, "direct"),
        "[Error: calculation cycle: self -> self]"
    );
    assert_eq!(
        text(&out, "indirect"),
        "[Error: calculation cycle: a -> b -> a]"
    );
}

#[test]
fn test_missing_calculation_placeholder() {
    let out = render(
        app(
            vec![Element::text("t", "total: {{CALC:3f9a77c1-52d0-4d6e}}")],
            CalculationTable::new(),
        ),
        MemoryRowSource::new(),
    );
    assert_eq!(text(&out, "t"), "total: [Missing: 3f9a77c1]");
    assert!(out.errors.contains_key("t"));
}

#[test]
fn test_database_step_counts_filtered_rows() {
    let source = MemoryRowSource::new().with_table(
        "orders",
        records(json!([
            {"id": 1, "status": "open"},
            {"id": 2, "status": "closed"},
            {"id": 3, "status": "open"},
        ])),
    );
    let out = render(
        app(
            vec![Element::text("t", "{{CALC:open}} open")],
            CalculationTable::new().with(Calculation::new("open").step(StepSource::database(
                "orders",
                vec![Filter::new("status", FilterOperator::Equals, "open")],
                DatabaseAction::Count,
            ))),
        ),
        source,
    );
    assert_eq!(text(&out, "t"), "2 open");
}

#[test]
fn test_database_failure_is_inline() {
    let source = MemoryRowSource::new().failing("orders", "timeout");
    let out = render(
        app(
            vec![Element::text("t", "n={{CALC:n}}")],
            CalculationTable::new().with(Calculation::new("n").step(StepSource::database(
                "orders",
                vec![],
                DatabaseAction::Count,
            ))),
        ),
        source,
    );
    assert_eq!(
        text(&out, "t"),
        "n=[Error: query against `orders` failed: timeout]"
    );
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

fn equals(a: &str, b: &str) -> Condition {
    Condition::new(format!("{a} = {b}"))
        .step(custom(a))
        .then(ConditionOperation::Equals, custom(b))
}

#[test]
fn test_equals_is_numeric_when_both_sides_are() {
    let out = render(
        app(
            vec![
                Element::text("numeric", "shown").with_conditions([equals("5", "5.0")]),
                Element::text("mismatch", "hidden").with_conditions([equals("5", "five")]),
            ],
            CalculationTable::new(),
        ),
        MemoryRowSource::new(),
    );
    assert!(out.is_visible("numeric"));
    assert!(!out.is_visible("mismatch"));
}

#[test]
fn test_first_true_condition_wins_without_evaluating_later() {
    let inputs = Rc::new(CountingInputs::new().with_value("watched", "1"));
    let elements = vec![
        Element::input("watched"),
        Element::text("t", "x").with_conditions([
            equals("1", "2"),
            equals("a", "a"),
            Condition::new("reads watched").step(StepSource::element("watched")),
        ]),
    ];
    let session = Session::new(app(elements, CalculationTable::new()), "home", MemoryRowSource::new())
        .with_inputs(Rc::clone(&inputs));
    let out = rendered(tokio_test::block_on(session.start()));

    let (_, data) = out.tree.query_by_id("t").unwrap();
    assert!(data.visible);
    assert_eq!(data.matched_condition, Some(1));
    assert_eq!(inputs.reads("watched"), 0);
}

#[test]
fn test_condition_properties_override_before_calculation() {
    let out = render(
        app(
            vec![Element::text("t", "plain").with_conditions([equals("1", "1")
                .with_properties(
                    Properties::new()
                        .with("text", "Now {{CALC:c}}")
                        .with("color", "red"),
                )])],
            CalculationTable::new().with(Calculation::new("c").step(custom("42"))),
        ),
        MemoryRowSource::new(),
    );
    let (_, data) = out.tree.query_by_id("t").unwrap();
    assert_eq!(data.text().as_deref(), Some("Now 42"));
    assert_eq!(data.properties.get_text("color").as_deref(), Some("red"));
}

#[test]
fn test_all_conditions_failing_fails_open() {
    let failing = Condition::new("no context").step(StepSource::repeating("list", "name"));
    let out = render(
        app(
            vec![Element::text("t", "visible").with_conditions([failing.clone(), failing])],
            CalculationTable::new(),
        ),
        MemoryRowSource::new(),
    );
    assert!(out.is_visible("t"));
    assert_eq!(
        out.errors.get("t").map(String::as_str),
        Some("all 2 conditions failed: no repeating context for container `list`")
    );
}

#[test]
fn test_hidden_subtree_is_not_calculated() {
    let out = render(
        app(
            vec![Element::container("panel")
                .with_conditions([Condition::new("never").step(custom("0"))])
                .with_child(Element::text("inner", "{{CALC:boom}}"))],
            CalculationTable::new().with(
                Calculation::new("boom")
                    .step(custom("1"))
                    .then(Operation::Divide, custom("0")),
            ),
        ),
        MemoryRowSource::new(),
    );
    assert!(!out.is_visible("panel"));
    assert!(!out.is_visible("inner"));
    assert_eq!(text(&out, "inner"), "{{CALC:boom}}");
    assert!(out.errors.is_empty());
}

// ---------------------------------------------------------------------------
// Repeating expansion
// ---------------------------------------------------------------------------

#[test]
fn test_three_rows_expand_to_three_clones() {
    let source = MemoryRowSource::new().with_table(
        "items",
        records(json!([{"n": "a"}, {"n": "b"}, {"n": "c"}])),
    );
    let out = render(
        app(
            vec![list("list", "items").with_child(Element::text("item", "?"))],
            CalculationTable::new(),
        ),
        source,
    );
    let tree = &out.tree;
    assert_eq!(tree.roots().len(), 3);
    for (i, &root) in tree.roots().iter().enumerate() {
        let instance = tree.get(root).unwrap();
        assert_eq!(instance.id, format!("list_instance_{i}"));
        assert_eq!(instance.original_id.as_deref(), Some("list"));
        let ctx = instance.repeating_context.as_ref().unwrap();
        assert_eq!(ctx.row_index, i);
        assert_eq!(ctx.record.get("n"), Some(&json!(["a", "b", "c"][i])));

        let children = tree.children(root);
        assert_eq!(children.len(), 1);
        let child = tree.get(children[0]).unwrap();
        assert_eq!(child.id, format!("item_repeat_list_{i}"));
        assert_eq!(child.original_id.as_deref(), Some("item"));
        assert_eq!(child.context().map(|c| c.row_index), Some(i));
    }
    assert_eq!(tree.len(), 6);
}

#[test]
fn test_row_number_ignores_record_fields() {
    let source = MemoryRowSource::new().with_table(
        "items",
        records(json!([{"row_number": 99}, {"row_number": 98}])),
    );
    let out = render(
        app(
            vec![list("list", "items").with_child(Element::text("n", "#{{CALC:rn}}"))],
            CalculationTable::new()
                .with(Calculation::new("rn").step(StepSource::repeating("list", "row_number"))),
        ),
        source,
    );
    assert_eq!(text(&out, "n_repeat_list_0"), "#1");
    assert_eq!(text(&out, "n_repeat_list_1"), "#2");
}

#[test]
fn test_two_row_repeating_end_to_end() {
    let source = MemoryRowSource::new().with_table(
        "users",
        records(json!([{"id": 1, "name": "x"}, {"id": 2, "name": "y"}])),
    );
    let out = render(
        app(
            vec![list("list", "users").with_child(Element::text("label", "{{CALC:name}}"))],
            CalculationTable::new()
                .with(Calculation::new("name").step(StepSource::repeating("list", "name"))),
        ),
        source,
    );
    assert_eq!(text(&out, "label_repeat_list_0"), "x");
    assert_eq!(text(&out, "label_repeat_list_1"), "y");
}

#[test]
fn test_failed_fetch_renders_empty_instance() {
    let source = MemoryRowSource::new().failing("users", "offline");
    let out = render(
        app(
            vec![
                Element::text("title", "Users"),
                list("list", "users").with_child(Element::text("label", "{{CALC:name}}")),
            ],
            CalculationTable::new()
                .with(Calculation::new("name").step(StepSource::repeating("list", "name"))),
        ),
        source,
    );
    assert_eq!(text(&out, "title"), "Users");
    let (key, _) = out.tree.query_by_id("list").unwrap();
    assert!(out.tree.children(key).is_empty());
    assert_eq!(
        out.errors.get("list").map(String::as_str),
        Some("query against `users` failed: offline")
    );
}

#[test]
fn test_render_snapshot() {
    let source = MemoryRowSource::new().with_table(
        "users",
        records(json!([{"name": "x"}, {"name": "y"}])),
    );
    let out = render(
        app(
            vec![
                Element::text("greeting", "Hello {{CALC:c1}}"),
                Element::container("panel")
                    .with_conditions([Condition::new("never").step(custom("false"))])
                    .with_child(Element::text("inner", "{{CALC:c1}}")),
                list("list", "users").with_child(Element::text("name", "{{CALC:name}}")),
            ],
            CalculationTable::new()
                .with(
                    Calculation::new("c1")
                        .step(custom("A"))
                        .then(Operation::Concatenate, custom("B")),
                )
                .with(Calculation::new("name").step(StepSource::repeating("list", "name"))),
        ),
        source,
    );
    insta::assert_snapshot!(render_to_string(&out.tree), @r###"
    text #greeting "Hello AB"
    container #panel [hidden]
      text #inner "{{CALC:c1}}" [hidden]
    container #list_instance_0
      text #name_repeat_list_0 "x"
    container #list_instance_1
      text #name_repeat_list_1 "y"
    "###);
}

// ---------------------------------------------------------------------------
// Active selection
// ---------------------------------------------------------------------------

fn tabs_app() -> AppDefinition {
    app(
        vec![
            Element::container("tabs")
                .with_container_type(ContainerType::Tabs)
                .with_property("activeTab", "3")
                .with_children((1..=5).map(|i| {
                    Element::container(format!("tab{i}")).with_child(
                        Element::text(format!("label{i}"), format!("Tab {i}"))
                            .with_property("isTabValue", true),
                    )
                })),
            Element::text("order", "{{CALC:order}}"),
            Element::text("value", "{{CALC:value}}"),
        ],
        CalculationTable::new()
            .with(Calculation::new("order").step(StepSource::element("tabs")))
            .with(Calculation::new("value").step(StepSource::container_value(
                "tabs",
                ContainerValueType::ActiveTabValue,
            ))),
    )
}

#[test]
fn test_active_selection_default_and_select() {
    let session = Session::new(tabs_app(), "home", MemoryRowSource::new());
    let out = rendered(tokio_test::block_on(session.start()));
    assert_eq!(session.selections().peek("tabs"), Some(2));
    assert_eq!(text(&out, "order"), "3");
    assert_eq!(text(&out, "value"), "Tab 3");

    let out = rendered(tokio_test::block_on(session.select_active_child("tabs", 4)));
    assert_eq!(session.selections().peek("tabs"), Some(4));
    assert_eq!(text(&out, "order"), "5");
    assert_eq!(text(&out, "value"), "Tab 5");

    let app = session.app();
    let persisted = app
        .screen("home")
        .and_then(|s| s.find("tabs"))
        .and_then(|el| el.properties.get_text("activeTab"));
    assert_eq!(persisted.as_deref(), Some("5"));
}

#[test]
fn test_out_of_range_selection_uses_last_child() {
    let session = Session::new(tabs_app(), "home", MemoryRowSource::new());
    tokio_test::block_on(session.start());

    let out = rendered(tokio_test::block_on(session.select_active_child("tabs", 7)));
    assert_eq!(session.selections().peek("tabs"), Some(4));
    assert_eq!(text(&out, "order"), "5");
    assert_eq!(text(&out, "value"), "Tab 5");

    // A fresh store initialised from the persisted definition agrees.
    let app = session.app();
    let screen = app.screen("home").unwrap();
    let persisted = screen
        .find("tabs")
        .and_then(|el| el.properties.get_text("activeTab"));
    assert_eq!(persisted.as_deref(), Some("5"));
    let tree = ElementTree::from_elements(&screen.elements);
    assert_eq!(ActiveSelectionStore::new().get("tabs", &tree), 4);
}

// ---------------------------------------------------------------------------
// Pages and environment
// ---------------------------------------------------------------------------

#[test]
fn test_page_container_passes_parameters() {
    let app = AppDefinition::new()
        .with_screen(ScreenDefinition::new(
            "home",
            vec![Element::container("slot").page(PageConfig {
                screen_id: "card".into(),
                parameters: [("name".to_string(), "Ada".to_string())].into(),
            })],
        ))
        .with_screen(ScreenDefinition::new(
            "card",
            vec![Element::text("greeting", "Hi {{CALC:who}}")],
        ))
        .with_calculations(
            CalculationTable::new().with(Calculation::new("who").step(StepSource::parameter("name"))),
        );
    let out = render(app, MemoryRowSource::new());
    assert_eq!(text(&out, "greeting_page_slot"), "Hi Ada");
}

#[test]
fn test_viewport_and_clock() {
    let session = Session::new(
        app(
            vec![Element::text("t", "{{CALC:w}}x{{CALC:h}} @ {{CALC:day}}")],
            CalculationTable::new()
                .with(Calculation::new("w").step(StepSource::ScreenWidth))
                .with(Calculation::new("h").step(StepSource::ScreenHeight))
                .with(Calculation::new("day").step(StepSource::Timestamp { format: None })),
        ),
        "home",
        MemoryRowSource::new(),
    )
    .with_config(EngineConfig::new().with_timestamp_format("%Y-%m-%d"))
    .with_clock(|| Utc.with_ymd_and_hms(2025, 1, 31, 8, 0, 0).unwrap());

    let out = rendered(tokio_test::block_on(session.start()));
    assert_eq!(text(&out, "t"), "1280x800 @ 2025-01-31");

    session.resize(390, 844);
    let out = rendered(tokio_test::block_on(session.start()));
    assert_eq!(text(&out, "t"), "390x844 @ 2025-01-31");
}

#[test]
fn test_missing_screen_still_renders() {
    let session = Session::new(tabs_app(), "home", MemoryRowSource::new());
    let out = rendered(tokio_test::block_on(session.change_screen("nowhere")));
    assert!(out.tree.is_empty());
    assert_eq!(
        out.errors.get("nowhere").map(String::as_str),
        Some("screen `nowhere` not found")
    );
    assert_eq!(session.phase(), Phase::Rendered);
}

#[test]
fn test_app_from_json_end_to_end() {
    let json = r#"{
        "screens": [{
            "id": "home",
            "elements": [
                {"id": "t", "type": "text", "properties": {"text": "Hello {{CALC:c1}}"}}
            ]
        }],
        "calculations": [{
            "id": "c1",
            "steps": [
                {"source": "custom", "value": "A"},
                {"operation": "concatenate", "source": "custom", "value": "B"}
            ]
        }]
    }"#;
    let app = AppDefinition::from_json(json).unwrap();
    let out = render(app, MemoryRowSource::new());
    assert_eq!(text(&out, "t"), "Hello AB");
}

// ---------------------------------------------------------------------------
// Session lifecycle
// ---------------------------------------------------------------------------

fn users_app() -> AppDefinition {
    app(
        vec![list("list", "users").with_child(Element::text("label", "{{CALC:name}}"))],
        CalculationTable::new()
            .with(Calculation::new("name").step(StepSource::repeating("list", "name"))),
    )
}

#[test]
fn test_queries_are_cached_until_refresh() {
    let source = MemoryRowSource::new().with_table("users", records(json!([{"name": "x"}])));
    let session = Session::new(users_app(), "home", source);

    tokio_test::block_on(session.start());
    tokio_test::block_on(session.start());
    assert_eq!(session.source().calls(), 1);

    session
        .source()
        .set_table("users", records(json!([{"name": "z"}])));
    let out = rendered(tokio_test::block_on(session.refresh()));
    assert_eq!(session.source().calls(), 2);
    assert_eq!(text(&out, "label_repeat_list_0"), "z");
}

#[test]
fn test_failed_fetch_is_retried_on_next_run() {
    let source = MemoryRowSource::new()
        .with_table("users", records(json!([{"name": "x"}])))
        .failing("users", "offline");
    let session = Session::new(users_app(), "home", source);

    let out = rendered(tokio_test::block_on(session.start()));
    assert!(out.errors.contains_key("list"));

    session.source().recover("users");
    let out = rendered(tokio_test::block_on(session.start()));
    assert_eq!(session.source().calls(), 2);
    assert_eq!(text(&out, "label_repeat_list_0"), "x");
    assert!(out.errors.is_empty());
}

#[test]
fn test_cache_can_be_disabled() {
    let source = MemoryRowSource::new().with_table("users", records(json!([{"name": "x"}])));
    let session = Session::new(users_app(), "home", source)
        .with_config(EngineConfig::new().with_query_cache(false));
    tokio_test::block_on(session.start());
    tokio_test::block_on(session.start());
    assert_eq!(session.source().calls(), 2);
}

#[tokio::test]
async fn test_last_trigger_wins() {
    let source = MemoryRowSource::new().with_table("users", records(json!([{"name": "x"}])));
    let gate = source.hold("users");
    let session = Session::new(users_app(), "home", source);

    let (first, second, ()) = tokio::join!(session.start(), session.refresh(), async {
        gate.notify_one();
    });

    assert!(first.is_superseded());
    let second = rendered(second);
    assert_eq!(second.generation, 2);
    assert_eq!(text(&second, "label_repeat_list_0"), "x");
    assert_eq!(session.latest().map(|o| o.generation), Some(2));
    assert_eq!(session.phase(), Phase::Rendered);
    assert_eq!(session.generation(), 2);
}

/// Returns one row stamped with the version current when the fetch started.
#[derive(Default)]
struct VersionedSource {
    version: Cell<u32>,
    gate: RefCell<Option<Rc<tokio::sync::Notify>>>,
}

impl RowSource for VersionedSource {
    async fn fetch_rows(
        &self,
        _source: &SourceRef,
        _filters: &[Filter],
    ) -> Result<Vec<Record>, QueryError> {
        let version = self.version.get();
        let gate = self.gate.borrow_mut().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(records(json!([{"name": format!("v{version}")}])))
    }
}

#[tokio::test]
async fn test_superseded_fetch_does_not_overwrite_refreshed_rows() {
    let gate = Rc::new(tokio::sync::Notify::new());
    let source = VersionedSource {
        version: Cell::new(1),
        gate: RefCell::new(Some(Rc::clone(&gate))),
    };
    let session = Session::new(users_app(), "home", source);

    let (first, second, ()) = tokio::join!(
        session.start(),
        async {
            session.source().version.set(2);
            session.refresh().await
        },
        async {
            gate.notify_one();
        }
    );
    assert!(first.is_superseded());
    assert_eq!(text(&rendered(second), "label_repeat_list_0"), "v2");

    let third = rendered(session.start().await);
    assert_eq!(text(&third, "label_repeat_list_0"), "v2");
}
