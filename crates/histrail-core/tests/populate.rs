use histrail_core::db::records::by_entity_type;
use histrail_core::model::ChangeKind;
use histrail_core::populate::{ALREADY_POPULATED, PopulateOutcome, populate_initial_history};

use fixtures::*;

#[test]
fn seeds_existing_rows_then_skips_populated_types() {
    let mut w = World::new();
    for question in ["Q1", "Q2"] {
        w.host
            .insert_raw("Poll", &[("question", text(question))])
            .expect("raw poll");
    }
    let show = w.host.insert_raw("Show", &[("title", text("Show"))]).expect("raw show");
    w.host
        .insert_raw("Season", &[("title", text("S1")), ("show", one(&show))])
        .expect("raw season");

    let report = populate_initial_history(&mut w.conn, w.logger.registry(), &w.host);
    assert!(!report.has_failures());
    assert_eq!(report.outcome("Poll"), Some(&PopulateOutcome::Seeded { count: 2 }));
    assert_eq!(report.outcome("Show"), Some(&PopulateOutcome::Seeded { count: 1 }));
    assert_eq!(report.outcome("Episode"), Some(&PopulateOutcome::Seeded { count: 0 }));
    assert_eq!(report.outcome("Voter"), None);
    assert_eq!(report.seeded(), 4);

    let shows = by_entity_type(&w.conn, "Show").expect("show history");
    assert_eq!(shows.len(), 1);
    assert_eq!(shows[0].change_kind, ChangeKind::Create);
    assert_eq!(shows[0].related_record_id, None);
    assert_eq!(field(&shows[0], "season"), Some("1"));
    assert_eq!(shows[0].extra_data["where_from"], "System");

    let again = populate_initial_history(&mut w.conn, w.logger.registry(), &w.host);
    assert_eq!(
        again.outcome("Poll"),
        Some(&PopulateOutcome::Skipped {
            reason: ALREADY_POPULATED.to_string()
        })
    );
    assert_eq!(by_entity_type(&w.conn, "Poll").expect("poll history").len(), 2);
}

#[test]
fn report_serializes_with_status_tags() {
    let mut w = World::new();
    w.host.insert_raw("Actor", &[("name", text("Ann"))]).expect("raw actor");

    let report = populate_initial_history(&mut w.conn, w.logger.registry(), &w.host);
    let json = serde_json::to_value(&report).expect("serialize report");
    let actor = json["types"]
        .as_array()
        .expect("types array")
        .iter()
        .find(|entry| entry["entity_type"] == "Actor")
        .expect("actor entry");
    assert_eq!(actor["status"], "seeded");
    assert_eq!(actor["count"], 1);
}
