use chrono::{TimeZone, Utc};
use histrail_core::db::records::{StoreTable, count_records};
use histrail_core::hooks::ChangeContext;
use histrail_core::model::{Actor, ChangeKind};
use histrail_core::source::{FieldValue, ScalarValue};

use fixtures::*;

fn stamp(day: u32) -> FieldValue {
    let at = Utc
        .with_ymd_and_hms(2024, 3, day, 9, 30, 0)
        .single()
        .expect("valid timestamp");
    FieldValue::Scalar(Some(ScalarValue::Timestamp(at)))
}

#[test]
fn create_writes_one_record_with_empty_change_set() {
    let mut w = World::new();
    let poll = w.create("Poll", &[("question", text("Q")), ("pub_date", stamp(1))]);

    let history = w.history(&poll);
    assert_eq!(history.len(), 1);
    let created = &history[0];
    assert_eq!(created.change_kind, ChangeKind::Create);
    assert_eq!(created.changed_fields, Some(Vec::new()));
    assert_eq!(field(created, "question"), Some("Q"));
    assert_eq!(field(created, "pub_date"), Some("2024-03-01T09:30:00.000000Z"));
    assert!(!created.data.contains_key("updated_on"));
    assert!(!created.data.contains_key("choices"));
    assert_eq!(created.extra_data["where_from"], "Import");
    assert_eq!(created.related_record_id, None);
}

#[test]
fn update_records_changed_fields_and_skips_noop_saves() {
    let mut w = World::new();
    let poll = w.create("Poll", &[("question", text("Q")), ("pub_date", stamp(1))]);

    w.update(&poll, &[("question", text("Q2"))]);
    let updated = w.latest(&poll);
    assert_eq!(updated.change_kind, ChangeKind::Update);
    assert_eq!(changed(&updated), ["question"]);
    assert_eq!(field(&updated, "question"), Some("Q2"));

    w.save(&poll);
    w.update(&poll, &[("pub_date", stamp(1))]);
    w.update(&poll, &[("updated_on", stamp(9))]);
    assert_eq!(w.history(&poll).len(), 2);
}

#[test]
fn delete_records_final_state() {
    let mut w = World::new();
    let poll = w.create("Poll", &[("question", text("Q"))]);
    w.update(&poll, &[("question", text("Q2"))]);
    w.delete(&poll);

    let history = w.history(&poll);
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].change_kind, ChangeKind::Delete);
    assert_eq!(history[0].changed_fields, Some(Vec::new()));
    assert_eq!(field(&history[0], "question"), Some("Q2"));
    assert!(history.windows(2).all(|pair| pair[0].id > pair[1].id));
}

#[test]
fn null_scalars_are_stored_as_null() {
    let mut w = World::new();
    let choice = w.create("Choice", &[("choice", text("yes"))]);
    let created = w.latest(&choice);
    assert_eq!(created.data.get("votes"), Some(&None));
    assert_eq!(created.data.get("poll"), Some(&None));

    w.update(&choice, &[("votes", int(3))]);
    let updated = w.latest(&choice);
    assert_eq!(changed(&updated), ["votes"]);
    assert_eq!(field(&updated, "votes"), Some("3"));
}

#[test]
fn excluded_inverse_gets_no_related_record() {
    let mut w = World::new();
    let poll = w.create("Poll", &[("question", text("Q"))]);
    let choice = w.create("Choice", &[("poll", one(&poll)), ("choice", text("yes"))]);

    assert_eq!(w.history(&poll).len(), 1);
    assert_eq!(field(&w.latest(&choice), "poll"), Some(poll.object_id.as_str()));
}

#[test]
fn ignored_actors_leave_no_trace() {
    let mut w = World::new();
    w.ctx = ChangeContext::for_request(Actor::named(7, IGNORED_NAME));
    let by_name = w.create("Poll", &[("question", text("Q"))]);
    assert!(w.history(&by_name).is_empty());

    w.ctx = ChangeContext::for_request(Actor::named(IGNORED_ID, "someone"));
    let by_id = w.create("Poll", &[("question", text("Q"))]);
    assert!(w.history(&by_id).is_empty());

    // Ignoring is per type: the same actor is recorded on Choice.
    let choice = w.create("Choice", &[("choice", text("no"))]);
    assert_eq!(w.latest(&choice).actor_id, Some(IGNORED_ID));
}

#[test]
fn instance_actor_wins_over_request_actor() {
    let mut w = World::new();
    w.ctx = ChangeContext::for_request(Actor::named(1, "web"))
        .with_instance_actor(Actor::named(2, "importer"));
    let poll = w.create("Poll", &[("question", text("Q"))]);

    let created = w.latest(&poll);
    assert_eq!(created.actor_name.as_deref(), Some("importer"));
    assert_eq!(created.actor_id, Some(2));

    w.ctx = ChangeContext::anonymous();
    w.update(&poll, &[("question", text("Q2"))]);
    let updated = w.latest(&poll);
    assert_eq!(updated.actor_name, None);
    assert_eq!(updated.actor_id, None);
}

#[test]
fn history_rolls_back_with_the_host_transaction() {
    let mut w = World::new();

    {
        let tx = w.conn.transaction().expect("begin");
        w.host
            .create(&tx, "Poll", &[("question", text("lost"))], &w.ctx)
            .expect("create inside transaction");
        assert_eq!(count_records(&tx, StoreTable::Live).expect("count"), 1);
        tx.rollback().expect("rollback");
    }
    assert_eq!(count_records(&w.conn, StoreTable::Live).expect("count"), 0);

    let tx = w.conn.transaction().expect("begin");
    let poll = w
        .host
        .create(&tx, "Poll", &[("question", text("kept"))], &w.ctx)
        .expect("create inside transaction");
    tx.commit().expect("commit");
    assert_eq!(field(&w.latest(&poll), "question"), Some("kept"));
}
