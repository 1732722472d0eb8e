//! End-to-end scenarios exercised through a temporary database directory.

use std::collections::BTreeMap;

use pgdfdb::{Db, Error, Options};

fn open_tmp() -> (tempfile::TempDir, Db) {
    let dir = tempfile::tempdir().unwrap();
    let db = Db::open(dir.path(), Options::default()).unwrap();
    (dir, db)
}

#[test]
fn point_lookup_round_trip() {
    let (_dir, db) = open_tmp();
    db.ingest_text("@id|@label|name|country\nuser_101|User|Ana|Mexico\n")
        .unwrap();

    let node = db.get_node("user_101").unwrap().unwrap();
    assert_eq!(node.label, "User");
    assert_eq!(
        node.props,
        BTreeMap::from([
            ("name".to_string(), "Ana".to_string()),
            ("country".to_string(), "Mexico".to_string()),
        ])
    );
    assert!(db.get_node("missing").unwrap().is_none());
}

#[test]
fn property_scan() {
    let (_dir, db) = open_tmp();
    db.ingest_text(
        "@id|@label|country\n\
         user_101|User|Mexico\n\
         user_102|User|USA\n\
         user_103|User|Chile\n",
    )
    .unwrap();

    let ids: Vec<String> = db
        .iter_nodes_by_property("country", "Chile")
        .unwrap()
        .map(|r| r.unwrap().id)
        .collect();
    assert_eq!(ids, vec!["user_103".to_string()]);
}

#[test]
fn neighbour_enumeration_directed() {
    let (_dir, db) = open_tmp();
    db.ingest_text("@id|@label|\nuser_101|User\nuser_102|User\nuser_103|User\n")
        .unwrap();
    db.ingest_text(
        "@id|@label|@dir|@out|@in|\n\
         edge_50|KNOWS|T|user_101|user_102|\n\
         edge_51|WORKS_WITH|T|user_103|user_101|\n",
    )
    .unwrap();

    let ids: Vec<String> = db
        .iter_neighbours("user_101")
        .unwrap()
        .map(|r| r.unwrap().id)
        .collect();
    assert_eq!(ids, vec!["edge_50".to_string()]);
}

#[test]
fn label_filter() {
    let (_dir, db) = open_tmp();
    db.ingest_text("@id|@label|\nuser_101|User\nuser_102|User\nuser_103|User\n")
        .unwrap();
    db.ingest_text(
        "@id|@label|@dir|@out|@in|\n\
         edge_50|KNOWS|T|user_101|user_102|\n\
         edge_51|WORKS_WITH|T|user_103|user_101|\n\
         edge_52|KNOWS|T|user_102|user_103|\n",
    )
    .unwrap();

    let ids: Vec<String> = db
        .iter_edges_by_label("KNOWS")
        .unwrap()
        .map(|r| r.unwrap().id)
        .collect();
    assert_eq!(ids, vec!["edge_50".to_string(), "edge_52".to_string()]);
}

#[test]
fn metadata_aggregation() {
    let (_dir, db) = open_tmp();
    db.ingest_text("@id|@label|name|country\nuser_101|User|Ana|Mexico\nuser_102|User|Bo|USA\nuser_103|User|Cy|Chile\n")
        .unwrap();
    db.ingest_text(
        "@id|@label|@dir|@out|@in|\n\
         edge_50|KNOWS|T|user_101|user_102|\n\
         edge_51|WORKS_WITH|T|user_103|user_101|\n\
         edge_52|KNOWS|T|user_102|user_103|\n",
    )
    .unwrap();

    assert_eq!(db.count_nodes().unwrap(), 3);
    assert_eq!(db.count_edges().unwrap(), 3);
    assert_eq!(
        db.edge_count_by_label().unwrap(),
        BTreeMap::from([("KNOWS".to_string(), 2), ("WORKS_WITH".to_string(), 1)])
    );
    let schema = db.node_schema().unwrap();
    assert_eq!(
        schema.get("User").unwrap(),
        &std::collections::BTreeSet::from(["name".to_string(), "country".to_string()])
    );
}

#[test]
fn bad_ingest_is_skipped_and_leaves_state_unchanged() {
    let (_dir, db) = open_tmp();
    db.ingest_text("@id|@label|name|country\nuser_101|User|Ana|Mexico\nuser_102|User|Bo|USA\nuser_103|User|Cy|Chile\n")
        .unwrap();
    assert_eq!(db.count_nodes().unwrap(), 3);

    let report = db
        .ingest_text("@id|@label|name|country\nuser_101|User|Duplicate|Nowhere\n")
        .unwrap();
    assert_eq!(report.records_skipped, 1);
    assert_eq!(db.count_nodes().unwrap(), 3);
    // The original record is untouched by the rejected re-ingestion.
    let node = db.get_node("user_101").unwrap().unwrap();
    assert_eq!(node.props.get("name").unwrap(), "Ana");
}

#[test]
fn undirected_edge_is_adjacent_from_both_endpoints() {
    let (_dir, db) = open_tmp();
    db.ingest_text("@id|@label|\nuser_1|User\nuser_2|User\n")
        .unwrap();
    db.ingest_text("@id|@label|@dir|@out|@in|\nedge_1|FRIENDS|F|user_1|user_2|\n")
        .unwrap();

    let from_1: Vec<String> = db
        .iter_neighbours("user_1")
        .unwrap()
        .map(|r| r.unwrap().id)
        .collect();
    let from_2: Vec<String> = db
        .iter_neighbours("user_2")
        .unwrap()
        .map(|r| r.unwrap().id)
        .collect();
    assert_eq!(from_1, vec!["edge_1".to_string()]);
    assert_eq!(from_2, vec!["edge_1".to_string()]);
}

#[test]
fn closing_with_outstanding_cursor_is_rejected_then_succeeds_after_drop() {
    let (_dir, db) = open_tmp();
    db.ingest_text("@id|@label|\nuser_1|User\n").unwrap();

    let cursor = db.iter_all_nodes().unwrap();
    let err = db.close().unwrap_err();
    assert!(matches!(err, Error::UsageError(_)));
    drop(cursor);
    db.close().unwrap();
}

#[test]
fn strict_mode_surfaces_malformed_input_as_an_error() {
    let (_dir, db) = open_tmp();
    let options = Options::new().strict_ingestion(true);
    let dir = tempfile::tempdir().unwrap();
    let strict_db = Db::open(dir.path(), options).unwrap();
    drop(db);

    let err = strict_db
        .ingest_text("@id|@label|@dir|@out|@in|\nedge_1|KNOWS|MAYBE|a|b|\n")
        .unwrap_err();
    assert!(matches!(err, Error::BadRecord { .. }));
}
