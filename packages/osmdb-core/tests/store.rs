use osmdb_core::{
    BatchOp, Element, ElementKind, Error, Id, Log, QueryOptions, Version, WriterKey,
};
use osmdb_test_support::create_db;
use serde_json::json;

#[tokio::test]
async fn create_assigns_id_version_and_timestamp() {
    let osm = create_db();
    let rev = osm.create(Element::node("1", "64.5", "-147.3")).await.unwrap();

    assert!(!rev.id.as_str().is_empty());
    assert!(rev.element.timestamp.is_some());
    assert_eq!(rev.kind(), ElementKind::Node);

    let heads = osm.get(&rev.id).await.unwrap();
    assert_eq!(heads, vec![rev.clone()]);
    assert_eq!(osm.get_by_version(&rev.version).await.unwrap(), rev);
}

#[tokio::test]
async fn caller_timestamp_is_kept() {
    let osm = create_db();
    let rev = osm
        .create(Element::node("1", 0, 0).with_timestamp("2017-10-10T19:55:08.570Z"))
        .await
        .unwrap();
    assert_eq!(
        rev.element.timestamp.as_deref(),
        Some("2017-10-10T19:55:08.570Z")
    );
}

#[tokio::test]
async fn get_of_unknown_id_is_empty() {
    let osm = create_db();
    assert!(osm.get(&Id::from("nope")).await.unwrap().is_empty());
}

#[tokio::test]
async fn put_supersedes_previous_head() {
    let osm = create_db();
    let first = osm.create(Element::node("1", 1, 1)).await.unwrap();
    let second = osm.put(&first.id, Element::node("1", 2, 2)).await.unwrap();

    assert_eq!(second.id, first.id);
    assert_ne!(second.version, first.version);
    assert_eq!(osm.get(&first.id).await.unwrap(), vec![second]);
    // superseded revisions stay readable by version
    let old = osm.get_by_version(&first.version).await.unwrap();
    assert_eq!(old.element.lat.as_deref(), Some("1"));
}

#[tokio::test]
async fn put_of_unknown_id_is_not_found() {
    let osm = create_db();
    let err = osm
        .put(&Id::from("ghost"), Element::node("1", 0, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "{err}");
}

#[tokio::test]
async fn put_may_change_kind() {
    let osm = create_db();
    let a = osm.create(Element::node("1", 0, 0)).await.unwrap();
    let b = osm.create(Element::node("1", 0, 1)).await.unwrap();
    let c = osm.create(Element::node("1", 1, 1)).await.unwrap();
    let rev = osm
        .put(&a.id, Element::way("2", [b.id.clone(), c.id.clone(), b.id.clone()]))
        .await
        .unwrap();
    assert_eq!(rev.kind(), ElementKind::Way);
}

#[tokio::test]
async fn node_turned_changeset_leaves_the_box() {
    let osm = create_db();
    let a = osm.create(Element::node("1", 0.5, 0.5)).await.unwrap();
    osm.ready().await.unwrap();
    let bbox = [[0.0, 1.0], [0.0, 1.0]];
    assert_eq!(osm.query(bbox, QueryOptions::default()).await.unwrap().len(), 1);

    osm.put(&a.id, Element::changeset()).await.unwrap();
    let heads = osm.get(&a.id).await.unwrap();
    assert_eq!(heads.len(), 1);
    assert_eq!(heads[0].kind(), ElementKind::Changeset);
    assert!(osm.query(bbox, QueryOptions::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn del_appends_tombstone() {
    let osm = create_db();
    let node = osm.create(Element::node("1", 5, 5)).await.unwrap();
    let tomb = osm.del(&node.id, Element::node("2", 5, 5)).await.unwrap();

    assert!(tomb.is_deleted());
    let heads = osm.get(&node.id).await.unwrap();
    assert_eq!(heads.len(), 1);
    assert!(heads[0].is_deleted());
    assert_eq!(heads[0].element.changeset.as_deref(), Some("2"));
}

#[tokio::test]
async fn invalid_elements_are_rejected_without_writing() {
    let osm = create_db();
    let cases = [
        (Element::way("1", ["a", "b"]), "refs"),
        (Element::node("1", 91, 0), "lat"),
        (Element::node("1", 0, "east"), "lon"),
        (Element::node("", 0, 0), "changeset"),
        (Element::node("1", 0, 0).with_timestamp("yesterday"), "timestamp"),
        (
            Element::relation("1", Default::default(), Vec::new()),
            "tags",
        ),
    ];
    for (element, field) in cases {
        match osm.create(element).await {
            Err(Error::Validation(err)) => assert_eq!(err.field, field),
            other => panic!("expected validation error on {field}, got {other:?}"),
        }
    }
    assert_eq!(osm.log().position().unwrap(), 0);
}

#[tokio::test]
async fn changesets_need_no_changeset_field() {
    let osm = create_db();
    let rev = osm
        .create(Element::changeset().with_tag("comment", "survey"))
        .await
        .unwrap();
    assert_eq!(rev.kind(), ElementKind::Changeset);
}

#[tokio::test]
async fn batch_returns_results_in_input_order() {
    let osm = create_db();
    let revs = osm
        .batch(vec![
            BatchOp::put(Some(Id::from("A")), Element::node("1", 1, 1)),
            BatchOp::put(None, Element::node("1", 2, 2)),
            BatchOp::put(Some(Id::from("W")), Element::way("1", ["A", "A", "A"])),
        ])
        .await
        .unwrap();

    assert_eq!(revs.len(), 3);
    assert_eq!(revs[0].id, Id::from("A"));
    assert!(!revs[1].id.as_str().is_empty());
    assert_ne!(revs[1].id, revs[0].id);
    for rev in &revs {
        assert_eq!(osm.get(&rev.id).await.unwrap(), vec![rev.clone()]);
    }
    assert_eq!(revs[2].kind(), ElementKind::Way);
    assert_eq!(osm.get(&Id::from("W")).await.unwrap(), vec![revs[2].clone()]);

    let dels = osm
        .batch(vec![BatchOp::del(Id::from("A"), Element::node("1", 1, 1))])
        .await
        .unwrap();
    assert!(dels[0].is_deleted());
}

#[tokio::test]
async fn batch_is_all_or_nothing() {
    let osm = create_db();
    let err = osm
        .batch(vec![
            BatchOp::put(Some(Id::from("A")), Element::node("1", 1, 1)),
            BatchOp::put(None, Element::way("1", ["A"])),
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let err = osm
        .batch(vec![
            BatchOp::put(Some(Id::from("A")), Element::node("1", 1, 1)),
            BatchOp::del(Id::from("missing"), Element::node("1", 1, 1)),
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    assert_eq!(osm.log().position().unwrap(), 0);
    assert!(osm.get(&Id::from("A")).await.unwrap().is_empty());
}

#[tokio::test]
async fn batch_ops_parse_from_json() {
    let op = BatchOp::from_json(json!({
        "type": "put",
        "id": "n1",
        "value": { "type": "node", "changeset": "1", "lat": "1", "lon": "2" }
    }))
    .unwrap();
    assert_eq!(op.id, Some(Id::from("n1")));
    assert_eq!(op.value.point(), Some((1.0, 2.0)));

    let err = BatchOp::from_json(json!({
        "type": "upsert",
        "value": { "type": "node", "changeset": "1", "lat": "1", "lon": "2" }
    }))
    .unwrap_err();
    assert!(matches!(err, Error::UnknownOpType(ref t) if t == "upsert"));
    assert!(err.is_bad_input());
}

#[tokio::test]
async fn unknown_versions_and_tokens() {
    let osm = create_db();
    let missing = Version::new(WriterKey::random(), 0);
    assert!(matches!(
        osm.get_by_version(&missing).await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        osm.store().get_by_token("!!not a token!!").await,
        Err(Error::MalformedVersion(_))
    ));

    let rev = osm.create(Element::node("1", 0, 0)).await.unwrap();
    let by_token = osm
        .store()
        .get_by_token(&rev.version.to_token())
        .await
        .unwrap();
    assert_eq!(by_token, rev);
}
