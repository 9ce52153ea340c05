//! Behaviour every [`KvStore`] backend must share. Each check panics on violation.

use osmdb_core::{KeyRange, KvOp, KvStore, SubKv};
use std::sync::Arc;

pub async fn run_all(kv: Arc<dyn KvStore>) {
    get_missing_is_none(kv.as_ref()).await;
    put_overwrites(kv.as_ref()).await;
    batch_applies_in_order(kv.as_ref()).await;
    scan_is_sorted_and_half_open(kv.as_ref()).await;
    prefix_scan_stops_at_prefix(kv.as_ref()).await;
    namespaces_are_isolated(kv).await;
}

pub async fn get_missing_is_none(kv: &dyn KvStore) {
    assert_eq!(kv.get("conformance/missing").await.unwrap(), None);
}

pub async fn put_overwrites(kv: &dyn KvStore) {
    kv.put("conformance/a", b"one".to_vec()).await.unwrap();
    kv.put("conformance/a", b"two".to_vec()).await.unwrap();
    assert_eq!(
        kv.get("conformance/a").await.unwrap().as_deref(),
        Some(&b"two"[..])
    );
    kv.del("conformance/a").await.unwrap();
    assert_eq!(kv.get("conformance/a").await.unwrap(), None);
    // deleting an absent key is not an error
    kv.del("conformance/a").await.unwrap();
}

pub async fn batch_applies_in_order(kv: &dyn KvStore) {
    kv.batch(vec![
        KvOp::put("order/k", b"first".to_vec()),
        KvOp::del("order/k"),
        KvOp::put("order/k", b"last".to_vec()),
        KvOp::put("order/j", b"kept".to_vec()),
    ])
    .await
    .unwrap();
    assert_eq!(
        kv.get("order/k").await.unwrap().as_deref(),
        Some(&b"last"[..])
    );
    assert_eq!(
        kv.get("order/j").await.unwrap().as_deref(),
        Some(&b"kept"[..])
    );
}

pub async fn scan_is_sorted_and_half_open(kv: &dyn KvStore) {
    let ops = ["scan/c", "scan/a", "scan/d", "scan/b"]
        .into_iter()
        .map(|k| KvOp::put(k, k.as_bytes().to_vec()))
        .collect();
    kv.batch(ops).await.unwrap();

    let rows = kv.scan(KeyRange::new("scan/b", "scan/d")).await.unwrap();
    let keys: Vec<&str> = rows.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(keys, ["scan/b", "scan/c"]);
    assert_eq!(rows[0].1, b"scan/b".to_vec());
}

pub async fn prefix_scan_stops_at_prefix(kv: &dyn KvStore) {
    kv.batch(vec![
        KvOp::put("pfx!1", vec![1]),
        KvOp::put("pfx!2", vec![2]),
        KvOp::put("pfx\"", vec![3]),
        KvOp::put("pfw", vec![4]),
    ])
    .await
    .unwrap();
    let rows = kv.scan(KeyRange::prefix("pfx!")).await.unwrap();
    let keys: Vec<&str> = rows.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(keys, ["pfx!1", "pfx!2"]);
}

pub async fn namespaces_are_isolated(kv: Arc<dyn KvStore>) {
    let geo = SubKv::new(Arc::clone(&kv), "ns-geo");
    let refs = SubKv::new(Arc::clone(&kv), "ns-refs");
    geo.put("k", b"geo".to_vec()).await.unwrap();
    refs.put("k", b"refs".to_vec()).await.unwrap();

    assert_eq!(geo.get("k").await.unwrap().as_deref(), Some(&b"geo"[..]));
    assert_eq!(refs.get("k").await.unwrap().as_deref(), Some(&b"refs"[..]));
    assert_eq!(
        kv.get("!ns-geo!k").await.unwrap().as_deref(),
        Some(&b"geo"[..])
    );

    let data = geo.sub("data");
    data.put("row", vec![7]).await.unwrap();
    let all = geo.scan(KeyRange::prefix("")).await.unwrap();
    let keys: Vec<&str> = all.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(keys, ["!data!row", "k"]);
    assert_eq!(
        data.scan(KeyRange::prefix("")).await.unwrap(),
        vec![("row".to_string(), vec![7])]
    );
}
