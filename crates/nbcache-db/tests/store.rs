use nbcache_db::{Database, StoreError};
use serde_json::json;

fn open_db(dir: &std::path::Path) -> Database {
    Database::open(dir).unwrap()
}

#[test]
fn settings_round_trip_and_default() {
    let tmp = tempfile::tempdir().unwrap();
    let db = open_db(tmp.path());

    assert!(db.get_setting("cache_limit").unwrap().is_none());
    db.set_setting("cache_limit", &json!(5)).unwrap();
    assert_eq!(db.get_setting("cache_limit").unwrap(), Some(json!(5)));

    db.set_setting("cache_limit", &json!(7)).unwrap();
    assert_eq!(db.get_setting("cache_limit").unwrap(), Some(json!(7)));

    db.set_setting("other", &json!({"a": [1, 2]})).unwrap();
    let all = db.get_all_settings().unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all["other"], json!({"a": [1, 2]}));
}

#[test]
fn settings_survive_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let db = open_db(tmp.path());
        db.set_setting("cache_limit", &json!(3)).unwrap();
    }
    let db = open_db(tmp.path());
    assert_eq!(db.get_setting("cache_limit").unwrap(), Some(json!(3)));
}

#[test]
fn project_create_is_unique_by_uri() {
    let tmp = tempfile::tempdir().unwrap();
    let db = open_db(tmp.path());
    let recipe = json!({"name": "ipynb"});

    let record = db
        .create_project("/proj/a.ipynb", &recipe, &[], true)
        .unwrap();
    assert_eq!(record.uri, "/proj/a.ipynb");
    assert_eq!(record.reader_name(), Some("ipynb"));
    assert!(record.traceback.is_none());

    let err = db
        .create_project("/proj/a.ipynb", &recipe, &[], true)
        .unwrap_err();
    assert!(matches!(err, StoreError::UriExists(_)));

    // Idempotent form returns the existing record.
    let existing = db
        .create_project("/proj/a.ipynb", &recipe, &[], false)
        .unwrap();
    assert_eq!(existing.pk, record.pk);
}

#[test]
fn project_create_validates_recipe_and_assets() {
    let tmp = tempfile::tempdir().unwrap();
    let db = open_db(tmp.path());

    let err = db
        .create_project("/proj/a.ipynb", &json!({}), &[], true)
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidReadRecipe));

    let err = db
        .create_project(
            "/proj/a.ipynb",
            &json!({"name": "ipynb"}),
            &["../outside.csv".to_string()],
            true,
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::AssetOutsideFolder { .. }));
}

#[test]
fn project_lookup_remove_and_tracebacks() {
    let tmp = tempfile::tempdir().unwrap();
    let db = open_db(tmp.path());
    let recipe = json!({"name": "ipynb"});

    let a = db.create_project("/p/a.ipynb", &recipe, &[], true).unwrap();
    let b = db.create_project("/p/b.ipynb", &recipe, &[], true).unwrap();

    assert_eq!(db.project_by_pk(a.pk).unwrap().uri, "/p/a.ipynb");
    assert_eq!(db.project_by_uri("/p/b.ipynb").unwrap().pk, b.pk);
    let all = db.projects_all().unwrap();
    assert_eq!(all.iter().map(|r| r.pk).collect::<Vec<_>>(), vec![a.pk, b.pk]);

    db.set_traceback("/p/a.ipynb", Some("Traceback: boom")).unwrap();
    assert_eq!(
        db.project_by_pk(a.pk).unwrap().traceback.as_deref(),
        Some("Traceback: boom")
    );
    db.clear_tracebacks(&[a.pk]).unwrap();
    assert!(db.project_by_pk(a.pk).unwrap().traceback.is_none());

    assert!(matches!(
        db.set_traceback("/p/missing.ipynb", None),
        Err(StoreError::ProjectNotFound(_))
    ));

    db.remove_projects_by_uris(&["/p/a.ipynb".to_string()]).unwrap();
    db.remove_projects_by_pks(&[b.pk]).unwrap();
    assert!(db.projects_all().unwrap().is_empty());
}

#[test]
fn cache_create_lookup_and_duplicate_fingerprint() {
    let tmp = tempfile::tempdir().unwrap();
    let db = open_db(tmp.path());

    let record = db
        .create_cache("/p/a.ipynb", "aa11", &json!({"execution_seconds": 1.5}), "")
        .unwrap();
    assert_eq!(record.fingerprint, "aa11");
    assert_eq!(record.data["execution_seconds"], json!(1.5));
    assert_eq!(record.created, record.accessed);

    assert_eq!(db.cache_by_pk(record.pk).unwrap(), record);
    assert_eq!(db.cache_by_fingerprint("aa11").unwrap(), record);
    assert_eq!(db.caches_by_uri("/p/a.ipynb").unwrap().len(), 1);

    let err = db
        .create_cache("/p/b.ipynb", "aa11", &json!({}), "")
        .unwrap_err();
    assert!(matches!(err, StoreError::FingerprintExists(_)));

    assert!(matches!(
        db.cache_by_fingerprint("unknown"),
        Err(StoreError::CacheNotFound(_))
    ));
}

#[test]
fn touch_updates_accessed() {
    let tmp = tempfile::tempdir().unwrap();
    let db = open_db(tmp.path());
    let record = db.create_cache("/p/a.ipynb", "aa11", &json!({}), "").unwrap();

    std::thread::sleep(std::time::Duration::from_millis(5));
    db.touch(record.pk).unwrap();
    let touched = db.cache_by_pk(record.pk).unwrap();
    assert!(touched.accessed > record.accessed);

    std::thread::sleep(std::time::Duration::from_millis(5));
    db.touch_fingerprint("aa11").unwrap();
    let touched_again = db.cache_by_pk(record.pk).unwrap();
    assert!(touched_again.accessed > touched.accessed);

    assert!(matches!(db.touch(999), Err(StoreError::CacheNotFound(_))));
}

#[test]
fn evictable_pks_keeps_most_recently_accessed() {
    let tmp = tempfile::tempdir().unwrap();
    let db = open_db(tmp.path());

    let a = db.create_cache("/p/a.ipynb", "fp-a", &json!({}), "").unwrap();
    std::thread::sleep(std::time::Duration::from_millis(5));
    let b = db.create_cache("/p/b.ipynb", "fp-b", &json!({}), "").unwrap();
    std::thread::sleep(std::time::Duration::from_millis(5));
    let c = db.create_cache("/p/c.ipynb", "fp-c", &json!({}), "").unwrap();

    // Touch the oldest so it becomes the most recent.
    std::thread::sleep(std::time::Duration::from_millis(5));
    db.touch(a.pk).unwrap();

    let evictable = db.evictable_pks(2).unwrap();
    assert_eq!(evictable, vec![b.pk]);

    let evictable = db.evictable_pks(1).unwrap();
    assert_eq!(evictable, vec![b.pk, c.pk]);

    assert!(db.evictable_pks(10).unwrap().is_empty());

    db.remove_caches(&[a.pk, b.pk, c.pk]).unwrap();
    assert!(db.caches_all().unwrap().is_empty());
}
