//! Integration tests for the source registry repository.
//!
//! Exercises the repository layer against a real database:
//! - Create, lookup and delete
//! - Unique constraint backstop
//! - Filtered listing, ordering, paging and projections
//! - Partial updates
//! - Bulk import

use sqlx::SqlitePool;

use plinth_db::models::source::{Source, SourceFilter, SourceProjection, UpdateSource};
use plinth_db::repositories::SourceRepo;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn new_source(name: &str, kind: &str) -> Source {
    Source {
        id: 0,
        name: name.to_string(),
        kind: kind.to_string(),
        lang: String::new(),
        content: String::new(),
        compiled: String::new(),
        active: false,
        method: String::new(),
        url: String::new(),
        cron: String::new(),
        tag: String::new(),
        last_modified_date: chrono::Utc::now(),
        status: String::new(),
    }
}

fn filter() -> SourceFilter {
    SourceFilter {
        size: 100,
        ..SourceFilter::default()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[sqlx::test]
async fn test_create_and_find(pool: SqlitePool) {
    let mut source = new_source("greet", "controller");
    source.content = "fn main() {}".to_string();
    source.method = "GET".to_string();
    source.url = "/greet".to_string();

    let id = SourceRepo::create(&pool, &source).await.unwrap();
    assert!(id > 0);

    let found = SourceRepo::find_by_name_and_kind(&pool, "greet", "controller")
        .await
        .unwrap()
        .expect("created source should be found");
    assert_eq!(found.id, id);
    assert_eq!(found.kind, "controller");
    assert_eq!(found.content, "fn main() {}");
    assert_eq!(found.method, "GET");
    assert!(!found.active);

    let missing = SourceRepo::find_by_name_and_kind(&pool, "greet", "module")
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[sqlx::test]
async fn test_duplicate_name_and_type_rejected(pool: SqlitePool) {
    let source = new_source("dup", "module");
    SourceRepo::create(&pool, &source).await.unwrap();

    let err = SourceRepo::create(&pool, &source).await.unwrap_err();
    let db_err = err.as_database_error().expect("expected a database error");
    assert!(db_err.is_unique_violation());

    // Same name under a different type is allowed.
    let other = new_source("dup", "template");
    SourceRepo::create(&pool, &other).await.unwrap();
}

#[sqlx::test]
async fn test_exists_probe(pool: SqlitePool) {
    assert!(!SourceRepo::exists(&pool, "probe", "module").await.unwrap());
    SourceRepo::create(&pool, &new_source("probe", "module"))
        .await
        .unwrap();
    assert!(SourceRepo::exists(&pool, "probe", "module").await.unwrap());
    assert!(!SourceRepo::exists(&pool, "probe", "daemon").await.unwrap());
}

#[sqlx::test]
async fn test_url_probe(pool: SqlitePool) {
    let mut taken = new_source("first", "controller");
    taken.url = "/shared".to_string();
    taken.active = true;
    SourceRepo::create(&pool, &taken).await.unwrap();

    let mut dormant = new_source("second", "controller");
    dormant.url = "/parked".to_string();
    SourceRepo::create(&pool, &dormant).await.unwrap();

    // Another source may not claim /shared, but the owner itself may.
    assert!(SourceRepo::url_taken(&pool, "controller", "/shared", "other", false)
        .await
        .unwrap());
    assert!(!SourceRepo::url_taken(&pool, "controller", "/shared", "first", false)
        .await
        .unwrap());

    // An inactive duplicate only counts when the probe ignores activity.
    assert!(SourceRepo::url_taken(&pool, "controller", "/parked", "other", false)
        .await
        .unwrap());
    assert!(!SourceRepo::url_taken(&pool, "controller", "/parked", "other", true)
        .await
        .unwrap());
}

#[sqlx::test]
async fn test_update_applies_only_provided_fields(pool: SqlitePool) {
    let mut source = new_source("patchy", "crontab");
    source.content = "original".to_string();
    source.tag = "night".to_string();
    source.cron = "0 3 * * *".to_string();
    SourceRepo::create(&pool, &source).await.unwrap();

    let dto = UpdateSource {
        content: Some("patched".to_string()),
        active: Some(true),
        ..UpdateSource::default()
    };
    let rows = SourceRepo::update(&pool, "patchy", "crontab", &dto)
        .await
        .unwrap();
    assert_eq!(rows, 1);

    let found = SourceRepo::find_by_name_and_kind(&pool, "patchy", "crontab")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.content, "patched");
    assert!(found.active);
    // Untouched fields keep their stored values.
    assert_eq!(found.tag, "night");
    assert_eq!(found.cron, "0 3 * * *");
}

#[sqlx::test]
async fn test_update_missing_source_affects_no_rows(pool: SqlitePool) {
    let rows = SourceRepo::update(&pool, "ghost", "module", &UpdateSource::default())
        .await
        .unwrap();
    assert_eq!(rows, 0);
}

#[sqlx::test]
async fn test_delete(pool: SqlitePool) {
    SourceRepo::create(&pool, &new_source("gone", "template"))
        .await
        .unwrap();

    assert_eq!(SourceRepo::delete(&pool, "gone", "template").await.unwrap(), 1);
    assert_eq!(SourceRepo::delete(&pool, "gone", "template").await.unwrap(), 0);
    assert!(!SourceRepo::exists(&pool, "gone", "template").await.unwrap());
}

#[sqlx::test]
async fn test_list_filters_by_name_type_and_tag(pool: SqlitePool) {
    let mut job = new_source("alpha_job", "crontab");
    job.tag = "jobs,night".to_string();
    SourceRepo::create(&pool, &job).await.unwrap();

    let mut beta = new_source("beta_view", "controller");
    beta.tag = "web".to_string();
    SourceRepo::create(&pool, &beta).await.unwrap();

    let mut gamma = new_source("gamma_view", "controller");
    gamma.tag = "web,admin".to_string();
    SourceRepo::create(&pool, &gamma).await.unwrap();

    // Name pattern.
    let mut by_name = filter();
    by_name.name = "%view%".to_string();
    assert_eq!(SourceRepo::list(&pool, &by_name).await.unwrap().len(), 2);
    assert_eq!(SourceRepo::count(&pool, &by_name).await.unwrap(), 2);

    // Exact type.
    let mut by_kind = filter();
    by_kind.kind = "crontab".to_string();
    let rows = SourceRepo::list(&pool, &by_kind).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].name, "alpha_job");

    // Tag terms are matched disjunctively.
    let mut by_tag = filter();
    by_tag.tag = "admin".to_string();
    assert_eq!(SourceRepo::count(&pool, &by_tag).await.unwrap(), 1);

    by_tag.tag = "jobs,web".to_string();
    assert_eq!(SourceRepo::count(&pool, &by_tag).await.unwrap(), 3);
}

#[sqlx::test]
async fn test_list_projections(pool: SqlitePool) {
    let mut source = new_source("viewer", "controller");
    source.content = "source text".to_string();
    source.compiled = "compiled text".to_string();
    SourceRepo::create(&pool, &source).await.unwrap();

    let full = SourceRepo::list(&pool, &filter()).await.unwrap();
    assert_eq!(full[0].content, "source text");
    assert_eq!(full[0].compiled, "compiled text");

    let mut content_only = filter();
    content_only.projection = SourceProjection::Content;
    let rows = SourceRepo::list(&pool, &content_only).await.unwrap();
    assert_eq!(rows[0].content, "source text");
    assert_eq!(rows[0].compiled, "");

    let mut basic = filter();
    basic.projection = SourceProjection::Basic;
    let rows = SourceRepo::list(&pool, &basic).await.unwrap();
    assert_eq!(rows[0].content, "");
    assert_eq!(rows[0].compiled, "");
    // Identity columns survive every projection.
    assert_eq!(rows[0].name, "viewer");
}

#[sqlx::test]
async fn test_list_sort_and_paging(pool: SqlitePool) {
    for name in ["c_src", "a_src", "b_src"] {
        SourceRepo::create(&pool, &new_source(name, "module"))
            .await
            .unwrap();
    }

    // Default order is newest-first.
    let rows = SourceRepo::list(&pool, &filter()).await.unwrap();
    let names: Vec<&str> = rows.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["b_src", "a_src", "c_src"]);

    let mut by_name = filter();
    by_name.sort = Some("name asc".to_string());
    let rows = SourceRepo::list(&pool, &by_name).await.unwrap();
    let names: Vec<&str> = rows.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["a_src", "b_src", "c_src"]);

    // An ordering outside the allowlist falls back to the default.
    let mut hostile = filter();
    hostile.sort = Some("name; DROP TABLE sources".to_string());
    let rows = SourceRepo::list(&pool, &hostile).await.unwrap();
    assert_eq!(rows[0].name, "b_src");

    let mut page = filter();
    page.from = 2;
    page.size = 2;
    let rows = SourceRepo::list(&pool, &page).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].name, "c_src");
}

#[sqlx::test]
async fn test_bulk_upsert_replaces_by_id(pool: SqlitePool) {
    let written = SourceRepo::bulk_upsert(
        &pool,
        &[new_source("imported_a", "module"), new_source("imported_b", "module")],
    )
    .await
    .unwrap();
    assert_eq!(written, 2);

    let rows = SourceRepo::list(&pool, &filter()).await.unwrap();
    assert_eq!(rows.len(), 2);
    let id_a = rows.iter().find(|s| s.name == "imported_a").unwrap().id;

    // Re-importing with an id replaces the row instead of duplicating it.
    let mut replacement = new_source("imported_a", "module");
    replacement.id = id_a;
    replacement.content = "v2".to_string();
    assert_eq!(SourceRepo::bulk_upsert(&pool, &[replacement]).await.unwrap(), 1);

    assert_eq!(SourceRepo::count(&pool, &filter()).await.unwrap(), 2);
    let row = SourceRepo::find_by_name_and_kind(&pool, "imported_a", "module")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.content, "v2");

    // Nameless rows are skipped, not written.
    let blank = new_source("", "module");
    assert_eq!(SourceRepo::bulk_upsert(&pool, &[blank]).await.unwrap(), 0);
}

#[sqlx::test]
async fn test_active_lookups(pool: SqlitePool) {
    let mut live = new_source("ticker", "daemon");
    live.active = true;
    SourceRepo::create(&pool, &live).await.unwrap();
    SourceRepo::create(&pool, &new_source("parked", "daemon"))
        .await
        .unwrap();

    let daemons = SourceRepo::list_active_by_kind(&pool, "daemon").await.unwrap();
    assert_eq!(daemons.len(), 1);
    assert_eq!(daemons[0].name, "ticker");

    let found = SourceRepo::find_active_by_name_and_kind(&pool, "ticker", "daemon")
        .await
        .unwrap();
    assert!(found.is_some());
    let dormant = SourceRepo::find_active_by_name_and_kind(&pool, "parked", "daemon")
        .await
        .unwrap();
    assert!(dormant.is_none());

    let mut logo = new_source("logo", "resource");
    logo.url = "/logo.svg".to_string();
    logo.active = true;
    SourceRepo::create(&pool, &logo).await.unwrap();

    let resource = SourceRepo::find_active_resource_by_url(&pool, "/logo.svg")
        .await
        .unwrap()
        .expect("active resource should resolve by url");
    assert_eq!(resource.name, "logo");
    assert!(SourceRepo::find_active_resource_by_url(&pool, "/missing.svg")
        .await
        .unwrap()
        .is_none());
}

#[sqlx::test]
async fn test_health_check(pool: SqlitePool) {
    plinth_db::health_check(&pool).await.unwrap();

    let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM sources")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0);
}
