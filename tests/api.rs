use async_trait::async_trait;
use axum::http::StatusCode;
use axum_test::TestServer;
use resource_rest::config::PivotTable;
use resource_rest::routes::DEFAULT_BODY_LIMIT;
use resource_rest::service::Entity;
use resource_rest::{
    app_router, parse_config, resolve, AppError, AppState, EntityManager, FindOptions, MemoryManager, Resource,
    WhereOptions,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const RESOURCES: &str = r#"{ "resources": [
    { "name": "User", "timestamps": false, "hidden_fields": ["password"], "fields": [
        { "name": "name", "nullable": false },
        { "name": "password" },
        { "name": "posts", "relation": { "cardinality": "one_to_many", "resource": "Post", "inverse": "author" } }
    ]},
    { "name": "Post", "fields": [
        { "name": "title", "nullable": false, "rules": { "max_length": 40 } },
        { "name": "views", "type": "integer", "default": 0 },
        { "name": "author", "relation": { "cardinality": "many_to_one", "resource": "User" } },
        { "name": "tags", "relation": { "cardinality": "many_to_many", "resource": "Tag" } }
    ], "filters": [ { "name": "popular", "where": { "views": { "$gte": 100 } } } ] },
    { "name": "Tag", "timestamps": false, "fields": [ { "name": "name" } ] }
]}"#;

/// Counts `remove` calls on top of the in-memory manager.
#[derive(Default)]
struct SpyManager {
    inner: MemoryManager,
    removes: AtomicUsize,
}

#[async_trait]
impl EntityManager for SpyManager {
    async fn count(&self, resource: &Resource, filter: &WhereOptions) -> Result<u64, AppError> {
        self.inner.count(resource, filter).await
    }

    async fn find(
        &self,
        resource: &Resource,
        options: &FindOptions,
        filter: &WhereOptions,
    ) -> Result<Vec<Entity>, AppError> {
        self.inner.find(resource, options, filter).await
    }

    async fn find_one(&self, resource: &Resource, id: &Value) -> Result<Option<Entity>, AppError> {
        self.inner.find_one(resource, id).await
    }

    async fn insert(&self, resource: &Resource, body: &Entity) -> Result<Entity, AppError> {
        self.inner.insert(resource, body).await
    }

    async fn insert_many(&self, resource: &Resource, bodies: &[Entity]) -> Result<Vec<Entity>, AppError> {
        self.inner.insert_many(resource, bodies).await
    }

    async fn update(&self, resource: &Resource, id: &Value, body: &Entity) -> Result<Option<Entity>, AppError> {
        self.inner.update(resource, id, body).await
    }

    async fn remove(&self, resource: &Resource, id: &Value) -> Result<bool, AppError> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        self.inner.remove(resource, id).await
    }

    async fn pivot_ids(&self, pivot: &PivotTable, id: &Value) -> Result<Vec<Value>, AppError> {
        self.inner.pivot_ids(pivot, id).await
    }
}

fn server_with(manager: Arc<dyn EntityManager>) -> TestServer {
    let model = resolve(&parse_config(RESOURCES).unwrap()).unwrap();
    TestServer::new(app_router(AppState::new(manager, model), DEFAULT_BODY_LIMIT)).unwrap()
}

fn server() -> TestServer {
    server_with(Arc::new(MemoryManager::new()))
}

async fn create(server: &TestServer, path: &str, body: Value) -> Value {
    let response = server.post(path).json(&body).await;
    response.assert_status(StatusCode::CREATED);
    response.json::<Value>()["data"].clone()
}

#[tokio::test]
async fn crud_lifecycle() {
    let server = server();
    let post = create(&server, "/posts", json!({ "title": "hello" })).await;
    assert_eq!(post["id"], json!(1));
    assert_eq!(post["views"], json!(0));
    assert!(post["created_at"].is_string());

    let response = server.get("/posts/1").await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["data"]["title"], "hello");

    let response = server.put("/posts/1").json(&json!({ "views": 7 })).await;
    response.assert_status_ok();
    let updated = response.json::<Value>()["data"].clone();
    assert_eq!(updated["views"], json!(7));
    assert_eq!(updated["title"], "hello");

    server.delete("/posts/1").await.assert_status(StatusCode::NO_CONTENT);

    let response = server.get("/posts/1").await;
    response.assert_status_not_found();
    let body = response.json::<Value>();
    assert_eq!(body["error"]["code"], "not_found");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("Could not find Post with ID 1"));
}

#[tokio::test]
async fn delete_missing_never_calls_remove() {
    let spy = Arc::new(SpyManager::default());
    let server = server_with(spy.clone());
    server.delete("/posts/42").await.assert_status_not_found();
    assert_eq!(spy.removes.load(Ordering::SeqCst), 0);

    create(&server, "/posts", json!({ "title": "x" })).await;
    server.delete("/posts/1").await.assert_status(StatusCode::NO_CONTENT);
    assert_eq!(spy.removes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn second_page_sorted_by_title() {
    let server = server();
    for i in [7, 3, 19, 0, 24, 11, 5, 16, 9, 22, 1, 14, 20, 2, 18, 8, 13, 23, 4, 10, 17, 6, 21, 12, 15] {
        create(&server, "/posts", json!({ "title": format!("post-{:02}", i) })).await;
    }

    let response = server
        .get("/posts")
        .add_query_param("page", "2")
        .add_query_param("per_page", "10")
        .add_query_param("sort", "title:asc")
        .await;
    response.assert_status_ok();
    let body = response.json::<Value>();
    assert_eq!(body["meta"], json!({ "total": 25, "page": 2, "per_page": 10, "page_count": 3 }));
    let titles: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["title"].as_str().unwrap())
        .collect();
    let expected: Vec<String> = (10..20).map(|i| format!("post-{:02}", i)).collect();
    assert_eq!(titles, expected);

    let response = server.get("/posts").await;
    let body = response.json::<Value>();
    assert_eq!(body["data"].as_array().unwrap().len(), 25);
    assert_eq!(body["meta"], json!({ "total": 25, "page": null, "per_page": null, "page_count": 1 }));
}

#[tokio::test]
async fn where_and_named_filters() {
    let server = server();
    for (title, views) in [("rust tips", 150), ("go tips", 20), ("rust async", 5)] {
        create(&server, "/posts", json!({ "title": title, "views": views })).await;
    }

    let response = server.get("/posts").add_query_param("where[views][$gt]", "10").await;
    assert_eq!(response.json::<Value>()["meta"]["total"], json!(2));

    let response = server
        .get("/posts")
        .add_query_param("where[title][$like]", "rust%")
        .add_query_param("where[views][$lt]", "100")
        .await;
    let body = response.json::<Value>();
    assert_eq!(body["meta"]["total"], json!(1));
    assert_eq!(body["data"][0]["title"], "rust async");

    let response = server
        .get("/posts")
        .add_query_param("where[$or][0][views]", "20")
        .add_query_param("where[$or][1][views]", "5")
        .await;
    assert_eq!(response.json::<Value>()["meta"]["total"], json!(2));

    let response = server.get("/posts").add_query_param("filters", "popular").await;
    let body = response.json::<Value>();
    assert_eq!(body["meta"]["total"], json!(1));
    assert_eq!(body["data"][0]["title"], "rust tips");

    // Unknown fields are dropped rather than failing the request, wherever they appear.
    for key in ["where[nope]", "where[$not][nope]", "where[$or][0][nope]"] {
        let response = server.get("/posts").add_query_param(key, "1").await;
        response.assert_status_ok();
        assert_eq!(response.json::<Value>()["meta"]["total"], json!(3), "{key}");
    }

    // Values the column cannot hold match nothing.
    for (key, value) in [("where[views]", "abc"), ("where[id][$in]", "x,y"), ("where[views][$gt]", "99999999999")] {
        let response = server.get("/posts").add_query_param(key, value).await;
        response.assert_status_ok();
        assert_eq!(response.json::<Value>()["meta"]["total"], json!(0), "{key}={value}");
    }
}

#[tokio::test]
async fn out_of_range_pages() {
    let server = server();
    for title in ["a", "b", "c"] {
        create(&server, "/posts", json!({ "title": title })).await;
    }

    for page in [i64::MAX.to_string(), "99999999999999999".to_string()] {
        let response = server
            .get("/posts")
            .add_query_param("page", &page)
            .add_query_param("per_page", "1000")
            .await;
        response.assert_status_ok();
        let body = response.json::<Value>();
        assert!(body["data"].as_array().unwrap().is_empty());
        assert_eq!(body["meta"]["total"], json!(3));
    }

    let response = server
        .get("/posts")
        .add_query_param("page", "-5")
        .add_query_param("per_page", "2")
        .await;
    let body = response.json::<Value>();
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
    assert_eq!(body["meta"]["page"], json!(1));

    let user = create(&server, "/users", json!({ "name": "ann" })).await;
    create(&server, "/posts", json!({ "title": "d", "author": user["id"] })).await;
    let response = server
        .get(&format!("/users/{}/posts", user["id"]))
        .add_query_param("page", &i64::MAX.to_string())
        .await;
    response.assert_status_ok();
    let body = response.json::<Value>();
    assert!(body["data"].as_array().unwrap().is_empty());
    assert_eq!(body["meta"]["total"], json!(1));
}

#[tokio::test]
async fn relation_shapes() {
    let server = server();
    let user = create(&server, "/users", json!({ "name": "ann", "password": "secret" })).await;
    assert!(user.get("password").is_none());
    for title in ["a", "b", "c"] {
        create(&server, "/posts", json!({ "title": title, "author": user["id"] })).await;
    }
    let orphan = create(&server, "/posts", json!({ "title": "orphan" })).await;

    let response = server.get("/users/1/posts").add_query_param("per_page", "2").add_query_param("page", "1").await;
    response.assert_status_ok();
    let body = response.json::<Value>();
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
    assert_eq!(body["meta"]["total"], json!(3));

    let response = server.get("/posts/1/author").await;
    response.assert_status_ok();
    let author = response.json::<Value>()["data"].clone();
    assert_eq!(author["name"], "ann");
    assert!(author.get("password").is_none());

    // The related resource slug works as well as the field name.
    let response = server.get("/posts/1/user").await;
    assert_eq!(response.json::<Value>()["data"]["id"], user["id"]);

    let response = server.get(&format!("/posts/{}/author", orphan["id"])).await;
    response.assert_status_ok();
    assert!(response.json::<Value>()["data"].is_null());

    // The where filter applies to to-one relations too.
    let response = server.get("/posts/1/author").add_query_param("where[name]", "bob").await;
    response.assert_status_ok();
    assert!(response.json::<Value>()["data"].is_null());
    let response = server.get("/posts/1/author").add_query_param("where[name]", "ann").await;
    assert_eq!(response.json::<Value>()["data"]["name"], "ann");

    server.get("/users/1/comments").await.assert_status_not_found();
    server.get("/users/99/posts").await.assert_status_not_found();
}

#[tokio::test]
async fn many_to_many_through_pivot() {
    let server = server();
    let rust = create(&server, "/tags", json!({ "name": "rust" })).await;
    let db = create(&server, "/tags", json!({ "name": "db" })).await;
    let post = create(&server, "/posts", json!({ "title": "t", "tags": [rust["id"], { "id": db["id"] }] })).await;

    let response = server.get(&format!("/posts/{}/tags", post["id"])).await;
    let body = response.json::<Value>();
    assert_eq!(body["meta"]["total"], json!(2));

    server
        .put(&format!("/posts/{}", post["id"]))
        .json(&json!({ "tags": [db["id"]] }))
        .await
        .assert_status_ok();
    let response = server.get(&format!("/posts/{}/tags", post["id"])).await;
    let body = response.json::<Value>();
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["name"], "db");

    let response = server.post("/posts").json(&json!({ "title": "u", "tags": ["x"] })).await;
    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn populate_and_fields() {
    let server = server();
    let user = create(&server, "/users", json!({ "name": "ann" })).await;
    create(&server, "/posts", json!({ "title": "a", "views": 3, "author": { "id": user["id"] } })).await;

    let response = server
        .get("/posts")
        .add_query_param("populate", "author")
        .add_query_param("fields", "title")
        .await;
    let post = response.json::<Value>()["data"][0].clone();
    assert_eq!(post["title"], "a");
    assert_eq!(post["author"]["name"], "ann");
    assert!(post.get("views").is_none());

    let response = server.get("/users/1").add_query_param("populate", "posts").await;
    let user = response.json::<Value>()["data"].clone();
    assert_eq!(user["posts"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn bulk_insert_with_objects() {
    let server = server();
    let rows = create(&server, "/posts", json!({ "objects": [ { "title": "a" }, { "title": "b" } ] })).await;
    assert_eq!(rows.as_array().unwrap().len(), 2);

    let rows = create(&server, "/posts", json!({ "objects": null })).await;
    assert_eq!(rows, json!([]));

    // One invalid object rejects the whole batch.
    let response = server
        .post("/posts")
        .json(&json!({ "objects": [ { "title": "c" }, { "views": 1 } ] }))
        .await;
    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    let response = server.get("/posts").await;
    assert_eq!(response.json::<Value>()["meta"]["total"], json!(2));
}

#[tokio::test]
async fn invalid_requests() {
    let server = server();
    let response = server.post("/posts").json(&json!({ "views": 3 })).await;
    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(response.json::<Value>()["error"]["code"], "validation_error");

    let response = server.post("/posts").json(&json!({ "title": "x".repeat(41) })).await;
    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);

    server.post("/posts").json(&json!([1, 2])).await.assert_status_bad_request();
    server.get("/posts/abc").await.assert_status_bad_request();

    server.put("/posts/5").json(&json!({ "title": "y" })).await.assert_status_not_found();
}

#[tokio::test]
async fn operational_routes() {
    let server = server();
    server.get("/health").await.assert_status_ok();
    let ready = server.get("/ready").await;
    ready.assert_status_ok();
    assert_eq!(ready.json::<Value>()["resources"], json!(3));

    let response = server.get("/openapi.json").await;
    response.assert_status_ok();
    let doc = response.json::<Value>();
    assert!(doc["paths"]["/users/{id}/{related}"]["get"].is_object());
    assert!(doc["components"]["schemas"]["Tag"].is_object());
}
