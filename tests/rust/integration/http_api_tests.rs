#[cfg(test)]
mod http_api_tests {
    use std::io::Write;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use queryforge::config::ServerConfig;
    use queryforge::model::load_model;
    use queryforge::query_ast::{Expr, QueryExpr};
    use queryforge::server::{build_router, AppState};
    use queryforge::sql_generator::DialectPolicy;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::test_models::{shop_model, SHOP};

    async fn app() -> (Router, Arc<AppState>) {
        let state = Arc::new(AppState::new(ServerConfig::default(), DialectPolicy::sqlserver()));
        state.register_model(shop_model(), None).await;
        (build_router(state.clone()), state)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app().await;
        let (status, body) = send(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "queryforge");
    }

    #[tokio::test]
    async fn test_list_models() {
        let (app, _) = app().await;
        let (status, body) = send(&app, get("/models")).await;
        assert_eq!(status, StatusCode::OK);
        let models = body["models"].as_array().unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0]["name"], "shop");
        let sets: Vec<&str> = models[0]["entity_sets"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert!(sets.contains(&"Orders") && sets.contains(&"Customers"), "{:?}", sets);
        assert!(models[0].get("path").is_none());
    }

    #[tokio::test]
    async fn test_compile_text_then_cache_hit() {
        let (app, _) = app().await;
        let request = || {
            post_json(
                "/query/sql",
                json!({ "query": "Orders.Where(o => o.Customer.Name == \"Ann\").Select(o => o.Id)" }),
            )
        };

        let (status, body) = send(&app, request()).await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(
            body["sql"],
            "SELECT [o].[Id]\nFROM [Orders] AS [o]\nINNER JOIN [Customers] AS [c] ON [o].[CustomerId] = [c].[Id]\nWHERE [c].[Name] = N'Ann'"
        );
        assert_eq!(body["model"], "shop");
        assert_eq!(body["dialect"], "sqlserver");
        assert_eq!(body["cardinality"], "many");
        assert_eq!(body["metadata"]["cache_status"], "miss");
        assert!(body.get("shaper").is_none());
        assert!(body.get("ir").is_none());

        let (status, body) = send(&app, request()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["metadata"]["cache_status"], "hit");

        let (_, metrics) = send(&app, get("/cache/metrics")).await;
        assert_eq!(metrics["hits"], 1);
        assert_eq!(metrics["compilations"], 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_identical_requests_compile_once() {
        let (app, state) = app().await;
        let requests = (0..8).map(|_| {
            let app = app.clone();
            tokio::spawn(async move {
                send(
                    &app,
                    post_json("/query/sql", json!({ "query": "Customers.Where(c => c.Orders.Any(o => o.Total > 100))" })),
                )
                .await
            })
        });
        let responses = join_all(requests).await;

        assert!(responses.iter().all(|(status, _)| *status == StatusCode::OK));
        assert!(responses.windows(2).all(|pair| pair[0].1["sql"] == pair[1].1["sql"]));
        assert_eq!(state.cache.metrics().compilations, 1);
    }

    async fn join_all<I>(handles: I) -> Vec<(StatusCode, Value)>
    where
        I: Iterator<Item = tokio::task::JoinHandle<(StatusCode, Value)>>,
    {
        let handles: Vec<_> = handles.collect();
        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        results
    }

    #[tokio::test]
    async fn test_compile_ast_with_shaper_and_ir() {
        let (app, _) = app().await;
        let ast = QueryExpr::entity_set("Orders").take(Expr::constant(1));
        let (status, body) = send(
            &app,
            post_json(
                "/query/sql",
                json!({
                    "ast": serde_json::to_value(&ast).unwrap(),
                    "dialect": "postgres",
                    "include_shaper": true,
                    "include_ir": true
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert!(body["sql"].as_str().unwrap().ends_with("LIMIT 1"), "{}", body);
        assert_eq!(body["query"], ast.to_string());
        assert!(body["shaper"].is_object());
        assert!(body["ir"]["sources"].is_array());
    }

    #[tokio::test]
    async fn test_parse_error_reports_position() {
        let (app, _) = app().await;
        let (status, body) = send(&app, post_json("/query/sql", json!({ "query": "Orders.Where(o => o.Total >)" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error_type"], "ParseError");
        assert_eq!(body["query"], "Orders.Where(o => o.Total >)");
        assert!(body["error_details"]["position"].is_u64(), "{}", body);
        assert_eq!(body["error_details"]["line"], 1);
    }

    #[tokio::test]
    async fn test_compilation_error_type() {
        let (app, _) = app().await;
        let (status, body) = send(&app, post_json("/query/sql", json!({ "query": "Orders.Select(o => o.Nmae)" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error_type"], "UnresolvedMember");
    }

    #[tokio::test]
    async fn test_request_validation() {
        let (app, _) = app().await;

        let (status, body) = send(&app, post_json("/query/sql", json!({ "query": "Orders", "dialect": "oracle" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error_type"], "UnsupportedDialectError");
        assert!(body["error_details"]["hint"].as_str().unwrap().contains("sqlserver"));

        let (status, body) = send(&app, post_json("/query/sql", json!({ "query": "Orders", "model": "crm" }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error_type"], "ModelNotFound");

        let (status, body) = send(&app, post_json("/query/sql", json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error_type"], "InvalidRequest");

        let ast = serde_json::to_value(QueryExpr::entity_set("Orders")).unwrap();
        let (status, body) = send(&app, post_json("/query/sql", json!({ "query": "Orders", "ast": ast }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error_type"], "InvalidRequest");
    }

    #[tokio::test]
    async fn test_in_memory_model_cannot_be_reloaded() {
        let (app, _) = app().await;
        let (status, _) = send(&app, post_json("/models/shop/reload", json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(&app, post_json("/models/crm/reload", json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_reload_invalidates_cached_queries() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(SHOP.as_bytes()).unwrap();
        file.flush().unwrap();

        let state = Arc::new(AppState::new(ServerConfig::default(), DialectPolicy::sqlserver()));
        let model = load_model(file.path()).unwrap();
        state.register_model(model, Some(file.path().to_path_buf())).await;
        let app = build_router(state.clone());

        let (status, _) = send(&app, post_json("/query/sql", json!({ "query": "Orders.Count()" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(state.cache.metrics().size, 1);

        let (status, body) = send(&app, post_json("/models/shop/reload", json!({}))).await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["status"], "reloaded");
        assert_eq!(body["invalidated_entries"], 1);
        assert_eq!(state.cache.metrics().size, 0);

        let (_, body) = send(&app, post_json("/query/sql", json!({ "query": "Orders.Count()" }))).await;
        assert_eq!(body["metadata"]["cache_status"], "miss");
    }
}
