#[cfg(test)]
mod cache_tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    use queryforge::compiler::{
        compile_uncached, CacheStatus, CompileError, QueryCache, QueryCacheConfig, QueryCacheKey, QueryCompiler,
    };
    use queryforge::errors::QueryCompilationError;
    use queryforge::linq_parser::parse_query;
    use queryforge::model::ModelConfig;
    use queryforge::sql_generator::{DialectConfig, DialectPolicy};

    use crate::test_models::{shop_model, SHOP};

    const THREADS: usize = 8;

    fn key_for(text: &str) -> QueryCacheKey {
        QueryCacheKey::new(&parse_query(text).unwrap(), &shop_model(), &DialectPolicy::sqlserver()).unwrap()
    }

    #[test]
    fn test_concurrent_callers_compile_once() {
        let cache = QueryCache::with_defaults();
        let text = "Orders.Where(o => o.Total > @min).Select(o => o.Id)";
        let query = parse_query(text).unwrap();
        let key = key_for(text);
        let model = shop_model();
        let dialect = DialectPolicy::sqlserver();
        let calls = AtomicUsize::new(0);
        let barrier = Barrier::new(THREADS);

        let results: Vec<_> = thread::scope(|scope| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        cache
                            .get_or_compile(&key, || {
                                calls.fetch_add(1, Ordering::SeqCst);
                                thread::sleep(Duration::from_millis(50));
                                compile_uncached(&query, &model, &dialect)
                            })
                            .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let (first, _) = &results[0];
        assert!(results.iter().all(|(compiled, _)| Arc::ptr_eq(compiled, first)));
        assert_eq!(results.iter().filter(|(_, status)| *status == CacheStatus::Miss).count(), 1);
        assert_eq!(results.iter().filter(|(_, status)| *status == CacheStatus::Hit).count(), THREADS - 1);

        let metrics = cache.metrics();
        assert_eq!(metrics.compilations, 1);
        assert_eq!(metrics.size, 1);
    }

    #[test]
    fn test_failed_compilation_is_retried() {
        let cache = QueryCache::with_defaults();
        let query = parse_query("Orders.Take(3)").unwrap();
        let key = key_for("Orders.Take(3)");

        let failed = cache.get_or_compile(&key, || {
            Err(QueryCompilationError::untranslatable("Take", "transient"))
        });
        assert!(failed.is_err());
        assert!(cache.get(&key).is_none());

        let (compiled, status) = cache
            .get_or_compile(&key, || compile_uncached(&query, &shop_model(), &DialectPolicy::sqlserver()))
            .unwrap();
        assert_eq!(status, CacheStatus::Miss);
        assert!(compiled.sql.starts_with("SELECT TOP(3) "), "{}", compiled.sql);

        let (_, status) = cache
            .get_or_compile(&key, || -> Result<_, QueryCompilationError> {
                panic!("a cached query must not be recompiled")
            })
            .unwrap();
        assert_eq!(status, CacheStatus::Hit);
        assert_eq!(cache.metrics().compilations, 2);
    }

    #[test]
    fn test_waiters_on_failed_compilation_compile_once() {
        let cache = QueryCache::with_defaults();
        let text = "Orders.Take(3)";
        let query = parse_query(text).unwrap();
        let key = key_for(text);
        let model = shop_model();
        let dialect = DialectPolicy::sqlserver();
        let calls = AtomicUsize::new(0);
        let started = Barrier::new(2);

        let retry = || {
            cache.get_or_compile(&key, || {
                calls.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(50));
                compile_uncached(&query, &model, &dialect)
            })
        };

        thread::scope(|scope| {
            let leader = scope.spawn(|| {
                cache.get_or_compile(&key, || {
                    started.wait();
                    thread::sleep(Duration::from_millis(100));
                    Err(QueryCompilationError::untranslatable("Take", "transient"))
                })
            });
            started.wait();
            let waiters: Vec<_> = (0..THREADS).map(|_| scope.spawn(retry)).collect();
            assert!(leader.join().unwrap().is_err());
            // Arrive while a former waiter is compiling
            let late: Vec<_> = (0..THREADS).map(|_| scope.spawn(retry)).collect();

            for handle in waiters.into_iter().chain(late) {
                let (compiled, _) = handle.join().unwrap().unwrap();
                assert!(compiled.sql.starts_with("SELECT TOP(3) "), "{}", compiled.sql);
            }
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.metrics().compilations, 2);
        assert_eq!(cache.metrics().size, 1);
    }

    #[test]
    fn test_shared_compiler_across_threads() {
        let compiler = QueryCompiler::with_cache(
            shop_model(),
            DialectPolicy::sqlserver(),
            Arc::new(QueryCache::with_defaults()),
        );
        let barrier = Barrier::new(THREADS);

        let sqls: Vec<String> = thread::scope(|scope| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        compiler
                            .compile_text("Customers.Where(c => c.Orders.Any(o => o.Total > 100))")
                            .unwrap()
                            .sql
                            .clone()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(sqls.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(compiler.cache().metrics().compilations, 1);
    }

    #[test]
    fn test_formatting_and_parameter_values_share_an_entry() {
        let compiler = QueryCompiler::with_cache(
            shop_model(),
            DialectPolicy::sqlserver(),
            Arc::new(QueryCache::with_defaults()),
        );
        let (_, status) = compiler
            .compile_text_with_status("Orders.Where(o => o.Total > @min)")
            .unwrap();
        assert_eq!(status, CacheStatus::Miss);
        let (_, status) = compiler
            .compile_text_with_status("Orders\n    .Where( o=>o.Total>@min )")
            .unwrap();
        assert_eq!(status, CacheStatus::Hit);
    }

    #[test]
    fn test_dialects_and_models_get_separate_entries() {
        let cache = Arc::new(QueryCache::with_defaults());
        let text = "Orders.Skip(1).Take(2)";
        let sqlserver = QueryCompiler::with_cache(shop_model(), DialectPolicy::sqlserver(), cache.clone());
        let postgres = QueryCompiler::with_cache(shop_model(), DialectPolicy::postgres(), cache.clone());

        let a = sqlserver.compile_text(text).unwrap();
        let b = postgres.compile_text(text).unwrap();
        assert_ne!(a.sql, b.sql);
        assert!(b.sql.ends_with("LIMIT 2 OFFSET 1"), "{}", b.sql);
        assert_eq!(cache.metrics().size, 2);

        assert_eq!(cache.invalidate_model("shop"), 2);
        assert_eq!(cache.metrics().size, 0);
        let (_, status) = sqlserver.compile_text_with_status(text).unwrap();
        assert_eq!(status, CacheStatus::Miss);
    }

    #[test]
    fn test_dialect_overlay_keeping_base_name_gets_own_entry() {
        let overlay = DialectConfig::from_yaml_str("base: sqlserver\nparameter_prefix: \":\"\n")
            .unwrap()
            .resolve()
            .unwrap();
        assert_eq!(overlay.name, "sqlserver");

        let cache = Arc::new(QueryCache::with_defaults());
        let text = "Orders.Where(o => o.Id == @id)";
        let builtin = QueryCompiler::with_cache(shop_model(), DialectPolicy::sqlserver(), cache.clone());
        let overlaid = QueryCompiler::with_cache(shop_model(), overlay, cache.clone());

        let (a, status) = builtin.compile_text_with_status(text).unwrap();
        assert_eq!(status, CacheStatus::Miss);
        assert!(a.sql.ends_with("= @id"), "{}", a.sql);

        let (b, status) = overlaid.compile_text_with_status(text).unwrap();
        assert_eq!(status, CacheStatus::Miss);
        assert!(b.sql.ends_with("= :id"), "{}", b.sql);
        assert_eq!(cache.metrics().size, 2);
    }

    #[test]
    fn test_reloaded_model_never_reads_entries_of_previous_mapping() {
        let cache = Arc::new(QueryCache::with_defaults());
        let text = "Orders.Select(o => o.Id)";
        let before = QueryCompiler::with_cache(shop_model(), DialectPolicy::sqlserver(), cache.clone());
        let reloaded = Arc::new(
            ModelConfig::from_yaml_str(&SHOP.replace("table: Orders", "table: SalesOrders"))
                .unwrap()
                .build()
                .unwrap(),
        );
        let after = QueryCompiler::with_cache(reloaded, DialectPolicy::sqlserver(), cache.clone());

        // A compilation against the old model finishes after the reload
        let (old, status) = cache
            .get_or_compile(&QueryCacheKey::new(&parse_query(text).unwrap(), before.model(), before.dialect()).unwrap(), || {
                cache.invalidate_model("shop");
                compile_uncached(&parse_query(text).unwrap(), before.model(), before.dialect())
            })
            .unwrap();
        assert_eq!(status, CacheStatus::Miss);
        assert_eq!(old.sql, "SELECT [o].[Id]\nFROM [Orders] AS [o]");
        assert_eq!(cache.metrics().size, 0);

        // Even a result published for the old mapping is keyed apart
        before.compile_text(text).unwrap();
        let (new, status) = after.compile_text_with_status(text).unwrap();
        assert_eq!(status, CacheStatus::Miss);
        assert_eq!(new.sql, "SELECT [o].[Id]\nFROM [SalesOrders] AS [o]");
    }

    #[test]
    fn test_disabled_cache_bypasses() {
        let cache = Arc::new(QueryCache::new(QueryCacheConfig {
            enabled: false,
            ..QueryCacheConfig::default()
        }));
        let compiler = QueryCompiler::with_cache(shop_model(), DialectPolicy::sqlserver(), cache.clone());
        for _ in 0..3 {
            let (_, status) = compiler.compile_text_with_status("Orders.Count()").unwrap();
            assert_eq!(status, CacheStatus::Bypass);
        }
        assert_eq!(cache.metrics().compilations, 3);
        assert_eq!(cache.metrics().size, 0);
    }

    #[test]
    fn test_errors_are_not_cached() {
        let compiler = QueryCompiler::with_cache(
            shop_model(),
            DialectPolicy::sqlserver(),
            Arc::new(QueryCache::with_defaults()),
        );
        for _ in 0..2 {
            let err = compiler.compile_text("Orders.Select(o => o.Nmae)").unwrap_err();
            assert_eq!(err.error_type(), "UnresolvedMember");
        }
        assert_eq!(compiler.cache().metrics().compilations, 2);
        assert!(matches!(
            compiler.compile_text("Orders.Where(").unwrap_err(),
            CompileError::Parse(_)
        ));
    }
}
