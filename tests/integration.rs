//! Integration tests for extension-runtime.

use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use extension_runtime::{
    sorter, DescriptorBuilder, Error, ExtensionContext, ExtensionDescriptor, LifecycleEvent,
    LifecycleState, Runtime, RuntimeConfig,
};
use parking_lot::Mutex;
use serde_json::json;
use tempfile::TempDir;
use tracing::instrument::WithSubscriber;

type Log = Arc<Mutex<Vec<String>>>;

fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn quiet() -> RuntimeConfig {
    RuntimeConfig::new().with_log_silent(true)
}

// Builds an extension that appends its name to the log.
fn tracked(log: &Log, name: &str) -> DescriptorBuilder {
    let log = log.clone();
    let label = name.to_string();
    DescriptorBuilder::new(name, move |_ctx, _d| {
        let log = log.clone();
        let label = label.clone();
        async move {
            log.lock().push(label);
            Ok(())
        }
    })
}

// Collects "event:extension" strings from every lifecycle event.
fn record_events(runtime: &Runtime) -> Log {
    let events = new_log();
    let seen = events.clone();
    runtime.on_event(move |event: &LifecycleEvent| {
        seen.lock().push(format!(
            "{}:{}",
            event.event_name(),
            event.extension_name().unwrap_or("-")
        ));
    });
    events
}

#[derive(Clone, Default)]
struct CapturedOutput(Arc<Mutex<Vec<u8>>>);

impl CapturedOutput {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for CapturedOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

// Starts a runtime with one extension while capturing all of its log output.
async fn start_captured(config: RuntimeConfig) -> String {
    let output = CapturedOutput::default();
    let writer = output.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .finish();

    let log = new_log();
    let mut runtime = Runtime::new(config);
    runtime.register(tracked(&log, "router").build_unchecked());
    runtime.start().with_subscriber(subscriber).await.unwrap();
    assert_eq!(*log.lock(), vec!["router"]);
    output.text()
}

fn names(descriptors: &[ExtensionDescriptor]) -> Vec<String> {
    descriptors.iter().map(|d| d.label()).collect()
}

fn write(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

#[test]
fn test_sort_is_deterministic() {
    let log = new_log();
    let build = || {
        vec![
            tracked(&log, "router").dependency("logging").build_unchecked(),
            tracked(&log, "cache").build_unchecked(),
            tracked(&log, "logging").build_unchecked(),
            tracked(&log, "auth").dependencies(["cache", "router"]).build_unchecked(),
        ]
    };

    let first = names(&sorter::sort(build()));
    let second = names(&sorter::sort(build()));
    assert_eq!(first, second);
    assert_eq!(first, vec!["cache", "logging", "router", "auth"]);
}

#[test]
fn test_dependencies_precede_dependents() {
    let log = new_log();
    let sorted = sorter::sort(vec![
        tracked(&log, "d").dependencies(["b", "c"]).build_unchecked(),
        tracked(&log, "c").dependency("a").build_unchecked(),
        tracked(&log, "b").dependency("a").build_unchecked(),
        tracked(&log, "a").build_unchecked(),
    ]);

    let order = names(&sorted);
    let position = |name: &str| order.iter().position(|n| n == name).unwrap();
    for descriptor in &sorted {
        for dependency in &descriptor.dependencies {
            assert!(position(dependency.as_str()) < position(descriptor.label().as_str()));
        }
    }
}

#[test]
fn test_cycle_produces_total_order() {
    let log = new_log();
    let sorted = sorter::sort(vec![
        tracked(&log, "a").dependency("b").build_unchecked(),
        tracked(&log, "b").dependency("a").build_unchecked(),
    ]);

    let mut order = names(&sorted);
    order.sort();
    assert_eq!(order, vec!["a", "b"]);
}

#[tokio::test]
async fn test_disabled_extension_only_skips() {
    let log = new_log();
    let events = new_log();
    let mut runtime = Runtime::new(quiet().with_option("metrics.enabled", false));

    let seen = events.clone();
    runtime.on_event(move |event: &LifecycleEvent| {
        seen.lock().push(format!(
            "{}:{}",
            event.event_name(),
            event.extension_name().unwrap_or("-")
        ));
    });
    runtime.register(tracked(&log, "metrics").build_unchecked());

    runtime.start().await.unwrap();
    assert!(log.lock().is_empty());
    assert_eq!(
        *events.lock(),
        vec!["extension:skipped:metrics", "initialized:-"]
    );
}

#[tokio::test]
async fn test_activation_is_sequential() {
    let log = new_log();
    let mut runtime = Runtime::new(quiet());

    let slow_log = log.clone();
    let fast_log = log.clone();
    runtime.register(
        DescriptorBuilder::new("b", move |_ctx, _d| {
            let log = fast_log.clone();
            async move {
                log.lock().push("b:start".to_string());
                Ok(())
            }
        })
        .dependency("a")
        .build_unchecked(),
    );
    runtime.register(
        DescriptorBuilder::new("a", move |_ctx, _d| {
            let log = slow_log.clone();
            async move {
                log.lock().push("a:start".to_string());
                tokio::time::sleep(Duration::from_millis(30)).await;
                log.lock().push("a:done".to_string());
                Ok(())
            }
        })
        .build_unchecked(),
    );

    runtime.start().await.unwrap();
    assert_eq!(*log.lock(), vec!["a:start", "a:done", "b:start"]);
}

#[tokio::test]
async fn test_failure_stops_later_extensions() {
    let log = new_log();
    let mut runtime = Runtime::new(quiet());
    runtime
        .register(tracked(&log, "a").build_unchecked())
        .register(
            DescriptorBuilder::new("b", |_ctx, _d| async {
                Err(Error::extension("database unreachable"))
            })
            .dependency("a")
            .build_unchecked(),
        )
        .register(tracked(&log, "c").dependency("b").build_unchecked());

    let err = runtime.start().await.unwrap_err();
    let message = err.to_string();
    assert!(message.contains("b"), "{message}");
    assert!(message.contains("database unreachable"), "{message}");
    assert_eq!(err.extension_label(), Some("b"));
    assert_eq!(*log.lock(), vec!["a"]);
    assert_eq!(runtime.state(), LifecycleState::Initializing);
}

#[tokio::test]
async fn test_config_overrides_only_named_keys() {
    let seen = Arc::new(Mutex::new(None));
    let mut runtime = Runtime::new(quiet().with_option("router.port", 9000));

    let captured = seen.clone();
    runtime.register(
        DescriptorBuilder::new("router", move |_ctx, descriptor: ExtensionDescriptor| {
            let captured = captured.clone();
            async move {
                *captured.lock() = Some(descriptor.options);
                Ok(())
            }
        })
        .option("port", 80)
        .option("host", "127.0.0.1")
        .build_unchecked(),
    );

    runtime.start().await.unwrap();
    let options = seen.lock().clone().unwrap();
    assert_eq!(serde_json::Value::Object(options), json!({ "port": 9000, "host": "127.0.0.1" }));
}

#[tokio::test]
async fn test_allow_list() {
    let log = new_log();
    let mut runtime = Runtime::new(quiet().with_extensions(["a", "c"]));
    for name in ["a", "b", "c"] {
        runtime.register(tracked(&log, name).build_unchecked());
    }

    runtime.start().await.unwrap();
    assert_eq!(*log.lock(), vec!["a", "c"]);
}

#[tokio::test]
async fn test_deferred_initializers_run_in_order_before_ready() {
    let log = new_log();
    let mut runtime = Runtime::new(quiet());

    for (name, task) in [("first", "f1"), ("second", "f2")] {
        let log = log.clone();
        runtime.register(
            DescriptorBuilder::new(name, move |ctx: ExtensionContext, _d| {
                let log = log.clone();
                async move {
                    log.lock().push(name.to_string());
                    let deferred_log = log.clone();
                    ctx.defer(move || async move {
                        deferred_log.lock().push(task.to_string());
                        Ok(())
                    });
                    Ok(())
                }
            })
            .build_unchecked(),
        );
    }

    let ready_log = log.clone();
    runtime.when_ready(move || ready_log.lock().push("ready".to_string()));

    runtime.start().await.unwrap();
    assert_eq!(*log.lock(), vec!["first", "second", "f1", "f2", "ready"]);
}

#[tokio::test]
async fn test_end_to_end_logging_and_router() {
    let log = new_log();
    let registered = new_log();
    let mut runtime = Runtime::new(quiet().with_discover(false));

    let events = registered.clone();
    runtime.on_event(move |event: &LifecycleEvent| {
        if event.event_name() == "extension:registered" {
            events.lock().push(event.extension_name().unwrap_or_default().to_string());
        }
    });

    runtime
        .register(tracked(&log, "router").dependency("logging").build_unchecked())
        .register(tracked(&log, "logging").build_unchecked());

    let ready = runtime.ready();
    runtime.start().await.unwrap();

    assert!(ready.await);
    assert_eq!(*log.lock(), vec!["logging", "router"]);
    assert_eq!(*registered.lock(), vec!["logging", "router"]);
    assert_eq!(runtime.state(), LifecycleState::Initialized);
}

#[tokio::test]
async fn test_discovered_extensions_activate() {
    let temp = TempDir::new().unwrap();
    write(
        &temp.path().join("cache/extension.toml"),
        "name = \"cache\"\nmain = \"cache::init\"\n",
    );
    write(
        &temp.path().join("plugins/session/extension.json"),
        r#"{"name": "session", "dependencies": ["cache"], "options": {"ttl": 60}}"#,
    );

    let log = new_log();
    let mut runtime = Runtime::new(quiet().with_discover(temp.path()));
    let cache_log = log.clone();
    runtime.provide("cache::init", move |_ctx, _d| {
        let log = cache_log.clone();
        async move {
            log.lock().push("cache".to_string());
            Ok(())
        }
    });
    let session_log = log.clone();
    runtime.provide("session", move |_ctx, descriptor: ExtensionDescriptor| {
        let log = session_log.clone();
        async move {
            let ttl = descriptor.options.get("ttl").cloned();
            log.lock().push(format!("session:{}", ttl.unwrap_or_default()));
            Ok(())
        }
    });

    runtime.start().await.unwrap();
    assert_eq!(*log.lock(), vec!["cache", "session:60"]);
}

#[tokio::test]
async fn test_config_files_load_before_activation() {
    let temp = TempDir::new().unwrap();
    write(
        &temp.path().join("config/default.toml"),
        "[router]\nport = 9000\n",
    );
    write(
        &temp.path().join("config/staging.json"),
        r#"{"router": {"host": "staging.local"}}"#,
    );

    let seen = Arc::new(Mutex::new(None));
    let mut runtime = Runtime::new(
        quiet()
            .with_app_directory(temp.path())
            .with_env("staging")
            .with_load_config(true),
    );
    runtime.after_config_loaded(|settings| {
        settings.set("router.tls", true);
    });

    let captured = seen.clone();
    runtime.register(
        DescriptorBuilder::new("router", move |_ctx, descriptor: ExtensionDescriptor| {
            let captured = captured.clone();
            async move {
                *captured.lock() = Some(descriptor.options);
                Ok(())
            }
        })
        .option("port", 80)
        .build_unchecked(),
    );

    runtime.start().await.unwrap();
    let options = seen.lock().clone().unwrap();
    assert_eq!(
        serde_json::Value::Object(options),
        json!({ "port": 9000, "host": "staging.local", "tls": true })
    );
}

#[tokio::test]
async fn test_missing_config_file_fails_before_activation() {
    let temp = TempDir::new().unwrap();
    let log = new_log();
    let mut runtime = Runtime::new(
        quiet()
            .with_app_directory(temp.path())
            .with_load_config(true)
            .with_config_file("absent.toml"),
    );
    runtime.register(tracked(&log, "a").build_unchecked());

    let err = runtime.start().await.unwrap_err();
    assert!(matches!(err, Error::ConfigNotFound(_)));
    assert!(log.lock().is_empty());
}

#[tokio::test]
async fn test_settings_written_by_extension_visible_to_dependents() {
    let seen = Arc::new(Mutex::new(None));
    let mut runtime = Runtime::new(quiet());

    runtime.register(
        DescriptorBuilder::new("database", |ctx: ExtensionContext, _d| async move {
            ctx.settings().write().set("database.url", "postgres://localhost");
            Ok(())
        })
        .build_unchecked(),
    );
    let captured = seen.clone();
    runtime.register(
        DescriptorBuilder::new("api", move |ctx: ExtensionContext, _d| {
            let captured = captured.clone();
            async move {
                let url = ctx.settings().read().string("database.url").map(str::to_string);
                *captured.lock() = Some((url, ctx.is_activated("database")));
                Ok(())
            }
        })
        .dependency("database")
        .build_unchecked(),
    );

    runtime.start().await.unwrap();
    assert_eq!(
        seen.lock().clone(),
        Some((Some("postgres://localhost".to_string()), true))
    );
}

#[tokio::test]
async fn test_second_start_is_rejected() {
    let log = new_log();
    let mut runtime = Runtime::new(quiet());
    runtime.register(tracked(&log, "a").build_unchecked());

    runtime.start().await.unwrap();
    assert!(matches!(
        runtime.start().await,
        Err(Error::InvalidState { .. })
    ));
    assert_eq!(*log.lock(), vec!["a"]);
}

#[tokio::test]
async fn test_failure_emits_failed_event() {
    let log = new_log();
    let mut runtime = Runtime::new(quiet());
    let events = record_events(&runtime);
    runtime
        .register(tracked(&log, "a").build_unchecked())
        .register(
            DescriptorBuilder::new("b", |_ctx, _d| async { Err(Error::extension("boom")) })
                .dependency("a")
                .build_unchecked(),
        )
        .register(tracked(&log, "c").dependency("b").build_unchecked());

    runtime.start().await.unwrap_err();
    assert_eq!(
        *events.lock(),
        vec!["extension:registered:a", "extension:failed:b"]
    );
}

#[tokio::test]
async fn test_unnamed_failure_names_its_directory() {
    let mut runtime = Runtime::new(quiet());
    let events = record_events(&runtime);
    runtime.register_fn(|_ctx, _d| async { Err(Error::extension("boom")) });

    let err = runtime.start().await.unwrap_err();
    let label = err.extension_label().unwrap().to_string();
    let tests_dir = std::env::current_dir().unwrap().join("tests");
    assert!(label.starts_with("anonymous ("), "{label}");
    assert!(label.contains(&tests_dir.display().to_string()), "{label}");
    assert!(err.to_string().contains("boom"));
    assert_eq!(*events.lock(), vec!["extension:failed:-"]);
}

#[tokio::test]
async fn test_silent_runtime_writes_no_logs() {
    let loud = start_captured(RuntimeConfig::new()).await;
    assert!(loud.contains("Activated extension router"), "{loud}");
    assert!(loud.contains("Runtime ready"), "{loud}");

    let silent = start_captured(RuntimeConfig::new().with_log_silent(true)).await;
    assert!(silent.is_empty(), "{silent}");
}

#[tokio::test]
async fn test_discovery_cache_written_through_config() {
    let temp = TempDir::new().unwrap();
    let cache_dir = TempDir::new().unwrap();
    write(
        &temp.path().join("cache/extension.toml"),
        "name = \"cache\"\nmain = \"cache::init\"\n",
    );

    let config = || {
        quiet()
            .with_discover(temp.path())
            .with_cache(true)
            .with_temp_directory(cache_dir.path())
    };
    let log = new_log();
    let runtime_with = |log: &Log| {
        let mut runtime = Runtime::new(config());
        let log = log.clone();
        runtime.provide("cache::init", move |_ctx, _d| {
            let log = log.clone();
            async move {
                log.lock().push("cache".to_string());
                Ok(())
            }
        });
        runtime
    };

    runtime_with(&log).start().await.unwrap();
    let cache_file = cache_dir
        .path()
        .join("extension-runtime")
        .join("extension-locations.json");
    let cached: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&cache_file).unwrap()).unwrap();
    let entries = cached["entries"].as_object().unwrap();
    assert_eq!(entries.len(), 1);
    let locations = entries.values().next().unwrap()["locations"].clone();
    assert_eq!(
        locations,
        json!([temp.path().join("cache/extension.toml")])
    );

    runtime_with(&log).start().await.unwrap();
    assert_eq!(*log.lock(), vec!["cache", "cache"]);
}

#[tokio::test]
async fn test_listener_can_subscribe_from_listener() {
    let nested = Arc::new(AtomicUsize::new(0));
    let mut runtime = Runtime::new(quiet());

    let counter = nested.clone();
    runtime.register(
        DescriptorBuilder::new("a", move |ctx: ExtensionContext, _d| {
            let counter = counter.clone();
            async move {
                let inner = ctx.clone();
                ctx.on_event(move |_event: &LifecycleEvent| {
                    let counter = counter.clone();
                    inner.on_event(move |_event: &LifecycleEvent| {
                        counter.fetch_add(1, Ordering::SeqCst);
                    });
                });
                Ok(())
            }
        })
        .build_unchecked(),
    );
    runtime.register(DescriptorBuilder::new("b", |_ctx, _d| async { Ok(()) }).build_unchecked());

    tokio::time::timeout(Duration::from_secs(5), runtime.start())
        .await
        .expect("start deadlocked")
        .unwrap();
    assert!(nested.load(Ordering::SeqCst) > 0);
}
