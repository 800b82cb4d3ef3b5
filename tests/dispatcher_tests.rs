//! Integration tests for the whiteboard dispatcher driving a real runtime
//!
//! # Test Coverage
//!
//! - Reload accounting: adding and removing content reloads exactly the
//!   application it belongs to, once per change
//! - Name conflicts and base path shadowing surfacing in status
//! - Idempotent teardown
//! - Batch mode and collector windows
//! - Requests served while applications are reloaded
//! - Legacy applications serving their own singletons

use http::Method;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use whiteboard::handler::InboundRequest;
use whiteboard::runtime::Runtime;
use whiteboard::{
    ApplicationState, EventSink, FailureReason, LifecycleEvent, ReferenceCollector,
    WhiteboardDispatcher,
};

mod common;
use common::providers::{application, legacy_application, resource, resource_in};
use common::runtime::CountingRuntime;
use common::wait::wait_until;

fn setup(name: &str) -> (Arc<CountingRuntime>, WhiteboardDispatcher) {
    let runtime = Arc::new(CountingRuntime::new(name));
    let dispatcher = WhiteboardDispatcher::new(Arc::clone(&runtime) as Arc<dyn Runtime>);
    (runtime, dispatcher)
}

fn get(runtime: &CountingRuntime, path: &str) -> u16 {
    runtime
        .inner
        .dispatch(InboundRequest::new(Method::GET, path))
        .status
}

#[test]
fn test_hello_on_default_application() {
    let (runtime, dispatcher) = setup("hello");
    dispatcher.add_application(WhiteboardDispatcher::default_application());
    assert_eq!(runtime.counts(), (1, 0, 0));

    assert!(dispatcher.add_resource(resource(10, "hello", "/hello")).is_accepted());
    let status = dispatcher.status();
    let default = status.default_application.as_ref().unwrap();
    assert_eq!(default.resource_dtos.len(), 1);
    assert_eq!(default.resource_dtos[0].path, "/hello");
    assert_eq!(get(&runtime, "/hello"), 200);

    assert!(dispatcher.remove_resource("hello"));
    let status = dispatcher.status();
    assert!(status.default_application.unwrap().resource_dtos.is_empty());
    assert_eq!(get(&runtime, "/hello"), 404);
    assert_eq!(runtime.counts(), (1, 2, 0));
}

#[test]
fn test_removing_content_reloads_only_its_application() {
    let (runtime, dispatcher) = setup("scoped");
    dispatcher.add_application(application(1, "shop", "/shop"));
    dispatcher.add_application(application(2, "blog", "/blog"));
    assert_eq!(runtime.counts(), (2, 0, 0));

    dispatcher.add_resource(resource_in(10, "cart", "/cart", "shop"));
    assert_eq!(runtime.counts(), (2, 1, 0));
    assert_eq!(get(&runtime, "/shop/cart"), 200);
    assert_eq!(get(&runtime, "/blog/cart"), 404);

    dispatcher.remove_resource("cart");
    assert_eq!(runtime.counts(), (2, 2, 0));
    assert_eq!(get(&runtime, "/shop/cart"), 404);
}

#[test]
fn test_duplicate_application_name() {
    let (runtime, dispatcher) = setup("dupes");
    dispatcher.add_application(application(1, "a", "/a"));
    dispatcher.add_application(application(2, "a", "/b"));

    let status = dispatcher.status();
    assert_eq!(status.application_dtos.len(), 1);
    assert_eq!(status.application_dtos[0].base, "/a/*");
    assert_eq!(status.failed_application_dtos.len(), 1);
    assert_eq!(
        status.failed_application_dtos[0].failure_reason,
        FailureReason::ValidationFailed
    );
    assert_eq!(status.failed_application_dtos[0].failure_code, 3);
    assert_eq!(runtime.counts(), (1, 0, 0));
    assert_eq!(dispatcher.application_state("a"), ApplicationState::Registered);
}

#[test]
fn test_teardown_is_idempotent() {
    let (runtime, dispatcher) = setup("teardown");
    dispatcher.add_application(WhiteboardDispatcher::default_application());
    dispatcher.add_application(application(1, "shop", "/shop"));
    dispatcher.add_resource(resource(10, "hello", "/hello"));

    dispatcher.close();
    dispatcher.close();
    assert_eq!(runtime.counts().2, 2);
    assert!(!dispatcher.is_dispatching());
    assert_eq!(get(&runtime, "/hello"), 404);

    assert!(!dispatcher.add_resource(resource(11, "late", "/late")).is_accepted());
    drop(dispatcher);
    assert_eq!(runtime.counts().2, 2);
}

#[test]
fn test_batch_mode_defers_dispatch() {
    let (runtime, dispatcher) = setup("batch");
    dispatcher.set_batch_mode(true);
    assert!(!dispatcher.is_dispatching());

    dispatcher.add_application(WhiteboardDispatcher::default_application());
    dispatcher.add_resource(resource(10, "one", "/one"));
    dispatcher.add_resource(resource(11, "two", "/two"));
    assert_eq!(runtime.counts(), (0, 0, 0));

    dispatcher.batch_dispatch();
    assert_eq!(runtime.counts(), (1, 0, 0));
    assert_eq!(get(&runtime, "/two"), 200);

    dispatcher.set_batch_mode(false);
    assert!(dispatcher.is_dispatching());
    assert_eq!(runtime.counts(), (1, 0, 0));
}

#[test]
fn test_add_then_remove_in_one_window_is_invisible() {
    let (runtime, dispatcher) = setup("window");
    let dispatcher = Arc::new(dispatcher);
    let collector = ReferenceCollector::new(Duration::from_millis(200)).unwrap();
    collector
        .connect(Arc::clone(&dispatcher) as Arc<dyn EventSink>)
        .unwrap();

    let app = application(1, "shop", "/shop");
    collector.publish(LifecycleEvent::add(app.clone()));
    collector.publish(LifecycleEvent::remove(app));
    collector.flush();
    std::thread::sleep(Duration::from_millis(100));

    assert_eq!(runtime.counts(), (0, 0, 0));
    assert_eq!(collector.known(), 0);
    collector.close();
}

#[test]
fn test_collector_burst_becomes_one_registration() {
    let (runtime, dispatcher) = setup("burst");
    let dispatcher = Arc::new(dispatcher);
    let collector = ReferenceCollector::new(Duration::from_millis(100)).unwrap();
    collector
        .connect(Arc::clone(&dispatcher) as Arc<dyn EventSink>)
        .unwrap();

    collector.publish(LifecycleEvent::add(application(1, "shop", "/shop")));
    for id in 10..20 {
        collector.publish(LifecycleEvent::add(resource_in(
            id,
            &format!("r{id}"),
            &format!("/r{id}"),
            "shop",
        )));
    }

    assert!(wait_until(Duration::from_secs(2), || runtime.counts().0 == 1));
    assert!(wait_until(Duration::from_secs(1), || get(&runtime, "/shop/r19") == 200));
    assert_eq!(runtime.counts(), (1, 0, 0));
    collector.close();
}

#[test]
fn test_reload_never_observed_half_applied() {
    let (runtime, dispatcher) = setup("concurrent");
    dispatcher.add_application(application(1, "shop", "/shop"));
    dispatcher.add_resource(resource_in(10, "a", "/a", "shop"));

    let stop = Arc::new(AtomicBool::new(false));
    let served = Arc::new(AtomicUsize::new(0));
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let runtime = Arc::clone(&runtime);
            let stop = Arc::clone(&stop);
            let served = Arc::clone(&served);
            std::thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    let a = get(&runtime, "/shop/a");
                    let b = get(&runtime, "/shop/b");
                    assert_eq!(a, 200, "resource a vanished during reload");
                    assert!(b == 200 || b == 404);
                    served.fetch_add(2, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for _ in 0..50 {
        dispatcher.add_resource(resource_in(11, "b", "/b", "shop"));
        dispatcher.remove_resource("b");
    }
    stop.store(true, Ordering::SeqCst);
    for reader in readers {
        reader.join().unwrap();
    }
    assert!(served.load(Ordering::SeqCst) > 0);
    assert_eq!(runtime.counts(), (1, 101, 0));
}

#[test]
fn test_shadowed_application_takes_over_after_removal() {
    let (runtime, dispatcher) = setup("shadow");
    dispatcher.add_application(application(1, "first", "/same"));
    dispatcher.add_application(application(2, "second", "/same"));

    assert_eq!(
        dispatcher.application_state("second"),
        ApplicationState::Failed(FailureReason::Shadowed)
    );
    assert!(dispatcher.remove_application("first"));
    assert_eq!(dispatcher.application_state("second"), ApplicationState::Registered);
    assert_eq!(runtime.counts(), (2, 0, 1));
}

#[test]
fn test_legacy_application_serves_its_singletons() {
    let (runtime, dispatcher) = setup("legacy");
    let (reference, factory) = legacy_application(1, "legacy", "/legacy", "/hello", usize::MAX);
    assert!(dispatcher.add_application(reference).is_accepted());
    assert_eq!(runtime.counts(), (1, 0, 0));
    assert_eq!(get(&runtime, "/legacy/hello"), 200);
    assert_eq!(get(&runtime, "/hello"), 404);
    // One instance while validating, one held by the deployment.
    assert_eq!(factory.gets(), 2);

    let status = dispatcher.status();
    let app = &status.application_dtos[0];
    assert_eq!(app.base, "/legacy/*");
    assert_eq!(app.resource_dtos.len(), 1);
    assert_eq!(app.resource_dtos[0].path, "/hello");

    dispatcher.add_resource(resource_in(10, "cart", "/cart", "legacy"));
    assert_eq!(runtime.counts(), (1, 1, 0));
    assert_eq!(get(&runtime, "/legacy/cart"), 200);
    assert_eq!(get(&runtime, "/legacy/hello"), 200);
    assert_eq!(factory.gets(), 2);
}

#[test]
fn test_legacy_application_not_gettable() {
    let (runtime, dispatcher) = setup("gone");
    // Enough for validation, nothing left for the deployment.
    let (reference, factory) = legacy_application(1, "gone", "/gone", "/hello", 1);
    dispatcher.add_application(reference);
    assert_eq!(factory.gets(), 2);
    assert_eq!(runtime.counts(), (0, 0, 0));
    assert_eq!(
        dispatcher.application_state("gone"),
        ApplicationState::Failed(FailureReason::ServiceNotGettable)
    );

    let status = dispatcher.status();
    assert!(status.application_dtos.is_empty());
    assert_eq!(status.failed_application_dtos[0].name, "gone");
    assert_eq!(status.failed_application_dtos[0].failure_code, 2);
    assert_eq!(get(&runtime, "/gone/hello"), 404);
}
