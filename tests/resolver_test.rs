//! # 依赖解析集成测试
//!
//! 通过 [`Framework`] 验证解析行为：
//! - 传递解析与 RESOLVED 事件
//! - 绑定在刷新前保持不变
//! - 单例互斥、uses 一致性与失败的原子性
//! - 可选导入、Require-Bundle 与最大解析深度

use std::sync::Arc;

use chips_framework::{
    BundleContent, BundleEvent, BundleEventKind, BundleState, Framework, FrameworkConfig,
    FrameworkError, MemoryStorage,
};
use parking_lot::Mutex;

// ============================================================================
// 测试辅助
// ============================================================================

fn bundle(name: &str, version: &str) -> BundleContent {
    BundleContent::new()
        .header("Bundle-SymbolicName", name)
        .header("Bundle-Version", version)
}

fn framework_with(storage: Arc<MemoryStorage>, config: FrameworkConfig) -> Framework {
    Framework::builder()
        .config(config)
        .storage(storage)
        .build()
        .unwrap()
}

fn framework(storage: Arc<MemoryStorage>) -> Framework {
    framework_with(storage, FrameworkConfig::default())
}

fn record_events(framework: &Framework) -> Arc<Mutex<Vec<BundleEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    framework.add_bundle_listener(Arc::new(move |event: &BundleEvent| {
        sink.lock().push(event.clone());
    }));
    events
}

// ============================================================================
// 传递解析
// ============================================================================

#[tokio::test]
async fn test_transitive_resolution() {
    let storage = Arc::new(MemoryStorage::new());
    storage.publish(
        "mem:api",
        bundle("org.chips.api", "1.0").header("Export-Package", "org.chips.api;version=1.0"),
    );
    storage.publish(
        "mem:impl",
        bundle("org.chips.impl", "1.0")
            .header("Import-Package", "org.chips.api;version=\"[1.0,2.0)\"")
            .header("Export-Package", "org.chips.impl;version=1.0"),
    );
    storage.publish(
        "mem:app",
        bundle("org.chips.app", "1.0").header("Import-Package", "org.chips.impl"),
    );
    let framework = framework(storage);
    let events = record_events(&framework);

    let api = framework.install("mem:api").await.unwrap();
    let imp = framework.install("mem:impl").await.unwrap();
    let app = framework.install("mem:app").await.unwrap();

    assert_eq!(framework.get_updated_state(app.id()).unwrap(), BundleState::Resolved);
    assert_eq!(api.state(), BundleState::Resolved);
    assert_eq!(imp.state(), BundleState::Resolved);

    let resolved: Vec<_> = events
        .lock()
        .iter()
        .filter(|e| e.kind == BundleEventKind::Resolved)
        .map(|e| e.bundle)
        .collect();
    assert_eq!(resolved.len(), 3);
    for id in [api.id(), imp.id(), app.id()] {
        assert!(resolved.contains(&id));
    }

    let wires = framework.import_wires(imp.id());
    assert_eq!(wires.len(), 1);
    assert_eq!(wires[0].provider.unwrap().owner, api.generation());
}

#[tokio::test]
async fn test_resolve_bundles_reports_partial_failure() {
    let storage = Arc::new(MemoryStorage::new());
    storage.publish("mem:a", bundle("a", "1.0").header("Export-Package", "pkg.a"));
    storage.publish("mem:b", bundle("b", "1.0").header("Import-Package", "pkg.a"));
    storage.publish("mem:c", bundle("c", "1.0").header("Import-Package", "pkg.missing"));
    let framework = framework(storage);

    let a = framework.install("mem:a").await.unwrap();
    let b = framework.install("mem:b").await.unwrap();
    let c = framework.install("mem:c").await.unwrap();

    assert!(!framework.resolve_bundles(None));
    assert_eq!(a.state(), BundleState::Resolved);
    assert_eq!(b.state(), BundleState::Resolved);
    assert_eq!(c.state(), BundleState::Installed);
    assert!(c.resolve_failure().unwrap().contains("pkg.missing"));

    assert!(framework.resolve_bundles(Some(&[a.id(), b.id()])));
}

// ============================================================================
// 绑定稳定性
// ============================================================================

#[tokio::test]
async fn test_wires_pinned_until_refresh() {
    let storage = Arc::new(MemoryStorage::new());
    storage.publish(
        "mem:x1",
        bundle("x.one", "1.0").header("Export-Package", "pkg.x;version=1.0"),
    );
    storage.publish(
        "mem:x2",
        bundle("x.two", "1.0").header("Export-Package", "pkg.x;version=2.0"),
    );
    storage.publish(
        "mem:app",
        bundle("app", "1.0").header("Import-Package", "pkg.x;version=\"[1.0,3.0)\""),
    );
    let framework = framework(storage);

    let x1 = framework.install("mem:x1").await.unwrap();
    let app = framework.install("mem:app").await.unwrap();
    framework.get_updated_state(app.id()).unwrap();
    assert_eq!(framework.import_wires(app.id())[0].provider.unwrap().owner, x1.generation());

    let x2 = framework.install("mem:x2").await.unwrap();
    framework.get_updated_state(x2.id()).unwrap();
    assert_eq!(framework.package_provider("pkg.x").unwrap().owner, x2.generation());
    assert_eq!(framework.import_wires(app.id())[0].provider.unwrap().owner, x1.generation());

    framework.refresh_packages(Some(&[app.id()])).await.unwrap();
    assert_eq!(app.state(), BundleState::Installed);
    assert_eq!(x1.state(), BundleState::Resolved);

    framework.get_updated_state(app.id()).unwrap();
    assert_eq!(framework.import_wires(app.id())[0].provider.unwrap().owner, x2.generation());
}

// ============================================================================
// 一致性约束
// ============================================================================

#[tokio::test]
async fn test_singleton_exclusive() {
    let storage = Arc::new(MemoryStorage::new());
    storage.publish("mem:d1", bundle("d;singleton:=true", "1.0"));
    storage.publish("mem:d2", bundle("d;singleton:=true", "2.0"));
    let framework = framework(storage);

    let d1 = framework.install("mem:d1").await.unwrap();
    let d2 = framework.install("mem:d2").await.unwrap();
    assert!(d1.manifest().singleton);

    assert_eq!(framework.get_updated_state(d1.id()).unwrap(), BundleState::Resolved);
    assert_eq!(framework.get_updated_state(d2.id()).unwrap(), BundleState::Installed);
    assert!(d2.resolve_failure().is_some());

    let result = framework.start(d2.id()).await;
    assert!(matches!(result, Err(FrameworkError::ResolutionFailed { .. })));
}

#[tokio::test]
async fn test_uses_conflict_is_atomic() {
    let storage = Arc::new(MemoryStorage::new());
    storage.publish("mem:x1", bundle("x1", "1.0").header("Export-Package", "pkg.x;version=1.0"));
    storage.publish("mem:x2", bundle("x2", "1.0").header("Export-Package", "pkg.x;version=2.0"));
    storage.publish(
        "mem:l",
        bundle("l", "1.0")
            .header("Export-Package", "pkg.l;uses:=\"pkg.x\"")
            .header("Import-Package", "pkg.x;version=\"[1.0,2.0)\""),
    );
    storage.publish(
        "mem:b",
        bundle("b", "1.0").header("Import-Package", "pkg.x;version=\"[2.0,3.0)\",pkg.l"),
    );
    storage.publish("mem:ok", bundle("ok", "1.0").header("Import-Package", "pkg.l,pkg.x"));
    let framework = framework(storage);

    let x1 = framework.install("mem:x1").await.unwrap();
    let x2 = framework.install("mem:x2").await.unwrap();
    let l = framework.install("mem:l").await.unwrap();
    framework.resolve_bundles(Some(&[l.id(), x2.id()]));

    let b = framework.install("mem:b").await.unwrap();
    let before = framework.graph_snapshot();
    assert_eq!(framework.get_updated_state(b.id()).unwrap(), BundleState::Installed);
    assert_eq!(framework.graph_snapshot(), before);

    let ok = framework.install("mem:ok").await.unwrap();
    assert_eq!(framework.get_updated_state(ok.id()).unwrap(), BundleState::Resolved);
    let wires = framework.import_wires(ok.id());
    let x_wire = wires.iter().find(|w| w.name == "pkg.x").unwrap();
    assert_eq!(x_wire.provider.unwrap().owner, x1.generation());
}

#[tokio::test]
async fn test_failed_chain_leaves_no_trace() {
    let storage = Arc::new(MemoryStorage::new());
    storage.publish("mem:a", bundle("a", "1.0").header("Export-Package", "pkg.a"));
    storage.publish(
        "mem:b",
        bundle("b", "1.0")
            .header("Export-Package", "pkg.b")
            .header("Import-Package", "pkg.a,pkg.missing"),
    );
    storage.publish("mem:c", bundle("c", "1.0").header("Import-Package", "pkg.b"));
    let framework = framework(storage);

    let a = framework.install("mem:a").await.unwrap();
    framework.install("mem:b").await.unwrap();
    let c = framework.install("mem:c").await.unwrap();
    let before = framework.graph_snapshot();

    let result = framework.start(c.id()).await;
    assert!(matches!(result, Err(FrameworkError::ResolutionFailed { .. })));
    assert_eq!(a.state(), BundleState::Installed);
    assert_eq!(c.state(), BundleState::Installed);
    assert_eq!(framework.graph_snapshot(), before);
}

// ============================================================================
// 可选依赖与 bundle 依赖
// ============================================================================

#[tokio::test]
async fn test_optional_import_left_unwired() {
    let storage = Arc::new(MemoryStorage::new());
    storage.publish(
        "mem:app",
        bundle("app", "1.0").header("Import-Package", "pkg.optional;resolution:=optional"),
    );
    let framework = framework(storage);
    let app = framework.install("mem:app").await.unwrap();

    assert_eq!(framework.get_updated_state(app.id()).unwrap(), BundleState::Resolved);
    let wires = framework.import_wires(app.id());
    assert_eq!(wires.len(), 1);
    assert!(wires[0].provider.is_none());
}

#[tokio::test]
async fn test_require_bundle() {
    let storage = Arc::new(MemoryStorage::new());
    storage.publish("mem:base", bundle("base", "1.5").header("Export-Package", "base.api"));
    storage.publish(
        "mem:app",
        bundle("app", "1.0").header("Require-Bundle", "base;bundle-version=\"[1.0,2.0)\""),
    );
    storage.publish(
        "mem:old",
        bundle("old", "1.0").header("Require-Bundle", "base;bundle-version=\"[2.0,3.0)\""),
    );
    let framework = framework(storage);

    let base = framework.install("mem:base").await.unwrap();
    let app = framework.install("mem:app").await.unwrap();
    let old = framework.install("mem:old").await.unwrap();

    assert_eq!(framework.get_updated_state(app.id()).unwrap(), BundleState::Resolved);
    let requires = framework.required_bundles(app.id());
    assert_eq!(requires[0].provider, Some(base.generation()));

    assert_eq!(framework.get_updated_state(old.id()).unwrap(), BundleState::Installed);
    assert!(old.resolve_failure().unwrap().contains("base"));
}

#[tokio::test]
async fn test_max_resolve_depth() {
    let storage = Arc::new(MemoryStorage::new());
    storage.publish("mem:b1", bundle("b1", "1.0").header("Export-Package", "p1"));
    for id in 2..=5 {
        storage.publish(
            format!("mem:b{}", id),
            bundle(&format!("b{}", id), "1.0")
                .header("Export-Package", format!("p{}", id))
                .header("Import-Package", format!("p{}", id - 1)),
        );
    }
    let config = FrameworkConfig::builder().max_resolve_depth(2).build();
    let framework = framework_with(storage, config);

    let mut ids = Vec::new();
    for id in 1..=5 {
        ids.push(framework.install(&format!("mem:b{}", id)).await.unwrap().id());
    }

    assert_eq!(framework.get_updated_state(ids[4]).unwrap(), BundleState::Installed);
    assert_eq!(framework.get_updated_state(ids[2]).unwrap(), BundleState::Resolved);
    assert_eq!(framework.get_updated_state(ids[4]).unwrap(), BundleState::Resolved);
}
