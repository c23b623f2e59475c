//! 配置与日志集成测试
//!
//! 测试从 YAML/JSON 文件加载框架配置，以及按配置初始化日志系统

use std::sync::Arc;

use chips_framework::{
    BundleContent, BundleState, Framework, FrameworkConfig, FrameworkError, Logger, MemoryStorage,
};
use tempfile::TempDir;

/// 从 YAML 文件加载配置并创建框架
#[tokio::test]
async fn test_yaml_config_drives_framework() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("framework.yaml");
    tokio::fs::write(
        &path,
        r#"
logging:
  level: debug
framework:
  boot_delegation: ["java.*"]
  system_packages: "org.chips.framework;version=1.2"
  max_resolve_depth: 8
"#,
    )
    .await
    .unwrap();

    let config = FrameworkConfig::from_file(&path).await.unwrap();
    assert_eq!(config.config_path.as_deref(), Some(path.as_path()));
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.rotation, "daily");
    assert_eq!(config.framework.boot_delegation, vec!["java.*".to_string()]);
    assert_eq!(config.framework.max_resolve_depth, 8);
    assert!(config.framework.dynamic_imports);

    let storage = Arc::new(MemoryStorage::new());
    storage.publish(
        "mem:app",
        BundleContent::new()
            .header("Bundle-SymbolicName", "app")
            .header("Import-Package", "org.chips.framework;version=\"[1.2,2.0)\""),
    );
    let framework = Framework::builder()
        .config(config)
        .storage(storage)
        .build()
        .unwrap();
    let app = framework.install("mem:app").await.unwrap();
    assert_eq!(framework.get_updated_state(app.id()).unwrap(), BundleState::Resolved);
}

/// JSON 配置与默认值
#[tokio::test]
async fn test_json_config_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("framework.json");
    tokio::fs::write(
        &path,
        r#"{ "framework": { "dynamic_imports": false } }"#,
    )
    .await
    .unwrap();

    let config = FrameworkConfig::from_file(&path).await.unwrap();
    assert!(!config.framework.dynamic_imports);
    assert_eq!(config.framework.boot_delegation, vec!["*".to_string()]);
    assert_eq!(config.logging.level, "info");
}

/// 无效配置
#[tokio::test]
async fn test_invalid_config_files() {
    let temp_dir = TempDir::new().unwrap();

    let missing = FrameworkConfig::from_file(temp_dir.path().join("missing.yaml")).await;
    assert!(matches!(missing, Err(FrameworkError::ConfigLoadFailed(_))));

    let zero_depth = temp_dir.path().join("zero.yaml");
    tokio::fs::write(&zero_depth, "framework:\n  max_resolve_depth: 0\n")
        .await
        .unwrap();
    let result = FrameworkConfig::from_file(&zero_depth).await;
    assert!(matches!(result, Err(FrameworkError::ConfigLoadFailed(_))));

    let malformed = temp_dir.path().join("bad.yaml");
    tokio::fs::write(&malformed, "framework: [unclosed").await.unwrap();
    let result = FrameworkConfig::from_file(&malformed).await;
    assert!(matches!(result, Err(FrameworkError::Yaml(_))));

    let config = FrameworkConfig::builder().max_resolve_depth(0).build();
    let result = Framework::builder().config(config).build();
    assert!(matches!(result, Err(FrameworkError::ConfigLoadFailed(_))));
}

/// 配置覆盖
#[test]
fn test_merge_overrides() {
    let mut base = FrameworkConfig::builder()
        .system_packages("org.chips.base")
        .build();
    let overlay = FrameworkConfig::builder()
        .log_level("trace")
        .boot_delegation(["java.*", "javax.*"])
        .disable_dynamic_imports()
        .build();

    base.merge(overlay);
    assert_eq!(base.logging.level, "trace");
    assert_eq!(base.framework.boot_delegation.len(), 2);
    assert_eq!(base.framework.system_packages, "org.chips.base");
    assert!(!base.framework.dynamic_imports);
}

/// 按配置初始化日志系统，日志写入文件
#[tokio::test]
async fn test_file_logging_from_config() {
    let temp_dir = TempDir::new().unwrap();
    let config = FrameworkConfig::builder()
        .log_level("debug")
        .file_logging(temp_dir.path())
        .json_logging()
        .build();

    let guard = Logger::init_from_config(&config.logging).unwrap();
    assert!(guard.writers() >= 1);
    assert!(matches!(
        Logger::init_from_config(&config.logging),
        Err(FrameworkError::InitFailed(_))
    ));

    let framework = Framework::new(config).unwrap();
    tracing::info!(bundles = framework.bundles().len(), "日志测试");
    drop(guard);

    let mut entries = tokio::fs::read_dir(temp_dir.path()).await.unwrap();
    let mut found = false;
    while let Some(entry) = entries.next_entry().await.unwrap() {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with("chips-framework") {
            found = true;
        }
    }
    assert!(found);
}
