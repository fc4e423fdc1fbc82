use super::*;
use crate::contract::PluginAgent;
use crate::tool::ToolSpec;

struct Versioned(PluginMetadata);

struct Agent;

impl PluginAgent for Agent {
    fn tools(&self) -> Vec<ToolSpec> {
        vec![ToolSpec::new("noop", "Does nothing")]
    }
}

impl Plugin for Versioned {
    fn metadata(&self) -> &PluginMetadata {
        &self.0
    }

    fn create_agent(&self) -> Result<Box<dyn PluginAgent>> {
        Ok(Box::new(Agent))
    }
}

fn plugin(pid: &str, version: &str) -> Arc<dyn Plugin> {
    Arc::new(Versioned(PluginMetadata::new(pid, pid, version)))
}

fn catalog() -> InMemoryPluginCatalog {
    InMemoryPluginCatalog::new()
        .with_plugin(plugin("a.b.c", "1.2.0"))
        .with_plugin(plugin("a.b.c", "1.10.0"))
        .with_plugin(plugin("a.b.c", "1.9.3"))
        .with_plugin(plugin("x.y.z", "0.1.0"))
}

#[test]
fn test_compare_versions() {
    assert_eq!(compare_versions("1.10.0", "1.9.0"), Ordering::Greater);
    assert_eq!(compare_versions("1.0", "1.0.0"), Ordering::Equal);
    assert_eq!(compare_versions("2.0.0", "10.0.0"), Ordering::Less);
    assert_eq!(compare_versions("1.0.0-beta", "1.0.0-alpha"), Ordering::Greater);
}

#[tokio::test]
async fn test_resolve_latest_version() {
    let contract = catalog().resolve("a.b.c", None).await.unwrap();
    assert_eq!(contract.version(), "1.10.0");
}

#[tokio::test]
async fn test_resolve_pinned_version() {
    let contract = catalog().resolve("a.b.c", Some("1.2.0")).await.unwrap();
    assert_eq!(contract.version(), "1.2.0");
}

#[tokio::test]
async fn test_resolve_unknown() {
    let catalog = catalog();
    assert!(matches!(
        catalog.resolve("missing.plugin", None).await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        catalog.resolve("a.b.c", Some("9.9.9")).await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_list_sorted() {
    let catalog = catalog();
    assert_eq!(catalog.len(), 4);

    let listed: Vec<String> = catalog
        .list()
        .await
        .into_iter()
        .map(|m| format!("{}@{}", m.pid, m.version))
        .collect();
    assert_eq!(
        listed,
        vec!["a.b.c@1.2.0", "a.b.c@1.9.3", "a.b.c@1.10.0", "x.y.z@0.1.0"]
    );
}
