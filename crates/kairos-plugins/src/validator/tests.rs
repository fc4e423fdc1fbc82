use super::*;
use crate::contract::{DependencyCheck, Plugin, PluginAgent, SettingSpec};
use crate::tool::ToolSpec;
use std::sync::Arc;

struct NoTools;

impl PluginAgent for NoTools {
    fn tools(&self) -> Vec<ToolSpec> {
        Vec::new()
    }
}

struct TestPlugin {
    metadata: PluginMetadata,
    dependency_errors: Option<Vec<String>>,
}

impl DependencyCheck for TestPlugin {
    fn validate_dependencies(&self) -> Vec<String> {
        self.dependency_errors.clone().unwrap_or_default()
    }
}

impl Plugin for TestPlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    fn create_agent(&self) -> crate::Result<Box<dyn PluginAgent>> {
        Ok(Box::new(NoTools))
    }

    fn dependency_check(&self) -> Option<&dyn DependencyCheck> {
        self.dependency_errors.as_ref().map(|_| self as &dyn DependencyCheck)
    }
}

fn contract(metadata: PluginMetadata, dependency_errors: Option<Vec<String>>) -> PluginContract {
    PluginContract::new(Arc::new(TestPlugin {
        metadata,
        dependency_errors,
    }))
}

#[test]
fn test_valid_contract() {
    let c = contract(PluginMetadata::new("io.example.search", "Search", "1.0.0"), None);
    assert!(ContractValidator::new().validate(&c).is_ok());
}

#[test]
fn test_structural_errors_are_aggregated() {
    let metadata = PluginMetadata::new("search", "", "1.0 beta")
        .with_setting(SettingSpec::new("k", "first"))
        .with_setting(SettingSpec::new("k", "second"));
    let c = contract(metadata, None);

    match ContractValidator::new().validate(&c).unwrap_err() {
        Error::Validation { plugin, errors } => {
            assert_eq!(plugin, "search");
            assert_eq!(errors.len(), 4);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_dependency_check_errors_fail_validation() {
    let c = contract(
        PluginMetadata::new("io.example.search", "Search", "1.0.0"),
        Some(vec!["missing binary 'rg'".to_string()]),
    );

    let err = ContractValidator::new().validate(&c).unwrap_err();
    assert!(err.to_string().contains("missing binary 'rg'"));
}

#[test]
fn test_passing_dependency_check() {
    let c = contract(
        PluginMetadata::new("io.example.search", "Search", "1.0.0"),
        Some(Vec::new()),
    );
    assert!(ContractValidator::new().validate(&c).is_ok());
}

#[test]
fn test_pid_shape() {
    assert!(is_valid_pid("a.b.c"));
    assert!(is_valid_pid("io.kairos-x.tool_1"));
    assert!(!is_valid_pid("single"));
    assert!(!is_valid_pid("a..b"));
    assert!(!is_valid_pid("a.b c"));
}
