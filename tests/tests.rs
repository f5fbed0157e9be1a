mod common;

#[cfg(test)]
mod engine_integration_tests {
    use std::path::PathBuf;
    use tempfile::TempDir;
    use isotool::*;
    use crate::common::write_wheel;

    fn setup_tests() -> (TempDir, Settings) {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings::with_home(temp_dir.path());
        let wheels = settings.wheel_search_paths()[0].clone();
        write_wheel(&wheels, "fetcher", "1.4.0", &["requests>=2.0", "click", "requests>=2.0"], &[("fetch", "fetcher.cli:main")]);
        write_wheel(&wheels, "lister", "0.9", &["requests<2.0"], &[]);
        write_wheel(&settings.bundles_dir().join("kit"), "bundled", "2.0", &[], &[("bundled", "bundled:main")]);
        (temp_dir, settings)
    }

    #[test]
    fn test_catalog_from_settings() {
        let (_dir, settings) = setup_tests();
        let mut catalog = ArchiveCatalog::from_settings(&settings);
        let mut names: Vec<String> = catalog.discover(None).iter().map(ArchiveDescriptor::tool_identity).collect();
        names.sort();
        assert_eq!(names, vec!["bundled", "fetcher", "lister"]);
        assert_eq!(catalog.list_bundles(), vec!["kit"]);
        assert_eq!(catalog.find_by_tool_identity("fetch").unwrap().version, "1.4.0");
    }

    #[test]
    fn test_registry_configuration() {
        let (_dir, settings) = setup_tests();
        let mut registry = ToolRegistry::new(ArchiveCatalog::from_settings(&settings));
        assert_eq!(registry.list_tools(), vec!["bundled", "fetcher", "lister"]);
        assert_eq!(registry.tool_dependencies("fetcher"), vec!["requests>=2.0", "click"]);
        assert!(registry.validate_tool_config("fetcher"));
        assert!(!registry.validate_tool_config("lister"));
        assert_eq!(
            registry.build_run_command("fetcher", &["--all".to_string()]).unwrap(),
            vec!["fetch", "--all"]
        );
        assert!(matches!(
            registry.build_run_command("lister", &[]),
            Err(EngineError::NoEntryPoint(_))
        ));
    }

    #[test]
    fn test_conflicts_and_missing_without_environments() {
        let (_dir, settings) = setup_tests();
        let environments = EnvironmentManager::new(&settings).unwrap();
        let tools = ToolRegistry::new(ArchiveCatalog::from_settings(&settings));
        let mut resolver = DependencyResolver::new(tools, environments);

        let conflicts = resolver.detect_conflicts(&["fetcher".to_string(), "lister".to_string()]);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].package, "requests");
        assert_eq!(conflicts[0].requirements, vec!["requests>=2.0", "requests<2.0"]);

        assert_eq!(resolver.missing_dependencies("fetcher"), vec!["requests>=2.0", "click"]);
        assert!(!resolver.check_dependencies_satisfied("fetcher"));
        assert!(resolver.check_dependencies_satisfied("bundled"));
        assert!(resolver.environments().list_environments().is_empty());
    }

    #[test]
    fn test_settings_round_trip_through_file() {
        let (dir, mut settings) = setup_tests();
        settings.validate_timeout_secs = 3;
        settings.wheel_paths = vec![PathBuf::from("/opt/wheels")];
        let path = dir.path().join("config.toml");
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_requirement_helpers() {
        let spec = parse_requirement("pkg>=1.2.0");
        assert_eq!(spec.spec().unwrap().constraint.as_deref(), Some(">=1.2.0"));
        assert_eq!(parse_requirement("pkg; extra == 'dev'"), ParsedRequirement::Inapplicable);
        assert!(check_version_compatibility("1.5.0", ">=1.2.0,<2.0.0"));
        assert!(!check_version_compatibility("2.0.0", ">=1.2.0,<2.0.0"));
    }
}
