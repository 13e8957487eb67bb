// ============================================
// RXCACHE - Configuration Tests
// ============================================

#[cfg(test)]
mod config_tests {
    use std::fs;
    use tempfile::tempdir;

    use rxcache::config::Settings;
    use rxcache::quota::TierName;

    #[test]
    fn test_empty_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "").unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.cache.general_ttl_hours, 168);
        assert_eq!(settings.cache.specific_ttl_hours, 24);
        assert!((settings.cache.similarity_threshold - 0.8).abs() < f64::EPSILON);
        assert_eq!(settings.cache.fuzzy_candidate_limit, 50);
        assert_eq!(settings.cache.unused_retention_days, 30);
        assert_eq!(settings.quota.default_tier, TierName::Free);
        assert!(!settings.store.in_memory);
        assert_eq!(settings.provider.kind, "openai");
    }

    #[test]
    fn test_partial_file_overrides() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[store]
path = "/var/lib/rxcache/cache.db"

[cache]
similarity_threshold = 0.9
top_k = 5

[cache.category_ttl_hours]
oncologia = 6

[quota]
default_tier = "pro"

[provider]
kind = "anthropic"
model = "claude-sonnet-4-20250514"
api_key_env = "ANTHROPIC_API_KEY"
"#,
        )
        .unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(
            settings.store_path().unwrap(),
            std::path::PathBuf::from("/var/lib/rxcache/cache.db")
        );
        assert!((settings.cache.similarity_threshold - 0.9).abs() < f64::EPSILON);
        assert_eq!(settings.cache.top_k, 5);
        assert_eq!(settings.cache.general_ttl_hours, 168);
        assert_eq!(settings.cache.category_ttl_hours.get("oncologia"), Some(&6));
        assert_eq!(settings.quota.default_tier, TierName::Pro);
        assert_eq!(settings.provider.kind, "anthropic");
        assert_eq!(settings.provider.max_tokens, 4096);
    }

    #[test]
    fn test_unknown_tier_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[quota]\ndefault_tier = \"gold\"\n").unwrap();

        assert!(Settings::load_from(&path).is_err());
        assert!("gold".parse::<TierName>().is_err());
        assert_eq!("Premium".parse::<TierName>().unwrap(), TierName::Premium);
    }

    #[test]
    fn test_defaults_serialize_and_parse_back() {
        let mut settings = Settings::default();
        settings.cache.category_ttl_hours.insert("dermato".to_string(), 48);

        let content = toml::to_string_pretty(&settings).unwrap();
        let parsed: Settings = toml::from_str(&content).unwrap();
        assert_eq!(parsed.cache.category_ttl_hours.get("dermato"), Some(&48));
        assert_eq!(parsed.provider.model, settings.provider.model);
    }

    #[test]
    fn test_unusable_ttl_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        fs::write(&path, "[cache.category_ttl_hours]\npediatria = 0\n").unwrap();
        assert!(Settings::load_from(&path).is_err());

        fs::write(&path, "[cache]\ngeneral_ttl_hours = 3000000000\n").unwrap();
        let err = Settings::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("general_ttl_hours"));

        fs::write(&path, "[cache]\nspecific_ttl_hours = 0\n").unwrap();
        assert!(Settings::load_from(&path).is_err());
    }
}
