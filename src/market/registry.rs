//! Collection registry
//!
//! Maps collection slugs to collateral contract addresses along with
//! per-collection settings.

use rust_decimal::Decimal;
use serde::Deserialize;

/// Configuration for one collection
#[derive(Debug, Clone, Deserialize)]
pub struct CollectionConfig {
    /// Human-readable slug, e.g. "azuki"
    pub slug: String,
    /// Collateral contract address
    pub address: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Exposure cap overriding the global per-collection limit
    #[serde(default)]
    pub max_capital: Option<Decimal>,
}

fn default_enabled() -> bool {
    true
}

impl CollectionConfig {
    /// Create an enabled collection with no capital override
    pub fn new(slug: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            address: address.into(),
            enabled: true,
            max_capital: None,
        }
    }
}

/// Read-only set of configured collections
#[derive(Debug, Clone, Default)]
pub struct CollectionRegistry {
    collections: Vec<CollectionConfig>,
}

impl CollectionRegistry {
    /// Create a registry
    pub fn new(collections: Vec<CollectionConfig>) -> Self {
        Self { collections }
    }

    /// Collections eligible for lending
    pub fn enabled(&self) -> impl Iterator<Item = &CollectionConfig> {
        self.collections.iter().filter(|c| c.enabled)
    }

    /// Every configured collection
    pub fn all(&self) -> &[CollectionConfig] {
        &self.collections
    }

    /// Find a collection by slug
    pub fn by_slug(&self, slug: &str) -> Option<&CollectionConfig> {
        self.collections.iter().find(|c| c.slug == slug)
    }

    /// Find a collection by contract address, ignoring case
    pub fn by_address(&self, address: &str) -> Option<&CollectionConfig> {
        self.collections
            .iter()
            .find(|c| c.address.eq_ignore_ascii_case(address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn registry() -> CollectionRegistry {
        let mut disabled =
            CollectionConfig::new("milady", "0x5Af0D9827E0c53E4799BB226655A1de152A425a5");
        disabled.enabled = false;
        let mut capped =
            CollectionConfig::new("azuki", "0xED5AF388653567Af2F388E6224dC7C4b3241C544");
        capped.max_capital = Some(dec!(2));
        CollectionRegistry::new(vec![capped, disabled])
    }

    #[test]
    fn test_enabled_filter() {
        let registry = registry();
        let enabled: Vec<_> = registry.enabled().map(|c| c.slug.as_str()).collect();
        assert_eq!(enabled, vec!["azuki"]);
        assert_eq!(registry.all().len(), 2);
    }

    #[test]
    fn test_lookup() {
        let registry = registry();
        assert_eq!(registry.by_slug("azuki").unwrap().max_capital, Some(dec!(2)));
        assert_eq!(
            registry
                .by_address("0xed5af388653567af2f388e6224dc7c4b3241c544")
                .unwrap()
                .slug,
            "azuki"
        );
        assert!(registry.by_slug("pudgy").is_none());
    }

    #[test]
    fn test_deserialize_defaults() {
        let config: CollectionConfig =
            toml::from_str("slug = \"azuki\"\naddress = \"0xabc\"").unwrap();
        assert!(config.enabled);
        assert!(config.max_capital.is_none());
    }
}
