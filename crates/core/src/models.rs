use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

pub const DEFAULT_LIGHT_MODEL: &str = "gemini-1.5-flash-001";
pub const DEFAULT_PRO_MODEL: &str = "gemini-1.5-pro-001";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelTier {
    /// Fast, low-cost model.
    Light,
    /// High-capability model.
    #[default]
    Pro,
}

impl ModelTier {
    pub const ALL: [ModelTier; 2] = [ModelTier::Light, ModelTier::Pro];

    pub fn name(&self) -> &'static str {
        match self {
            ModelTier::Light => "Light",
            ModelTier::Pro => "Pro",
        }
    }
}

/// Fixed tier to backend model mapping, built once at startup.
#[derive(Clone, Debug)]
pub struct ModelResolver {
    light: String,
    pro: String,
}

impl ModelResolver {
    pub fn new(light: impl Into<String>, pro: impl Into<String>) -> Result<Self, ConfigError> {
        let light = light.into();
        let pro = pro.into();

        if light.trim().is_empty() || pro.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "model table".to_string(),
                reason: "model identifiers must not be empty".to_string(),
            });
        }
        if light == pro {
            return Err(ConfigError::Invalid {
                key: "model table".to_string(),
                reason: format!("Light and Pro both resolve to {light}"),
            });
        }

        Ok(Self { light, pro })
    }

    pub fn resolve(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Light => &self.light,
            ModelTier::Pro => &self.pro,
        }
    }
}

impl Default for ModelResolver {
    fn default() -> Self {
        Self {
            light: DEFAULT_LIGHT_MODEL.to_string(),
            pro: DEFAULT_PRO_MODEL.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_is_total_and_distinct() {
        let resolver = ModelResolver::default();
        assert_eq!(resolver.resolve(ModelTier::Light), DEFAULT_LIGHT_MODEL);
        assert_eq!(resolver.resolve(ModelTier::Pro), DEFAULT_PRO_MODEL);
        assert_ne!(
            resolver.resolve(ModelTier::Light),
            resolver.resolve(ModelTier::Pro)
        );
    }

    #[test]
    fn resolve_is_deterministic() {
        let resolver = ModelResolver::new("flash", "pro").unwrap();
        for tier in ModelTier::ALL {
            assert_eq!(resolver.resolve(tier), resolver.resolve(tier));
        }
    }

    #[test]
    fn identical_identifiers_are_rejected() {
        let err = ModelResolver::new("same", "same").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn blank_identifier_is_rejected() {
        assert!(ModelResolver::new("  ", "pro").is_err());
    }
}
