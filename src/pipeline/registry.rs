//! Startup-time registry of step factories and predicates

use super::conditional::Predicate;
use super::context::MessagingContext;
use super::step::Step;
use crate::config::ConfigError;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Free-form settings of one configured step
pub type StepSettings = BTreeMap<String, serde_json::Value>;

/// Builds a step from its settings; an `Err` is the reason the settings were rejected
pub type StepFactory =
    Arc<dyn Fn(&StepSettings) -> Result<Box<dyn Step>, String> + Send + Sync>;

#[derive(Clone)]
struct StepRegistration {
    factory: StepFactory,
    accepts_settings: bool,
}

/// Maps stable string keys to step factories and predicates
#[derive(Clone, Default)]
pub struct StepRegistry {
    steps: HashMap<String, StepRegistration>,
    predicates: HashMap<String, Predicate>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step that takes no configuration
    pub fn register_step<F>(&mut self, key: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn Step> + Send + Sync + 'static,
    {
        self.steps.insert(
            key.into(),
            StepRegistration {
                factory: Arc::new(move |_| Ok(factory())),
                accepts_settings: false,
            },
        );
        self
    }

    /// Register a step whose factory validates and consumes settings
    pub fn register_configurable_step<F>(&mut self, key: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&StepSettings) -> Result<Box<dyn Step>, String> + Send + Sync + 'static,
    {
        self.steps.insert(
            key.into(),
            StepRegistration {
                factory: Arc::new(factory),
                accepts_settings: true,
            },
        );
        self
    }

    pub fn register_predicate<F>(&mut self, key: impl Into<String>, predicate: F) -> &mut Self
    where
        F: Fn(&MessagingContext) -> bool + Send + Sync + 'static,
    {
        self.predicates.insert(key.into(), Arc::new(predicate));
        self
    }

    pub fn accepts_settings(&self, key: &str) -> Option<bool> {
        self.steps.get(key).map(|registration| registration.accepts_settings)
    }

    /// Sorted step keys
    pub fn step_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.steps.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Sorted predicate keys
    pub fn predicate_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.predicates.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Construct the step registered under `key`
    pub fn create_step(&self, key: &str, settings: &StepSettings) -> Result<Box<dyn Step>, ConfigError> {
        let registration = self
            .steps
            .get(key)
            .ok_or_else(|| ConfigError::UnknownStep(key.to_string()))?;

        if !registration.accepts_settings && !settings.is_empty() {
            return Err(ConfigError::UnexpectedSettings(key.to_string()));
        }

        (registration.factory)(settings).map_err(|reason| ConfigError::InvalidSetting {
            step: key.to_string(),
            reason,
        })
    }

    pub fn predicate(&self, key: &str) -> Result<Predicate, ConfigError> {
        self.predicates
            .get(key)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownPredicate(key.to_string()))
    }
}

/// Deserialize step settings into a typed struct
///
/// Use `#[serde(deny_unknown_fields)]` on `T` to reject misspelled keys.
pub fn parse_settings<T: DeserializeOwned>(settings: &StepSettings) -> Result<T, String> {
    let object: serde_json::Map<String, serde_json::Value> = settings
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    serde_json::from_value(serde_json::Value::Object(object)).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::StepResult;
    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::json;

    struct Noop(String);

    #[async_trait]
    impl Step for Noop {
        fn name(&self) -> &str {
            &self.0
        }

        async fn execute(&self, context: MessagingContext) -> StepResult {
            StepResult::success(context)
        }
    }

    #[derive(Deserialize)]
    #[serde(deny_unknown_fields)]
    struct FlagSettings {
        #[serde(default)]
        flag: bool,
    }

    fn registry() -> StepRegistry {
        let mut registry = StepRegistry::new();
        registry
            .register_step("plain", || Box::new(Noop("plain".to_string())))
            .register_configurable_step("flagged", |settings| {
                let parsed: FlagSettings = parse_settings(settings)?;
                Ok(Box::new(Noop(format!("flagged:{}", parsed.flag))))
            })
            .register_predicate("always", |_| true);
        registry
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(matches!(
            registry().create_step("missing", &StepSettings::new()),
            Err(ConfigError::UnknownStep(key)) if key == "missing"
        ));
        assert!(matches!(
            registry().predicate("sometimes"),
            Err(ConfigError::UnknownPredicate(_))
        ));
    }

    #[test]
    fn test_settings_for_plain_step_rejected() {
        let mut settings = StepSettings::new();
        settings.insert("flag".to_string(), json!(true));
        assert!(matches!(
            registry().create_step("plain", &settings),
            Err(ConfigError::UnexpectedSettings(key)) if key == "plain"
        ));
        assert_eq!(registry().accepts_settings("plain"), Some(false));
    }

    #[test]
    fn test_configurable_step_parses_settings() {
        let mut settings = StepSettings::new();
        settings.insert("flag".to_string(), json!(true));
        let step = registry().create_step("flagged", &settings).unwrap();
        assert_eq!(step.name(), "flagged:true");
    }

    #[test]
    fn test_rejected_settings_reported() {
        let mut settings = StepSettings::new();
        settings.insert("flag".to_string(), json!("yes"));
        assert!(matches!(
            registry().create_step("flagged", &settings),
            Err(ConfigError::InvalidSetting { .. })
        ));

        let mut misspelled = StepSettings::new();
        misspelled.insert("flg".to_string(), json!(true));
        assert!(matches!(
            registry().create_step("flagged", &misspelled),
            Err(ConfigError::InvalidSetting { .. })
        ));
    }

    #[test]
    fn test_keys_sorted() {
        assert_eq!(registry().step_keys(), vec!["flagged", "plain"]);
        assert_eq!(registry().predicate_keys(), vec!["always"]);
    }
}
