use actix_web::web;

use crate::configuration::ConfigurationError;

/// A named group of routes mounted under a common prefix.
#[derive(Clone, Copy)]
pub struct Blueprint {
    pub name: &'static str,
    pub url_prefix: &'static str,
    pub configure: fn(&mut web::ServiceConfig),
}

impl std::fmt::Debug for Blueprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blueprint")
            .field("name", &self.name)
            .field("url_prefix", &self.url_prefix)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BlueprintRegistry {
    blueprints: Vec<Blueprint>,
}

impl BlueprintRegistry {
    pub fn register(&mut self, blueprint: Blueprint) -> Result<(), ConfigurationError> {
        if self.blueprints.iter().any(|b| b.name == blueprint.name) {
            return Err(ConfigurationError::DuplicateBlueprint(
                blueprint.name.to_string(),
            ));
        }

        tracing::debug!(
            name = blueprint.name,
            prefix = blueprint.url_prefix,
            "Blueprint registered"
        );
        self.blueprints.push(blueprint);
        Ok(())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.blueprints.iter().map(|b| b.name).collect()
    }

    /// Attach every registered group to an actix `App`, in registration order.
    pub fn mount(&self, cfg: &mut web::ServiceConfig) {
        for blueprint in &self.blueprints {
            cfg.service(web::scope(blueprint.url_prefix).configure(blueprint.configure));
        }
    }
}

pub fn register_blueprints(
    registry: &mut BlueprintRegistry,
    blueprints: impl IntoIterator<Item = Blueprint>,
) -> Result<(), ConfigurationError> {
    blueprints
        .into_iter()
        .try_for_each(|blueprint| registry.register(blueprint))
}
