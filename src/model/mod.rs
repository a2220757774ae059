pub mod config;
pub mod errors;
pub mod schema;

use std::path::Path;
use std::sync::Arc;

pub use config::ModelConfig;
pub use errors::ModelError;
pub use schema::{
    Discriminator, EntityType, Model, Navigation, NavigationKind, Property, ValueType,
};

/// Loads, validates and freezes a model definition from a YAML file.
pub fn load_model<P: AsRef<Path>>(path: P) -> Result<Arc<Model>, ModelError> {
    let path = path.as_ref();
    log::debug!("Loading model definition from {}", path.display());
    let model = ModelConfig::from_yaml_file(path)?.build()?;
    log::info!(
        "Loaded model '{}' ({} entity types, {} entity sets)",
        model.name,
        model.entity_types().count(),
        model.entity_sets().count()
    );
    Ok(Arc::new(model))
}
