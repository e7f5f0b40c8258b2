use crate::{Entity, EntityRef, IdentityMap, MemoryIdentityMap, ModelError, ModelResult, TypeDescriptor};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// The narrow interface the codec needs from the entity provider: type
/// metadata, subtype resolution and the identity map for a type.
pub trait EntityProvider: Send + Sync {
    fn descriptor(&self, type_name: &str) -> Option<Arc<TypeDescriptor>>;

    /// Resolves the concrete type named by `value` within the hierarchy of
    /// `base`. Returns `None` for unknown values or types outside the hierarchy.
    fn resolve_by_discriminator(&self, base: &str, value: i32) -> Option<Arc<TypeDescriptor>>;

    /// Identity map shared by every type in the hierarchy of `type_name`.
    fn identity_map(&self, type_name: &str) -> Option<Arc<dyn IdentityMap>>;
}

/// Registry of type descriptors and one identity map per hierarchy root.
///
/// Populated once at start-up, then shared read-only behind an `Arc`.
#[derive(Default)]
pub struct TypeRegistry {
    types: HashMap<String, Arc<TypeDescriptor>>,
    discriminators: HashMap<(String, i32), String>,
    maps: HashMap<String, Arc<dyn IdentityMap>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a descriptor. Base types must be registered first.
    pub fn register(&mut self, descriptor: TypeDescriptor) -> ModelResult<Arc<TypeDescriptor>> {
        let name = descriptor.name().to_string();
        if self.types.contains_key(&name) {
            return Err(ModelError::DuplicateType(name));
        }
        if let Some(base) = descriptor.base() {
            if !self.types.contains_key(base) {
                return Err(ModelError::UnknownType(base.to_string()));
            }
        }
        let root = descriptor.root().to_string();
        if let Some(value) = descriptor.discriminator_value() {
            let slot = (root.clone(), value);
            if self.discriminators.contains_key(&slot) {
                return Err(ModelError::DuplicateDiscriminator { root, value });
            }
            self.discriminators.insert(slot, name.clone());
        }
        self.maps
            .entry(root)
            .or_insert_with(MemoryIdentityMap::shared);

        let descriptor = Arc::new(descriptor);
        self.types.insert(name.clone(), descriptor.clone());
        debug!("Registered entity type {}", name);
        Ok(descriptor)
    }

    /// Replaces the identity map used for a hierarchy root.
    pub fn set_identity_map(&mut self, root: &str, map: Arc<dyn IdentityMap>) {
        self.maps.insert(root.to_string(), map);
    }

    /// Creates a new local instance of a registered type.
    pub fn create(&self, type_name: &str) -> ModelResult<EntityRef> {
        let descriptor = self
            .types
            .get(type_name)
            .ok_or_else(|| ModelError::UnknownType(type_name.to_string()))?;
        Ok(Entity::new(descriptor.clone()))
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }
}

impl EntityProvider for TypeRegistry {
    fn descriptor(&self, type_name: &str) -> Option<Arc<TypeDescriptor>> {
        self.types.get(type_name).cloned()
    }

    fn resolve_by_discriminator(&self, base: &str, value: i32) -> Option<Arc<TypeDescriptor>> {
        let base = self.types.get(base)?;
        let name = self
            .discriminators
            .get(&(base.root().to_string(), value))?;
        self.types
            .get(name)
            .filter(|concrete| concrete.is_a(base.name()))
            .cloned()
    }

    fn identity_map(&self, type_name: &str) -> Option<Arc<dyn IdentityMap>> {
        let descriptor = self.types.get(type_name)?;
        self.maps.get(descriptor.root()).cloned()
    }
}
