use crate::{ModelError, ModelResult};
use entcache_types::KeyKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Describes one property of an entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    /// Wire name (JSON field name).
    pub name: String,
    pub kind: PropertyKind,
    /// Local edits are tracked in the change ledger and win over incoming data.
    pub change_sensitive: bool,
    /// This property holds the identity key.
    #[serde(default)]
    pub identity: bool,
    /// This property holds the subtype discriminator.
    #[serde(default)]
    pub discriminator: bool,
    /// Local mutation is rejected; the value only ever comes from the server.
    #[serde(default)]
    pub read_only: bool,
    /// The property is emitted by the write path.
    pub writeable: bool,
    /// Scalar kind of the key. Only meaningful when `identity` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_kind: Option<KeyKind>,
}

/// Semantic kind of a property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PropertyKind {
    /// A scalar (or plain JSON) value handled by the generic serializer.
    Attribute,
    /// A single reference to another tracked entity.
    Reference { target: String },
    /// A one-to-many collection of tracked entities.
    Collection {
        target: String,
        /// Reference property on the element type pointing back at the owner.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        inverse: Option<String>,
    },
}

impl PropertyDescriptor {
    fn with_kind(name: &str, kind: PropertyKind) -> Self {
        Self {
            name: name.into(),
            kind,
            change_sensitive: true,
            identity: false,
            discriminator: false,
            read_only: false,
            writeable: true,
            key_kind: None,
        }
    }

    /// Shorthand for a change-tracked attribute.
    pub fn attribute(name: &str) -> Self {
        Self::with_kind(name, PropertyKind::Attribute)
    }

    /// Shorthand for the identity property.
    pub fn identity(name: &str, key_kind: KeyKind) -> Self {
        Self {
            change_sensitive: false,
            identity: true,
            key_kind: Some(key_kind),
            ..Self::with_kind(name, PropertyKind::Attribute)
        }
    }

    /// Shorthand for the type discriminator property.
    pub fn discriminator(name: &str) -> Self {
        Self {
            change_sensitive: false,
            discriminator: true,
            ..Self::with_kind(name, PropertyKind::Attribute)
        }
    }

    /// Shorthand for a single entity reference.
    pub fn reference(name: &str, target: &str) -> Self {
        Self::with_kind(
            name,
            PropertyKind::Reference {
                target: target.into(),
            },
        )
    }

    /// Shorthand for an entity collection.
    pub fn collection(name: &str, target: &str) -> Self {
        Self::with_kind(
            name,
            PropertyKind::Collection {
                target: target.into(),
                inverse: None,
            },
        )
    }

    /// Names the back-reference on the element type of a collection.
    #[must_use]
    pub fn inverse(mut self, inverse: &str) -> Self {
        if let PropertyKind::Collection { inverse: slot, .. } = &mut self.kind {
            *slot = Some(inverse.into());
        }
        self
    }

    /// Marks the property as read-only (server-computed, never sent).
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self.writeable = false;
        self
    }

    /// Keeps the property out of outgoing payloads but allows local edits.
    #[must_use]
    pub fn local_only(mut self) -> Self {
        self.writeable = false;
        self
    }

    /// Excludes the property from change tracking.
    #[must_use]
    pub fn untracked(mut self) -> Self {
        self.change_sensitive = false;
        self
    }

    pub fn is_attribute(&self) -> bool {
        matches!(self.kind, PropertyKind::Attribute)
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.kind, PropertyKind::Reference { .. })
    }

    pub fn is_collection(&self) -> bool {
        matches!(self.kind, PropertyKind::Collection { .. })
    }

    /// True for the identity and discriminator properties, which are read
    /// before any payload field and never merged.
    pub fn is_header(&self) -> bool {
        self.identity || self.discriminator
    }

    /// Target entity type of a reference or collection.
    pub fn target(&self) -> Option<&str> {
        match &self.kind {
            PropertyKind::Attribute => None,
            PropertyKind::Reference { target } | PropertyKind::Collection { target, .. } => {
                Some(target)
            }
        }
    }
}

/// Per-type metadata: an ordered property table indexed by wire name.
///
/// Built once through [`TypeDescriptor::builder`] and shared behind an `Arc`
/// by the registry and every instance of the type.
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    name: String,
    /// Base-first chain of ancestor type names.
    ancestors: Vec<String>,
    discriminator_value: Option<i32>,
    properties: Vec<PropertyDescriptor>,
    index: HashMap<String, usize>,
    identity: usize,
    discriminator: Option<usize>,
}

impl TypeDescriptor {
    /// Starts a descriptor for a type.
    pub fn builder(name: &str) -> TypeDescriptorBuilder {
        TypeDescriptorBuilder {
            name: name.into(),
            ancestors: Vec::new(),
            discriminator_value: None,
            properties: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the hierarchy root. Instances of every type in a hierarchy
    /// share one identity map.
    pub fn root(&self) -> &str {
        self.ancestors.first().unwrap_or(&self.name)
    }

    /// Direct base type, if any.
    pub fn base(&self) -> Option<&str> {
        self.ancestors.last().map(String::as_str)
    }

    /// True if this type is `name` or derives from it.
    pub fn is_a(&self, name: &str) -> bool {
        self.name == name || self.ancestors.iter().any(|a| a == name)
    }

    pub fn discriminator_value(&self) -> Option<i32> {
        self.discriminator_value
    }

    /// Properties in declaration order, base properties first.
    pub fn properties(&self) -> &[PropertyDescriptor] {
        &self.properties
    }

    /// Looks up a property by wire name.
    pub fn property(&self, name: &str) -> Option<(usize, &PropertyDescriptor)> {
        self.index.get(name).map(|&i| (i, &self.properties[i]))
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn property_at(&self, index: usize) -> Option<&PropertyDescriptor> {
        self.properties.get(index)
    }

    pub fn identity(&self) -> &PropertyDescriptor {
        &self.properties[self.identity]
    }

    pub fn identity_index(&self) -> usize {
        self.identity
    }

    pub fn discriminator(&self) -> Option<&PropertyDescriptor> {
        self.discriminator.map(|i| &self.properties[i])
    }

    pub fn discriminator_index(&self) -> Option<usize> {
        self.discriminator
    }

    pub fn key_kind(&self) -> KeyKind {
        self.identity().key_kind.unwrap_or_default()
    }
}

/// Builder for [`TypeDescriptor`].
#[derive(Debug, Clone)]
pub struct TypeDescriptorBuilder {
    name: String,
    ancestors: Vec<String>,
    discriminator_value: Option<i32>,
    properties: Vec<PropertyDescriptor>,
}

impl TypeDescriptorBuilder {
    /// Derives from `base`: its properties come first, in base order.
    #[must_use]
    pub fn extends(mut self, base: &TypeDescriptor) -> Self {
        self.ancestors = base.ancestors.clone();
        self.ancestors.push(base.name.clone());
        let own = std::mem::take(&mut self.properties);
        self.properties = base.properties.clone();
        self.properties.extend(own);
        self
    }

    /// Sets the discriminator value naming this concrete type.
    #[must_use]
    pub fn discriminator_value(mut self, value: i32) -> Self {
        self.discriminator_value = Some(value);
        self
    }

    #[must_use]
    pub fn property(mut self, property: PropertyDescriptor) -> Self {
        self.properties.push(property);
        self
    }

    /// Validates the property table and builds the name index.
    pub fn build(self) -> ModelResult<TypeDescriptor> {
        let mut index = HashMap::with_capacity(self.properties.len());
        let mut identity = None;
        let mut discriminator = None;

        for (i, property) in self.properties.iter().enumerate() {
            if index.insert(property.name.clone(), i).is_some() {
                return Err(ModelError::DuplicateProperty {
                    type_name: self.name,
                    property: property.name.clone(),
                });
            }
            if property.identity && identity.replace(i).is_some() {
                return Err(ModelError::MultipleIdentity(self.name));
            }
            if property.discriminator && discriminator.replace(i).is_some() {
                return Err(ModelError::MultipleDiscriminator(self.name));
            }
        }

        let Some(identity) = identity else {
            return Err(ModelError::MissingIdentity(self.name));
        };

        Ok(TypeDescriptor {
            name: self.name,
            ancestors: self.ancestors,
            discriminator_value: self.discriminator_value,
            properties: self.properties,
            index,
            identity,
            discriminator,
        })
    }
}
