//! Element/type metadata (spec.md §3: ED, TM) and the loader contract that
//! supplies it. The loader itself — resolving these from packaged
//! StructureDefinitions — is an external collaborator (spec.md §1); this
//! module only models the shape the evaluator reads.

use crate::error::{FlashError, Result};
use std::collections::HashMap;

/// The four element "kinds" spec.md §3 distinguishes by output leaf shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    System,
    PrimitiveType,
    ComplexType,
    Resource,
}

/// Whether a StructureDefinition specializes a base type or constrains
/// (profiles) one. Only `Constraint` carries a `meta.profile` obligation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Derivation {
    Specialization,
    Constraint,
}

/// Type-level metadata supplied by the loader for a referenced type.
#[derive(Debug, Clone)]
pub struct TypeMeta {
    pub kind: ElementKind,
    pub type_name: String,
    pub url: String,
    pub derivation: Derivation,
}

/// A single entry of an ElementDefinition's `type[]`.
#[derive(Debug, Clone)]
pub struct ElementDefinitionType {
    pub code: String,
    pub kind: ElementKind,
}

/// An element's cardinality, collapsed to the three states the evaluator
/// actually branches on (spec.md §3/§4.3). `max = "*"` and any `max > 1`
/// both collapse to `Many`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Forbidden,
    Single,
    Many,
}

impl Cardinality {
    pub fn parse(max: &str) -> Self {
        match max {
            "0" => Cardinality::Forbidden,
            "1" => Cardinality::Single,
            _ => Cardinality::Many,
        }
    }
}

/// An ElementDefinition, trimmed to the fields the evaluator reads
/// (spec.md §3: min, max, sliceName, base.path, type[], fixedValue, regex,
/// names[], fromDefinition, flashPathRefKey, isArray).
#[derive(Debug, Clone)]
pub struct ElementDef {
    pub flash_path_ref_key: String,
    pub min: u32,
    pub max: Cardinality,
    pub slice_name: Option<String>,
    pub base_path: String,
    pub kind: ElementKind,
    pub types: Vec<ElementDefinitionType>,
    pub fixed_value: Option<serde_json::Value>,
    pub regex: Option<String>,
    /// JSON element names. A single entry unless this is an unnarrowed
    /// polymorphic `[x]` element, in which case one entry per legal type.
    pub names: Vec<String>,
    pub from_definition: Option<String>,
    /// Overrides max="1" collapse to still emit a single-element array.
    pub is_array: bool,
}

impl ElementDef {
    pub fn is_slice(&self) -> bool {
        self.slice_name.is_some()
    }

    /// A `[x]` element, narrowed (one legal type left) or not.
    pub fn is_polymorphic_base(&self) -> bool {
        self.base_path.ends_with("[x]")
    }

    pub fn is_unnarrowed_polymorphic(&self) -> bool {
        self.is_polymorphic_base() && self.names.len() > 1
    }

    pub fn is_narrowed_polymorphic(&self) -> bool {
        self.is_polymorphic_base() && self.names.len() == 1
    }

    pub fn primitive_type_code(&self) -> Option<&str> {
        self.types.first().map(|t| t.code.as_str())
    }

    /// The single JSON name to assign under, erroring per F3005 when the
    /// element isn't polymorphic but doesn't carry exactly one name.
    pub fn single_name(&self) -> Result<&str> {
        if self.names.len() == 1 {
            Ok(self.names[0].as_str())
        } else {
            Err(FlashError::element_definition_bad_names(
                &self.flash_path_ref_key,
            ))
        }
    }

    /// The JSON grouping key a flash rule's FRR is filed under
    /// (spec.md §4.5 "Flash-rule finalization"): `name` or
    /// `name:sliceName`, with the slice name dropped for polymorphics
    /// since the type suffix in `name` already disambiguates.
    pub fn grouping_key(&self) -> Result<String> {
        let name = self.single_name()?;
        if self.is_slice() && !self.is_polymorphic_base() {
            Ok(format!("{}:{}", name, self.slice_name.as_ref().unwrap()))
        } else {
            Ok(name.to_string())
        }
    }
}

/// The resolved FHIR definitions dictionary (spec.md §6): the loader's
/// output, keyed exactly as `typeMeta` / `typeChildren` /
/// `elementDefinitions` / `elementChildren`.
pub trait FhirDefinitions: Send + Sync {
    fn type_meta(&self, instanceof: &str) -> Option<&TypeMeta>;
    fn type_children(&self, instanceof: &str) -> Option<&[ElementDef]>;
    fn element_definition(&self, flash_path_ref_key: &str) -> Option<&ElementDef>;
    fn element_children(&self, flash_path_ref_key: &str) -> Option<&[ElementDef]>;
}

/// An in-memory `FhirDefinitions`, built once by whatever loads/caches
/// StructureDefinitions (out of scope here) and handed to the evaluator.
#[derive(Debug, Default)]
pub struct StaticDefinitions {
    type_meta: HashMap<String, TypeMeta>,
    type_children: HashMap<String, Vec<ElementDef>>,
    element_definitions: HashMap<String, ElementDef>,
    element_children: HashMap<String, Vec<ElementDef>>,
}

impl StaticDefinitions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, instanceof: impl Into<String>, tm: TypeMeta) -> Self {
        self.type_meta.insert(instanceof.into(), tm);
        self
    }

    pub fn with_type_children(
        mut self,
        instanceof: impl Into<String>,
        children: Vec<ElementDef>,
    ) -> Self {
        self.type_children.insert(instanceof.into(), children);
        self
    }

    pub fn with_element(mut self, ed: ElementDef) -> Self {
        self.element_definitions
            .insert(ed.flash_path_ref_key.clone(), ed);
        self
    }

    pub fn with_element_children(
        mut self,
        flash_path_ref_key: impl Into<String>,
        children: Vec<ElementDef>,
    ) -> Self {
        self.element_children
            .insert(flash_path_ref_key.into(), children);
        self
    }
}

impl FhirDefinitions for StaticDefinitions {
    fn type_meta(&self, instanceof: &str) -> Option<&TypeMeta> {
        self.type_meta.get(instanceof)
    }

    fn type_children(&self, instanceof: &str) -> Option<&[ElementDef]> {
        self.type_children.get(instanceof).map(Vec::as_slice)
    }

    fn element_definition(&self, flash_path_ref_key: &str) -> Option<&ElementDef> {
        self.element_definitions.get(flash_path_ref_key)
    }

    fn element_children(&self, flash_path_ref_key: &str) -> Option<&[ElementDef]> {
        self.element_children
            .get(flash_path_ref_key)
            .map(Vec::as_slice)
    }
}
