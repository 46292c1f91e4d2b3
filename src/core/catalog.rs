//! A set of resolved models addressable by model name.

use super::error::{Error, ParseError};
use super::resolver::{resolve, ResolvedModel};
use super::types::ModelDefinition;
use indexmap::IndexMap;
use std::path::Path;

/// Independently resolved models, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    models: IndexMap<String, ResolvedModel>,
}

impl Catalog {
    /// Resolve each model. The first failing model aborts the whole catalog.
    pub fn from_models(models: Vec<ModelDefinition>) -> Result<Self, Error> {
        let mut resolved = IndexMap::with_capacity(models.len());
        for (i, model) in models.into_iter().enumerate() {
            if resolved.contains_key(&model.name) {
                return Err(ParseError::duplicate(format!("[{}]", i), model.name).into());
            }
            let model = resolve(model)?;
            resolved.insert(model.name().to_string(), model);
        }
        Ok(Self { models: resolved })
    }

    /// Parse and resolve every model of a document file.
    pub fn load(path: &Path) -> Result<Self, Error> {
        Self::from_models(super::parser::parse_document_file(path)?)
    }

    pub fn get(&self, name: &str) -> Result<&ResolvedModel, Error> {
        self.models.get(name).ok_or_else(|| Error::UnknownModel {
            name: name.to_string(),
        })
    }

    /// The named model, or the only model when no name is given.
    pub fn select(&self, name: Option<&str>) -> Result<&ResolvedModel, Error> {
        match name {
            Some(name) => self.get(name),
            None => self.only().ok_or_else(|| Error::ModelRequired {
                names: self.names().into_iter().map(str::to_string).collect(),
            }),
        }
    }

    pub fn only(&self) -> Option<&ResolvedModel> {
        match self.models.len() {
            1 => self.models.values().next(),
            _ => None,
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.models.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResolvedModel> {
        self.models.values()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
