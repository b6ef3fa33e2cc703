//! Immutable per-branch mappings handed to every worker: tectonic region
//! numbering and the realizations with their ground-motion models.

use std::sync::Arc;

use ahash::AHashMap;

use crate::error::{DisaggError, Result};
use crate::gmm::GroundMotionModel;

/// Tectonic region type name -> stable index, built once per branch.
#[derive(Debug, Clone, PartialEq)]
pub struct TrtMap {
    names: Arc<[String]>,
    index: AHashMap<String, usize>,
}

impl TrtMap {
    pub fn new(names: Vec<String>) -> Result<Self> {
        let mut index = AHashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            if index.insert(name.clone(), i).is_some() {
                return Err(DisaggError::config(format!(
                    "duplicate tectonic region type {name:?}"
                )));
            }
        }
        Ok(Self {
            names: names.into(),
            index,
        })
    }

    pub fn index_of(&self, trt: &str) -> Result<usize> {
        self.index
            .get(trt)
            .copied()
            .ok_or_else(|| DisaggError::config(format!("unknown tectonic region type {trt:?}")))
    }

    pub fn names(&self) -> &Arc<[String]> {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// One logic-tree realization: a ground-motion model per tectonic region.
#[derive(Debug, Clone)]
pub struct Realization {
    pub id: usize,
    pub weight: f64,
    pub gsims: AHashMap<String, Arc<dyn GroundMotionModel>>,
}

impl Realization {
    pub fn gsim(&self, trt: &str) -> Result<&dyn GroundMotionModel> {
        self.gsims.get(trt).map(|g| g.as_ref()).ok_or_else(|| {
            DisaggError::config(format!(
                "realization {} has no ground-motion model for {trt:?}",
                self.id
            ))
        })
    }
}
