use std::collections::HashMap;
use std::error::Error;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::types::{Block, BlockId};

/// Stable material-name table. Id 0 is always `air`; remaining names get ids
/// in list order so persisted files resolve the same way across runs with
/// the same config.
#[derive(Clone, Debug)]
pub struct BlockRegistry {
    names: Vec<String>,
    by_name: HashMap<String, BlockId>,
}

#[derive(Deserialize)]
struct RegistryConfig {
    blocks: Vec<String>,
}

impl BlockRegistry {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut reg = Self {
            names: vec!["air".to_string()],
            by_name: HashMap::new(),
        };
        reg.by_name.insert("air".to_string(), 0);
        for name in names {
            let name = name.into();
            if reg.by_name.contains_key(&name) {
                continue;
            }
            let id = reg.names.len() as BlockId;
            reg.by_name.insert(name.clone(), id);
            reg.names.push(name);
        }
        reg
    }

    pub fn from_toml_str(toml_str: &str) -> Result<Self, Box<dyn Error>> {
        let cfg: RegistryConfig = toml::from_str(toml_str)?;
        Ok(Self::from_names(cfg.blocks))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Box<dyn Error>> {
        let s = fs::read_to_string(path)?;
        Self::from_toml_str(&s)
    }

    /// A small built-in palette for demos and tests.
    pub fn builtin() -> Self {
        Self::from_names([
            "stone", "dirt", "grass", "sand", "gravel", "planks", "brick", "glass", "glowstone",
        ])
    }

    #[inline]
    pub fn id_by_name(&self, name: &str) -> Option<BlockId> {
        self.by_name.get(name).copied()
    }

    #[inline]
    pub fn name_of(&self, id: BlockId) -> Option<&str> {
        self.names.get(id as usize).map(String::as_str)
    }

    pub fn block_by_name(&self, name: &str, state: u16) -> Option<Block> {
        self.id_by_name(name).map(|id| Block::new(id, state))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
