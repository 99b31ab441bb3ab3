//! Resource paths: a chain of (type, id) identifiers addressing a node in
//! the resource tree, e.g. `sys0.cpu1.pe2`.

use crate::error::{ResourceError, Result};
use std::fmt;

/// Configurable cap on path depth, replacing the fixed `MAX_NUM_LEVELS`
/// array size with a runtime-checked constant.
pub const MAX_PATH_LEVELS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceType {
    System,
    Cpu,
    ProcElement,
    Memory,
    NetworkIf,
    Storage,
    Accelerator,
}

impl ResourceType {
    fn as_str(&self) -> &'static str {
        match self {
            ResourceType::System => "sys",
            ResourceType::Cpu => "cpu",
            ResourceType::ProcElement => "pe",
            ResourceType::Memory => "mem",
            ResourceType::NetworkIf => "nic",
            ResourceType::Storage => "dsk",
            ResourceType::Accelerator => "acc",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "sys" => ResourceType::System,
            "cpu" => ResourceType::Cpu,
            "pe" => ResourceType::ProcElement,
            "mem" => ResourceType::Memory,
            "nic" => ResourceType::NetworkIf,
            "dsk" => ResourceType::Storage,
            "acc" => ResourceType::Accelerator,
            _ => return None,
        })
    }
}

/// The class of a resource path, mirroring how exact/mixed/template
/// queries differ in whether every level carries an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
    Exact,
    Mixed,
    Template,
}

/// Result of comparing two paths level by level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareResult {
    Equal,
    EqualTypes,
    NotEqual,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Level {
    pub r#type: ResourceType,
    pub id: Option<u32>,
}

/// An ordered sequence of (type, id) identifiers. Value type, cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourcePath {
    levels: Vec<Level>,
}

impl ResourcePath {
    pub fn empty() -> Self {
        Self { levels: Vec::new() }
    }

    /// Parses a dot-separated path string such as `sys0.cpu1.pe2` or the
    /// template form `sys.cpu.pe`.
    pub fn parse(s: &str) -> Result<Self> {
        let mut path = Self::empty();
        for segment in s.split('.') {
            if segment.is_empty() {
                return Err(ResourceError::InvalidPath(s.to_string()));
            }
            let split_at = segment
                .find(|c: char| c.is_ascii_digit())
                .unwrap_or(segment.len());
            let (type_str, id_str) = segment.split_at(split_at);
            let r#type = ResourceType::parse(type_str)
                .ok_or_else(|| ResourceError::InvalidPath(s.to_string()))?;
            let id = if id_str.is_empty() {
                None
            } else {
                Some(
                    id_str
                        .parse::<u32>()
                        .map_err(|_| ResourceError::InvalidPath(s.to_string()))?,
                )
            };
            path.append(r#type, id)?;
        }
        Ok(path)
    }

    pub fn append(&mut self, r#type: ResourceType, id: Option<u32>) -> Result<()> {
        if self.levels.len() >= MAX_PATH_LEVELS {
            return Err(ResourceError::InvalidPath(format!(
                "path exceeds {MAX_PATH_LEVELS} levels"
            )));
        }
        if self.levels.iter().any(|l| l.r#type == r#type) {
            return Err(ResourceError::TypeAlreadyUsed(r#type.as_str().to_string()));
        }
        self.levels.push(Level { r#type, id });
        Ok(())
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn global_type(&self) -> Option<ResourceType> {
        self.levels.last().map(|l| l.r#type)
    }

    pub fn includes_type(&self, t: ResourceType) -> bool {
        self.levels.iter().any(|l| l.r#type == t)
    }

    pub fn id_of(&self, t: ResourceType) -> Option<u32> {
        self.levels.iter().find(|l| l.r#type == t).and_then(|l| l.id)
    }

    /// A path is a template when no level carries an id.
    pub fn is_template(&self) -> bool {
        self.levels.iter().all(|l| l.id.is_none())
    }

    /// A path is mixed when some but not all levels carry an id.
    pub fn is_mixed(&self) -> bool {
        let with_id = self.levels.iter().filter(|l| l.id.is_some()).count();
        with_id > 0 && with_id < self.levels.len()
    }

    /// A path is exact when every level carries an id.
    pub fn is_exact(&self) -> bool {
        !self.levels.is_empty() && self.levels.iter().all(|l| l.id.is_some())
    }

    pub fn class(&self) -> Class {
        if self.is_exact() {
            Class::Exact
        } else if self.is_mixed() {
            Class::Mixed
        } else {
            Class::Template
        }
    }

    /// Compares two paths level by level: `Equal` if every type and id
    /// matches, `EqualTypes` if the type sequence matches but some ids
    /// differ or are unset on one side, `NotEqual` otherwise.
    pub fn compare(&self, other: &ResourcePath) -> CompareResult {
        if self.levels.len() != other.levels.len() {
            return CompareResult::NotEqual;
        }
        let mut ids_equal = true;
        for (a, b) in self.levels.iter().zip(other.levels.iter()) {
            if a.r#type != b.r#type {
                return CompareResult::NotEqual;
            }
            match (a.id, b.id) {
                (Some(x), Some(y)) if x != y => ids_equal = false,
                (None, Some(_)) | (Some(_), None) => ids_equal = false,
                _ => {}
            }
        }
        if ids_equal {
            CompareResult::Equal
        } else {
            CompareResult::EqualTypes
        }
    }

    /// Whether `self` matches `pattern` under the given match class.
    /// A template pattern matches any concrete path with the same type
    /// sequence; a mixed pattern matches where ids are set and ignores
    /// levels left unset; an exact pattern requires every id to match.
    pub fn matches(&self, pattern: &ResourcePath, mode: Class) -> bool {
        if self.levels.len() != pattern.levels.len() {
            return false;
        }
        for (concrete, pat) in self.levels.iter().zip(pattern.levels.iter()) {
            if concrete.r#type != pat.r#type {
                return false;
            }
            match mode {
                Class::Template => {}
                Class::Mixed => {
                    if let Some(pid) = pat.id {
                        if concrete.id != Some(pid) {
                            return false;
                        }
                    }
                }
                Class::Exact => {
                    if concrete.id != pat.id {
                        return false;
                    }
                }
            }
        }
        true
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, level) in self.levels.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{}", level.r#type.as_str())?;
            if let Some(id) = level.id {
                write!(f, "{id}")?;
            }
        }
        Ok(())
    }
}
