//! Table schema: column groups and the families they hold

use std::collections::BTreeSet;

use bytes::Bytes;

use crate::error::{Result, TabletError};
use crate::predicate::ScanPredicate;

/// A named set of column families stored in their own fragment chains
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnGroup {
    pub name: String,
    /// Families in this group; empty means the group takes any family
    /// not claimed by another group
    pub families: BTreeSet<Bytes>,
}

impl ColumnGroup {
    pub fn new<I, F>(name: impl Into<String>, families: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<Bytes>,
    {
        Self {
            name: name.into(),
            families: families.into_iter().map(Into::into).collect(),
        }
    }

    /// A group accepting every family
    pub fn catch_all(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            families: BTreeSet::new(),
        }
    }

    fn is_catch_all(&self) -> bool {
        self.families.is_empty()
    }
}

/// Column layout of one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub groups: Vec<ColumnGroup>,
}

impl TableSchema {
    /// Schema with a single group holding every family
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            groups: vec![ColumnGroup::catch_all("default")],
        }
    }

    pub fn with_groups(name: impl Into<String>, groups: Vec<ColumnGroup>) -> Self {
        Self {
            name: name.into(),
            groups,
        }
    }

    /// Index of the group named `name`
    pub fn group_index(&self, name: &str) -> Option<usize> {
        self.groups.iter().position(|g| g.name == name)
    }

    /// Index of the group storing `family`
    pub fn group_of_family(&self, family: &[u8]) -> Result<usize> {
        self.groups
            .iter()
            .position(|g| g.families.contains(family))
            .or_else(|| self.groups.iter().position(ColumnGroup::is_catch_all))
            .ok_or_else(|| {
                TabletError::UnknownColumnFamily(String::from_utf8_lossy(family).into_owned())
            })
    }

    /// Groups whose chains must be merged to answer `predicate`, in schema order
    pub fn groups_for(&self, predicate: &ScanPredicate) -> Result<Vec<usize>> {
        let families = match predicate.column_predicate() {
            Some(families) => families,
            None => return Ok((0..self.groups.len()).collect()),
        };

        let mut groups = Vec::new();
        for family in families {
            let group = self.group_of_family(family)?;
            if !groups.contains(&group) {
                groups.push(group);
            }
        }
        groups.sort_unstable();
        Ok(groups)
    }
}
