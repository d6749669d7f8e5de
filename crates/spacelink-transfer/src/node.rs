use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Result, TransferError};
use crate::payload::{validate_name, MAX_NAME};

/// Immutable id <-> name map of every node the engine may talk to.
///
/// Text form is one `<id> <name>` pair per line; blank lines and lines
/// starting with `#` are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeTable {
    nodes: BTreeMap<u8, String>,
}

impl NodeTable {
    /// Build from `(id, name)` pairs, rejecting duplicate ids or names.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (u8, S)>,
        S: Into<String>,
    {
        let mut table = Self::default();
        for (index, (id, name)) in pairs.into_iter().enumerate() {
            table.insert(index + 1, id, name.into())?;
        }
        table.check_size()?;
        Ok(table)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut table = Self::default();
        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let (Some(id), Some(name), None) = (fields.next(), fields.next(), fields.next()) else {
                return Err(TransferError::NodeTable {
                    line: index + 1,
                    message: "expected `<id> <name>`".into(),
                });
            };
            let id: u8 = id.parse().map_err(|_| TransferError::NodeTable {
                line: index + 1,
                message: format!("invalid node id {id:?}"),
            })?;
            table.insert(index + 1, id, name.to_string())?;
        }
        table.check_size()?;
        Ok(table)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::parse(&std::fs::read_to_string(path)?)
    }

    pub fn id(&self, name: &str) -> Option<u8> {
        self.nodes
            .iter()
            .find_map(|(id, node)| (node == name).then_some(*id))
    }

    pub fn name(&self, id: u8) -> Option<&str> {
        self.nodes.get(&id).map(String::as_str)
    }

    /// Resolve a node given by name or by numeric id.
    pub fn resolve(&self, node: &str) -> Result<u8> {
        self.id(node)
            .or_else(|| node.parse().ok().filter(|id| self.nodes.contains_key(id)))
            .ok_or_else(|| TransferError::UnknownNode(node.to_string()))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, &str)> {
        self.nodes.iter().map(|(id, name)| (*id, name.as_str()))
    }

    fn insert(&mut self, line: usize, id: u8, name: String) -> Result<()> {
        if validate_name(&name, MAX_NAME).is_err() {
            return Err(TransferError::NodeTable {
                line,
                message: format!("invalid node name {name:?}"),
            });
        }
        if self.nodes.contains_key(&id) || self.id(&name).is_some() {
            return Err(TransferError::NodeTable {
                line,
                message: format!("duplicate node {id} {name}"),
            });
        }
        self.nodes.insert(id, name);
        Ok(())
    }

    fn check_size(&self) -> Result<()> {
        if self.nodes.len() < 2 {
            return Err(TransferError::TooFewNodes(self.nodes.len()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_with_comments() {
        let table = NodeTable::parse("# fleet\n1 ground\n\n  2 cubesat\n").unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.id("cubesat"), Some(2));
        assert_eq!(table.name(1), Some("ground"));
        assert_eq!(table.resolve("2").unwrap(), 2);
        assert_eq!(table.resolve("ground").unwrap(), 1);
        assert!(matches!(
            table.resolve("mars"),
            Err(TransferError::UnknownNode(_))
        ));
    }

    #[test]
    fn one_node_is_not_enough() {
        assert!(matches!(
            NodeTable::parse("1 ground\n"),
            Err(TransferError::TooFewNodes(1))
        ));
        assert!(matches!(
            NodeTable::from_pairs(Vec::<(u8, String)>::new()),
            Err(TransferError::TooFewNodes(0))
        ));
    }

    #[test]
    fn malformed_lines_report_line_numbers() {
        let err = NodeTable::parse("1 ground\nx sat\n").unwrap_err();
        assert!(matches!(err, TransferError::NodeTable { line: 2, .. }));
        let err = NodeTable::parse("1 ground\n2 sat extra\n").unwrap_err();
        assert!(matches!(err, TransferError::NodeTable { line: 2, .. }));
        let err = NodeTable::parse("1 ground\n1 sat\n").unwrap_err();
        assert!(matches!(err, TransferError::NodeTable { line: 2, .. }));
    }
}
