//! Line requests an operator types into a running agent.
//!
//! ```text
//! list_incoming
//! list_outgoing
//! set_enabled <node> <tx_id> <0|1>
//! remove_file <node> <tx_id>
//! counters
//! ```
//!
//! `<node>` is a node id or name. Every reply is one JSON line.

use std::str::FromStr;

use serde_json::json;
use spacelink_transfer::{Result, Transfer};

use crate::counters::Counters;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ListIncoming,
    ListOutgoing,
    SetEnabled {
        node: String,
        tx_id: u8,
        enabled: bool,
    },
    RemoveFile {
        node: String,
        tx_id: u8,
    },
    Counters,
}

impl FromStr for Request {
    type Err = String;

    fn from_str(line: &str) -> std::result::Result<Self, Self::Err> {
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            ["list_incoming"] => Ok(Request::ListIncoming),
            ["list_outgoing"] => Ok(Request::ListOutgoing),
            ["counters"] => Ok(Request::Counters),
            ["set_enabled", node, tx_id, enabled] => Ok(Request::SetEnabled {
                node: node.to_string(),
                tx_id: parse_tx_id(tx_id)?,
                enabled: match *enabled {
                    "0" => false,
                    "1" => true,
                    other => return Err(format!("expected 0 or 1, got {other:?}")),
                },
            }),
            ["remove_file", node, tx_id] => Ok(Request::RemoveFile {
                node: node.to_string(),
                tx_id: parse_tx_id(tx_id)?,
            }),
            [] => Err("empty request".to_string()),
            [name, ..] => Err(format!("unknown request or wrong arguments: {name}")),
        }
    }
}

impl Request {
    /// Apply the request and render its JSON reply.
    pub fn apply(&self, transfer: &mut Transfer, counters: &Counters) -> Result<String> {
        match self {
            Request::ListIncoming => transfer.list_incoming(),
            Request::ListOutgoing => transfer.list_outgoing(),
            Request::SetEnabled {
                node,
                tx_id,
                enabled,
            } => {
                let node_id = transfer.node_id(node)?;
                transfer.set_enabled(node_id, *tx_id, *enabled)?;
                Ok(ok_reply())
            }
            Request::RemoveFile { node, tx_id } => {
                let node_id = transfer.node_id(node)?;
                transfer.remove_file(node_id, *tx_id)?;
                Ok(ok_reply())
            }
            Request::Counters => Ok(serde_json::to_string(&counters.snapshot())?),
        }
    }
}

pub fn ok_reply() -> String {
    json!({ "ok": true }).to_string()
}

pub fn error_reply(message: impl std::fmt::Display) -> String {
    json!({ "ok": false, "error": message.to_string() }).to_string()
}

fn parse_tx_id(value: &str) -> std::result::Result<u8, String> {
    match value.parse::<u8>() {
        Ok(0) | Err(_) => Err(format!("invalid tx_id {value:?}")),
        Ok(id) => Ok(id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_request() {
        assert_eq!("list_incoming".parse::<Request>(), Ok(Request::ListIncoming));
        assert_eq!("  list_outgoing ".parse::<Request>(), Ok(Request::ListOutgoing));
        assert_eq!(
            "set_enabled sat 243 0".parse::<Request>(),
            Ok(Request::SetEnabled {
                node: "sat".into(),
                tx_id: 243,
                enabled: false,
            })
        );
        assert_eq!(
            "remove_file 2 17".parse::<Request>(),
            Ok(Request::RemoveFile {
                node: "2".into(),
                tx_id: 17,
            })
        );
    }

    #[test]
    fn rejects_malformed_requests() {
        assert!("".parse::<Request>().is_err());
        assert!("set_enabled sat 243".parse::<Request>().is_err());
        assert!("set_enabled sat 243 yes".parse::<Request>().is_err());
        assert!("remove_file sat 0".parse::<Request>().is_err());
        assert!("remove_file sat 256".parse::<Request>().is_err());
        assert!("reboot".parse::<Request>().is_err());
    }

    #[test]
    fn replies_are_single_json_lines() {
        let reply: serde_json::Value = serde_json::from_str(&error_reply("no such tx")).unwrap();
        assert_eq!(reply["ok"], false);
        assert_eq!(reply["error"], "no such tx");
        assert!(!ok_reply().contains('\n'));
    }
}
