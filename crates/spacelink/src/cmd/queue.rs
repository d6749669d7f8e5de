use spacelink_transfer::{Transfer, TransferConfig};
use tracing::warn;

use crate::cmd::{Env, QueueArgs};
use crate::exit::{transfer_error, CliResult, SUCCESS};
use crate::output::{print_json, print_summaries, OutputFormat};

pub fn run(args: QueueArgs, env: &Env) -> CliResult<i32> {
    let nodes = env.node_table()?;
    let mut transfer = Transfer::new(&env.root, nodes, &args.node, TransferConfig::default())
        .map_err(|err| transfer_error("transfer init failed", err))?;

    if args.scan {
        let peers: Vec<u8> = transfer.peers().collect();
        for peer in peers {
            if let Err(err) = transfer.outgoing_tx_load(peer) {
                warn!(peer, error = %err, "spool scan failed");
            }
        }
    }

    let outgoing = (!args.incoming).then(|| transfer.outgoing_snapshot());
    let incoming = (!args.outgoing).then(|| transfer.incoming_snapshot());

    if env.format == OutputFormat::Json {
        let mut out = serde_json::Map::new();
        if let Some(outgoing) = &outgoing {
            out.insert("outgoing".into(), serde_json::to_value(outgoing).unwrap_or_default());
        }
        if let Some(incoming) = &incoming {
            out.insert("incoming".into(), serde_json::to_value(incoming).unwrap_or_default());
        }
        print_json(&out);
        return Ok(SUCCESS);
    }

    if let Some(outgoing) = &outgoing {
        print_summaries("outgoing", outgoing, env.format);
    }
    if let Some(incoming) = &incoming {
        print_summaries("incoming", incoming, env.format);
    }
    Ok(SUCCESS)
}
