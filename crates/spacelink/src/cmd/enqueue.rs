use std::fs;

use spacelink_frame::{Crc16, CrcPreset, FileReadBuffer};
use spacelink_transfer::payload::{validate_name, MAX_FILE_NAME, MAX_NAME};
use spacelink_transfer::{Transfer, TransferConfig};
use tracing::info;

use crate::cmd::{EnqueueArgs, Env};
use crate::exit::{frame_error, io_error, transfer_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::print_fields;

pub fn run(args: EnqueueArgs, env: &Env) -> CliResult<i32> {
    let nodes = env.node_table()?;
    let transfer = Transfer::new(&env.root, nodes, &args.node, TransferConfig::default())
        .map_err(|err| transfer_error("transfer init failed", err))?;
    let peer_id = transfer
        .node_id(&args.peer)
        .map_err(|err| transfer_error("unknown peer", err))?;

    let file_name = match args.name {
        Some(name) => name,
        None => args
            .file
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .ok_or_else(|| CliError::usage(format!("{} has no usable file name", args.file.display())))?,
    };
    validate_name(&args.agent, MAX_NAME).map_err(|err| transfer_error("bad agent name", err))?;
    validate_name(&file_name, MAX_FILE_NAME).map_err(|err| transfer_error("bad file name", err))?;

    let size = fs::metadata(&args.file)
        .map_err(|err| io_error(&format!("stat {}", args.file.display()), err))?
        .len();
    if size == 0 {
        return Err(CliError::new(
            DATA_INVALID,
            format!("{} is empty; empty files are never sent", args.file.display()),
        ));
    }

    let outgoing = transfer
        .outgoing_dir(peer_id)
        .map_err(|err| transfer_error("spool lookup failed", err))?;
    let spool = outgoing.join(&args.agent);
    fs::create_dir_all(&spool).map_err(|err| io_error("create spool", err))?;

    // Copy beside the agent directories so a running agent never queues a
    // half-written file.
    let partial = outgoing.join(format!(".enqueue-{}-{file_name}", std::process::id()));
    let target = spool.join(&file_name);
    fs::copy(&args.file, &partial).map_err(|err| io_error("copy into spool", err))?;
    if let Err(err) = fs::rename(&partial, &target) {
        let _ = fs::remove_file(&partial);
        return Err(io_error("move into spool", err));
    }

    let crc = Crc16::new(CrcPreset::CcittFalse)
        .calculate_file(&target, &mut FileReadBuffer::new())
        .map_err(|err| frame_error("checksum failed", err))?;
    info!(peer = %args.peer, agent = %args.agent, file = %file_name, size, "file spooled");

    print_fields(
        &[
            ("path", target.display().to_string()),
            ("size", size.to_string()),
            ("crc", format!("0x{crc:04x}")),
        ],
        env.format,
    );
    Ok(SUCCESS)
}
