use serde::Serialize;
use spacelink_frame::{Crc16, CrcPreset, FileReadBuffer};

use crate::cmd::CrcArgs;
use crate::exit::{frame_error, CliResult, SUCCESS};
use crate::output::{print_fields, print_json, OutputFormat};

#[derive(Serialize)]
struct CrcOutput {
    file: String,
    preset: &'static str,
    crc: String,
}

pub fn run(args: CrcArgs, format: OutputFormat) -> CliResult<i32> {
    let presets = if args.all {
        CrcPreset::ALL.to_vec()
    } else {
        vec![args.preset]
    };

    let file = args.file.display().to_string();
    let mut buffer = FileReadBuffer::new();
    let mut rows = Vec::with_capacity(presets.len());
    for preset in presets {
        let crc = Crc16::new(preset)
            .calculate_file(&args.file, &mut buffer)
            .map_err(|err| frame_error("checksum failed", err))?;
        rows.push(CrcOutput {
            file: file.clone(),
            preset: preset.name(),
            crc: format!("0x{crc:04x}"),
        });
    }

    match format {
        OutputFormat::Json if rows.len() == 1 => print_json(&rows[0]),
        OutputFormat::Json => print_json(&rows),
        OutputFormat::Pretty => {
            for row in &rows {
                println!("{}  {:<12} {}", row.crc, row.preset, row.file);
            }
        }
        OutputFormat::Table => {
            let fields: Vec<(&str, String)> =
                rows.iter().map(|row| (row.preset, row.crc.clone())).collect();
            println!("{file}");
            print_fields(&fields, format);
        }
    }
    Ok(SUCCESS)
}
