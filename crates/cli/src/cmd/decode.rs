//! Offline flag decoding

use crate::output;
use anyhow::{Context, Result};
use fsstream_core::{decode, CreateFlags, EventFlags, EventId, RawEvent};
use owo_colors::OwoColorize;

pub fn run(flags: &str, path: &str, id: u64, mark_self: bool, json: bool) -> Result<()> {
    let bits = parse_flags(flags)?;
    let mut create = CreateFlags::USE_CF_TYPES;
    if mark_self {
        create |= CreateFlags::MARK_SELF;
    }

    let raw = RawEvent::new(path, EventId(id), EventFlags::from_raw(bits));
    let events = decode(&raw, create);

    if json {
        for event in &events {
            println!("{}", serde_json::to_string(event)?);
        }
        return Ok(());
    }

    println!("{} {:#010x}", "Flags".bold(), bits);
    let names: Vec<_> = raw.flags.iter_names().map(|(name, _)| name).collect();
    if !names.is_empty() {
        println!("  {}", names.join(" | ").dimmed());
    }
    let unknown = raw.flags.unknown_bits();
    if unknown != 0 {
        println!("  {} {:#x}", "unrecognized bits".yellow(), unknown);
    }

    println!();
    for event in &events {
        println!("  {}", output::paint(event));
    }

    Ok(())
}

/// Hex with a `0x` prefix, otherwise decimal
pub fn parse_flags(text: &str) -> Result<u32> {
    let text = text.trim();
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(&hex.replace('_', ""), 16),
        None => text.replace('_', "").parse(),
    };
    parsed.with_context(|| format!("Invalid flag value '{}'", text))
}
