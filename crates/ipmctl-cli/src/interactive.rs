//! Interactive command session
//!
//! Lists the protocol table's commands, then reads commands one per line and
//! prints each response. `ADR` alone prompts for the address; `q` quits.

use anyhow::Result;
use std::io::{BufRead, Write};

use ipmctl_core::prelude::*;
use ipmctl_core::protocol::MAX_ADDRESS;

/// Print the command menu for `table`
pub fn print_menu(table: &ProtocolTable, out: &mut impl Write) -> Result<()> {
    writeln!(out, "Commands:")?;
    for spec in table.commands() {
        let usage = if spec.takes_argument {
            format!("{} <n>", spec.message)
        } else {
            spec.message.clone()
        };
        writeln!(out, "  {:<12} {}", usage, spec.description)?;
    }
    writeln!(out, "  {:<12} {}", "?", "Show this menu")?;
    writeln!(out, "  {:<12} {}", "q", "Quit")?;
    Ok(())
}

/// Print a response, decoding its frame when it carries one
pub fn print_response(
    table: &ProtocolTable,
    command: &Command,
    response: &Response,
    out: &mut impl Write,
) -> Result<()> {
    writeln!(out, "{} -> {:?}", command.to_line().trim_end(), response.text)?;
    if let (Some(kind), Some(data)) = (command.frame(), &response.payload) {
        let frame = table.decode(kind, data)?;
        for field in frame.defined_fields() {
            writeln!(out, "  {:<14} {:>12} {}", field.name, field.value, field.unit)?;
        }
    }
    Ok(())
}

/// Run commands read from `input` until `q` or end of input.
///
/// Protocol errors are printed and the session goes on; a broken link ends it.
pub fn run_session(
    controller: &mut DeviceController,
    mut input: impl BufRead,
    mut out: impl Write,
) -> Result<()> {
    print_menu(controller.table(), &mut out)?;

    loop {
        let Some(line) = prompt(&mut input, &mut out, "> ")? else {
            return Ok(());
        };
        let token = line.trim();
        match token {
            "" => continue,
            "q" | "Q" => return Ok(()),
            "?" => {
                print_menu(controller.table(), &mut out)?;
                continue;
            }
            _ => {}
        }

        let token = if token == "ADR" {
            let label = format!("Address (0-{}): ", MAX_ADDRESS);
            let Some(address) = prompt(&mut input, &mut out, &label)? else {
                return Ok(());
            };
            format!("ADR {}", address.trim())
        } else {
            token.to_string()
        };

        let command = match Command::parse(&token) {
            Ok(command) => command,
            Err(e) => {
                writeln!(out, "{}", e)?;
                continue;
            }
        };
        match controller.execute(&command) {
            Ok(response) => print_response(controller.table(), &command, &response, &mut out)?,
            Err(e) if e.is_link_failure() => return Err(e.into()),
            Err(e) => writeln!(out, "{}", e)?,
        }
    }
}

/// Show `label` and read one line; `None` at end of input
fn prompt(input: &mut impl BufRead, out: &mut impl Write, label: &str) -> Result<Option<String>> {
    write!(out, "{}", label)?;
    out.flush()?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line))
}
