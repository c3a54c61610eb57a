//! `docket citations`: offline citation tools.

use anyhow::Result;

use docket::citations::{CitationKind, extract_citations};

use super::super::CitationsCommands;
use super::{print_json, read_input};

pub fn cmd_citations(command: CitationsCommands, json: bool) -> Result<()> {
    match command {
        CitationsCommands::Extract { file } => {
            let text = read_input(file.as_deref())?;
            let citations = extract_citations(&text);

            if json {
                return print_json(&citations);
            }
            if citations.is_empty() {
                println!("No citations found.");
                return Ok(());
            }
            for c in &citations {
                let mut line = format!("{:>3}. {:<10} {}", c.index, c.kind.as_str(), c.raw);
                if let Some(name) = c.case_name() {
                    line.push_str(&format!("  [{}]", name));
                }
                if let Some(antecedent) = c.antecedent {
                    line.push_str(&format!("  -> {}", antecedent));
                }
                println!("{}", line);
            }
            let full = citations.iter().filter(|c| c.kind == CitationKind::FullCase).count();
            let statutes = citations.iter().filter(|c| c.kind == CitationKind::Statute).count();
            println!();
            println!(
                "{} citations: {} full case, {} statutory, {} short form",
                citations.len(),
                full,
                statutes,
                citations.len() - full - statutes
            );
        }
    }
    Ok(())
}
