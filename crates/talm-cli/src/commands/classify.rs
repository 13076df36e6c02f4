//! Classify command - show how patch files split into config patches and extra documents

use console::style;
use std::path::PathBuf;

use talm_config::classify_files;

use crate::error::Result;

pub fn run(files: &[PathBuf], extras_only: bool) -> Result<()> {
    let classification = classify_files(files)?;

    if extras_only {
        for extra in &classification.extras {
            println!("---");
            print!("{}", extra.raw);
        }
        return Ok(());
    }

    for patch in &classification.patches {
        let sections: Vec<String> = ["machine", "cluster"]
            .iter()
            .filter(|key| patch.tree.get(**key).is_some())
            .map(|key| key.to_string())
            .collect();
        println!(
            "{}  {}  {}",
            style("patch").green(),
            patch.source,
            style(format!("({})", sections.join(", "))).dim()
        );
    }
    for extra in &classification.extras {
        let kind = if extra.kind.is_empty() {
            "<no kind>"
        } else {
            extra.kind.as_str()
        };
        println!(
            "{}  {} {}",
            style("extra").yellow(),
            kind,
            style(&extra.api_version).dim()
        );
    }

    println!();
    println!(
        "{} patch(es), {} extra document(s)",
        classification.patches.len(),
        classification.extras.len()
    );
    Ok(())
}
