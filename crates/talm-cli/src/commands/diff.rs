//! Diff command - compare two machine configs

use console::style;
use std::path::Path;

use talm_config::yamltools::{diff_yamls, unified_diff};
use talm_core::modeline::split_header;

use crate::error::{CliError, Result};

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| CliError::io(format!("{}: {}", path.display(), e)))
}

/// Print a line diff, or with `patch` a structural `$patch: delete` aware diff
///
/// Modeline headers are ignored on both sides.
pub fn run(old: &Path, new: &Path, patch: bool) -> Result<()> {
    let old_content = read(old)?;
    let new_content = read(new)?;
    let (_, old_body) = split_header(&old_content);
    let (_, new_body) = split_header(&new_content);

    if patch {
        let diff = diff_yamls(old_body, new_body)?;
        if diff.is_empty() {
            eprintln!("{}", style("no changes").dim());
        } else {
            print!("{}", String::from_utf8_lossy(&diff));
        }
        return Ok(());
    }

    let diff = unified_diff(
        old_body,
        new_body,
        &old.display().to_string(),
        &new.display().to_string(),
    );
    if diff.is_empty() {
        eprintln!("{}", style("no changes").dim());
        return Ok(());
    }

    for line in diff.lines() {
        let styled = if line.starts_with("+++") || line.starts_with("---") {
            style(line).bold()
        } else if line.starts_with("@@") {
            style(line).cyan()
        } else if line.starts_with('+') {
            style(line).green()
        } else if line.starts_with('-') {
            style(line).red()
        } else {
            style(line)
        };
        println!("{}", styled);
    }
    Ok(())
}
