//! Terminal output formatting.

use std::collections::BTreeMap;

use anyhow::Result;
use colored::{ColoredString, Colorize};
use serde::Serialize;
use unicode_width::UnicodeWidthStr;

use overlay_core::{
    AnnotatedResource, ConfidenceTier, DeploymentResult, ImportResult, OverlayKey, OverlayRole,
    OverlayStatistics,
};

/// Print any result as pretty JSON on stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Pad a plain string to a given visual width (right-padded).
fn pad_right(s: &str, width: usize) -> String {
    let visual = UnicodeWidthStr::width(s);
    if visual >= width {
        s.to_string()
    } else {
        format!("{}{}", s, " ".repeat(width - visual))
    }
}

/// Truncate a string respecting visual width.
fn truncate_visual(s: &str, max_width: usize) -> String {
    if UnicodeWidthStr::width(s) <= max_width {
        return s.to_string();
    }
    if max_width <= 3 {
        return ".".repeat(max_width);
    }
    let mut result = String::new();
    let mut current_width = 0;
    for ch in s.chars() {
        let ch_width = unicode_width::UnicodeWidthChar::width(ch).unwrap_or(0);
        if current_width + ch_width > max_width - 2 {
            break;
        }
        result.push(ch);
        current_width += ch_width;
    }
    result.push_str("..");
    result
}

/// Fixed-width table cell.
fn cell(s: &str, width: usize) -> String {
    pad_right(&truncate_visual(s, width), width)
}

fn tier_colored(tier: ConfidenceTier, width: usize) -> ColoredString {
    let text = pad_right(tier.as_str(), width);
    match tier {
        ConfidenceTier::Exact => text.as_str().green(),
        ConfidenceTier::Fuzzy => text.as_str().yellow(),
        ConfidenceTier::Tag => text.as_str().cyan(),
        ConfidenceTier::None => text.as_str().red(),
    }
}

fn role_colored(role: Option<OverlayRole>, width: usize) -> ColoredString {
    let text = pad_right(role.map(|r| r.as_str()).unwrap_or("-"), width);
    match role {
        Some(OverlayRole::Target) => text.as_str().red(),
        Some(OverlayRole::Decoy) => text.as_str().magenta(),
        Some(OverlayRole::Infrastructure) => text.as_str().blue(),
        None => text.as_str().dimmed(),
    }
}

/// Print an import summary with per-resource mappings.
pub fn print_import_result(result: &ImportResult) {
    println!();
    println!("{:<10} {:<48} {}", "Tier", "Resource", "Detail");
    println!("{}", "─".repeat(90));
    for mapping in &result.mappings {
        println!(
            "{} {} {}",
            tier_colored(mapping.tier(), 10),
            cell(mapping.resource().address(), 48),
            mapping.reason().dimmed()
        );
    }

    println!();
    println!("{}", "Import complete:".green().bold());
    println!("  Parsed:    {}", result.parsed_count);
    println!("  Mapped:    {}", result.mapped_count);
    println!("  Annotated: {}", result.annotated_count.to_string().green());
    if result.skipped_count > 0 {
        println!("  Skipped:   {}", result.skipped_count.to_string().yellow());
    } else {
        println!("  Skipped:   {}", result.skipped_count);
    }

    if !result.warnings.is_empty() {
        println!();
        println!("{}", "Warnings".yellow().bold());
        for warning in &result.warnings {
            println!("  {} {}", "!".yellow(), warning);
        }
    }
}

/// Print a deploy summary.
pub fn print_deployment_result(key: &OverlayKey, result: &DeploymentResult) {
    let heading = match (result.success, result.dry_run) {
        (true, true) => "Plan complete:".cyan().bold(),
        (true, false) => "Deployment complete:".green().bold(),
        (false, _) => "Deployment incomplete:".red().bold(),
    };
    println!("{} {}", heading, key.to_string().dimmed());

    if result.dry_run {
        println!("  Would create: {}", result.resources_newly_created.to_string().yellow());
    } else {
        println!("  Deployed:     {}", result.resources_deployed);
        println!("  Created:      {}", result.resources_newly_created.to_string().green());
    }
    println!("  Preexisting:  {}", result.resources_preexisting);

    for warning in &result.warnings {
        println!("  {} {}", "!".yellow(), warning);
    }
    if let Some(message) = &result.error_message {
        println!("  {} {}", "✗".red(), message);
    }
}

/// Print annotated resources as a table.
pub fn print_annotations_table(resources: &[AnnotatedResource]) {
    if resources.is_empty() {
        println!("{}", "No overlay annotations found.".dimmed());
        return;
    }

    println!(
        "{} {} {} {} {}",
        cell("Exercise/Scenario", 24),
        cell("Kind", 36),
        cell("Name", 24),
        cell("Role", 15),
        "Source"
    );
    println!("{}", "─".repeat(120));

    for resource in resources {
        let a = &resource.annotation;
        println!(
            "{} {} {} {} {}",
            cell(&format!("{}/{}", a.exercise, a.scenario), 24),
            cell(&a.resource_kind, 36),
            cell(&a.resource_name, 24),
            role_colored(a.role, 15),
            a.source_location.dimmed()
        );
    }

    println!();
    println!("{} resource(s) total", resources.len());
}

fn print_counts(title: &str, counts: &BTreeMap<String, usize>) {
    if counts.is_empty() {
        return;
    }
    println!();
    println!("{}", title.bold());
    for (name, count) in counts {
        println!("  {} {}", cell(name, 48), count);
    }
}

/// Print overlay statistics for a layer.
pub fn print_statistics(layer: &str, stats: &OverlayStatistics) {
    println!(
        "{} {} {}",
        "Overlay statistics for layer".bold(),
        layer.cyan(),
        format!("({} resources)", stats.total_resources).dimmed()
    );
    print_counts("By exercise", &stats.by_exercise);
    print_counts("By scenario", &stats.by_scenario);
    print_counts("By kind", &stats.by_kind);
    print_counts("By role", &stats.by_role);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_visual() {
        assert_eq!(truncate_visual("short", 10), "short");
        assert_eq!(truncate_visual("azurerm_linux_virtual_machine.web", 12), "azurerm_li..");
        assert_eq!(truncate_visual("abcdef", 3), "...");
    }

    #[test]
    fn test_cell_is_fixed_width() {
        assert_eq!(cell("ab", 5), "ab   ");
        assert_eq!(UnicodeWidthStr::width(cell("a very long resource name", 8).as_str()), 8);
    }
}
