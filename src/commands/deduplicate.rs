//! `tia deduplicate` — find and optionally remove duplicate test rows

use super::CommandContext;
use crate::dedup::{find_duplicates, remove_duplicates};
use crate::error::Result;

pub fn run_deduplicate(ctx: &CommandContext, remove: bool) -> Result<String> {
    let mut store = ctx.open_store()?;
    store.require_schema()?;

    let report = find_duplicates(&store)?;
    let mut out = String::new();
    out.push_str(&format!("Total tests:      {}\n", report.total_tests));
    out.push_str(&format!("Unique tests:     {}\n", report.unique_tests));
    out.push_str(&format!("Duplicate groups: {}\n", report.duplicate_groups));
    out.push_str(&format!("Duplicate rows:   {}\n", report.duplicate_tests));

    if report.duplicate_groups == 0 {
        out.push_str("\nNo duplicates found.\n");
        return Ok(out);
    }

    out.push('\n');
    for group in &report.groups {
        let name = if group.class_name.is_empty() {
            group.method_name.clone()
        } else {
            format!("{}.{}", group.class_name, group.method_name)
        };
        out.push_str(&format!("  {} ({})\n", name, group.normalized_path));
        for test in &group.tests {
            out.push_str(&format!("    {}  {}\n", test.test_id, test.file_path));
        }
    }

    let removal = remove_duplicates(&mut store, !remove)?;
    if remove {
        out.push_str(&format!(
            "\nRemoved {} duplicate row(s); kept {} (lowest test_id per group).\n",
            removal.removed, removal.kept
        ));
    } else {
        out.push_str(&format!(
            "\nDry run: {} row(s) would be removed. Pass --remove-duplicates to apply.\n",
            removal.removed
        ));
    }
    Ok(out)
}
