use bookstore_db::{MigrationReport, MigrationStatus, PlannedMigration};

/// Render `status` as a boxed table.
pub fn status_table(status: &[MigrationStatus]) -> String {
    let name_w = status
        .iter()
        .map(|s| s.name.len())
        .max()
        .unwrap_or(0)
        .max("name".len());
    let version_w = status
        .iter()
        .map(|s| s.version.as_str().len())
        .max()
        .unwrap_or(0)
        .max("version".len());
    let state_w = "pending".len();
    let at_w = "YYYY-MM-DD HH:MM:SS".len();

    let rule = |l: &str, m: &str, r: &str| {
        format!(
            "{l}{}{m}{}{m}{}{m}{}{r}",
            "─".repeat(version_w + 2),
            "─".repeat(name_w + 2),
            "─".repeat(state_w + 2),
            "─".repeat(at_w + 2),
        )
    };
    let row = |v: &str, n: &str, s: &str, a: &str| {
        format!("│ {v:<version_w$} │ {n:<name_w$} │ {s:<state_w$} │ {a:<at_w$} │")
    };

    let mut lines = vec![
        rule("╭", "┬", "╮"),
        row("version", "name", "status", "applied at"),
        rule("├", "┼", "┤"),
    ];
    for s in status {
        let state = if s.applied { "applied" } else { "pending" };
        let at = s
            .applied_at
            .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        lines.push(row(s.version.as_str(), &s.name, state, &at));
    }
    lines.push(rule("╰", "┴", "╯"));
    lines.join("\n")
}

pub fn print_status(status: &[MigrationStatus]) {
    if status.is_empty() {
        println!("no migrations registered");
        return;
    }
    println!("{}", status_table(status));
}

pub fn print_report(report: &MigrationReport) {
    for version in &report.applied {
        println!("applied  {version}");
    }
    for version in &report.reverted {
        println!("reverted {version}");
    }
    for version in &report.skipped {
        println!("skipped  {version} (older than latest applied)");
    }
    if report.applied.is_empty() && report.reverted.is_empty() {
        println!("nothing to do");
    }
}

pub fn print_plan(plan: &[PlannedMigration]) {
    if plan.is_empty() {
        println!("-- nothing to apply");
        return;
    }
    for step in plan {
        println!("-- {} {}", step.version, step.name);
        println!("{};", step.sql);
    }
}
