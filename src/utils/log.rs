// src/utils/log.rs

//! Server-style log blocks layered on the `log` facade.
//!
//! Single events use the `log` macros directly with a bracketed tag
//! (`[FETCH]`, `[SKIP]`, ...). These helpers format multi-line blocks.

/// Width of header borders.
const WIDTH: usize = 60;

/// Log a header
pub fn header(title: &str) {
    let border = "═".repeat(WIDTH);
    log::info!("{}", border);
    log::info!("  {}", title);
    log::info!("{}", border);
}

/// Log a separator line
pub fn separator() {
    log::info!("{}", "─".repeat(WIDTH));
}

/// Log a titled block of aligned `label: value` rows.
pub fn summary(title: &str, rows: &[(&str, String)]) {
    let width = rows.iter().map(|(label, _)| label.len()).max().unwrap_or(0);
    separator();
    log::info!("{}", title);
    for (label, value) in rows {
        log::info!("    {:<width$} : {}", label, value, width = width);
    }
    separator();
}
