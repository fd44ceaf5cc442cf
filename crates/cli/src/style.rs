//! Terminal styling for sync reports.

use console::Style;

fn marked(mark: &str, style: Style, msg: &str) -> String {
    format!("{} {}", style.apply_to(mark), msg)
}

/// Finished pass or in-sync model.
pub fn success(msg: &str) -> String {
    marked("✓", Style::new().green().bold(), msg)
}

pub fn error(msg: &str) -> String {
    marked("✗", Style::new().red().bold(), msg)
}

/// Degraded run, e.g. diff workers lost to faults.
pub fn warn(msg: &str) -> String {
    marked("!", Style::new().yellow().bold(), msg)
}

pub fn header(msg: &str) -> String {
    Style::new().bold().underlined().apply_to(msg).to_string()
}

pub fn dim(msg: &str) -> String {
    Style::new().dim().apply_to(msg).to_string()
}

/// Change-kind column in the pending-changes table.
pub fn add_label() -> String {
    Style::new().green().apply_to("add").to_string()
}

pub fn update_label() -> String {
    Style::new().cyan().apply_to("update").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_keep_their_text() {
        console::set_colors_enabled(false);
        assert_eq!(success("Sync complete"), "✓ Sync complete");
        assert_eq!(warn("1 diff worker(s) stopped"), "! 1 diff worker(s) stopped");
        assert_eq!(add_label(), "add");
    }
}
