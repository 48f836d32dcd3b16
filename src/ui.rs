use colored::Colorize;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Format a tag list for display, `-` when empty.
pub fn tag_list(tags: &[String]) -> String {
    if tags.is_empty() {
        "-".to_string()
    } else {
        tags.join(", ")
    }
}

/// Format a yes/no flag.
pub fn yes_no(value: bool) -> colored::ColoredString {
    if value { "yes".green() } else { "no".dimmed() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_list() {
        assert_eq!(tag_list(&[]), "-");
        assert_eq!(
            tag_list(&["management".to_string(), "monitoring".to_string()]),
            "management, monitoring"
        );
    }
}
