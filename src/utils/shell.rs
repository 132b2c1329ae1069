//! Shell quoting for display.
//!
//! Nothing in this crate hands a string to a shell. These helpers only render
//! argument vectors so a user can copy a step's command line into a terminal.

/// Escape a value for use inside single quotes.
/// Replaces `'` with `'\''` (end quote, escaped quote, start quote).
pub fn escape_single_quote_content(value: &str) -> String {
    value.replace('\'', "'\\''")
}

/// Quote a single argument.
/// - Empty strings become `''`
/// - Strings with shell metacharacters are wrapped in single quotes
/// - Embedded single quotes are escaped
pub fn quote_arg(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_string();
    }

    const SHELL_META: &[char] = &[
        ' ', '\t', '\n', '\'', '"', '\\', '$', '`', '!', '*', '?', '[', ']', '(', ')', '{', '}',
        '<', '>', '|', '&', ';', '#', '~',
    ];

    if !arg.contains(SHELL_META) {
        return arg.to_string();
    }

    format!("'{}'", escape_single_quote_content(arg))
}

/// Quote and join multiple arguments.
pub fn quote_args(args: &[String]) -> String {
    args.iter()
        .map(|a| quote_arg(a))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_args_are_untouched() {
        assert_eq!(quote_arg("--win64"), "--win64");
    }

    #[test]
    fn empty_arg_is_quoted() {
        assert_eq!(quote_arg(""), "''");
    }

    #[test]
    fn embedded_quote_is_escaped() {
        assert_eq!(quote_arg("it's"), "'it'\\''s'");
    }

    #[test]
    fn placeholders_are_quoted() {
        assert_eq!(
            quote_args(&["{{outputs.a}}".to_string(), "x".to_string()]),
            "'{{outputs.a}}' x"
        );
    }
}
