/// Parse a boolean flag from a string value, or return the given default value otherwise.
///
/// This is used for environment flags as well as checkbox cells, which spreadsheet clients export as
/// `TRUE`/`FALSE` text.
pub fn parse_boolean_flag(value: Option<String>, default: bool) -> bool {
    let value = match value {
        Some(v) => v,
        None => return default,
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "x" | "✓" => true,
        "0" | "false" | "no" | "off" | "" => false,
        _ => default,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn flags() {
        assert!(parse_boolean_flag(Some("TRUE".into()), false));
        assert!(parse_boolean_flag(Some(" yes ".into()), false));
        assert!(!parse_boolean_flag(Some("False".into()), true));
        assert!(!parse_boolean_flag(Some("".into()), true));
        assert!(parse_boolean_flag(Some("maybe".into()), true));
        assert!(!parse_boolean_flag(None, false));
    }
}
