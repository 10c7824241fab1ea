//! Keyboard key name to DOM `code` mapping for CDP key events.

/// Map a key name ("Enter", "a", "ArrowDown") to the DOM code CDP expects.
pub fn key_code(key: &str) -> String {
    match key {
        "Enter" | "Return" => "Enter",
        "Tab" => "Tab",
        "Escape" | "Esc" => "Escape",
        "Backspace" => "Backspace",
        "Delete" => "Delete",
        "ArrowUp" | "Up" => "ArrowUp",
        "ArrowDown" | "Down" => "ArrowDown",
        "ArrowLeft" | "Left" => "ArrowLeft",
        "ArrowRight" | "Right" => "ArrowRight",
        "Home" => "Home",
        "End" => "End",
        "PageUp" => "PageUp",
        "PageDown" => "PageDown",
        "Space" | " " => "Space",
        other => {
            if other.chars().count() == 1 && other.chars().next().unwrap().is_ascii_alphanumeric() {
                let c = other.chars().next().unwrap();
                if c.is_ascii_digit() {
                    return format!("Digit{}", c);
                }
                return format!("Key{}", c.to_ascii_uppercase());
            }
            other
        }
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_keys() {
        assert_eq!(key_code("Enter"), "Enter");
        assert_eq!(key_code("Esc"), "Escape");
        assert_eq!(key_code("Down"), "ArrowDown");
        assert_eq!(key_code(" "), "Space");
    }

    #[test]
    fn test_character_keys() {
        assert_eq!(key_code("a"), "KeyA");
        assert_eq!(key_code("Z"), "KeyZ");
        assert_eq!(key_code("7"), "Digit7");
    }

    #[test]
    fn test_unknown_passthrough() {
        assert_eq!(key_code("F5"), "F5");
    }
}
