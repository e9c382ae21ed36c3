use regex::Regex;
use std::sync::OnceLock;

static GUESS_REGEX: OnceLock<Regex> = OnceLock::new();

fn guess_regex() -> &'static Regex {
    GUESS_REGEX.get_or_init(|| Regex::new(r"\b([0-9]+)\b").expect("Invalid Regex"))
}

/// 波斯数字 (۰-۹) 与阿拉伯-印度数字 (٠-٩) 转为 ASCII
pub fn normalize_digits(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '۰'..='۹' => char::from(b'0' + (c as u32 - '۰' as u32) as u8),
            '٠'..='٩' => char::from(b'0' + (c as u32 - '٠' as u32) as u8),
            _ => c,
        })
        .collect()
}

/// 取文本中第一个独立的十进制数作为猜测
///
/// 没有数字或数字超出 i64 时返回 `None`，调用方应当把这类消息当作普通聊天忽略。
pub fn extract_guess(text: &str) -> Option<i64> {
    let normalized = normalize_digits(text.trim());
    let caps = guess_regex().captures(&normalized)?;
    caps.get(1)?.as_str().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_persian_and_arabic_digits() {
        assert_eq!(normalize_digits("۱۲۳"), "123");
        assert_eq!(normalize_digits("٤٥٦"), "456");
        assert_eq!(normalize_digits("a۷b٨c9"), "a7b8c9");
        assert_eq!(normalize_digits("hello"), "hello");
    }

    #[test]
    fn extracts_first_standalone_number() {
        assert_eq!(extract_guess("42"), Some(42));
        assert_eq!(extract_guess("  my guess is 512 "), Some(512));
        assert_eq!(extract_guess("7 or 8"), Some(7));
        assert_eq!(extract_guess("۵۰۰"), Some(500));
        assert_eq!(extract_guess("٣٣"), Some(33));
        assert_eq!(extract_guess("0042"), Some(42));
    }

    #[test]
    fn ignores_text_without_numbers() {
        assert_eq!(extract_guess(""), None);
        assert_eq!(extract_guess("hello there"), None);
        assert_eq!(extract_guess("abc123"), None);
    }

    #[test]
    fn overflowing_number_is_not_a_guess() {
        assert_eq!(extract_guess("99999999999999999999999"), None);
    }
}
