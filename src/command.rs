pub struct CommandMatch<'a> {
    /// 指令名之后的剩余文本（已去除两端空白）
    pub args: &'a str,
}

impl<'a> CommandMatch<'a> {
    /// 按空白切分参数
    pub fn words(&self) -> impl Iterator<Item = &'a str> {
        self.args.split_whitespace()
    }

    /// 按 `|` 切分的位置参数，空段视为缺省
    pub fn fields(&self) -> Vec<Option<&'a str>> {
        if self.args.is_empty() {
            return Vec::new();
        }
        self.args
            .split('|')
            .map(str::trim)
            .map(|s| (!s.is_empty()).then_some(s))
            .collect()
    }
}

/// 解析指令：匹配 [Prefix][Command]，指令名后必须是结尾或空白
pub fn match_command<'a>(
    text: &'a str,
    prefixes: &[String],
    command_name: &str,
) -> Option<CommandMatch<'a>> {
    let trimmed = text.trim_start();

    for prefix in prefixes {
        let Some(rest) = trimmed
            .strip_prefix(prefix.as_str())
            .and_then(|r| r.strip_prefix(command_name))
        else {
            continue;
        };
        // 避免 "/start" 误匹配 "/startround"
        if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
            continue;
        }
        return Some(CommandMatch { args: rest.trim() });
    }

    None
}

/// 文本是否以任一指令前缀开头
pub fn is_command(text: &str, prefixes: &[String]) -> bool {
    let trimmed = text.trim_start();
    prefixes
        .iter()
        .any(|p| !p.is_empty() && trimmed.starts_with(p.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefixes() -> Vec<String> {
        vec!["/".to_string(), "#".to_string()]
    }

    #[test]
    fn matches_prefix_and_name() {
        let m = match_command("/status", &prefixes(), "status").unwrap();
        assert_eq!(m.args, "");
        let m = match_command("  #cost 3 ", &prefixes(), "cost").unwrap();
        assert_eq!(m.args, "3");
        assert_eq!(m.words().collect::<Vec<_>>(), vec!["3"]);
    }

    #[test]
    fn requires_word_boundary_after_name() {
        assert!(match_command("/startround", &prefixes(), "start").is_none());
        assert!(match_command("/startround", &prefixes(), "startround").is_some());
        assert!(match_command("status", &prefixes(), "status").is_none());
        assert!(match_command("!status", &prefixes(), "status").is_none());
    }

    #[test]
    fn splits_pipe_fields() {
        let m = match_command("/newgame 100 | Acme | | bye", &prefixes(), "newgame").unwrap();
        assert_eq!(m.fields(), vec![Some("100"), Some("Acme"), None, Some("bye")]);

        let m = match_command("/newgame", &prefixes(), "newgame").unwrap();
        assert!(m.fields().is_empty());
    }

    #[test]
    fn detects_command_prefix() {
        assert!(is_command("/anything", &prefixes()));
        assert!(!is_command("42", &prefixes()));
    }
}
