//! Pull an executable command out of free-form model output. Purely textual.

const FENCE: &str = "```";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractMode {
    /// The whole response is the command, possibly wrapped in one fence.
    Direct,
    /// The first non-comment line inside any fenced block.
    Scan,
}

pub fn extract(raw: &str, mode: ExtractMode) -> Option<String> {
    match mode {
        ExtractMode::Direct => extract_direct(raw),
        ExtractMode::Scan => extract_scan(raw),
    }
}

/// Multi-line bodies are returned verbatim as a single command string.
pub fn extract_direct(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.chars().all(|c| c == '`') {
        return None;
    }
    let body = if trimmed.len() >= 2 * FENCE.len()
        && trimmed.starts_with(FENCE)
        && trimmed.ends_with(FENCE)
    {
        strip_language_tag(&trimmed[FENCE.len()..trimmed.len() - FENCE.len()])
    } else {
        trimmed
    };
    let command = body.trim();
    (!command.is_empty()).then(|| command.to_string())
}

const SHELL_TAGS: &[&str] = &["bash", "sh", "shell", "zsh", "console"];

/// Drop a leading `bash`, `sh`, `shell` style annotation from a fence body.
/// A lone first line with nothing after it is content, unless it is a shell
/// tag, in which case the block is empty.
fn strip_language_tag(inner: &str) -> &str {
    match inner.split_once('\n') {
        Some((first, rest)) if is_language_tag(first) && !rest.trim().is_empty() => rest,
        Some((first, rest)) if first.trim().is_empty() => rest,
        Some((first, _)) if is_shell_tag(first) => "",
        Some(_) => inner,
        None => strip_inline_tag(inner),
    }
}

/// A single-line fence may carry its tag on the command line itself.
fn strip_inline_tag(inner: &str) -> &str {
    let inner = inner.trim_start();
    if is_shell_tag(inner) {
        return "";
    }
    match inner.split_once(char::is_whitespace) {
        Some((tag, rest)) if is_shell_tag(tag) => rest,
        _ => inner,
    }
}

fn is_shell_tag(word: &str) -> bool {
    SHELL_TAGS.contains(&word.trim())
}

fn is_language_tag(line: &str) -> bool {
    let tag = line.trim();
    !tag.is_empty()
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '+'))
}

/// An unterminated fence still counts as open, so a response cut off before
/// its closing fence yields its first line.
pub fn extract_scan(raw: &str) -> Option<String> {
    let mut inside = false;
    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with(FENCE) {
            inside = !inside;
            continue;
        }
        if inside && !trimmed.is_empty() && !trimmed.starts_with('#') {
            return Some(trimmed.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn direct_takes_plain_response() {
        assert_eq!(extract_direct("  ls -la \n").as_deref(), Some("ls -la"));
    }

    #[test]
    fn direct_strips_fence_and_tag() {
        assert_eq!(
            extract_direct("```bash\nfind . -name '*.log' -delete\n```").as_deref(),
            Some("find . -name '*.log' -delete")
        );
        assert_eq!(extract_direct("```\npwd\n```").as_deref(), Some("pwd"));
        assert_eq!(extract_direct("```sh\nls\n```").as_deref(), Some("ls"));
    }

    #[test]
    fn direct_keeps_untagged_single_line_fence() {
        assert_eq!(extract_direct("```ls\n```").as_deref(), Some("ls"));
        assert_eq!(extract_direct("```uptime```").as_deref(), Some("uptime"));
    }

    #[test]
    fn direct_tag_only_fence_is_absent() {
        assert_eq!(extract_direct("```bash\n```"), None);
        assert_eq!(extract_direct("```sh\n\n```"), None);
        assert_eq!(extract_direct("```console```"), None);
    }

    #[test]
    fn direct_strips_inline_shell_tag() {
        assert_eq!(extract_direct("```bash ls -la```").as_deref(), Some("ls -la"));
        assert_eq!(extract_direct("```sh  df -h```").as_deref(), Some("df -h"));
        assert_eq!(extract_direct("```git status```").as_deref(), Some("git status"));
    }

    #[test]
    fn direct_multiline_body_is_verbatim() {
        assert_eq!(
            extract_direct("```bash\ncd /tmp\nls\n```").as_deref(),
            Some("cd /tmp\nls")
        );
    }

    #[test]
    fn direct_empty_is_absent() {
        assert_eq!(extract_direct("   "), None);
        assert_eq!(extract_direct("```\n```"), None);
        assert_eq!(extract_direct("```"), None);
    }

    #[test]
    fn scan_returns_first_line_inside_fence() {
        let response = "The command `catt` does not exist.\n\n```bash\n# fixed\ncat file.txt\nwc -l file.txt\n```\n\n```\nhead file.txt\n```";
        assert_eq!(extract_scan(response).as_deref(), Some("cat file.txt"));
    }

    #[test]
    fn scan_ignores_text_outside_fences() {
        assert_eq!(extract_scan("Use cat file.txt instead."), None);
        assert_eq!(extract_scan("```\n\n# only a comment\n```"), None);
    }

    #[test]
    fn scan_skips_empty_block_for_later_one() {
        let response = "```\n```\nthen\n```sh\nls -l\n```";
        assert_eq!(extract_scan(response).as_deref(), Some("ls -l"));
    }

    proptest! {
        #[test]
        fn direct_unwraps_any_fenced_command(cmd in "[a-z][a-z0-9 ./|-]{0,40}") {
            let wrapped = format!("```bash\n{cmd}\n```");
            prop_assert_eq!(extract_direct(&wrapped), Some(cmd.trim().to_string()));
        }

        #[test]
        fn scan_without_fences_is_absent(text in "[^`]{0,200}") {
            prop_assert_eq!(extract_scan(&text), None);
        }

        #[test]
        fn extracted_commands_are_trimmed(text in ".{0,120}") {
            for mode in [ExtractMode::Direct, ExtractMode::Scan] {
                if let Some(cmd) = extract(&text, mode) {
                    prop_assert!(!cmd.is_empty());
                    prop_assert_eq!(cmd.trim(), cmd.as_str());
                }
            }
        }
    }
}
