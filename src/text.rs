/// Openers models put in front of the actual analysis.
const PREAMBLE_PREFIXES: &[&str] = &[
    "好的",
    "当然",
    "可以",
    "下面开始分析",
    "以下是",
    "我将",
    "我会",
    "Sure",
    "Certainly",
    "Of course",
    "Okay",
];

/// Punctuation left dangling once an opener is cut.
const PREAMBLE_SEPARATORS: &[char] = &['：', ':', '，', ',', '。', '.', '!', '！'];

/// Strip conversational preamble ("好的，", "Sure!") from model output.
///
/// Openers are removed repeatedly so stacked ones all go. If nothing would
/// be left the input is returned unchanged.
pub fn clean_text(raw: &str) -> &str {
    let mut text = raw.trim_start();
    let mut changed = true;
    while changed {
        changed = false;
        for prefix in PREAMBLE_PREFIXES {
            if let Some(rest) = strip_prefix_ignore_case(text, prefix) {
                text = rest.trim_start_matches(|c: char| {
                    c.is_whitespace() || PREAMBLE_SEPARATORS.contains(&c)
                });
                changed = true;
            }
        }
    }
    if text.is_empty() {
        raw
    } else {
        text
    }
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    let rest = &text[prefix.len()..];
    // Latin openers must end on a word boundary ("Surely" is not "Sure").
    if prefix.is_ascii() && rest.starts_with(|c: char| c.is_alphanumeric()) {
        return None;
    }
    Some(rest)
}

/// Compact duration for status lines, e.g. `42s` or `3m 05s`.
pub fn format_elapsed(elapsed: chrono::Duration) -> String {
    let secs = elapsed.num_seconds().max(0);
    if secs < 60 {
        format!("{}s", secs)
    } else {
        format!("{}m {:02}s", secs / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_stacked_preamble() {
        assert_eq!(clean_text("好的，以下是：\n## 结论"), "## 结论");
        assert_eq!(clean_text("  Sure! Okay, # Result"), "# Result");
    }

    #[test]
    fn test_no_preamble_untouched() {
        assert_eq!(clean_text("## Findings\n- a"), "## Findings\n- a");
        assert_eq!(clean_text("Surely not"), "Surely not");
        assert_eq!(
            clean_text("Here is where the method fails"),
            "Here is where the method fails"
        );
    }

    #[test]
    fn test_only_preamble_keeps_original() {
        assert_eq!(clean_text("好的。"), "好的。");
        assert_eq!(clean_text(""), "");
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(chrono::Duration::milliseconds(42_900)), "42s");
        assert_eq!(format_elapsed(chrono::Duration::seconds(185)), "3m 05s");
    }
}
