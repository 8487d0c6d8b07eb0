/// Fragment highlighter over stored field text.
///
/// Matches are located by case-insensitive scan of the stored value, so
/// no offsets need to live in the index. Fragments are built around the
/// matches and matched spans wrapped in pre/post tags, user-provided or
/// the default colored ones; tags cycle per distinct term.

/// Default highlight colors, cycled per term.
pub const DEFAULT_HIGHLIGHT_COLORS: [&str; 12] = [
    "yellow",
    "lawngreen",
    "aquamarine",
    "magenta",
    "palegreen",
    "coral",
    "wheat",
    "khaki",
    "lime",
    "deepskyblue",
    "deeppink",
    "salmon",
];

pub fn default_pre_tag(term_index: usize) -> String {
    let color = DEFAULT_HIGHLIGHT_COLORS[term_index % DEFAULT_HIGHLIGHT_COLORS.len()];
    format!("<b style=\"background:{color}\">")
}

pub fn default_post_tag() -> String {
    "</b>".to_string()
}

#[derive(Debug, Clone, Copy)]
struct Match {
    start: usize,
    end: usize,
    term_index: usize,
}

fn find_matches(text: &str, terms: &[String]) -> Vec<Match> {
    let lowered = text.to_lowercase();
    // lowercasing can shift byte offsets for some scripts; offsets are
    // only trustworthy when the lengths agree
    if lowered.len() != text.len() {
        return Vec::new();
    }
    let mut matches = Vec::new();
    for (term_index, term) in terms.iter().enumerate() {
        let needle = term.to_lowercase();
        if needle.is_empty() {
            continue;
        }
        let mut from = 0;
        while let Some(found) = lowered[from..].find(&needle) {
            let start = from + found;
            let end = start + needle.len();
            if text.is_char_boundary(start) && text.is_char_boundary(end) {
                matches.push(Match { start, end, term_index });
            }
            from = end;
        }
    }
    matches.sort_by_key(|candidate| (candidate.start, candidate.end));
    // drop overlaps, first match wins
    let mut kept: Vec<Match> = Vec::with_capacity(matches.len());
    for candidate in matches {
        if kept.last().map(|last| candidate.start >= last.end).unwrap_or(true) {
            kept.push(candidate);
        }
    }
    kept
}

fn resolve_tags(
    pre_tags: &[String],
    post_tags: &[String],
    term_index: usize,
) -> (String, String) {
    let pre = if pre_tags.is_empty() {
        default_pre_tag(term_index)
    } else {
        pre_tags[term_index % pre_tags.len()].clone()
    };
    let post = if post_tags.is_empty() {
        default_post_tag()
    } else {
        post_tags[term_index % post_tags.len()].clone()
    };
    (pre, post)
}

fn char_floor(text: &str, mut at: usize) -> usize {
    while at > 0 && !text.is_char_boundary(at) {
        at -= 1;
    }
    at
}

fn char_ceil(text: &str, mut at: usize) -> usize {
    while at < text.len() && !text.is_char_boundary(at) {
        at += 1;
    }
    at
}

/// Builds up to `fragment_count` highlighted fragments of roughly
/// `fragment_length` characters each. Returns an empty list when no
/// term occurs in the text.
pub fn build_fragments(
    text: &str,
    terms: &[String],
    pre_tags: &[String],
    post_tags: &[String],
    fragment_length: usize,
    fragment_count: usize,
) -> Vec<String> {
    let matches = find_matches(text, terms);
    if matches.is_empty() || fragment_count == 0 {
        return Vec::new();
    }
    let fragment_length = fragment_length.max(8);

    let mut fragments = Vec::new();
    let mut match_cursor = 0;
    while match_cursor < matches.len() && fragments.len() < fragment_count {
        let anchor = matches[match_cursor];
        let context = fragment_length.saturating_sub(anchor.end - anchor.start) / 2;
        let fragment_start = char_floor(text, anchor.start.saturating_sub(context));
        let fragment_end = char_ceil(text, (fragment_start + fragment_length).min(text.len()));

        // every match inside the window gets wrapped
        let mut rendered = String::new();
        let mut cursor = fragment_start;
        while match_cursor < matches.len() && matches[match_cursor].start < fragment_end {
            let current = matches[match_cursor];
            if current.end > fragment_end {
                break;
            }
            rendered.push_str(&text[cursor..current.start]);
            let (pre, post) = resolve_tags(pre_tags, post_tags, current.term_index);
            rendered.push_str(&pre);
            rendered.push_str(&text[current.start..current.end]);
            rendered.push_str(&post);
            cursor = current.end;
            match_cursor += 1;
        }
        rendered.push_str(&text[cursor..fragment_end]);
        fragments.push(rendered);
    }
    fragments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(list: &[&str]) -> Vec<String> {
        list.iter().map(|term| term.to_string()).collect()
    }

    #[test]
    fn test_single_match_is_wrapped_with_default_tags() {
        let fragments =
            build_fragments("red apples are sweet", &terms(&["apples"]), &[], &[], 100, 1);
        assert_eq!(fragments.len(), 1);
        assert!(fragments[0].contains("<b style=\"background:yellow\">apples</b>"));
        assert!(fragments[0].starts_with("red "));
    }

    #[test]
    fn test_user_tags_override_defaults() {
        let fragments = build_fragments(
            "red apples",
            &terms(&["apples"]),
            &["<em>".to_string()],
            &["</em>".to_string()],
            100,
            1,
        );
        assert_eq!(fragments, vec!["red <em>apples</em>".to_string()]);
    }

    #[test]
    fn test_no_match_yields_no_fragments() {
        assert!(build_fragments("red apples", &terms(&["pears"]), &[], &[], 100, 3).is_empty());
    }

    #[test]
    fn test_case_insensitive_matching() {
        let fragments = build_fragments("Red APPLES", &terms(&["apples"]), &[], &[], 100, 1);
        assert_eq!(fragments.len(), 1);
        assert!(fragments[0].contains("APPLES"));
    }

    #[test]
    fn test_fragment_count_limits_output() {
        let text = "apples one apples two apples three".to_string();
        let fragments = build_fragments(&text, &terms(&["apples"]), &[], &[], 12, 2);
        assert!(fragments.len() <= 2);
        assert!(!fragments.is_empty());
    }
}
