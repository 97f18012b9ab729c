// =============================================================================
// Thinking extractor — pull the model's reasoning block out of a reply
// =============================================================================
//
// The prompt asks for a closing "Reasoning" section, but the model is not
// reliable about it (and sometimes answers in Chinese). The extractor scans
// for a known marker, cuts the section at the next heading / fence / rule,
// and caps it for the audit stream. Fallback: the last paragraph that looks
// like an argument (long enough and containing a decision word).
// =============================================================================

/// Section markers recognised at any position in the reply.
const THINKING_MARKERS: &[&str] = &[
    "思考过程",
    "分析过程",
    "Reasoning",
    "reasoning",
    "Thought process",
    "分析逻辑",
    "决策理由",
];

/// Words that make a paragraph look like an argument for the fallback path.
const DECISION_WORDS: &[&str] = &[
    "分析", "判断", "建议", "因为", "由于",
    "because", "therefore", "recommend", "analysis", "decided",
];

/// Marker-section cutoffs, searched after a small offset so the marker's own
/// heading survives.
const END_MARKERS: &[&str] = &["\n\n### ", "\n## ", "```", "\n---"];

const MAX_SECTION_CHARS: usize = 2000;
const MAX_FALLBACK_CHARS: usize = 1000;
const END_SEARCH_OFFSET: usize = 50;
const MIN_PARAGRAPH_CHARS: usize = 100;

/// Extract the reasoning block, if any.
pub fn extract_thinking(content: &str) -> Option<String> {
    for marker in THINKING_MARKERS {
        if let Some(start) = content.find(marker) {
            let mut section = &content[start..];

            // Cut at the first end marker past the heading itself.
            let offset = char_boundary(section, END_SEARCH_OFFSET);
            let mut cut = section.len();
            for end in END_MARKERS {
                if let Some(pos) = section[offset..].find(end) {
                    cut = cut.min(offset + pos);
                }
            }
            section = &section[..cut];

            return Some(truncate_chars(section.trim(), MAX_SECTION_CHARS));
        }
    }

    // Fallback: last argument-looking paragraph.
    for paragraph in content.rsplit("\n\n") {
        let trimmed = paragraph.trim();
        if trimmed.chars().count() > MIN_PARAGRAPH_CHARS
            && DECISION_WORDS.iter().any(|w| trimmed.contains(w))
        {
            return Some(truncate_chars(trimmed, MAX_FALLBACK_CHARS));
        }
    }

    None
}

/// Largest byte index ≤ `target` that is a char boundary.
fn char_boundary(s: &str, target: usize) -> usize {
    if target >= s.len() {
        return s.len();
    }
    let mut idx = target;
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
