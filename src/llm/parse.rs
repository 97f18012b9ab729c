// =============================================================================
// Analysis parsing — salvage structured JSON out of a free-form model reply
// =============================================================================
//
// The model is told to emit one strict JSON object, but replies arrive in
// three shapes in practice: a fenced ```json block, a bare object, or an
// object buried in prose. All three are handled. A reply missing the
// structural fields (`market_overview`, `recommendations`) degrades to
// `analysis_quality = "partial"` with the raw content preserved; anything
// unparseable degrades to an empty recommendation list with an error marker.
// Parsing NEVER returns an error to the scheduler.
// =============================================================================

use serde_json::Value;
use tracing::warn;

/// Parsed (possibly degraded) analysis result for one cycle.
#[derive(Debug, Clone)]
pub struct Analysis {
    /// `market_overview` object as delivered (empty object when absent).
    pub market_overview: Value,
    /// Raw recommendation objects; the decision normalizer owns field salvage.
    pub recommendations: Vec<Value>,
    pub risk_warnings: Vec<String>,
    pub market_catalysts: Vec<String>,
    /// "full" | "partial" | "error"
    pub analysis_quality: String,
    /// Original assistant content, preserved for the audit stream.
    pub raw_content: String,
    pub error: Option<String>,
}

impl Analysis {
    /// `market_overview.volatility_assessment`, defaulting to "medium".
    pub fn volatility_assessment(&self) -> &str {
        self.market_overview["volatility_assessment"].as_str().unwrap_or("medium")
    }

    pub fn overall_sentiment(&self) -> &str {
        self.market_overview["overall_sentiment"].as_str().unwrap_or("unknown")
    }

    pub fn market_phase(&self) -> &str {
        self.market_overview["market_phase"].as_str().unwrap_or("unknown")
    }

    fn degraded(content: &str, error: String) -> Self {
        warn!(error = %error, "LLM reply could not be parsed — zero recommendations");
        Self {
            market_overview: Value::Object(Default::default()),
            recommendations: Vec::new(),
            risk_warnings: Vec::new(),
            market_catalysts: Vec::new(),
            analysis_quality: "error".into(),
            raw_content: content.to_string(),
            error: Some(error),
        }
    }
}

/// Parse the assistant content into an `Analysis`. Total — every input maps
/// to some result.
pub fn parse_analysis(content: &str) -> Analysis {
    let json_text = match extract_json(content) {
        Some(text) => text,
        None => return Analysis::degraded(content, "no JSON object found in reply".into()),
    };

    let parsed: Value = match serde_json::from_str(&json_text) {
        Ok(v) => v,
        Err(e) => return Analysis::degraded(content, format!("JSON parse error: {e}")),
    };

    let has_overview = parsed.get("market_overview").map_or(false, |v| v.is_object());
    let has_recommendations = parsed.get("recommendations").map_or(false, |v| v.is_array());

    let quality = if has_overview && has_recommendations { "full" } else { "partial" };

    Analysis {
        market_overview: parsed
            .get("market_overview")
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default())),
        recommendations: parsed
            .get("recommendations")
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default(),
        risk_warnings: string_list(parsed.get("risk_warnings")),
        market_catalysts: string_list(parsed.get("market_catalysts")),
        analysis_quality: quality.into(),
        raw_content: content.to_string(),
        error: None,
    }
}

fn string_list(v: Option<&Value>) -> Vec<String> {
    v.and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Pull the JSON object text out of the reply: fenced block first, then a
/// bare object, then the outermost brace-balanced span inside prose.
fn extract_json(content: &str) -> Option<String> {
    if let Some(start) = content.find("```json") {
        let after = &content[start + 7..];
        let inner = match after.find("```") {
            Some(end) => &after[..end],
            None => after,
        };
        return Some(inner.trim().to_string());
    }

    let trimmed = content.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed.to_string());
    }

    // Prose with an embedded object: take the outermost balanced braces.
    let start = content.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, ch) in content[start..].char_indices() {
        if in_string {
            match ch {
                '\\' if !escaped => escaped = true,
                '"' if !escaped => in_string = false,
                _ => escaped = false,
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(content[start..start + i + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    const FULL_REPLY: &str = r#"{
        "market_overview": {
            "overall_sentiment": "bullish",
            "market_phase": "trending",
            "volatility_assessment": "high",
            "funding_rate_impact": "negative"
        },
        "recommendations": [
            {"symbol": "BTCUSDT", "action": "long", "confidence": 75}
        ],
        "risk_warnings": ["funding elevated"],
        "market_catalysts": ["ETF flows"]
    }"#;

    #[test]
    fn parses_bare_json_object() {
        let a = parse_analysis(FULL_REPLY);
        assert_eq!(a.analysis_quality, "full");
        assert_eq!(a.recommendations.len(), 1);
        assert_eq!(a.overall_sentiment(), "bullish");
        assert_eq!(a.volatility_assessment(), "high");
        assert_eq!(a.risk_warnings, vec!["funding elevated"]);
        assert!(a.error.is_none());
    }

    #[test]
    fn parses_fenced_json_block() {
        let reply = format!("Here is my analysis:\n```json\n{FULL_REPLY}\n```\nGood luck.");
        let a = parse_analysis(&reply);
        assert_eq!(a.analysis_quality, "full");
        assert_eq!(a.recommendations.len(), 1);
    }

    #[test]
    fn parses_object_embedded_in_prose() {
        let reply = format!("After careful thought {FULL_REPLY} is my conclusion.");
        let a = parse_analysis(&reply);
        assert_eq!(a.analysis_quality, "full");
        assert_eq!(a.market_phase(), "trending");
    }

    #[test]
    fn missing_structural_fields_degrade_to_partial() {
        let reply = r#"{"recommendations": [{"symbol": "ETHUSDT", "action": "hold"}]}"#;
        let a = parse_analysis(reply);
        assert_eq!(a.analysis_quality, "partial");
        assert_eq!(a.recommendations.len(), 1);
        assert!(a.raw_content.contains("ETHUSDT"));
    }

    #[test]
    fn garbage_yields_empty_recommendations_with_error_marker() {
        let a = parse_analysis("the market looks choppy, I would wait.");
        assert_eq!(a.analysis_quality, "error");
        assert!(a.recommendations.is_empty());
        assert!(a.error.is_some());
        assert_eq!(a.raw_content, "the market looks choppy, I would wait.");
    }

    #[test]
    fn truncated_json_is_an_error_not_a_panic() {
        let a = parse_analysis(r#"{"market_overview": {"overall_sentiment": "bull"#);
        assert_eq!(a.analysis_quality, "error");
        assert!(a.recommendations.is_empty());
    }

    #[test]
    fn braces_inside_strings_do_not_break_extraction() {
        let reply = r#"note {"market_overview": {"market_phase": "a}b"}, "recommendations": []} end"#;
        let a = parse_analysis(reply);
        assert_eq!(a.analysis_quality, "full");
        assert_eq!(a.market_phase(), "a}b");
    }
}
