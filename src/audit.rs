// =============================================================================
// Audit Logger — append-only text streams for every cycle, decision, and order
// =============================================================================
//
// Five streams live under the configured base directory:
//
//   history/input.txt   — full system + user prompts with a context header
//   history/output.txt  — raw LLM response, parsed decision set, timing
//   history/think.txt   — session info, market summary, extracted reasoning
//   history.txt         — one record per cycle and per executed order
//   alarm.txt           — single-line `ISO-timestamp — message` records
//
// Writes are open-append-close so a crash never loses earlier records. Audit
// failures are logged and swallowed; they must never take down a trading
// cycle.
// =============================================================================

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{error, info, warn};

/// Append-only audit log rooted at one base directory.
#[derive(Debug, Clone)]
pub struct AuditLog {
    history_file: PathBuf,
    input_file: PathBuf,
    output_file: PathBuf,
    think_file: PathBuf,
    alarm_file: PathBuf,
}

impl AuditLog {
    /// Create the directory layout and banner-initialise any missing files.
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base = base_dir.as_ref().to_path_buf();
        let history_dir = base.join("history");
        std::fs::create_dir_all(&history_dir)
            .with_context(|| format!("failed to create {}", history_dir.display()))?;

        let log = Self {
            history_file: base.join("history.txt"),
            input_file: history_dir.join("input.txt"),
            output_file: history_dir.join("output.txt"),
            think_file: history_dir.join("think.txt"),
            alarm_file: base.join("alarm.txt"),
        };

        log.init_banner(&log.history_file, "trade history and cycle records")?;
        log.init_banner(&log.input_file, "full prompts sent to the reasoning model")?;
        log.init_banner(&log.output_file, "raw and parsed reasoning-model output")?;
        log.init_banner(&log.think_file, "extracted model reasoning per cycle")?;

        info!(base = %base.display(), "audit streams ready");
        Ok(log)
    }

    fn init_banner(&self, path: &Path, description: &str) -> Result<()> {
        if path.exists() {
            return Ok(());
        }
        let banner = format!(
            "=== {} ===\ncreated: {}\n{}\n\n",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("audit"),
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
            description,
        );
        std::fs::write(path, banner)
            .with_context(|| format!("failed to initialise {}", path.display()))
    }

    fn append(&self, path: &Path, text: &str) {
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| f.write_all(text.as_bytes()));

        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "audit append failed");
        }
    }

    fn stamp() -> String {
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string()
    }

    // -------------------------------------------------------------------------
    // input.txt
    // -------------------------------------------------------------------------

    /// Record the exact prompts shipped to the reasoning model.
    pub fn log_ai_input(&self, context_header: &str, system_prompt: &str, user_prompt: &str) {
        let record = format!(
            "[{}] model input\n{}\n{}\n\nsystem prompt:\n{}\n{}\n\nuser prompt:\n{}\n{}\n\n{}\n\n",
            Self::stamp(),
            "=".repeat(60),
            context_header,
            "-".repeat(30),
            system_prompt,
            "-".repeat(30),
            user_prompt,
            "=".repeat(80),
        );
        self.append(&self.input_file, &record);
    }

    // -------------------------------------------------------------------------
    // output.txt
    // -------------------------------------------------------------------------

    /// Record the raw model response plus the parsed decision summary.
    pub fn log_ai_output(
        &self,
        raw_response: &str,
        parsed_summary: &str,
        processing_secs: f64,
        error: Option<&str>,
    ) {
        let mut record = format!(
            "[{}] model output\n{}\nprocessing time: {:.2} s\n",
            Self::stamp(),
            "=".repeat(60),
            processing_secs,
        );
        if let Some(err) = error {
            record.push_str(&format!("error: {err}\n"));
        }
        record.push_str(&format!(
            "\nraw response:\n{}\n{}\n\nparsed result:\n{}\n{}\n\n{}\n\n",
            "-".repeat(30),
            raw_response,
            "-".repeat(30),
            parsed_summary,
            "=".repeat(80),
        ));
        self.append(&self.output_file, &record);
    }

    // -------------------------------------------------------------------------
    // think.txt
    // -------------------------------------------------------------------------

    /// Record the extracted reasoning block alongside the session context.
    pub fn log_thinking(
        &self,
        session_info: &str,
        market_summary: &str,
        reasoning: &str,
        final_decision: &str,
    ) {
        let record = format!(
            "[{}] reasoning record\n{}\nsession: {}\nmarket: {}\n\nreasoning:\n{}\n{}\n\nfinal decision: {}\n\n{}\n\n",
            Self::stamp(),
            "=".repeat(60),
            session_info,
            market_summary,
            "-".repeat(30),
            reasoning,
            final_decision,
            "=".repeat(80),
        );
        self.append(&self.think_file, &record);
    }

    // -------------------------------------------------------------------------
    // history.txt
    // -------------------------------------------------------------------------

    /// One titled free-form record (cycle summary or order outcome).
    pub fn log_history(&self, title: &str, body: &str) {
        let record = format!(
            "[{}] {}\n{}\n{}\n\n",
            Self::stamp(),
            title,
            "-".repeat(40),
            body,
        );
        self.append(&self.history_file, &record);
    }

    // -------------------------------------------------------------------------
    // alarm.txt
    // -------------------------------------------------------------------------

    /// Urgent condition: order failure, protective-order failure, retry
    /// exhaustion. One line per alarm.
    pub fn alarm(&self, message: &str) {
        error!("[ALARM] {message}");
        self.append(
            &self.alarm_file,
            &format!("{} — {}\n", Utc::now().to_rfc3339(), message),
        );
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "orion-audit-{tag}-{}",
            uuid::Uuid::new_v4()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn creates_streams_with_banners() {
        let dir = temp_dir("init");
        let _log = AuditLog::new(&dir).unwrap();

        for file in ["history.txt", "history/input.txt", "history/output.txt", "history/think.txt"] {
            let content = std::fs::read_to_string(dir.join(file)).unwrap();
            assert!(content.starts_with("==="), "{file} missing banner");
        }
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn alarm_is_single_line_with_timestamp() {
        let dir = temp_dir("alarm");
        let log = AuditLog::new(&dir).unwrap();
        log.alarm("order placement failed for BTCUSDT");
        log.alarm("second alarm");

        let content = std::fs::read_to_string(dir.join("alarm.txt")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(" — order placement failed for BTCUSDT"));
        // line starts with an RFC3339 timestamp
        assert!(lines[0].split(" — ").next().unwrap().contains('T'));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn history_records_append() {
        let dir = temp_dir("history");
        let log = AuditLog::new(&dir).unwrap();
        log.log_history("cycle 1", "decisions=2 executed=1 failed=1");
        log.log_history("order BTCUSDT", "LONG 5x qty=0.016 order_id=42");

        let content = std::fs::read_to_string(dir.join("history.txt")).unwrap();
        assert!(content.contains("cycle 1"));
        assert!(content.contains("order BTCUSDT"));
        assert!(content.contains("order_id=42"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn banner_not_rewritten_on_reopen() {
        let dir = temp_dir("reopen");
        {
            let log = AuditLog::new(&dir).unwrap();
            log.log_history("first", "body");
        }
        // Re-opening must preserve earlier records.
        let log = AuditLog::new(&dir).unwrap();
        log.log_history("second", "body");
        let content = std::fs::read_to_string(dir.join("history.txt")).unwrap();
        assert!(content.contains("first"));
        assert!(content.contains("second"));
        assert_eq!(content.matches("=== history.txt ===").count(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }
}
