// =============================================================================
// Scheduler — strictly sequential analysis cycles with a session lifecycle
// =============================================================================
//
// One long-lived loop: snapshot → prompt → LLM → normalize → gate → execute →
// sweep, then sleep `analysis_interval`. At most one cycle is ever in flight;
// the shutdown signal is honoured between cycles so an in-flight execute is
// never interrupted with protective orders half-placed. Nothing a cycle does
// can crash the loop — unexpected errors are recorded as internal failures
// and the next cycle runs on schedule.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::audit::AuditLog;
use crate::binance::BinanceFuturesClient;
use crate::config::BotConfig;
use crate::decision::{normalize_decisions, Decision, NormalizerConfig};
use crate::error::BotError;
use crate::executor::{ExecutionOutcome, ExecutorSettings, OrderExecutor};
use crate::llm::prompt::{self, SessionContext};
use crate::llm::{parse_analysis, LlmClient};
use crate::llm::thinking::extract_thinking;
use crate::market_data::snapshot::SnapshotAssembler;
use crate::reconcile;
use crate::safety;
use crate::state::{BotState, CycleSummary};

pub struct TradingScheduler {
    config: BotConfig,
    client: Arc<BinanceFuturesClient>,
    llm: LlmClient,
    assembler: SnapshotAssembler,
    executor: OrderExecutor,
    audit: Arc<AuditLog>,
    state: Arc<BotState>,
    dry_run: bool,
}

impl TradingScheduler {
    pub fn new(
        config: BotConfig,
        client: Arc<BinanceFuturesClient>,
        audit: Arc<AuditLog>,
        state: Arc<BotState>,
        dry_run: bool,
    ) -> Self {
        let llm = LlmClient::new(&config.apis.llm);

        let assembler = SnapshotAssembler::new(
            client.clone(),
            config.trading.symbols.clone(),
            config.trading.timeframes.clone(),
            config.runtime.snapshot_concurrency,
            Duration::from_secs(config.runtime.snapshot_deadline),
        );

        let executor = OrderExecutor::new(
            client.clone(),
            audit.clone(),
            ExecutorSettings {
                real_trading_enabled: config.trading.safety.real_trading_enabled,
                dry_run,
                min_notional_usdt: config.trading.order_settings.min_notional_usdt,
                max_wait_time: Duration::from_secs(
                    config.trading.order_settings.limit_order.max_wait_time,
                ),
            },
        );

        Self { config, client, llm, assembler, executor, audit, state, dry_run }
    }

    // -------------------------------------------------------------------------
    // Main loop
    // -------------------------------------------------------------------------

    /// Run cycles until `max_runtime` elapses or the shutdown signal fires.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let interval = Duration::from_secs(self.config.runtime.analysis_interval);
        let max_runtime = self.config.runtime.max_runtime;

        info!(
            interval_secs = interval.as_secs(),
            max_runtime_secs = max_runtime,
            dry_run = self.dry_run,
            "scheduler started"
        );

        loop {
            if *shutdown.borrow() {
                info!("shutdown requested — stopping before next cycle");
                break;
            }
            if self.state.elapsed_secs() >= max_runtime {
                info!(elapsed_secs = self.state.elapsed_secs(), "max runtime reached — stopping");
                break;
            }

            let cycle = self.state.next_call();
            let summary = self.run_cycle(cycle).await;

            info!(
                cycle,
                decisions = summary.decisions,
                executed = summary.executed,
                failed = summary.failed,
                partial = summary.partial_snapshot,
                duration_secs = summary.duration_secs,
                "cycle complete"
            );

            // Sleep until the next cycle, but wake immediately on shutdown.
            // The select only ever wraps the sleep — a cycle in flight above
            // always runs to completion.
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    match changed {
                        Ok(()) if *shutdown.borrow() => {
                            info!("shutdown requested during inter-cycle sleep");
                            break;
                        }
                        Ok(()) => {}
                        // Sender gone: no signal can ever arrive, keep the cadence.
                        Err(_) => tokio::time::sleep(interval).await,
                    }
                }
            }
        }

        self.state.stop();
        info!(cycles = self.state.call_count(), "scheduler stopped");
    }

    // -------------------------------------------------------------------------
    // One cycle
    // -------------------------------------------------------------------------

    async fn run_cycle(&self, cycle: u64) -> CycleSummary {
        let started = std::time::Instant::now();
        let mut summary = CycleSummary {
            cycle,
            finished_at: Utc::now(),
            decisions: 0,
            executable: 0,
            executed: 0,
            failed: 0,
            partial_snapshot: false,
            duration_secs: 0.0,
        };

        // ── Snapshot ──────────────────────────────────────────────────────
        let snapshot = self.assembler.assemble().await;
        summary.partial_snapshot = snapshot.partial;

        // ── Prompts ───────────────────────────────────────────────────────
        let session = SessionContext {
            elapsed_minutes: self.state.elapsed_secs() / 60,
            call_count: cycle,
            strategy: self.state.session_info().strategy,
        };
        let system_prompt = prompt::build_system_prompt();
        let user_prompt = prompt::build_user_prompt(
            &snapshot,
            &self.config.trading.symbols,
            &self.config.trading.timeframes,
            &session,
        );
        self.audit.log_ai_input(
            &format!("cycle={cycle} {}", session.describe()),
            &system_prompt,
            &user_prompt,
        );

        // ── LLM call ──────────────────────────────────────────────────────
        let llm_started = std::time::Instant::now();
        let response = match self.llm.analyze(&system_prompt, &user_prompt).await {
            Ok(r) => r,
            Err(e) => {
                warn!(cycle, error = %e, "reasoning call failed — zero decisions this cycle");
                self.audit.log_ai_output(
                    "",
                    "no decisions (reasoning endpoint failed)",
                    llm_started.elapsed().as_secs_f64(),
                    Some(&e.to_string()),
                );
                return self.finish_cycle(summary, started, Vec::new(), Vec::new(), &snapshot).await;
            }
        };
        let processing_secs = llm_started.elapsed().as_secs_f64();

        // ── Parse + normalize ─────────────────────────────────────────────
        let analysis = parse_analysis(&response.content);

        let normalizer_cfg = NormalizerConfig {
            default_leverage: self.config.trading.futures.default_leverage,
            stop_loss_percent: self.config.trading.position_management.stop_loss_percent,
            take_profit_percent: self.config.trading.position_management.take_profit_percent,
            min_confidence: self.config.trading.safety.min_confidence,
            default_order_type: self.config.trading.order_settings.default_order_type.clone(),
        };
        let decisions = normalize_decisions(
            &analysis,
            &snapshot,
            &self.config.trading.symbols,
            &normalizer_cfg,
        );
        summary.decisions = decisions.len();
        summary.executable = decisions.iter().filter(|d| d.should_execute).count();

        let raw_body = serde_json::to_string_pretty(&response.raw)
            .unwrap_or_else(|_| response.content.clone());
        self.audit.log_ai_output(
            &raw_body,
            &decision_digest(&decisions, &analysis),
            processing_secs,
            analysis.error.as_deref(),
        );

        if let Some(thinking) = extract_thinking(&response.content) {
            self.audit.log_thinking(
                &session.describe(),
                &prompt::market_summary(&snapshot, &self.config.trading.symbols),
                &thinking,
                &final_decision_line(&decisions, &analysis),
            );
        }

        // ── Gate + execute, in decision order ─────────────────────────────
        let mut outcomes = Vec::new();
        for decision in decisions.iter().filter(|d| d.should_execute) {
            let outcome = self.gate_and_execute(decision, &snapshot).await;
            if outcome.success {
                summary.executed += 1;
            } else {
                summary.failed += 1;
            }
            self.audit
                .log_history(&format!("order {}", outcome.symbol), &outcome.describe());
            outcomes.push(outcome);
        }

        self.finish_cycle(summary, started, decisions, outcomes, &snapshot).await
    }

    /// Safety gate for open-like actions, then the executor.
    async fn gate_and_execute(
        &self,
        decision: &Decision,
        snapshot: &crate::market_data::MarketSnapshot,
    ) -> ExecutionOutcome {
        if decision.action.is_open_like() {
            let sym = snapshot.symbol(&decision.symbol);
            let verdict = safety::pre_trade_check(
                decision,
                snapshot.account.as_ref(),
                sym.and_then(|s| s.ticker.as_ref()),
                sym.and_then(|s| s.depth.as_ref()),
                &self.config.trading.safety.pre_trade_checks,
            );
            if !verdict.passed {
                warn!(symbol = %decision.symbol, reason = %verdict.reason, "safety gate rejected decision");
                self.audit.alarm(&format!(
                    "safety gate rejected {} {}: {}",
                    decision.symbol, decision.action, verdict.reason
                ));
                let err = BotError::SafetyRejected(verdict.reason);
                return ExecutionOutcome {
                    symbol: decision.symbol.clone(),
                    action: decision.action,
                    side: decision.action.order_side(),
                    success: false,
                    dry_run: self.dry_run,
                    order_id: None,
                    sim_order_id: None,
                    fill_price: None,
                    quantity: None,
                    error: Some(err.to_string()),
                    error_kind: Some(err.kind()),
                    timestamp: Utc::now(),
                };
            }
        }

        self.executor.execute(decision).await
    }

    /// End-of-cycle bookkeeping: orphan sweep, advisory state, history line.
    async fn finish_cycle(
        &self,
        mut summary: CycleSummary,
        started: std::time::Instant,
        decisions: Vec<Decision>,
        outcomes: Vec<ExecutionOutcome>,
        snapshot: &crate::market_data::MarketSnapshot,
    ) -> CycleSummary {
        // Orphan sweep only touches the live exchange.
        if !self.dry_run {
            match reconcile::sweep_orphan_protections(&self.client).await {
                Ok(result) if result.orphans_found > 0 => {
                    self.audit.log_history(
                        "orphan sweep",
                        &format!(
                            "found={} cancelled={}",
                            result.orphans_found, result.orphans_cancelled
                        ),
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "orphan sweep failed");
                    self.audit.alarm(&format!("orphan sweep failed: {e}"));
                }
            }
        }

        summary.duration_secs = started.elapsed().as_secs_f64();
        summary.finished_at = Utc::now();

        self.audit.log_history(
            &format!("cycle {}", summary.cycle),
            &format!(
                "decisions={} executable={} executed={} failed={} partial_snapshot={} duration={:.1}s",
                summary.decisions,
                summary.executable,
                summary.executed,
                summary.failed,
                summary.partial_snapshot,
                summary.duration_secs,
            ),
        );

        self.state.record_cycle(
            summary.clone(),
            decisions,
            outcomes,
            snapshot.positions.clone(),
        );
        summary
    }
}

// ---------------------------------------------------------------------------
// Digest helpers
// ---------------------------------------------------------------------------

fn decision_digest(decisions: &[Decision], analysis: &crate::llm::Analysis) -> String {
    let mut out = format!("analysis_quality={}", analysis.analysis_quality);
    if analysis.analysis_quality != "full" {
        out.push_str(&format!(
            " (raw content preserved, {} chars)",
            analysis.raw_content.chars().count()
        ));
    }

    if decisions.is_empty() {
        out.push_str("\nno decisions");
    } else {
        for d in decisions {
            out.push_str(&format!(
                "\n{} {} {}x confidence={:.0}% execute={} risk={:.1}",
                d.symbol,
                d.action,
                d.leverage,
                d.confidence,
                d.should_execute,
                d.risk_assessment.total_risk_score,
            ));
        }
    }

    if !analysis.risk_warnings.is_empty() {
        out.push_str(&format!("\nrisk warnings: {}", analysis.risk_warnings.join("; ")));
    }
    if !analysis.market_catalysts.is_empty() {
        out.push_str(&format!("\nmarket catalysts: {}", analysis.market_catalysts.join("; ")));
    }
    out
}

fn final_decision_line(decisions: &[Decision], analysis: &crate::llm::Analysis) -> String {
    let overview = format!(
        "sentiment={} phase={}",
        analysis.overall_sentiment(),
        analysis.market_phase()
    );
    let executable: Vec<String> = decisions
        .iter()
        .filter(|d| d.should_execute)
        .map(|d| format!("{} {} {}x ({:.0}%)", d.symbol, d.action, d.leverage, d.confidence))
        .collect();
    if executable.is_empty() {
        format!("{overview}; no executable decisions")
    } else {
        format!("{overview}; {}", executable.join(" | "))
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::{assess_risk, EntryType, FundingImpact, TradeAction};

    fn decision(action: TradeAction, should_execute: bool) -> Decision {
        Decision {
            symbol: "BTCUSDT".into(),
            action,
            confidence: 80.0,
            leverage: 5,
            entry_type: EntryType::Market,
            entry_price: None,
            usdt_amount: Some(100.0),
            reduce_percent: None,
            reduce_usdt: None,
            close_percent: None,
            stop_loss_price: None,
            take_profit_prices: Vec::new(),
            current_price: 30000.0,
            funding_rate_pct: 0.0,
            funding_impact: FundingImpact::Neutral,
            risk_assessment: assess_risk(5, None, 0.0, "medium"),
            risk_level: "medium".into(),
            reason: String::new(),
            risk_reward: String::new(),
            cost_benefit: serde_json::Value::Null,
            should_execute,
            timestamp: Utc::now(),
        }
    }

    fn analysis(body: &str) -> crate::llm::Analysis {
        crate::llm::parse_analysis(body)
    }

    #[test]
    fn digest_lists_each_decision() {
        let a = analysis(
            r#"{"market_overview": {}, "recommendations": [], "risk_warnings": ["funding elevated"]}"#,
        );
        let digest = decision_digest(
            &[decision(TradeAction::Long, true), decision(TradeAction::Hold, false)],
            &a,
        );
        assert!(digest.contains("analysis_quality=full"));
        assert!(digest.contains("BTCUSDT long 5x"));
        assert!(digest.contains("execute=false"));
        assert!(digest.contains("risk warnings: funding elevated"));
    }

    #[test]
    fn digest_handles_empty_cycles() {
        let a = analysis("not json at all");
        let digest = decision_digest(&[], &a);
        assert!(digest.contains("analysis_quality=error"));
        assert!(digest.contains("raw content preserved"));
        assert!(digest.contains("no decisions"));
    }

    #[test]
    fn final_line_only_counts_executable() {
        let a = analysis(
            r#"{"market_overview": {"overall_sentiment": "bullish", "market_phase": "trending"},
                "recommendations": []}"#,
        );
        let line = final_decision_line(&[decision(TradeAction::Long, false)], &a);
        assert!(line.contains("sentiment=bullish phase=trending"));
        assert!(line.contains("no executable decisions"));

        let line = final_decision_line(&[decision(TradeAction::Long, true)], &a);
        assert!(line.contains("BTCUSDT long 5x (80%)"));
    }
}
