// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Resource watchdog: per-agent token and time accounting.
//!
//! The watchdog never reaches into adapters. The driver copies every
//! event it receives into [`Watchdog::track`]; a periodic loop then
//! publishes warning events when an agent crosses 80% of a limit and
//! agent ids to terminate when a limit is breached. Warnings are
//! emitted at most once per agent per run.
//!
//! Token usage is read from the event payloads by a per-family
//! extractor chosen by agent-id prefix. Agents whose streams carry no
//! usage data simply accumulate zero tokens and are governed by the
//! time limit alone.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::protocol::{Event, EventKind, WatchdogPayload};

/// Fraction of a limit at which a warning is emitted.
const WARNING_RATIO: f64 = 0.8;

/// Immutable per-run resource ceilings.
#[derive(Debug, Clone, Copy)]
pub struct ResourceLimits {
    /// Maximum total tokens per agent; 0 disables the token ceiling.
    pub max_tokens: u64,
    /// Maximum wall-clock time per agent.
    pub max_duration: Duration,
}

/// Per-agent token and time usage.
#[derive(Debug, Clone)]
pub struct TokenCounter {
    /// The agent being counted.
    pub agent_id: String,
    /// Input tokens consumed so far.
    pub input_tokens: u64,
    /// Output tokens consumed so far.
    pub output_tokens: u64,
    /// When monitoring started.
    pub started_at: Instant,
    /// Last time an event arrived for this agent.
    pub last_activity: Instant,
}

impl TokenCounter {
    fn new(agent_id: impl Into<String>) -> Self {
        let now = Instant::now();
        Self {
            agent_id: agent_id.into(),
            input_tokens: 0,
            output_tokens: 0,
            started_at: now,
            last_activity: now,
        }
    }

    /// Input plus output tokens.
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Time since monitoring started.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Time since the last event arrived.
    pub fn idle_time(&self) -> Duration {
        self.last_activity.elapsed()
    }
}

/// Incremental token usage read from one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenDelta {
    /// Input tokens reported by the event.
    pub input: u64,
    /// Output tokens reported by the event.
    pub output: u64,
}

struct WatchState {
    counters: HashMap<String, TokenCounter>,
    warned: HashSet<String>,
    sequence: u64,
}

/// Tracks resource usage for every running agent under one lock.
pub struct Watchdog {
    limits: ResourceLimits,
    state: Mutex<WatchState>,
}

impl Watchdog {
    /// Creates a watchdog with the given limits.
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            state: Mutex::new(WatchState {
                counters: HashMap::new(),
                warned: HashSet::new(),
                sequence: 0,
            }),
        }
    }

    /// Starts monitoring an agent. Idempotent.
    pub fn monitor(&self, agent_id: &str) {
        let mut state = self.state.lock().expect("watchdog lock poisoned");
        state
            .counters
            .entry(agent_id.to_string())
            .or_insert_with(|| TokenCounter::new(agent_id));
    }

    /// Stops monitoring an agent, clearing its warning marker.
    pub fn stop(&self, agent_id: &str) {
        let mut state = self.state.lock().expect("watchdog lock poisoned");
        state.counters.remove(agent_id);
        state.warned.remove(agent_id);
    }

    /// Accounts an event against its agent.
    ///
    /// The agent is monitored on first sight; events with an empty
    /// agent id (orchestrator-originated) are ignored.
    pub fn track(&self, event: &Event) {
        if event.agent_id.is_empty() {
            return;
        }

        let delta = extract_tokens(event);
        let mut state = self.state.lock().expect("watchdog lock poisoned");
        let counter = state
            .counters
            .entry(event.agent_id.clone())
            .or_insert_with(|| TokenCounter::new(&event.agent_id));
        counter.input_tokens += delta.input;
        counter.output_tokens += delta.output;
        counter.last_activity = Instant::now();
    }

    /// A snapshot of every monitored agent's usage.
    pub fn usage(&self) -> HashMap<String, TokenCounter> {
        self.state
            .lock()
            .expect("watchdog lock poisoned")
            .counters
            .clone()
    }

    /// Returns the agents that have breached a limit.
    pub fn check_limits(&self) -> Vec<String> {
        let state = self.state.lock().expect("watchdog lock poisoned");
        let mut over: Vec<String> = state
            .counters
            .values()
            .filter(|c| self.tokens_breached(c) || c.elapsed() >= self.limits.max_duration)
            .map(|c| c.agent_id.clone())
            .collect();
        over.sort();
        over
    }

    /// Returns warning events for agents that have crossed 80% of a
    /// limit and have not been warned yet. Each warned agent is marked
    /// under the same lock, so warnings fire at most once per run.
    pub fn warning_events(&self) -> Vec<Event> {
        let mut state = self.state.lock().expect("watchdog lock poisoned");
        let mut ids: Vec<String> = state.counters.keys().cloned().collect();
        ids.sort();

        let mut events = Vec::new();
        for id in ids {
            if state.warned.contains(&id) {
                continue;
            }

            let counter = &state.counters[&id];
            let reason = if self.tokens_near_limit(counter) {
                Some(format!(
                    "approaching token limit: {} of {} tokens used",
                    counter.total_tokens(),
                    self.limits.max_tokens
                ))
            } else if self.time_near_limit(counter) {
                Some(format!(
                    "approaching time limit: {:?} of {:?} elapsed",
                    counter.elapsed(),
                    self.limits.max_duration
                ))
            } else {
                None
            };

            let Some(reason) = reason else { continue };

            let payload = WatchdogPayload {
                agent_id: id.clone(),
                reason,
                input_tokens: counter.input_tokens,
                output_tokens: counter.output_tokens,
                elapsed_ms: counter.elapsed().as_millis() as u64,
            };

            state.sequence += 1;
            let event = Event::new(EventKind::Watchdog, "", state.sequence);
            if let Ok(event) = event.with_payload(&payload) {
                events.push(event);
                state.warned.insert(id);
            }
        }

        events
    }

    /// Periodic loop: every `interval`, publishes warnings and
    /// agent ids to terminate, until the token is cancelled.
    pub async fn run_periodic(
        &self,
        cancel: CancellationToken,
        interval: Duration,
        warning_tx: mpsc::Sender<Event>,
        terminate_tx: mpsc::Sender<String>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("watchdog loop stopping");
                    return;
                }
                _ = ticker.tick() => {
                    for event in self.warning_events() {
                        if warning_tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    for agent_id in self.check_limits() {
                        if terminate_tx.send(agent_id).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }

    fn tokens_breached(&self, counter: &TokenCounter) -> bool {
        self.limits.max_tokens > 0 && counter.total_tokens() >= self.limits.max_tokens
    }

    fn tokens_near_limit(&self, counter: &TokenCounter) -> bool {
        self.limits.max_tokens > 0
            && counter.total_tokens() as f64 >= self.limits.max_tokens as f64 * WARNING_RATIO
    }

    fn time_near_limit(&self, counter: &TokenCounter) -> bool {
        counter.elapsed().as_secs_f64() >= self.limits.max_duration.as_secs_f64() * WARNING_RATIO
    }
}

/// Reads incremental token usage from an event, dispatching on the
/// agent-id prefix. Unknown agents yield zero; that is deliberate, not
/// an error.
pub fn extract_tokens(event: &Event) -> TokenDelta {
    let Some(payload) = event.payload.as_ref() else {
        return TokenDelta::default();
    };

    if event.agent_id.starts_with("claude") {
        claude_tokens(payload)
    } else if event.agent_id.starts_with("amp") {
        amp_tokens(payload)
    } else if event.agent_id.starts_with("codex") {
        codex_tokens(payload)
    } else {
        TokenDelta::default()
    }
}

/// Claude stream-json carries usage under `message.usage` on message
/// events, or a bare `usage` object on result events.
fn claude_tokens(payload: &serde_json::Value) -> TokenDelta {
    let usage = payload
        .pointer("/message/usage")
        .or_else(|| payload.get("usage"));
    usage_fields(usage, "input_tokens", "output_tokens")
}

/// Amp reports either a `usage` object or a flat `tokens_used` count,
/// which we attribute to output.
fn amp_tokens(payload: &serde_json::Value) -> TokenDelta {
    let delta = usage_fields(payload.get("usage"), "input_tokens", "output_tokens");
    if delta != TokenDelta::default() {
        return delta;
    }
    TokenDelta {
        input: 0,
        output: payload
            .get("tokens_used")
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
    }
}

/// Codex follows the OpenAI convention of `prompt_tokens` and
/// `completion_tokens` under `usage`.
fn codex_tokens(payload: &serde_json::Value) -> TokenDelta {
    usage_fields(payload.get("usage"), "prompt_tokens", "completion_tokens")
}

fn usage_fields(usage: Option<&serde_json::Value>, input_key: &str, output_key: &str) -> TokenDelta {
    let Some(usage) = usage else {
        return TokenDelta::default();
    };
    TokenDelta {
        input: usage.get(input_key).and_then(|v| v.as_u64()).unwrap_or(0),
        output: usage.get(output_key).and_then(|v| v.as_u64()).unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(max_tokens: u64, max_duration: Duration) -> ResourceLimits {
        ResourceLimits {
            max_tokens,
            max_duration,
        }
    }

    fn claude_event(agent_id: &str, seq: u64, output_tokens: u64) -> Event {
        Event::new(EventKind::Action, agent_id, seq)
            .with_payload(&serde_json::json!({
                "action_type": "file_edit",
                "usage": { "input_tokens": 0, "output_tokens": output_tokens }
            }))
            .unwrap()
    }

    #[test]
    fn test_monitor_is_idempotent() {
        let watchdog = Watchdog::new(limits(1000, Duration::from_secs(300)));
        watchdog.monitor("claude-1");
        watchdog.track(&claude_event("claude-1", 1, 10));
        watchdog.monitor("claude-1");

        let usage = watchdog.usage();
        assert_eq!(usage.len(), 1);
        assert_eq!(usage["claude-1"].total_tokens(), 10);
    }

    #[test]
    fn test_track_auto_monitors() {
        let watchdog = Watchdog::new(limits(1000, Duration::from_secs(300)));
        watchdog.track(&claude_event("claude-1", 1, 25));

        let usage = watchdog.usage();
        assert!(usage.contains_key("claude-1"));
        assert_eq!(usage["claude-1"].output_tokens, 25);
    }

    #[test]
    fn test_track_ignores_orchestrator_events() {
        let watchdog = Watchdog::new(limits(1000, Duration::from_secs(300)));
        watchdog.track(&Event::new(EventKind::Cancel, "", 1));
        assert!(watchdog.usage().is_empty());
    }

    #[test]
    fn test_unknown_agents_accumulate_zero() {
        let watchdog = Watchdog::new(limits(1000, Duration::from_secs(300)));
        let event = Event::new(EventKind::Action, "mystery-agent", 1)
            .with_payload(&serde_json::json!({
                "usage": { "input_tokens": 100, "output_tokens": 100 }
            }))
            .unwrap();
        watchdog.track(&event);
        assert_eq!(watchdog.usage()["mystery-agent"].total_tokens(), 0);
    }

    #[test]
    fn test_extractor_selection_by_prefix() {
        let claude = Event::new(EventKind::Action, "claude-main", 1)
            .with_payload(&serde_json::json!({
                "message": { "usage": { "input_tokens": 3, "output_tokens": 7 } }
            }))
            .unwrap();
        assert_eq!(extract_tokens(&claude), TokenDelta { input: 3, output: 7 });

        let codex = Event::new(EventKind::Action, "codex-1", 1)
            .with_payload(&serde_json::json!({
                "usage": { "prompt_tokens": 11, "completion_tokens": 13 }
            }))
            .unwrap();
        assert_eq!(extract_tokens(&codex), TokenDelta { input: 11, output: 13 });

        let amp = Event::new(EventKind::Action, "amp-1", 1)
            .with_payload(&serde_json::json!({ "tokens_used": 42 }))
            .unwrap();
        assert_eq!(extract_tokens(&amp), TokenDelta { input: 0, output: 42 });
    }

    #[test]
    fn test_check_limits_tokens_and_time() {
        let watchdog = Watchdog::new(limits(100, Duration::from_millis(50)));

        watchdog.track(&claude_event("claude-1", 1, 150));
        let over = watchdog.check_limits();
        assert_eq!(over, vec!["claude-1"]);

        watchdog.monitor("amp-1");
        std::thread::sleep(Duration::from_millis(100));

        let over = watchdog.check_limits();
        assert_eq!(over, vec!["amp-1", "claude-1"]);
    }

    #[test]
    fn test_zero_max_tokens_disables_token_ceiling() {
        let watchdog = Watchdog::new(limits(0, Duration::from_secs(300)));
        watchdog.track(&claude_event("claude-1", 1, 1_000_000));
        assert!(watchdog.check_limits().is_empty());
        assert!(watchdog.warning_events().is_empty());
    }

    #[test]
    fn test_warning_emitted_at_most_once() {
        let watchdog = Watchdog::new(limits(100, Duration::from_secs(300)));
        watchdog.track(&claude_event("claude-1", 1, 85));

        let warnings = watchdog.warning_events();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, EventKind::Watchdog);
        assert!(warnings[0].agent_id.is_empty());
        assert_eq!(warnings[0].sequence_num, 1);

        let payload = warnings[0].watchdog_payload().unwrap();
        assert_eq!(payload.agent_id, "claude-1");
        assert_eq!(payload.output_tokens, 85);
        assert!(payload.reason.contains("token limit"));

        // No duplicate warnings, even as usage keeps growing.
        watchdog.track(&claude_event("claude-1", 2, 5));
        assert!(watchdog.warning_events().is_empty());
    }

    #[test]
    fn test_time_warning() {
        let watchdog = Watchdog::new(limits(1000, Duration::from_millis(50)));
        watchdog.monitor("amp-1");
        std::thread::sleep(Duration::from_millis(45));

        let warnings = watchdog.warning_events();
        assert_eq!(warnings.len(), 1);
        let payload = warnings[0].watchdog_payload().unwrap();
        assert!(payload.reason.contains("time limit"));
    }

    #[test]
    fn test_stop_clears_counter_and_warning_marker() {
        let watchdog = Watchdog::new(limits(100, Duration::from_secs(300)));
        watchdog.track(&claude_event("claude-1", 1, 85));
        assert_eq!(watchdog.warning_events().len(), 1);

        watchdog.stop("claude-1");
        assert!(watchdog.usage().is_empty());

        // A fresh agent under the same id warns again.
        watchdog.track(&claude_event("claude-1", 1, 90));
        assert_eq!(watchdog.warning_events().len(), 1);
    }

    #[tokio::test]
    async fn test_run_periodic_publishes_warnings_and_terminations() {
        let watchdog = std::sync::Arc::new(Watchdog::new(limits(100, Duration::from_secs(300))));
        watchdog.track(&claude_event("claude-1", 1, 150));

        let cancel = CancellationToken::new();
        let (warning_tx, mut warning_rx) = mpsc::channel(8);
        let (terminate_tx, mut terminate_rx) = mpsc::channel(8);

        let wd = std::sync::Arc::clone(&watchdog);
        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            wd.run_periodic(loop_cancel, Duration::from_millis(20), warning_tx, terminate_tx)
                .await;
        });

        let warning = tokio::time::timeout(Duration::from_secs(2), warning_rx.recv())
            .await
            .expect("warning in time")
            .expect("warning event");
        assert_eq!(warning.kind, EventKind::Watchdog);

        let agent_id = tokio::time::timeout(Duration::from_secs(2), terminate_rx.recv())
            .await
            .expect("termination in time")
            .expect("agent id");
        assert_eq!(agent_id, "claude-1");

        cancel.cancel();
        handle.await.expect("watchdog loop ends");
    }
}
