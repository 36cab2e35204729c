// The game interpreter — a small VM over the parsed program.
//
// One trial owns one interpreter. State is the program counter, the
// journaled register file, the trial event log, and the beacon marks of
// the current round. `elicit` is the only player suspension point;
// scoring expressions suspend on the judge gateway. A failed ensure rolls
// events and register writes back to the matching beacon before the
// failed_ensure event is recorded, so the log never contains a discarded
// branch.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Result, XentError};
use crate::judge::gateway::JudgeGateway;
use crate::player::adapter::PlayerAdapter;
use crate::player::presentation::GameMetadata;
use crate::xdl::ast::{Op, Program};
use crate::xdl::eval::{eval, Env, Value};

use super::events::Event;
use super::registers::{JournalMark, RegisterFile};

/// How many times a single ensure call site may fail within one round
/// before the round is abandoned as stuck.
pub const DEFAULT_ENSURE_RETRY_CAP: u32 = 8;

/// Bookkeeping for one finished (or abandoned) round.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundRecord {
    pub index: u32,
    /// Sum of all reward totals emitted in the round.
    pub score: f64,
    /// Number of elicit_response events (moves played).
    pub arms: u32,
    /// Number of reward events (completed reward cycles).
    pub iterations: u32,
    pub stuck: bool,
}

#[derive(Debug, Clone, Copy)]
struct BeaconMark {
    events_len: usize,
    journal: JournalMark,
}

pub struct Interpreter {
    program: Arc<Program>,
    /// Map prefix bindings, reinstalled at every round entry.
    prefix: Vec<(String, String)>,
    registers: RegisterFile,
    events: Vec<Event>,
    round: u32,
    ensure_retry_cap: u32,
}

impl Interpreter {
    pub fn new(program: Arc<Program>, prefix: Vec<(String, String)>) -> Self {
        Self {
            program,
            prefix,
            registers: RegisterFile::new(),
            events: Vec::new(),
            round: 0,
            ensure_retry_cap: DEFAULT_ENSURE_RETRY_CAP,
        }
    }

    pub fn with_ensure_retry_cap(mut self, cap: u32) -> Self {
        self.ensure_retry_cap = cap;
        self
    }

    /// The trial-wide event log, program-ordered.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }

    /// Play one round. Returns its bookkeeping record; a round that
    /// exhausts an ensure retry budget comes back `stuck` and the trial
    /// may continue with the next round.
    pub async fn run_round(
        &mut self,
        judge: &JudgeGateway,
        adapter: &mut PlayerAdapter,
        metadata: &GameMetadata,
    ) -> Result<RoundRecord> {
        let round_index = self.round;
        let prefix_len = self.program.map_prefix_len();
        let body_line = self.program.ops.get(prefix_len).map_or(0, Op::line);

        self.registers
            .reset(self.prefix.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        let round_start = self.events.len();
        self.events.push(Event::RoundStarted { line_num: body_line, round_index });

        let outcome = self.exec_round(judge, adapter, metadata, prefix_len).await;
        let stuck = match outcome {
            Ok(()) => {
                let last_line = self.program.ops.last().map_or(0, Op::line);
                self.events.push(Event::RoundFinished { line_num: last_line, round_index });
                false
            }
            Err(XentError::EnsureExceeded { line }) => {
                warn!(round = round_index, line, "Round abandoned as stuck");
                true
            }
            Err(other) => return Err(other),
        };

        self.round += 1;
        Ok(self.tally(round_index, round_start, stuck))
    }

    async fn exec_round(
        &mut self,
        judge: &JudgeGateway,
        adapter: &mut PlayerAdapter,
        metadata: &GameMetadata,
        prefix_len: usize,
    ) -> Result<()> {
        // Implicit rollback target: the start of the round body.
        let round_mark = BeaconMark {
            events_len: self.events.len(),
            journal: self.registers.mark(),
        };
        let mut beacon_marks: HashMap<usize, BeaconMark> = HashMap::new();
        let mut ensure_retries: HashMap<usize, u32> = HashMap::new();

        let program = Arc::clone(&self.program);
        let mut pc = prefix_len;

        while pc < program.ops.len() {
            match &program.ops[pc] {
                Op::Assign { line, name, expr } => {
                    let value = self.eval_expr(expr, *line, judge).await?;
                    let text = coerce_to_string(value, *line)?;
                    self.registers.set(name, text);
                    pc += 1;
                }
                Op::Reveal { line, names } => {
                    let mut values = Vec::with_capacity(names.len());
                    for name in names {
                        let value = self.registers.get(name).ok_or_else(|| XentError::Expr {
                            line: *line,
                            message: format!("cannot reveal unbound register `{name}`"),
                        })?;
                        values.push((name.clone(), value.to_string()));
                    }
                    self.events.push(Event::Reveal { line_num: *line, values });
                    pc += 1;
                }
                Op::Elicit { line, name, max_tokens } => {
                    self.events.push(Event::ElicitRequest {
                        line_num: *line,
                        var: name.clone(),
                        max_tokens: *max_tokens,
                        registers: self.registers.snapshot(),
                    });

                    // A zero budget never reaches the back-end.
                    let bound = if *max_tokens == 0 {
                        String::new()
                    } else {
                        let raw = adapter
                            .next_move(&self.events, self.registers.values(), metadata)
                            .await?;
                        judge.truncate(&raw, *max_tokens).await?
                    };

                    self.registers.set(name, bound.clone());
                    self.events.push(Event::ElicitResponse {
                        line_num: *line,
                        var: name.clone(),
                        response_text: bound,
                    });
                    pc += 1;
                }
                Op::Beacon { line: _ } => {
                    beacon_marks.insert(
                        pc,
                        BeaconMark {
                            events_len: self.events.len(),
                            journal: self.registers.mark(),
                        },
                    );
                    pc += 1;
                }
                Op::Ensure { line, predicates, beacon } => {
                    let mut results = Vec::with_capacity(predicates.len());
                    for predicate in predicates {
                        let value = self.eval_expr(predicate, *line, judge).await?;
                        results.push(value.into_bool(*line)?);
                    }

                    if results.iter().all(|ok| *ok) {
                        pc += 1;
                        continue;
                    }

                    let (mark, target_pc, beacon_line) = match beacon {
                        Some(idx) => {
                            let mark = beacon_marks.get(idx).copied().ok_or_else(|| {
                                XentError::Expr {
                                    line: *line,
                                    message: "ensure references a beacon not yet executed"
                                        .to_string(),
                                }
                            })?;
                            (mark, idx + 1, program.ops[*idx].line())
                        }
                        None => (round_mark, prefix_len, 0),
                    };

                    // Discard everything since the beacon, then record the
                    // failure so the log never contains the dead branch.
                    self.events.truncate(mark.events_len);
                    adapter.note_rollback(mark.events_len);
                    self.registers.rollback_to(mark.journal);
                    self.events.push(Event::FailedEnsure {
                        line_num: *line,
                        beacon_line,
                        ensure_results: results,
                    });

                    let retries = ensure_retries.entry(pc).or_insert(0);
                    *retries += 1;
                    if *retries > self.ensure_retry_cap {
                        return Err(XentError::EnsureExceeded { line: *line });
                    }
                    debug!(line = *line, retry = *retries, "Ensure failed, rolling back");
                    pc = target_pc;
                }
                Op::Reward { line, expr } => {
                    let value = self.eval_expr(expr, *line, judge).await?.into_xent(*line)?;
                    self.events.push(Event::Reward { line_num: *line, value });
                    pc += 1;
                }
            }
        }

        Ok(())
    }

    async fn eval_expr(&self, expr: &crate::xdl::ast::Expr, line: u32, judge: &JudgeGateway) -> Result<Value> {
        let env = Env {
            registers: self.registers.values(),
            judge,
            story: None,
        };
        eval(expr, line, &env).await
    }

    fn tally(&self, index: u32, round_start: usize, stuck: bool) -> RoundRecord {
        let mut score = 0.0;
        let mut arms = 0;
        let mut iterations = 0;
        for event in &self.events[round_start..] {
            match event {
                Event::Reward { value, .. } => {
                    score += value.total();
                    iterations += 1;
                }
                Event::ElicitResponse { .. } => arms += 1,
                _ => {}
            }
        }
        RoundRecord { index, score, arms, iterations, stuck }
    }
}

/// Assignments store strings; numbers are formatted, anything else is a
/// type error at the assigning line.
fn coerce_to_string(value: Value, line: u32) -> Result<String> {
    match value {
        Value::Str(s) => Ok(s),
        Value::Num(n) if n.fract() == 0.0 => Ok(format!("{}", n as i64)),
        Value::Num(n) => Ok(format!("{n}")),
        other => other.into_str(line),
    }
}
