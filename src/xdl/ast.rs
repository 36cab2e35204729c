// Parsed form of an XDL game.
//
// A program is a flat operation list; there is no control flow beyond
// `ensure` rollback, so every op carries its 1-based source line and the
// interpreter is a straight program counter over `ops`. Each `ensure`
// resolves at parse time to the index of the nearest preceding `beacon`
// (None means the rollback target is the start of the round body).

/// Comparison operators allowed in predicate position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Ge,
    Le,
    Eq,
}

/// Expression AST for the small typed sub-grammar.
///
/// Scoring calls (`xed`, `dex`, `nex`) are the only expressions that reach
/// the judge gateway; everything else evaluates purely over the register
/// file.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// String literal.
    Str(String),
    /// Numeric literal.
    Num(f64),
    /// Register reference.
    Var(String),
    /// String concatenation via `+`.
    Concat(Box<Expr>, Box<Expr>),
    /// `story()` — the deterministic opening text; only resolvable while
    /// building a map prefix.
    Story,
    /// `remove_common_words(a, b)` — the words of `a` that do not occur
    /// in `b` (case-insensitive), original order and surfaces kept.
    RemoveCommonWords(Box<Expr>, Box<Expr>),
    /// `len(s)` — Unicode scalar count.
    Len(Box<Expr>),
    /// `xed(t)` / `xed(t | c)` — per-token cross-entropy of `t`, in bits,
    /// conditioned on `c` (or the judge's BOS marker when absent).
    Xed {
        text: Box<Expr>,
        context: Option<Box<Expr>>,
    },
    /// `dex(t | c)` — token-aligned `xed(t) - xed(t | c)`: the bits the
    /// context saves on each token of `t`.
    Dex {
        text: Box<Expr>,
        context: Box<Expr>,
    },
    /// `nex(t | c)` — `dex(t | c)` clamped at zero from below, so a token
    /// the context makes *less* predictable contributes nothing instead
    /// of a negative reward.
    Nex {
        text: Box<Expr>,
        context: Box<Expr>,
    },
    /// Boolean comparison, predicate position only.
    Cmp {
        op: CmpOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

/// One executable operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Assign {
        line: u32,
        name: String,
        expr: Expr,
    },
    Reveal {
        line: u32,
        names: Vec<String>,
    },
    Elicit {
        line: u32,
        name: String,
        max_tokens: u32,
    },
    Ensure {
        line: u32,
        predicates: Vec<Expr>,
        /// Index into `Program::ops` of the nearest preceding beacon.
        beacon: Option<usize>,
    },
    Beacon {
        line: u32,
    },
    Reward {
        line: u32,
        expr: Expr,
    },
}

impl Op {
    pub fn line(&self) -> u32 {
        match self {
            Op::Assign { line, .. }
            | Op::Reveal { line, .. }
            | Op::Elicit { line, .. }
            | Op::Ensure { line, .. }
            | Op::Beacon { line }
            | Op::Reward { line, .. } => *line,
        }
    }
}

/// A parsed game program.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub ops: Vec<Op>,
}

impl Program {
    /// Length of the map prefix: the maximal leading run of `assign` ops.
    ///
    /// These are resolved once per (game, map seed) pair with a
    /// deterministic sampler and shared by every player; trial rounds
    /// start executing at the first op past the prefix.
    pub fn map_prefix_len(&self) -> usize {
        self.ops
            .iter()
            .take_while(|op| matches!(op, Op::Assign { .. }))
            .count()
    }
}
