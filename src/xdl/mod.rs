// XDL — the game definition language.
//
// One operation per line, `#` comments, no control flow beyond ensure
// rollback. The parser turns a source file into a flat Program; eval
// executes the expression sub-grammar against the register file and the
// judge gateway.

pub mod ast;
pub mod eval;
pub mod parser;
