// The register file — per-trial symbolic text bindings.
//
// Values are never mutated in place: assignment replaces, and every write
// is journaled so a failed ensure can roll the file back to the state at
// the matching beacon without deep-copying the map per beacon.

use std::collections::BTreeMap;

/// Opaque rollback point into the write journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalMark(usize);

#[derive(Debug, Clone, Default)]
pub struct RegisterFile {
    values: BTreeMap<String, String>,
    /// (name, value before the write); None = the name was unbound.
    journal: Vec<(String, Option<String>)>,
}

impl RegisterFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset to exactly the given bindings (used on round entry to restore
    /// the map prefix). Clears the journal.
    pub fn reset<'a>(&mut self, bindings: impl IntoIterator<Item = (&'a str, &'a str)>) {
        self.values = bindings
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.journal.clear();
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Bind `name` to `value`, journaling the displaced value.
    pub fn set(&mut self, name: &str, value: String) {
        let previous = self.values.insert(name.to_string(), value);
        self.journal.push((name.to_string(), previous));
    }

    /// Read-only view of all bindings, ordered by name.
    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    /// Copy of all bindings, for event snapshots.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.values.clone()
    }

    /// Current journal position; pair with `rollback_to`.
    pub fn mark(&self) -> JournalMark {
        JournalMark(self.journal.len())
    }

    /// Undo every write made since `mark`, most recent first.
    pub fn rollback_to(&mut self, mark: JournalMark) {
        while self.journal.len() > mark.0 {
            let (name, previous) = self.journal.pop().expect("journal entry");
            match previous {
                Some(value) => {
                    self.values.insert(name, value);
                }
                None => {
                    self.values.remove(&name);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get() {
        let mut regs = RegisterFile::new();
        regs.set("s", "once upon".to_string());
        assert_eq!(regs.get("s"), Some("once upon"));
        assert_eq!(regs.get("t"), None);
    }

    #[test]
    fn reassignment_replaces() {
        let mut regs = RegisterFile::new();
        regs.set("x", "first".to_string());
        regs.set("x", "second".to_string());
        assert_eq!(regs.get("x"), Some("second"));
    }

    #[test]
    fn rollback_undoes_new_bindings() {
        let mut regs = RegisterFile::new();
        regs.set("s", "story".to_string());
        let mark = regs.mark();
        regs.set("x", "move".to_string());
        regs.set("y", "derived".to_string());
        regs.rollback_to(mark);
        assert_eq!(regs.get("s"), Some("story"));
        assert_eq!(regs.get("x"), None);
        assert_eq!(regs.get("y"), None);
    }

    #[test]
    fn rollback_restores_overwritten_values() {
        let mut regs = RegisterFile::new();
        regs.set("x", "original".to_string());
        let mark = regs.mark();
        regs.set("x", "overwritten".to_string());
        regs.set("x", "again".to_string());
        regs.rollback_to(mark);
        assert_eq!(regs.get("x"), Some("original"));
    }

    #[test]
    fn nested_marks_unwind_independently() {
        let mut regs = RegisterFile::new();
        regs.set("a", "1".to_string());
        let outer = regs.mark();
        regs.set("b", "2".to_string());
        let inner = regs.mark();
        regs.set("c", "3".to_string());

        regs.rollback_to(inner);
        assert_eq!(regs.get("b"), Some("2"));
        assert_eq!(regs.get("c"), None);

        regs.rollback_to(outer);
        assert_eq!(regs.get("a"), Some("1"));
        assert_eq!(regs.get("b"), None);
    }

    #[test]
    fn reset_installs_prefix_and_clears_journal() {
        let mut regs = RegisterFile::new();
        regs.set("junk", "x".to_string());
        regs.reset([("s", "the story")]);
        assert_eq!(regs.get("junk"), None);
        assert_eq!(regs.get("s"), Some("the story"));
        let mark = regs.mark();
        assert_eq!(mark, JournalMark(0));
    }
}
