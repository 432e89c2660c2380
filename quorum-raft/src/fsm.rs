use std::collections::HashMap;

use serde_json::Value;

/// A single replicated assignment, `{name: value}`. The engine treats the
/// value as opaque.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub name: String,
    pub value: Value,
}

/// The applied state: a map from name to the most recently applied value.
/// Applying is deterministic and idempotent per index, so replaying the log
/// from the start always reproduces the same map.
#[derive(Debug, Default)]
pub struct StateMachine {
    values: HashMap<String, Value>,
}

impl StateMachine {
    pub fn new() -> StateMachine {
        StateMachine::default()
    }

    pub fn apply(&mut self, command: &Command) {
        self.values.insert(command.name.clone(), command.value.clone());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn command(name: &str, value: Value) -> Command {
        Command {
            name: name.to_string(),
            value,
        }
    }

    #[test]
    fn apply_then_get() {
        let mut fsm = StateMachine::new();
        assert!(fsm.get("x").is_none());
        fsm.apply(&command("x", json!(42)));
        assert_eq!(Some(&json!(42)), fsm.get("x"));
    }

    #[test]
    fn later_assignments_win() {
        let mut fsm = StateMachine::new();
        fsm.apply(&command("x", json!(1)));
        fsm.apply(&command("x", json!("two")));
        assert_eq!(Some(&json!("two")), fsm.get("x"));
        assert_eq!(1, fsm.len());
    }

    #[test]
    fn replay_reproduces_the_same_state() {
        let commands = vec![
            command("a", json!(1)),
            command("b", json!([1, 2, 3])),
            command("a", json!(2)),
            command("c", json!({"nested": true})),
        ];

        let mut first = StateMachine::new();
        let mut second = StateMachine::new();
        for cmd in &commands {
            first.apply(cmd);
        }
        for cmd in &commands {
            second.apply(cmd);
        }

        for name in &["a", "b", "c"] {
            assert_eq!(first.get(name), second.get(name));
        }
        assert_eq!(first.len(), second.len());
    }
}
