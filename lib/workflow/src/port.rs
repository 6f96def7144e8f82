//! Port system for workflow nodes.
//!
//! Ports are the exits of a node. After a node is fulfilled its ports are
//! evaluated to decide which outgoing edges fire:
//! - `Default` ports always fire
//! - `If`/`Elif`/`Else` ports form one chain where only the first port whose
//!   condition holds fires, falling back to `Else`
//!
//! A chain with no matching port and no `Else` fires nothing. That is a
//! silent dead end, not an error.

use crate::error::ResolveError;
use crate::reference::{Reference, truthy};
use crate::state::State;
use serde::{Deserialize, Serialize};

/// The name of the port every node gets unless it declares its own.
pub const DEFAULT_PORT: &str = "default";

/// How a port decides whether it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionKind {
    /// Always fires once the node is fulfilled.
    Default,
    /// Starts a conditional chain.
    If,
    /// Continues a conditional chain.
    Elif,
    /// Fires when no earlier port of the chain did.
    Else,
}

/// A named exit of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Port {
    /// Port name, unique per node.
    pub name: String,
    /// Condition kind.
    pub kind: ConditionKind,
    /// Condition for `If`/`Elif` ports.
    pub condition: Option<Reference>,
    /// Whether the port may fire while the node is still running, as soon as
    /// its condition is decidable from outputs the node has emitted.
    #[serde(default)]
    pub streamable: bool,
}

impl Port {
    /// Creates an unconditional port.
    #[must_use]
    pub fn default_port(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ConditionKind::Default,
            condition: None,
            streamable: false,
        }
    }

    /// Creates an `If` port.
    #[must_use]
    pub fn if_(name: impl Into<String>, condition: impl Into<Reference>) -> Self {
        Self {
            name: name.into(),
            kind: ConditionKind::If,
            condition: Some(condition.into()),
            streamable: false,
        }
    }

    /// Creates an `Elif` port.
    #[must_use]
    pub fn elif(name: impl Into<String>, condition: impl Into<Reference>) -> Self {
        Self {
            name: name.into(),
            kind: ConditionKind::Elif,
            condition: Some(condition.into()),
            streamable: false,
        }
    }

    /// Creates an `Else` port.
    #[must_use]
    pub fn else_(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ConditionKind::Else,
            condition: None,
            streamable: false,
        }
    }

    /// Allows the port to fire before the node is fulfilled.
    #[must_use]
    pub fn on_stream(mut self) -> Self {
        self.streamable = true;
        self
    }
}

/// The ordered ports of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ports {
    ports: Vec<Port>,
}

impl Default for Ports {
    fn default() -> Self {
        Self {
            ports: vec![Port::default_port(DEFAULT_PORT)],
        }
    }
}

impl Ports {
    /// Creates a port set in declaration order.
    #[must_use]
    pub fn new(ports: Vec<Port>) -> Self {
        Self { ports }
    }

    /// Returns the ports in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Port> {
        self.ports.iter()
    }

    /// Returns a port by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Port> {
        self.ports.iter().find(|port| port.name == name)
    }

    /// Returns the number of ports.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ports.len()
    }

    /// Returns true if there are no ports.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// Returns true if the ports form a conditional chain.
    #[must_use]
    pub fn is_conditional(&self) -> bool {
        self.ports
            .iter()
            .any(|port| port.kind != ConditionKind::Default)
    }

    /// Returns true if any port may fire during streaming.
    #[must_use]
    pub fn has_streamable(&self) -> bool {
        self.ports.iter().any(|port| port.streamable)
    }

    /// Checks the condition-kind rules.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated rule.
    pub fn validate(&self) -> Result<(), String> {
        if self.ports.is_empty() {
            return Err("a node needs at least one port".to_string());
        }
        for (index, port) in self.ports.iter().enumerate() {
            if self.ports[..index].iter().any(|other| other.name == port.name) {
                return Err(format!("port '{}' is declared twice", port.name));
            }
        }
        if !self.is_conditional() {
            return Ok(());
        }
        if self
            .ports
            .iter()
            .any(|port| port.kind == ConditionKind::Default)
        {
            return Err("DEFAULT ports cannot be mixed with IF/ELIF/ELSE ports".to_string());
        }
        if self.ports[0].kind != ConditionKind::If {
            return Err("a conditional chain must start with an IF port".to_string());
        }
        for (index, port) in self.ports.iter().enumerate().skip(1) {
            match port.kind {
                ConditionKind::If => {
                    return Err(format!(
                        "port '{}' starts a second IF chain; use ELIF",
                        port.name
                    ));
                }
                ConditionKind::Else if index + 1 != self.ports.len() => {
                    return Err("ELSE must be the last port".to_string());
                }
                _ => {}
            }
        }
        if let Some(port) = self
            .ports
            .iter()
            .find(|port| matches!(port.kind, ConditionKind::If | ConditionKind::Elif))
            .filter(|port| port.condition.is_none())
        {
            return Err(format!("port '{}' has no condition", port.name));
        }
        Ok(())
    }

    /// Selects the ports that fire for the given state.
    ///
    /// # Errors
    ///
    /// Returns the resolve error of the first condition that cannot be
    /// evaluated, in which case the selection is undecidable.
    pub fn select(&self, state: &State) -> Result<Vec<&Port>, ResolveError> {
        if !self.is_conditional() {
            return Ok(self.ports.iter().collect());
        }
        for port in &self.ports {
            match (&port.kind, &port.condition) {
                (ConditionKind::Else, _) => return Ok(vec![port]),
                (_, Some(condition)) => {
                    if truthy(&condition.resolve(state)?) {
                        return Ok(vec![port]);
                    }
                }
                (_, None) => {}
            }
        }
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeId;
    use serde_json::json;

    fn branching_ports() -> Ports {
        Ports::new(vec![
            Port::if_("first", Reference::input("c1")),
            Port::elif("second", Reference::input("c2")),
            Port::else_("fallback"),
        ])
    }

    fn state_with(c1: bool, c2: bool) -> State {
        let mut state = State::default();
        state.set_workflow_input("c1", json!(c1));
        state.set_workflow_input("c2", json!(c2));
        state
    }

    fn selected_names(ports: &Ports, state: &State) -> Vec<String> {
        ports
            .select(state)
            .expect("decidable")
            .into_iter()
            .map(|port| port.name.clone())
            .collect()
    }

    #[test]
    fn default_ports_validate() {
        assert!(Ports::default().validate().is_ok());
        assert_eq!(Ports::default().len(), 1);
    }

    #[test]
    fn exactly_one_port_fires_for_every_assignment() {
        let ports = branching_ports();
        for (c1, c2, expected) in [
            (true, true, "first"),
            (true, false, "first"),
            (false, true, "second"),
            (false, false, "fallback"),
        ] {
            let names = selected_names(&ports, &state_with(c1, c2));
            assert_eq!(names, vec![expected.to_string()]);
        }
    }

    #[test]
    fn chain_without_else_can_fire_nothing() {
        let ports = Ports::new(vec![Port::if_("yes", Reference::input("c1"))]);
        assert!(selected_names(&ports, &state_with(false, false)).is_empty());
    }

    #[test]
    fn default_ports_all_fire() {
        let ports = Ports::new(vec![Port::default_port("a"), Port::default_port("b")]);
        assert_eq!(selected_names(&ports, &State::default()), vec!["a", "b"]);
    }

    #[test]
    fn unresolved_condition_is_undecidable() {
        let ports = Ports::new(vec![
            Port::if_("yes", Reference::node_output(NodeId::from_name("Up"), "ok")),
            Port::else_("no"),
        ]);
        let err = ports.select(&State::default()).unwrap_err();
        assert!(err.is_unresolved());
    }

    #[test]
    fn rejects_two_else_ports() {
        let ports = Ports::new(vec![
            Port::if_("a", json!(true)),
            Port::else_("b"),
            Port::else_("c"),
        ]);
        assert!(ports.validate().is_err());
    }

    #[test]
    fn rejects_mixing_default_with_conditions() {
        let ports = Ports::new(vec![Port::default_port("a"), Port::if_("b", json!(true))]);
        let reason = ports.validate().unwrap_err();
        assert!(reason.contains("DEFAULT"));
    }

    #[test]
    fn rejects_chain_not_starting_with_if() {
        let ports = Ports::new(vec![Port::elif("a", json!(true)), Port::else_("b")]);
        assert!(ports.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_names() {
        let ports = Ports::new(vec![Port::default_port("a"), Port::default_port("a")]);
        assert!(ports.validate().unwrap_err().contains("twice"));
    }
}
