//! Declarative saga definitions.
//!
//! A definition is pure data: an ordered list of steps, each naming a
//! registered forward action and optionally a compensating action, plus
//! branch rules that route to another step or to a terminal outcome.
//! [`SagaDefinition::validate`] checks a definition against the registered
//! actions before it is ever executed.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::context::{ContextValue, SagaContext};
use crate::error::DefinitionError;
use crate::invoker::ActionRegistry;
use crate::retry::RetryPolicy;

/// Name of a registered step invoker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionRef(String);

impl ActionRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ActionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ActionRef {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Terminal outcome a branch can route to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminalOutcome {
    Succeeded,
    /// Ends the forward path and unwinds completed steps.
    Failed,
}

/// Where execution goes after a step succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transition {
    NextStep(String),
    Terminal(TerminalOutcome),
}

impl Transition {
    pub fn next(step: impl Into<String>) -> Self {
        Transition::NextStep(step.into())
    }

    pub fn succeed() -> Self {
        Transition::Terminal(TerminalOutcome::Succeeded)
    }

    pub fn fail() -> Self {
        Transition::Terminal(TerminalOutcome::Failed)
    }
}

/// Predicate over a step's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
    BoolEquals { key: String, value: bool },
    TextEquals { key: String, value: String },
}

impl Condition {
    pub fn bool_equals(key: impl Into<String>, value: bool) -> Self {
        Condition::BoolEquals {
            key: key.into(),
            value,
        }
    }

    pub fn text_equals(key: impl Into<String>, value: impl Into<String>) -> Self {
        Condition::TextEquals {
            key: key.into(),
            value: value.into(),
        }
    }

    /// A missing key or a value of another type never matches.
    pub fn evaluate(&self, output: &SagaContext) -> bool {
        match self {
            Condition::BoolEquals { key, value } => {
                matches!(output.get(key), Some(ContextValue::Bool(b)) if b == value)
            }
            Condition::TextEquals { key, value } => {
                matches!(output.get(key), Some(ContextValue::Text(t)) if t == value)
            }
        }
    }
}

/// One rule of a choice branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceRule {
    pub condition: Condition,
    pub transition: Transition,
}

/// Routing applied after a step succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Branch {
    /// Unconditional jump.
    Always(Transition),
    /// First matching rule wins, else `otherwise`.
    Choice {
        rules: Vec<ChoiceRule>,
        otherwise: Transition,
    },
}

impl Branch {
    /// Starts a choice branch with a single rule.
    pub fn when(condition: Condition, transition: Transition) -> ChoiceBuilder {
        ChoiceBuilder {
            rules: vec![ChoiceRule {
                condition,
                transition,
            }],
        }
    }

    /// Picks the transition for a step output.
    pub fn resolve(&self, output: &SagaContext) -> &Transition {
        match self {
            Branch::Always(t) => t,
            Branch::Choice { rules, otherwise } => rules
                .iter()
                .find(|r| r.condition.evaluate(output))
                .map(|r| &r.transition)
                .unwrap_or(otherwise),
        }
    }

    /// Every transition this branch can produce.
    pub fn transitions(&self) -> Vec<&Transition> {
        match self {
            Branch::Always(t) => vec![t],
            Branch::Choice { rules, otherwise } => rules
                .iter()
                .map(|r| &r.transition)
                .chain(std::iter::once(otherwise))
                .collect(),
        }
    }
}

/// Builder for [`Branch::Choice`].
#[derive(Debug, Clone)]
pub struct ChoiceBuilder {
    rules: Vec<ChoiceRule>,
}

impl ChoiceBuilder {
    pub fn when(mut self, condition: Condition, transition: Transition) -> Self {
        self.rules.push(ChoiceRule {
            condition,
            transition,
        });
        self
    }

    pub fn otherwise(self, transition: Transition) -> Branch {
        Branch::Choice {
            rules: self.rules,
            otherwise: transition,
        }
    }
}

/// One unit of saga work.
///
/// `retry` and `timeout` fall back to the executor defaults when unset.
#[derive(Debug, Clone, PartialEq)]
pub struct StepDefinition {
    pub name: String,
    pub action: ActionRef,
    pub compensation: Option<ActionRef>,
    pub retry: Option<RetryPolicy>,
    pub timeout: Option<Duration>,
    pub branch: Option<Branch>,
}

impl StepDefinition {
    pub fn new(name: impl Into<String>, action: impl Into<ActionRef>) -> Self {
        Self {
            name: name.into(),
            action: action.into(),
            compensation: None,
            retry: None,
            timeout: None,
            branch: None,
        }
    }

    /// Sets the compensating action.
    pub fn compensate_with(mut self, action: impl Into<ActionRef>) -> Self {
        self.compensation = Some(action.into());
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn branch(mut self, branch: Branch) -> Self {
        self.branch = Some(branch);
        self
    }
}

/// Immutable template for one class of distributed transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct SagaDefinition {
    pub name: String,
    pub steps: Vec<StepDefinition>,
    /// Maximum wall-clock duration of one instance.
    pub timeout: Duration,
}

impl SagaDefinition {
    pub fn builder(name: impl Into<String>) -> SagaDefinitionBuilder {
        SagaDefinitionBuilder {
            name: name.into(),
            steps: Vec::new(),
            timeout: Duration::from_secs(30 * 60),
        }
    }

    pub fn first_step(&self) -> Option<&StepDefinition> {
        self.steps.first()
    }

    pub fn step(&self, name: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Transition taken after step `name` succeeds with `output`.
    ///
    /// Without a branch a step falls through to the next one in order, and
    /// the last step succeeds the saga.
    pub fn transition_after(&self, name: &str, output: &SagaContext) -> Transition {
        let Some(index) = self.steps.iter().position(|s| s.name == name) else {
            return Transition::fail();
        };
        match &self.steps[index].branch {
            Some(branch) => branch.resolve(output).clone(),
            None => self.fallthrough(index),
        }
    }

    fn fallthrough(&self, index: usize) -> Transition {
        self.steps
            .get(index + 1)
            .map(|s| Transition::NextStep(s.name.clone()))
            .unwrap_or_else(Transition::succeed)
    }

    fn successors(&self, index: usize) -> Vec<String> {
        let transitions = match &self.steps[index].branch {
            Some(branch) => branch.transitions().into_iter().cloned().collect(),
            None => vec![self.fallthrough(index)],
        };
        transitions
            .into_iter()
            .filter_map(|t| match t {
                Transition::NextStep(name) => Some(name),
                Transition::Terminal(_) => None,
            })
            .collect()
    }

    /// Checks the definition offline: steps exist and are unique, every
    /// action resolves, every branch target exists, timeouts and attempt
    /// counts are positive and the step graph is acyclic.
    pub fn validate(&self, actions: &ActionRegistry) -> Result<(), DefinitionError> {
        if self.steps.is_empty() {
            return Err(DefinitionError::NoSteps {
                definition: self.name.clone(),
            });
        }
        if self.timeout.is_zero() {
            return Err(DefinitionError::ZeroSagaTimeout {
                definition: self.name.clone(),
            });
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.name.as_str()) {
                return Err(DefinitionError::DuplicateStep {
                    definition: self.name.clone(),
                    step: step.name.clone(),
                });
            }

            for action in std::iter::once(&step.action).chain(step.compensation.iter()) {
                if !actions.contains(action.as_str()) {
                    return Err(DefinitionError::UnknownAction {
                        step: step.name.clone(),
                        action: action.to_string(),
                    });
                }
            }

            if step.timeout.is_some_and(|t| t.is_zero()) {
                return Err(DefinitionError::ZeroStepTimeout {
                    step: step.name.clone(),
                });
            }
            if step.retry.as_ref().is_some_and(|r| r.max_attempts == 0) {
                return Err(DefinitionError::ZeroAttempts {
                    step: step.name.clone(),
                });
            }
        }

        let index: HashMap<&str, usize> = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.as_str(), i))
            .collect();

        let mut edges = Vec::with_capacity(self.steps.len());
        for (i, step) in self.steps.iter().enumerate() {
            let mut targets = Vec::new();
            for target in self.successors(i) {
                let &t = index
                    .get(target.as_str())
                    .ok_or_else(|| DefinitionError::UnknownTarget {
                        step: step.name.clone(),
                        target: target.clone(),
                    })?;
                targets.push(t);
            }
            edges.push(targets);
        }

        self.check_acyclic(&edges)
    }

    fn check_acyclic(&self, edges: &[Vec<usize>]) -> Result<(), DefinitionError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        let mut marks = vec![Mark::Unvisited; edges.len()];
        for root in 0..edges.len() {
            if marks[root] != Mark::Unvisited {
                continue;
            }
            // Iterative DFS: (node, next edge to explore).
            let mut stack = vec![(root, 0usize)];
            marks[root] = Mark::InProgress;
            while let Some(top) = stack.last_mut() {
                let node = top.0;
                if let Some(&succ) = edges[node].get(top.1) {
                    top.1 += 1;
                    match marks[succ] {
                        Mark::InProgress => {
                            return Err(DefinitionError::Cycle {
                                definition: self.name.clone(),
                                step: self.steps[succ].name.clone(),
                            });
                        }
                        Mark::Unvisited => {
                            marks[succ] = Mark::InProgress;
                            stack.push((succ, 0));
                        }
                        Mark::Done => {}
                    }
                } else {
                    marks[node] = Mark::Done;
                    stack.pop();
                }
            }
        }
        Ok(())
    }
}

/// Builder for [`SagaDefinition`]. The timeout defaults to 30 minutes.
#[derive(Debug, Clone)]
pub struct SagaDefinitionBuilder {
    name: String,
    steps: Vec<StepDefinition>,
    timeout: Duration,
}

impl SagaDefinitionBuilder {
    pub fn step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> SagaDefinition {
        SagaDefinition {
            name: self.name,
            steps: self.steps,
            timeout: self.timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::error::StepError;
    use crate::invoker::StepInvoker;

    struct Echo;

    #[async_trait]
    impl StepInvoker for Echo {
        async fn invoke(&self, context: SagaContext) -> Result<SagaContext, StepError> {
            Ok(context)
        }
    }

    fn actions() -> ActionRegistry {
        let mut actions = ActionRegistry::new();
        actions.register("do", Arc::new(Echo));
        actions.register("undo", Arc::new(Echo));
        actions
    }

    fn linear() -> SagaDefinition {
        SagaDefinition::builder("linear")
            .step(StepDefinition::new("a", "do").compensate_with("undo"))
            .step(StepDefinition::new("b", "do"))
            .build()
    }

    #[test]
    fn test_valid_definition() {
        assert_eq!(linear().validate(&actions()), Ok(()));
    }

    #[test]
    fn test_fallthrough_transitions() {
        let def = linear();
        let out = SagaContext::new();
        assert_eq!(def.transition_after("a", &out), Transition::next("b"));
        assert_eq!(def.transition_after("b", &out), Transition::succeed());
        assert_eq!(def.transition_after("zzz", &out), Transition::fail());
    }

    #[test]
    fn test_choice_branch() {
        let def = SagaDefinition::builder("choice")
            .step(
                StepDefinition::new("decide", "do").branch(
                    Branch::when(Condition::bool_equals("ok", true), Transition::next("yes"))
                        .otherwise(Transition::next("no")),
                ),
            )
            .step(StepDefinition::new("yes", "do").branch(Branch::Always(Transition::succeed())))
            .step(StepDefinition::new("no", "do"))
            .build();

        assert_eq!(def.validate(&actions()), Ok(()));

        let ok = SagaContext::new().with("ok", true);
        let not_ok = SagaContext::new().with("ok", false);
        let missing = SagaContext::new();
        assert_eq!(def.transition_after("decide", &ok), Transition::next("yes"));
        assert_eq!(def.transition_after("decide", &not_ok), Transition::next("no"));
        assert_eq!(def.transition_after("decide", &missing), Transition::next("no"));
        assert_eq!(def.transition_after("yes", &ok), Transition::succeed());
    }

    #[test]
    fn test_text_condition() {
        let cond = Condition::text_equals("band", "Low");
        assert!(cond.evaluate(&SagaContext::new().with("band", "Low")));
        assert!(!cond.evaluate(&SagaContext::new().with("band", "High")));
        assert!(!cond.evaluate(&SagaContext::new().with("band", true)));
    }

    #[test]
    fn test_rejects_empty_definition() {
        let def = SagaDefinition::builder("empty").build();
        assert!(matches!(
            def.validate(&actions()),
            Err(DefinitionError::NoSteps { .. })
        ));
    }

    #[test]
    fn test_rejects_unknown_actions() {
        let def = SagaDefinition::builder("bad")
            .step(StepDefinition::new("a", "do").compensate_with("missing"))
            .build();
        assert_eq!(
            def.validate(&actions()),
            Err(DefinitionError::UnknownAction {
                step: "a".into(),
                action: "missing".into()
            })
        );
    }

    #[test]
    fn test_rejects_duplicate_steps_and_unknown_targets() {
        let dup = SagaDefinition::builder("dup")
            .step(StepDefinition::new("a", "do"))
            .step(StepDefinition::new("a", "do"))
            .build();
        assert!(matches!(
            dup.validate(&actions()),
            Err(DefinitionError::DuplicateStep { .. })
        ));

        let dangling = SagaDefinition::builder("dangling")
            .step(StepDefinition::new("a", "do").branch(Branch::Always(Transition::next("b"))))
            .build();
        assert_eq!(
            dangling.validate(&actions()),
            Err(DefinitionError::UnknownTarget {
                step: "a".into(),
                target: "b".into()
            })
        );
    }

    #[test]
    fn test_rejects_cycles() {
        let def = SagaDefinition::builder("loop")
            .step(StepDefinition::new("a", "do"))
            .step(
                StepDefinition::new("b", "do").branch(
                    Branch::when(Condition::bool_equals("again", true), Transition::next("a"))
                        .otherwise(Transition::succeed()),
                ),
            )
            .build();
        assert!(matches!(
            def.validate(&actions()),
            Err(DefinitionError::Cycle { .. })
        ));
    }

    #[test]
    fn test_rejects_zero_timeouts_and_attempts() {
        let zero_step = SagaDefinition::builder("z")
            .step(StepDefinition::new("a", "do").timeout(Duration::ZERO))
            .build();
        assert!(matches!(
            zero_step.validate(&actions()),
            Err(DefinitionError::ZeroStepTimeout { .. })
        ));

        let zero_saga = SagaDefinition::builder("z")
            .step(StepDefinition::new("a", "do"))
            .timeout(Duration::ZERO)
            .build();
        assert!(matches!(
            zero_saga.validate(&actions()),
            Err(DefinitionError::ZeroSagaTimeout { .. })
        ));

        let zero_attempts = SagaDefinition::builder("z")
            .step(StepDefinition::new("a", "do").retry(RetryPolicy::exponential(
                0,
                Duration::from_millis(1),
            )))
            .build();
        assert!(matches!(
            zero_attempts.validate(&actions()),
            Err(DefinitionError::ZeroAttempts { .. })
        ));
    }
}
