use std::collections::HashMap;
use std::sync::Arc;

use sqlpilot_core::error::{Result, SqlPilotError};
use sqlpilot_core::state::StepId;

use super::router::{Next, Router};
use super::step::Step;

/// Static registry of steps plus the routing table that connects them.
///
/// Construction validates the wiring: every edge endpoint must name a
/// registered step and there must be exactly one entry edge.
pub struct GraphDefinition {
    steps: HashMap<StepId, Arc<dyn Step>>,
    router: Router,
    entry: StepId,
}

impl GraphDefinition {
    pub fn new(steps: Vec<Arc<dyn Step>>, router: Router) -> Result<Self> {
        let mut registry: HashMap<StepId, Arc<dyn Step>> = HashMap::new();
        for step in steps {
            let id = step.id();
            if registry.insert(id, step).is_some() {
                return Err(SqlPilotError::Misconfigured(format!(
                    "step '{id}' registered twice"
                )));
            }
        }

        let entries: Vec<_> = router.edges().iter().filter(|e| e.from.is_none()).collect();
        let entry = match entries.as_slice() {
            [edge] => match edge.to {
                Next::Step(id) => id,
                Next::Terminal => {
                    return Err(SqlPilotError::Misconfigured(
                        "entry edge points at the terminal node".into(),
                    ))
                }
            },
            [] => return Err(SqlPilotError::Misconfigured("no entry edge".into())),
            _ => {
                return Err(SqlPilotError::Misconfigured(
                    "more than one entry edge".into(),
                ))
            }
        };

        for edge in router.edges() {
            if let Some(from) = edge.from {
                if !registry.contains_key(&from) {
                    return Err(SqlPilotError::Misconfigured(format!(
                        "edge source '{from}' is not a registered step"
                    )));
                }
            }
            if let Next::Step(to) = edge.to {
                if !registry.contains_key(&to) {
                    return Err(SqlPilotError::Misconfigured(format!(
                        "edge target '{to}' is not a registered step"
                    )));
                }
            }
        }

        Ok(Self {
            steps: registry,
            router,
            entry,
        })
    }

    pub fn step(&self, id: StepId) -> Option<&Arc<dyn Step>> {
        self.steps.get(&id)
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn entry(&self) -> StepId {
        self.entry
    }

    /// Registered step ids in declaration order of [`StepId::ALL`].
    pub fn step_ids(&self) -> Vec<StepId> {
        StepId::ALL
            .into_iter()
            .filter(|id| self.steps.contains_key(id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::router::{Condition, Edge};
    use crate::graph::step::StepOutput;
    use futures::future::BoxFuture;
    use sqlpilot_core::state::{Field, StateRecord, StateUpdate};

    struct Noop(StepId);

    impl Step for Noop {
        fn id(&self) -> StepId {
            self.0
        }
        fn writes(&self) -> &'static [Field] {
            &[]
        }
        fn run<'a>(&'a self, _state: &'a StateRecord) -> BoxFuture<'a, Result<StepOutput>> {
            Box::pin(async { Ok(StepOutput::new(StateUpdate::new())) })
        }
    }

    fn noop(id: StepId) -> Arc<dyn Step> {
        Arc::new(Noop(id))
    }

    #[test]
    fn test_valid_graph() {
        let graph = GraphDefinition::new(
            vec![noop(StepId::ScopeCheck)],
            Router::new(vec![
                Edge::always(None, Next::Step(StepId::ScopeCheck)),
                Edge::always(Some(StepId::ScopeCheck), Next::Terminal),
            ]),
        )
        .unwrap();
        assert_eq!(graph.entry(), StepId::ScopeCheck);
        assert_eq!(graph.step_ids(), vec![StepId::ScopeCheck]);
        assert!(graph.step(StepId::Execution).is_none());
    }

    #[test]
    fn test_unregistered_endpoint_rejected() {
        let err = GraphDefinition::new(
            vec![noop(StepId::ScopeCheck)],
            Router::new(vec![
                Edge::always(None, Next::Step(StepId::ScopeCheck)),
                Edge::when(
                    Some(StepId::ScopeCheck),
                    Condition::NoError,
                    Next::Step(StepId::QueryGeneration),
                ),
            ]),
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("query_generation"));
    }

    #[test]
    fn test_entry_rules() {
        let no_entry = GraphDefinition::new(
            vec![noop(StepId::ScopeCheck)],
            Router::new(vec![Edge::always(Some(StepId::ScopeCheck), Next::Terminal)]),
        );
        assert!(matches!(no_entry, Err(SqlPilotError::Misconfigured(_))));

        let duplicate = GraphDefinition::new(
            vec![noop(StepId::ScopeCheck), noop(StepId::ScopeCheck)],
            Router::new(vec![Edge::always(None, Next::Step(StepId::ScopeCheck))]),
        );
        assert!(matches!(duplicate, Err(SqlPilotError::Misconfigured(_))));
    }
}
