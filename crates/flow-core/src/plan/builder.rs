use std::collections::{HashSet, VecDeque};

use indexmap::IndexMap;

use crate::errors::PlanError;
use crate::model::{AttributePlanEntry, AttributeRole, AttributeType, ExecutionPlan, Step, StepId};

/// Builds the immutable [`ExecutionPlan`] for `goals` against `catalog`, per
/// §4.2:
///
/// 1. reverse-reachability from goals over consumer→producer edges,
/// 2. cycle detection (`ErrCyclicPlan`),
/// 3. multi-producer recording,
/// 4. required-set minimization,
/// 5. `for_each` legality checking.
pub fn build_plan(catalog: &IndexMap<StepId, Step>, goals: &[StepId]) -> Result<ExecutionPlan, PlanError> {
    for g in goals {
        if !catalog.contains_key(g) {
            return Err(PlanError::UnknownGoal(g.0.clone()));
        }
    }

    // Reverse-reachability: BFS backward from goals over shared attribute
    // names. `in_plan` is the set of steps reached; `providers_of[attr]`
    // accumulates every in-plan step whose output is `attr`.
    let mut in_plan: IndexMap<StepId, Step> = IndexMap::new();
    let mut queue: VecDeque<StepId> = goals.iter().cloned().collect();
    let mut providers_of: IndexMap<String, Vec<StepId>> = IndexMap::new();
    let mut consumers_of: IndexMap<String, Vec<StepId>> = IndexMap::new();
    let mut required: HashSet<String> = HashSet::new();

    while let Some(step_id) = queue.pop_front() {
        if in_plan.contains_key(&step_id) {
            continue;
        }
        let step = catalog.get(&step_id).expect("queued id was validated against catalog").clone();
        in_plan.insert(step_id.clone(), step.clone());

        for (attr_name, decl) in step.inputs() {
            consumers_of.entry(attr_name.clone()).or_default().push(step_id.clone());

            let producers: Vec<StepId> = catalog
                .values()
                .filter(|candidate| candidate.attributes.get(attr_name).map(|d| d.role == AttributeRole::Output).unwrap_or(false))
                .map(|candidate| candidate.id.clone())
                .collect();

            if producers.is_empty() {
                if decl.role == AttributeRole::Required {
                    required.insert(attr_name.clone());
                }
                continue;
            }

            let entry = providers_of.entry(attr_name.clone()).or_default();
            for p in &producers {
                if !entry.contains(p) {
                    entry.push(p.clone());
                }
                if !in_plan.contains_key(p) && !queue.contains(p) {
                    queue.push_back(p.clone());
                }
            }
        }
    }

    // Cycle detection over the induced consumer -> producer graph restricted
    // to in-plan steps.
    detect_cycles(&in_plan, &providers_of)?;

    // for_each legality: when a for_each input has an in-plan producer, that
    // producer's own declaration of the attribute (as output) must be typed
    // as an array.
    for step in in_plan.values() {
        for (attr_name, decl) in step.inputs() {
            if !decl.for_each {
                continue;
            }
            let Some(producers) = providers_of.get(attr_name) else { continue };
            for p in producers {
                let producer_step = &in_plan[p];
                if let Some(out_decl) = producer_step.attributes.get(attr_name) {
                    if out_decl.role == AttributeRole::Output && out_decl.ty != AttributeType::Array {
                        return Err(PlanError::ForEachProviderNotArray(step.id.0.clone()));
                    }
                }
            }
        }
    }

    let mut attributes: IndexMap<String, AttributePlanEntry> = IndexMap::new();
    for (attr, consumers) in &consumers_of {
        attributes.insert(
            attr.clone(),
            AttributePlanEntry { providers: providers_of.get(attr).cloned().unwrap_or_default(), consumers: consumers.clone() },
        );
    }
    // Attributes that are produced in-plan but never consumed by another
    // in-plan step still belong to the plan's attribute index (e.g. a goal
    // step's own output).
    for (attr, providers) in &providers_of {
        attributes.entry(attr.clone()).or_insert_with(|| AttributePlanEntry { providers: providers.clone(), consumers: vec![] });
    }

    let mut required: Vec<String> = required.into_iter().collect();
    required.sort();

    Ok(ExecutionPlan { goals: goals.to_vec(), required, steps: in_plan.into_values().collect(), attributes })
}

fn detect_cycles(in_plan: &IndexMap<StepId, Step>, providers_of: &IndexMap<String, Vec<StepId>>) -> Result<(), PlanError> {
    // Build consumer -> producer adjacency restricted to in-plan steps.
    let mut adjacency: IndexMap<StepId, Vec<StepId>> = IndexMap::new();
    for step in in_plan.values() {
        let mut producers_for_step: Vec<StepId> = Vec::new();
        for (attr_name, _) in step.inputs() {
            if let Some(producers) = providers_of.get(attr_name) {
                for p in producers {
                    if p == &step.id {
                        return Err(PlanError::ErrCyclicPlan(vec![step.id.0.clone()]));
                    }
                    if !producers_for_step.contains(p) {
                        producers_for_step.push(p.clone());
                    }
                }
            }
        }
        adjacency.insert(step.id.clone(), producers_for_step);
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    let mut marks: IndexMap<StepId, Mark> = in_plan.keys().map(|id| (id.clone(), Mark::Unvisited)).collect();

    fn visit(
        id: &StepId,
        adjacency: &IndexMap<StepId, Vec<StepId>>,
        marks: &mut IndexMap<StepId, Mark>,
        stack: &mut Vec<StepId>,
    ) -> Result<(), PlanError> {
        match marks.get(id).copied().unwrap_or(Mark::Unvisited) {
            Mark::Done => return Ok(()),
            Mark::InProgress => {
                let pos = stack.iter().position(|s| s == id).unwrap_or(0);
                let cycle: Vec<String> = stack[pos..].iter().map(|s| s.0.clone()).collect();
                return Err(PlanError::ErrCyclicPlan(cycle));
            }
            Mark::Unvisited => {}
        }
        marks.insert(id.clone(), Mark::InProgress);
        stack.push(id.clone());
        if let Some(next) = adjacency.get(id) {
            for n in next {
                visit(n, adjacency, marks, stack)?;
            }
        }
        stack.pop();
        marks.insert(id.clone(), Mark::Done);
        Ok(())
    }

    let ids: Vec<StepId> = in_plan.keys().cloned().collect();
    for id in ids {
        let mut stack = Vec::new();
        visit(&id, &adjacency, &mut marks, &mut stack)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttributeDecl, HttpSpec, StepKind};

    fn out(ty: AttributeType) -> AttributeDecl {
        AttributeDecl { role: AttributeRole::Output, ty, default: None, for_each: false }
    }
    fn required(ty: AttributeType) -> AttributeDecl {
        AttributeDecl { role: AttributeRole::Required, ty, default: None, for_each: false }
    }

    fn sync_step(id: &str, attrs: Vec<(&str, AttributeDecl)>) -> Step {
        Step {
            id: id.into(),
            name: id.into(),
            version: 1,
            kind: StepKind::Sync,
            attributes: attrs.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            predicate: None,
            http: Some(HttpSpec { endpoint: "http://x".into(), timeout_ms: 1000, health_check: None }),
            script: None,
            flow: None,
            work_config: None,
            memoizable: false,
            labels: IndexMap::new(),
        }
    }

    #[test]
    fn single_step_plan_marks_required_input() {
        let mut catalog = IndexMap::new();
        catalog.insert(StepId::from("greet"), sync_step("greet", vec![("name", required(AttributeType::String)), ("greeting", out(AttributeType::String))]));
        let plan = build_plan(&catalog, &[StepId::from("greet")]).unwrap();
        assert_eq!(plan.required, vec!["name".to_string()]);
        assert_eq!(plan.steps.len(), 1);
    }

    #[test]
    fn chained_steps_pull_producer_into_plan() {
        let mut catalog = IndexMap::new();
        catalog.insert(StepId::from("a"), sync_step("a", vec![("x", required(AttributeType::Number)), ("y", out(AttributeType::Number))]));
        catalog.insert(StepId::from("b"), sync_step("b", vec![("y", required(AttributeType::Number)), ("z", out(AttributeType::Number))]));
        let plan = build_plan(&catalog, &[StepId::from("b")]).unwrap();
        assert_eq!(plan.required, vec!["x".to_string()]);
        assert!(plan.contains_step(&StepId::from("a")));
        assert!(plan.contains_step(&StepId::from("b")));
    }

    #[test]
    fn unknown_goal_rejected() {
        let catalog: IndexMap<StepId, Step> = IndexMap::new();
        let err = build_plan(&catalog, &[StepId::from("nope")]).unwrap_err();
        assert!(matches!(err, PlanError::UnknownGoal(_)));
    }

    #[test]
    fn self_cycle_rejected() {
        let mut catalog = IndexMap::new();
        catalog.insert(
            StepId::from("a"),
            sync_step("a", vec![("x", required(AttributeType::Number)), ("x_out", out(AttributeType::Number))]),
        );
        // Make "a" both consumer and producer of the same attribute name by
        // reusing `x` as its own output too.
        catalog.get_mut(&StepId::from("a")).unwrap().attributes.insert("x".to_string(), out(AttributeType::Number));
        let err = build_plan(&catalog, &[StepId::from("a")]).unwrap_err();
        assert!(matches!(err, PlanError::ErrCyclicPlan(_)));
    }

    #[test]
    fn two_step_cycle_rejected() {
        let mut catalog = IndexMap::new();
        catalog.insert(StepId::from("a"), sync_step("a", vec![("p", required(AttributeType::Number)), ("q", out(AttributeType::Number))]));
        catalog.insert(StepId::from("b"), sync_step("b", vec![("q", required(AttributeType::Number)), ("p", out(AttributeType::Number))]));
        let err = build_plan(&catalog, &[StepId::from("a")]).unwrap_err();
        assert!(matches!(err, PlanError::ErrCyclicPlan(_)));
    }

    #[test]
    fn for_each_over_non_array_producer_rejected() {
        let mut catalog = IndexMap::new();
        catalog.insert(StepId::from("src"), sync_step("src", vec![("n", out(AttributeType::Number))]));
        let mut consumer = sync_step("sq", vec![("sq_out", out(AttributeType::Number))]);
        consumer.attributes.insert("n".to_string(), AttributeDecl { role: AttributeRole::Required, ty: AttributeType::Number, default: None, for_each: true });
        catalog.insert(StepId::from("sq"), consumer);
        let err = build_plan(&catalog, &[StepId::from("sq")]).unwrap_err();
        assert!(matches!(err, PlanError::ForEachProviderNotArray(_)));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use crate::model::{AttributeDecl, HttpSpec, StepKind};
    use proptest::prelude::*;

    fn chain_step(id: usize) -> Step {
        let mut attributes = IndexMap::new();
        attributes.insert(
            format!("attr{id}"),
            AttributeDecl { role: AttributeRole::Required, ty: AttributeType::Number, default: None, for_each: false },
        );
        attributes.insert(
            format!("attr{}", id + 1),
            AttributeDecl { role: AttributeRole::Output, ty: AttributeType::Number, default: None, for_each: false },
        );
        Step {
            id: StepId::from(format!("s{id}")),
            name: format!("s{id}"),
            version: 1,
            kind: StepKind::Sync,
            attributes,
            predicate: None,
            http: Some(HttpSpec { endpoint: "http://x".into(), timeout_ms: 1000, health_check: None }),
            script: None,
            flow: None,
            work_config: None,
            memoizable: false,
            labels: IndexMap::new(),
        }
    }

    proptest! {
        /// A linear producer chain of any length pulls in every link and
        /// requires exactly the first link's input attribute, never more.
        #[test]
        fn linear_chain_pulls_in_every_link_and_minimizes_required(len in 1usize..20) {
            let mut catalog = IndexMap::new();
            for i in 0..len {
                catalog.insert(StepId::from(format!("s{i}")), chain_step(i));
            }
            let goal = StepId::from(format!("s{}", len - 1));
            let plan = build_plan(&catalog, &[goal]).unwrap();

            prop_assert_eq!(plan.steps.len(), len);
            prop_assert_eq!(plan.required, vec!["attr0".to_string()]);
            for i in 0..len {
                prop_assert!(plan.contains_step(&StepId::from(format!("s{i}"))));
            }
        }

        /// Any catalog built as a linear chain is always acyclic, regardless
        /// of length: `build_plan` never reports `ErrCyclicPlan` for it.
        #[test]
        fn linear_chain_is_never_reported_cyclic(len in 1usize..20) {
            let mut catalog = IndexMap::new();
            for i in 0..len {
                catalog.insert(StepId::from(format!("s{i}")), chain_step(i));
            }
            let goal = StepId::from(format!("s{}", len - 1));
            prop_assert!(build_plan(&catalog, &[goal]).is_ok());
        }
    }
}
