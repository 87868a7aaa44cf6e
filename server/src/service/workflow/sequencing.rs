/*
 * Copyright (c) 2021 gematik GmbH
 * 
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 * 
 *    http://www.apache.org/licenses/LICENSE-2.0
 * 
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 *
 */

use resources::{template::ExecutionMode, WorkflowStep};

/// Groups the steps of an instance into phases that become eligible
/// together. A step joins the previous phase if both share the same phase
/// index or if both are marked parallel. Steps are expected in `step_index`
/// order.
pub fn phases<'a>(steps: &[&'a WorkflowStep]) -> Vec<Vec<&'a WorkflowStep>> {
    let mut ret: Vec<Vec<&'a WorkflowStep>> = Vec::new();

    for &step in steps {
        let joins_previous = match ret.last().and_then(|phase| phase.last()) {
            Some(prev) => {
                prev.phase_index == step.phase_index
                    || (prev.execution_type == ExecutionMode::Parallel
                        && step.execution_type == ExecutionMode::Parallel)
            }
            None => false,
        };

        match ret.last_mut() {
            Some(phase) if joins_previous => phase.push(step),
            _ => ret.push(vec![step]),
        }
    }

    ret
}

/// The incomplete steps of the first phase that is not yet complete. No
/// step of a later phase is returned before every earlier phase completed.
pub fn next_steps_to_notify<'a>(steps: &[&'a WorkflowStep]) -> Vec<&'a WorkflowStep> {
    phases(steps)
        .into_iter()
        .find(|phase| phase.iter().any(|step| !step.is_completed()))
        .map(|phase| {
            phase
                .into_iter()
                .filter(|step| !step.is_completed())
                .collect()
        })
        .unwrap_or_default()
}

pub fn is_complete(steps: &[&WorkflowStep]) -> bool {
    !steps.is_empty() && steps.iter().all(|step| step.is_completed())
}

#[cfg(test)]
pub mod tests {
    use super::*;

    use chrono::Utc;
    use resources::{primitives::Id, template::StepAction};

    fn step(step_index: u32, phase_index: u32, mode: ExecutionMode, done: bool) -> WorkflowStep {
        WorkflowStep {
            id: Id::generate(),
            instance_id: Id::generate(),
            party_id: Id::generate(),
            step_index,
            phase_index,
            execution_type: mode,
            action: StepAction::Sign,
            deadline_at: None,
            completed_at: if done { Some(Utc::now()) } else { None },
        }
    }

    fn indices(steps: Vec<&WorkflowStep>) -> Vec<u32> {
        steps.into_iter().map(|s| s.step_index).collect()
    }

    #[test]
    fn sequential_steps_are_notified_one_by_one() {
        use ExecutionMode::Sequential as S;

        let a = step(1, 1, S, false);
        let b = step(2, 2, S, false);
        assert_eq!(indices(next_steps_to_notify(&[&a, &b])), vec![1]);

        let a = step(1, 1, S, true);
        assert_eq!(indices(next_steps_to_notify(&[&a, &b])), vec![2]);
    }

    #[test]
    fn parallel_block_is_notified_together() {
        use ExecutionMode::{Parallel as P, Sequential as S};

        let a = step(1, 1, S, true);
        let b = step(2, 2, P, false);
        let c = step(3, 3, P, true);
        let d = step(4, 4, P, false);
        let e = step(5, 5, S, false);
        let steps = [&a, &b, &c, &d, &e];

        assert_eq!(phases(&steps).len(), 3);
        assert_eq!(indices(next_steps_to_notify(&steps)), vec![2, 4]);
    }

    #[test]
    fn same_phase_index_forms_one_phase() {
        use ExecutionMode::Sequential as S;

        let a = step(1, 1, S, false);
        let b = step(2, 1, S, false);
        let c = step(3, 2, S, false);

        assert_eq!(indices(next_steps_to_notify(&[&a, &b, &c])), vec![1, 2]);
    }

    #[test]
    fn completion_requires_all_steps() {
        use ExecutionMode::Sequential as S;

        let a = step(1, 1, S, true);
        let b = step(2, 2, S, false);
        assert!(!is_complete(&[&a, &b]));

        let b = step(2, 2, S, true);
        assert!(is_complete(&[&a, &b]));
        assert!(next_steps_to_notify(&[&a, &b]).is_empty());
        assert!(!is_complete(&[]));
    }
}
