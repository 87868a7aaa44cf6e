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

use std::collections::{HashMap, VecDeque};

use resources::{
    primitives::Id,
    template::{normalize_role, ExecutionMode, StepAction, WorkflowTemplate},
    Party,
};
use serde::{Deserialize, Serialize};

use crate::service::{ContactProblem, Error};

/// Ad-hoc step given with a dispatch instead of a template.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineStep {
    pub party_id: Id,
    pub order: u32,

    #[serde(default)]
    pub action: StepAction,

    #[serde(default)]
    pub execution_mode: ExecutionMode,

    #[serde(default)]
    pub deadline_hours: Option<u32>,
}

/// A party bound to a position of the workflow.
#[derive(Clone, Debug, PartialEq)]
pub struct Assignment {
    pub party_id: Id,
    pub phase_index: u32,
    pub execution_type: ExecutionMode,
    pub action: StepAction,
    pub deadline_hours: Option<u32>,
}

pub enum StepSource<'a> {
    Template(&'a WorkflowTemplate),
    Inline(&'a [InlineStep]),
    PerParty,
}

/// Binds parties to workflow positions, ordered by phase. `parties` must be
/// sorted by their order index.
pub fn resolve_assignments(
    parties: &[&Party],
    source: StepSource<'_>,
) -> Result<Vec<Assignment>, Error> {
    let mut ret = match source {
        StepSource::Template(template) => from_template(parties, template)?,
        StepSource::Inline(steps) => from_inline(parties, steps)?,
        StepSource::PerParty => parties
            .iter()
            .enumerate()
            .map(|(i, party)| Assignment {
                party_id: party.id.clone(),
                phase_index: i as u32 + 1,
                execution_type: ExecutionMode::Sequential,
                action: StepAction::Sign,
                deadline_hours: None,
            })
            .collect(),
    };

    ret.sort_by_key(|a| a.phase_index);

    Ok(ret)
}

/// Every party needs the contact data of its notification channel. All
/// offending parties are reported at once.
pub fn validate_contacts(parties: &[&Party]) -> Result<(), Error> {
    let problems = parties
        .iter()
        .filter(|party| !party.has_contact_for_channel())
        .map(|party| ContactProblem {
            party_id: party.id.clone(),
            name: party.name.clone(),
            channel: party.notification_channel,
        })
        .collect::<Vec<_>>();

    if problems.is_empty() {
        Ok(())
    } else {
        Err(Error::ContactDataMissing(problems))
    }
}

fn from_template(parties: &[&Party], template: &WorkflowTemplate) -> Result<Vec<Assignment>, Error> {
    let mut groups: HashMap<String, VecDeque<&Party>> = HashMap::new();
    for party in parties {
        groups
            .entry(normalize_role(&party.role))
            .or_default()
            .push_back(party);
    }

    let mut required: HashMap<String, usize> = HashMap::new();
    for step in &template.steps {
        *required.entry(normalize_role(&step.role)).or_default() += 1;
    }

    for (role, required) in &required {
        let available = groups.get(role).map(VecDeque::len).unwrap_or_default();
        if available < *required {
            return Err(Error::InsufficientParties {
                role: role.clone(),
                required: *required,
                available,
            });
        }
    }

    let mut ret = Vec::with_capacity(template.steps.len());
    for step in template.ordered_steps() {
        let role = normalize_role(&step.role);
        let party = groups
            .get_mut(&role)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| Error::InsufficientParties {
                role: role.clone(),
                required: required.get(&role).copied().unwrap_or_default(),
                available: 0,
            })?;

        ret.push(Assignment {
            party_id: party.id.clone(),
            phase_index: step.order,
            execution_type: step.execution_mode,
            action: step.action,
            deadline_hours: step.deadline_hours,
        });
    }

    Ok(ret)
}

fn from_inline(parties: &[&Party], steps: &[InlineStep]) -> Result<Vec<Assignment>, Error> {
    steps
        .iter()
        .map(|step| {
            if !parties.iter().any(|p| p.id == step.party_id) {
                return Err(Error::PartyNotFound(step.party_id.clone()));
            }

            Ok(Assignment {
                party_id: step.party_id.clone(),
                phase_index: step.order,
                execution_type: step.execution_mode,
                action: step.action,
                deadline_hours: step.deadline_hours,
            })
        })
        .collect()
}
