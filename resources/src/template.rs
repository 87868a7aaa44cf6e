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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::primitives::Id;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub id: Id,
    pub tenant_id: Id,
    pub area_id: Id,
    pub name: String,
    pub description: Option<String>,
    pub steps: Vec<StepConfig>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepConfig {
    pub order: u32,
    pub role: String,

    #[serde(default)]
    pub action: StepAction,

    #[serde(default)]
    pub execution_mode: ExecutionMode,

    #[serde(default)]
    pub deadline_hours: Option<u32>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Sequential,
    Parallel,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepAction {
    Sign,
    Approve,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        Self::Sequential
    }
}

impl Default for StepAction {
    fn default() -> Self {
        Self::Sign
    }
}

impl WorkflowTemplate {
    /// Steps ordered by their declared `order`.
    pub fn ordered_steps(&self) -> Vec<&StepConfig> {
        let mut steps = self.steps.iter().collect::<Vec<_>>();
        steps.sort_by_key(|step| step.order);

        steps
    }
}

/// Roles are compared trimmed and lower-cased.
pub fn normalize_role(role: &str) -> String {
    role.trim().to_lowercase()
}

#[cfg(test)]
pub mod tests {
    use super::*;

    #[test]
    fn step_config_defaults() {
        let step: StepConfig = serde_json::from_str(r#"{"order":1,"role":"signer"}"#).unwrap();

        assert_eq!(step.action, StepAction::Sign);
        assert_eq!(step.execution_mode, ExecutionMode::Sequential);
        assert_eq!(step.deadline_hours, None);
    }

    #[test]
    fn roles_are_normalized() {
        assert_eq!(normalize_role("  Witness "), "witness");
    }
}
