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

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use resources::{
    primitives::Id,
    template::{StepConfig, WorkflowTemplate},
};

use crate::state::Inner;

use super::Error;

#[derive(Clone, Default)]
pub struct Templates {
    by_id: HashMap<Id, WorkflowTemplate>,
}

/// Changes applied by a template update. A given step list replaces the
/// existing one as a whole.
#[derive(Clone, Debug, Default)]
pub struct TemplatePatch {
    pub name: Option<String>,
    pub area_id: Option<Id>,
    pub description: Option<String>,
    pub steps: Option<Vec<StepConfig>>,
    pub is_active: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct TemplateFilter {
    pub area_id: Option<Id>,
    pub is_active: Option<bool>,
}

impl Templates {
    pub fn insert(&mut self, template: WorkflowTemplate) {
        self.by_id.insert(template.id.clone(), template);
    }

    pub fn get(&self, id: &Id) -> Option<&WorkflowTemplate> {
        self.by_id.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkflowTemplate> {
        self.by_id.values()
    }
}

impl Inner {
    pub fn template_create(
        &mut self,
        tenant_id: Id,
        area_id: Id,
        name: String,
        description: Option<String>,
        steps: Vec<StepConfig>,
        now: DateTime<Utc>,
    ) -> Result<WorkflowTemplate, Error> {
        let name = validate_name(&name)?;
        validate_steps(&steps)?;

        let template = WorkflowTemplate {
            id: Id::generate(),
            tenant_id,
            area_id,
            name,
            description,
            steps,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        self.templates.insert(template.clone());

        Ok(template)
    }

    pub fn template_update(
        &mut self,
        tenant_id: &Id,
        id: &Id,
        patch: TemplatePatch,
        now: DateTime<Utc>,
    ) -> Result<WorkflowTemplate, Error> {
        let mut template = self.template_get(tenant_id, id)?.clone();

        if let Some(name) = patch.name {
            template.name = validate_name(&name)?;
        }

        if let Some(area_id) = patch.area_id {
            template.area_id = area_id;
        }

        if let Some(description) = patch.description {
            template.description = Some(description);
        }

        if let Some(steps) = patch.steps {
            validate_steps(&steps)?;

            template.steps = steps;
        }

        if let Some(is_active) = patch.is_active {
            template.is_active = is_active;
        }

        template.updated_at = now;

        self.templates.insert(template.clone());

        Ok(template)
    }

    pub fn template_duplicate(
        &mut self,
        tenant_id: &Id,
        id: &Id,
        new_name: String,
        target_area: Option<Id>,
        now: DateTime<Utc>,
    ) -> Result<WorkflowTemplate, Error> {
        let source = self.template_get(tenant_id, id)?;

        let template = WorkflowTemplate {
            id: Id::generate(),
            tenant_id: source.tenant_id.clone(),
            area_id: target_area.unwrap_or_else(|| source.area_id.clone()),
            name: validate_name(&new_name)?,
            description: source.description.clone(),
            steps: source.steps.clone(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        self.templates.insert(template.clone());

        Ok(template)
    }

    pub fn template_get(&self, tenant_id: &Id, id: &Id) -> Result<&WorkflowTemplate, Error> {
        match self.templates.get(id) {
            Some(template) if &template.tenant_id == tenant_id => Ok(template),
            _ => Err(Error::TemplateNotFound(id.clone())),
        }
    }

    pub fn template_list(&self, tenant_id: &Id, filter: &TemplateFilter) -> Vec<&WorkflowTemplate> {
        let mut ret = self
            .templates
            .iter()
            .filter(|t| &t.tenant_id == tenant_id)
            .filter(|t| match &filter.area_id {
                Some(area_id) => &t.area_id == area_id,
                None => true,
            })
            .filter(|t| match filter.is_active {
                Some(is_active) => t.is_active == is_active,
                None => true,
            })
            .collect::<Vec<_>>();
        ret.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));

        ret
    }
}

/// A step list is valid if it is not empty, every step names a role and
/// no two steps share the same order.
pub fn validate_steps(steps: &[StepConfig]) -> Result<(), Error> {
    if steps.is_empty() {
        return Err(Error::InvalidTemplate("template has no steps".into()));
    }

    let mut orders = HashSet::new();
    for step in steps {
        if step.role.trim().is_empty() {
            return Err(Error::InvalidTemplate(format!(
                "step {} has no role",
                step.order
            )));
        }

        if !orders.insert(step.order) {
            return Err(Error::InvalidTemplate(format!(
                "step order {} is used more than once",
                step.order
            )));
        }
    }

    Ok(())
}

fn validate_name(name: &str) -> Result<String, Error> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::InvalidTemplate("template name is empty".into()));
    }

    Ok(name.to_owned())
}
