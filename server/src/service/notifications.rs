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

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use resources::{primitives::Id, InAppNotification};

use crate::state::Inner;

#[derive(Clone, Default)]
pub struct Notifications {
    by_id: HashMap<Id, InAppNotification>,
}

impl Notifications {
    pub fn insert(&mut self, notification: InAppNotification) {
        self.by_id.insert(notification.id.clone(), notification);
    }

    pub fn iter(&self) -> impl Iterator<Item = &InAppNotification> {
        self.by_id.values()
    }

    /// Notifications of a user, newest first.
    pub fn for_user(&self, user_id: &Id) -> Vec<&InAppNotification> {
        let mut ret = self
            .by_id
            .values()
            .filter(|n| &n.user_id == user_id)
            .collect::<Vec<_>>();
        ret.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));

        ret
    }
}

impl Inner {
    pub fn notification_push(
        &mut self,
        user_id: &Id,
        document_id: &Id,
        title: String,
        message: String,
        now: DateTime<Utc>,
    ) {
        self.notifications.insert(InAppNotification {
            id: Id::generate(),
            user_id: user_id.clone(),
            document_id: document_id.clone(),
            title,
            message,
            created_at: now,
            read: false,
        });
    }
}
