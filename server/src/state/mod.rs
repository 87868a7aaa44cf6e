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

mod persist;

use std::mem::take;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::external::Outgoing;
use crate::service::{
    Artifacts, AuditEvents, Documents, Notifications, Requests, Signatures, Templates, Workflows,
};

#[derive(Clone, Default)]
pub struct State {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Clone, Default)]
pub struct Inner {
    pub(crate) templates: Templates,
    pub(crate) documents: Documents,
    pub(crate) workflows: Workflows,
    pub(crate) requests: Requests,
    pub(crate) signatures: Signatures,
    pub(crate) artifacts: Artifacts,
    pub(crate) audit_events: AuditEvents,
    pub(crate) notifications: Notifications,

    pub(crate) outbox: Vec<Outgoing>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_inner(inner: Inner) -> Self {
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().await
    }

    /// Runs `f` on a working copy of the state. The copy replaces the
    /// shared state only if `f` succeeds, so a failed operation leaves no
    /// trace. Messages queued by `f` are handed back for delivery after
    /// the commit.
    pub async fn transaction<F, T, E>(&self, f: F) -> Result<(T, Vec<Outgoing>), E>
    where
        F: FnOnce(&mut Inner) -> Result<T, E>,
    {
        let mut guard = self.inner.lock().await;

        let mut work = guard.clone();
        let ret = f(&mut work)?;
        let outbox = work.take_outbox();

        *guard = work;

        Ok((ret, outbox))
    }
}

impl Inner {
    pub fn documents_mut(&mut self) -> &mut Documents {
        &mut self.documents
    }

    pub(crate) fn take_outbox(&mut self) -> Vec<Outgoing> {
        take(&mut self.outbox)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    use chrono::Utc;
    use resources::{primitives::Id, InAppNotification};

    use crate::service::Error;

    fn notification(user_id: &Id) -> InAppNotification {
        InAppNotification {
            id: Id::generate(),
            user_id: user_id.clone(),
            document_id: Id::generate(),
            title: "Signed".into(),
            message: "Someone signed".into(),
            created_at: Utc::now(),
            read: false,
        }
    }

    #[tokio::test]
    async fn failed_transaction_keeps_previous_state() {
        let state = State::new();
        let user = Id::generate();

        let res: Result<((), _), Error> = state
            .transaction(|inner| {
                inner.notifications.insert(notification(&user));

                Err(Error::NoParties)
            })
            .await;
        assert!(res.is_err());
        assert!(state.lock().await.notifications.for_user(&user).is_empty());

        let ((), outbox) = state
            .transaction(|inner| {
                inner.notifications.insert(notification(&user));

                Ok::<_, Error>(())
            })
            .await
            .unwrap();
        assert!(outbox.is_empty());
        assert_eq!(state.lock().await.notifications.for_user(&user).len(), 1);
    }
}
