use crate::infrastructure::error::InfraError;
use crate::infrastructure::record_store::{ExtendedLocalStore, RecordStore, StoreKind};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthState {
    pub is_authenticated: bool,
    pub is_pro: bool,
}

pub fn select_store_kind(is_authenticated: bool, is_pro: bool) -> StoreKind {
    if is_authenticated && is_pro {
        StoreKind::Remote
    } else {
        StoreKind::Local
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreTransition {
    pub previous: StoreKind,
    pub current: StoreKind,
}

impl StoreTransition {
    pub fn is_upgrade(&self) -> bool {
        self.previous == StoreKind::Local && self.current == StoreKind::Remote
    }
}

pub struct StoreSelector {
    local: Arc<dyn RecordStore>,
    remote: Arc<dyn RecordStore>,
    extended: Option<Arc<dyn ExtendedLocalStore>>,
    auth_state: Mutex<AuthState>,
    active: watch::Sender<StoreKind>,
}

impl StoreSelector {
    pub fn new<L>(local: Arc<L>, remote: Arc<dyn RecordStore>) -> Self
    where
        L: ExtendedLocalStore + 'static,
    {
        let extended: Arc<dyn ExtendedLocalStore> = local.clone();
        Self::build(local, remote, Some(extended))
    }

    pub fn with_plain_local(local: Arc<dyn RecordStore>, remote: Arc<dyn RecordStore>) -> Self {
        Self::build(local, remote, None)
    }

    fn build(
        local: Arc<dyn RecordStore>,
        remote: Arc<dyn RecordStore>,
        extended: Option<Arc<dyn ExtendedLocalStore>>,
    ) -> Self {
        let (active, _) = watch::channel(StoreKind::Local);
        Self {
            local,
            remote,
            extended,
            auth_state: Mutex::new(AuthState::default()),
            active,
        }
    }

    pub fn auth_state(&self) -> AuthState {
        self.auth_state
            .lock()
            .map(|state| *state)
            .unwrap_or_default()
    }

    pub fn active_kind(&self) -> StoreKind {
        *self.active.borrow()
    }

    pub fn update_auth_state(&self, auth_state: AuthState) -> Result<StoreTransition, InfraError> {
        {
            let mut current = self.auth_state.lock().map_err(|error| {
                InfraError::InvalidConfig(format!("auth state lock poisoned: {error}"))
            })?;
            *current = auth_state;
        }

        let next = select_store_kind(auth_state.is_authenticated, auth_state.is_pro);
        let previous = self.active.send_replace(next);
        if previous != next {
            info!(
                from = previous.as_str(),
                to = next.as_str(),
                "active record store changed"
            );
        }
        Ok(StoreTransition {
            previous,
            current: next,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<StoreKind> {
        self.active.subscribe()
    }

    /// Resolve once per logical operation; the handle stays valid if the selection flips mid-call.
    pub fn active(&self) -> Arc<dyn RecordStore> {
        match self.active_kind() {
            StoreKind::Local => Arc::clone(&self.local),
            StoreKind::Remote => Arc::clone(&self.remote),
        }
    }

    pub fn extended(&self) -> Option<Arc<dyn ExtendedLocalStore>> {
        match self.active_kind() {
            StoreKind::Local => self.extended.clone(),
            StoreKind::Remote => None,
        }
    }

    pub fn local(&self) -> Arc<dyn RecordStore> {
        Arc::clone(&self.local)
    }

    pub fn remote(&self) -> Arc<dyn RecordStore> {
        Arc::clone(&self.remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::NewTodo;
    use crate::infrastructure::local_store::InMemoryRecordStore;

    fn selector() -> StoreSelector {
        StoreSelector::new(
            Arc::new(InMemoryRecordStore::with_kind(StoreKind::Local)),
            Arc::new(InMemoryRecordStore::with_kind(StoreKind::Remote)),
        )
    }

    #[test]
    fn selection_truth_table() {
        assert_eq!(select_store_kind(false, false), StoreKind::Local);
        assert_eq!(select_store_kind(true, false), StoreKind::Local);
        assert_eq!(select_store_kind(false, true), StoreKind::Local);
        assert_eq!(select_store_kind(true, true), StoreKind::Remote);
    }

    #[tokio::test]
    async fn writes_go_to_exactly_one_store() {
        let selector = selector();
        selector
            .active()
            .create_todo(NewTodo::titled("local only"))
            .await
            .expect("create local");

        let transition = selector
            .update_auth_state(AuthState {
                is_authenticated: true,
                is_pro: true,
            })
            .expect("update");
        assert!(transition.is_upgrade());

        selector
            .active()
            .create_todo(NewTodo::titled("remote only"))
            .await
            .expect("create remote");

        let local = selector.local().list_todos().await.expect("list local");
        let remote = selector.remote().list_todos().await.expect("list remote");
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].title, "local only");
        assert_eq!(remote.len(), 1);
        assert_eq!(remote[0].title, "remote only");
    }

    #[tokio::test]
    async fn subscribers_observe_selection_changes() {
        let selector = selector();
        let mut receiver = selector.subscribe();
        assert_eq!(*receiver.borrow(), StoreKind::Local);

        selector
            .update_auth_state(AuthState {
                is_authenticated: true,
                is_pro: true,
            })
            .expect("update");
        receiver.changed().await.expect("change published");
        assert_eq!(*receiver.borrow_and_update(), StoreKind::Remote);

        let transition = selector
            .update_auth_state(AuthState {
                is_authenticated: false,
                is_pro: true,
            })
            .expect("sign out");
        assert_eq!(transition.current, StoreKind::Local);
        assert!(!transition.is_upgrade());
    }

    #[test]
    fn extended_capability_only_while_local_is_active() {
        let selector = selector();
        assert!(selector.extended().is_some());

        selector
            .update_auth_state(AuthState {
                is_authenticated: true,
                is_pro: true,
            })
            .expect("update");
        assert!(selector.extended().is_none());

        let plain = StoreSelector::with_plain_local(
            Arc::new(InMemoryRecordStore::default()),
            Arc::new(InMemoryRecordStore::with_kind(StoreKind::Remote)),
        );
        assert!(plain.extended().is_none());
    }
}
