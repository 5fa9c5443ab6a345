use crate::subscription::TransportError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Automation/script run that caused an event, keyed by context id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    pub run_id: String,
    pub domain: String,
    pub item_id: String,
}

pub type TraceContexts = HashMap<String, TraceContext>;

/// A person record. Only persons linked to a user account contribute names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    #[serde(default)]
    pub user_id: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
}

/// Lookups the renderer needs alongside the entries.
#[async_trait]
pub trait AuxiliarySource: Send + Sync {
    async fn load_trace_contexts(&self) -> Result<TraceContexts, TransportError>;

    async fn load_persons(&self) -> Result<Vec<Person>, TransportError>;

    async fn load_users(&self) -> Result<Vec<User>, TransportError>;
}

/// An auxiliary source with nothing in it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuxiliary;

#[async_trait]
impl AuxiliarySource for NoAuxiliary {
    async fn load_trace_contexts(&self) -> Result<TraceContexts, TransportError> {
        Ok(TraceContexts::new())
    }

    async fn load_persons(&self) -> Result<Vec<Person>, TransportError> {
        Ok(Vec::new())
    }

    async fn load_users(&self) -> Result<Vec<User>, TransportError> {
        Ok(Vec::new())
    }
}

/// Build the `user_id -> display name` table.
///
/// Person names win; user accounts only fill ids no person claimed.
pub fn build_user_names(persons: &[Person], users: Option<&[User]>) -> HashMap<String, String> {
    let mut names: HashMap<String, String> = persons
        .iter()
        .filter_map(|p| p.user_id.as_ref().map(|id| (id.clone(), p.name.clone())))
        .collect();

    for user in users.unwrap_or_default() {
        names
            .entry(user.id.clone())
            .or_insert_with(|| user.name.clone());
    }

    names
}
