use std::sync::Arc;

use crate::auth::JwtVerifier;
use crate::services::{
    queue::WorkQueue,
    store::TaskStore,
    tasks::{TaskQueryService, TaskService},
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TaskStore>,
    pub queue: Arc<dyn WorkQueue>,
    pub tasks: Arc<TaskService>,
    pub queries: Arc<TaskQueryService>,
    pub jwt: Arc<JwtVerifier>,
}

impl AppState {
    pub fn new(store: Arc<dyn TaskStore>, queue: Arc<dyn WorkQueue>, jwt: JwtVerifier) -> Self {
        Self {
            tasks: Arc::new(TaskService::new(Arc::clone(&store), Arc::clone(&queue))),
            queries: Arc::new(TaskQueryService::new(Arc::clone(&store))),
            store,
            queue,
            jwt: Arc::new(jwt),
        }
    }
}
