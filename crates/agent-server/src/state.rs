use std::sync::Arc;

use crate::project::ProjectManager;

#[derive(Clone)]
pub struct AppState {
    pub project: Arc<ProjectManager>,
}

impl AppState {
    pub fn new(project: Arc<ProjectManager>) -> Self {
        Self { project }
    }
}
