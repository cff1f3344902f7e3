mod api;
mod resource;

pub use api::{
    CreateProjectRequest, CreateTaskRequest, DeleteResponse, HealthResponse, TaskListQuery,
    UpdateProjectRequest, UpdateTaskRequest,
};
pub use resource::{Project, Task, TaskStatus};
