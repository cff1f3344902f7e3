mod health;
mod projects;
mod tasks;
mod util;

pub use health::health_check;
pub use projects::{create_project, delete_project, get_project, list_projects, update_project};
pub use tasks::{
    create_task_v1, create_task_v2, delete_task, get_task, list_tasks_v1, list_tasks_v2,
    update_task_v1, update_task_v2,
};
pub use util::{AppJson, AppPath, AppQuery, create_once};
