mod favorites;
mod generate;
mod helpers;
mod plan;
mod status;

pub(crate) use favorites::{
    cmd_favorites_add, cmd_favorites_check, cmd_favorites_list, cmd_favorites_remove,
};
pub(crate) use generate::{cmd_generate, cmd_image};
pub(crate) use plan::{
    cmd_plan_add, cmd_plan_add_favorite, cmd_plan_clear, cmd_plan_remove, cmd_plan_show,
};
pub(crate) use status::{cmd_clear, cmd_status};
