mod cart;
mod catalog;
mod helpers;
mod recipe;
mod seed;
mod user;

pub(crate) use cart::cmd_cart_export;
pub(crate) use catalog::{cmd_ingredient_search, cmd_tag_list};
pub(crate) use recipe::{RecipeListArgs, cmd_recipe_list, cmd_recipe_show};
pub(crate) use seed::cmd_seed;
pub(crate) use user::{UserArgs, cmd_user_create, cmd_user_list, cmd_user_token};
