pub mod chaos_admin;
pub mod inventory;

use actix_web::web;

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    inventory::register_routes(cfg);
    chaos_admin::register_routes(cfg);
}
