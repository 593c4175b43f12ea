pub mod chaos_admin;
pub mod payments;

use actix_web::web;

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    payments::register_routes(cfg);
    chaos_admin::register_routes(cfg);
}
