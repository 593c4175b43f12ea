pub mod orders;
pub mod status;

use actix_web::web;

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    orders::register_routes(cfg);
    status::register_routes(cfg);
}
