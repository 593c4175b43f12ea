pub mod proxy;
pub mod status;

use actix_web::web;

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    proxy::register_routes(cfg);
    status::register_routes(cfg);
}
