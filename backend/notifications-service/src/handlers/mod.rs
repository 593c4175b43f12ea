pub mod events;

use actix_web::web;

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    events::register_routes(cfg);
}
