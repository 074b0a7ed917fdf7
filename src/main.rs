#[macro_use]
extern crate rocket;

use log::info;
use rocket::fairing::AdHoc;
use std::env;

mod board;
mod config;
mod debug_logger;
mod handler;
mod heuristic;
mod pattern;
mod pattern_db;
mod reference;
mod search;
mod solver;
mod stopwatch;
mod walking_distance;

#[launch]
async fn rocket() -> _ {
    // Lots of web hosting services expect you to bind to the port specified by the `PORT`
    // environment variable. However, Rocket looks at the `ROCKET_PORT` environment variable.
    // If we find a value for `PORT`, we set `ROCKET_PORT` to that value.
    if let Ok(port) = env::var("PORT") {
        env::set_var("ROCKET_PORT", &port);
    }

    // We default to 'info' level logging. But if the `RUST_LOG` environment variable is set,
    // we keep that value instead.
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }

    env_logger::init();

    info!("Starting 15-puzzle solver service...");

    // Load configuration once at startup
    let config = config::Config::load_or_default();
    let debug = debug_logger::DebugLogger::new(config.debug.enabled, &config.debug.log_file_path).await;
    let service = handler::SolverService::new(config, debug);

    rocket::build()
        .manage(service)
        .attach(AdHoc::on_response("Server ID Middleware", |_, res| {
            Box::pin(async move {
                res.set_raw_header("Server", "fifteen-puzzle-solver");
            })
        }))
        .mount(
            "/",
            routes![handler::index, handler::solve, handler::generate],
        )
}
