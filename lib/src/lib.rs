/// Initialize logging with the given default level. Respects `RUST_LOG` overrides.
pub fn init_logging(default_level: log::LevelFilter) {
    env_logger::Builder::new()
        .filter_level(default_level)
        .parse_default_env()
        .init();
}

pub mod controller;
pub mod detect;
pub mod driver;
pub mod effect;
pub mod event;
pub mod frame;

// re-export the color type, since it appears throughout our API
pub use smart_leds::RGB8;
